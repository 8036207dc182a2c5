use arsenal_backend::BackendError;
use thiserror::Error;

/// Failure of a single tool invocation. Rendered as an `isError` tool result
/// by the dispatcher, never as a transport fault.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
    #[error("no active session: {0}")]
    TransportState(String),
}

impl ToolError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::NotFound(_) => "NotFound",
            Self::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Self::ToolNotFound(_) => "ToolNotFound",
            Self::TransportState(_) => "TransportState",
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<BackendError> for ToolError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::InvalidInput(msg) => Self::InvalidArgument(msg),
            err if err.is_timeout() => {
                Self::UpstreamUnavailable("backend request timed out".to_string())
            }
            err => Self::UpstreamUnavailable(format!("backend: {}", redact(&err.to_string()))),
        }
    }
}

impl From<arsenal_embed::ProviderError> for ToolError {
    fn from(err: arsenal_embed::ProviderError) -> Self {
        if err.is_timeout() {
            return Self::UpstreamUnavailable("embedding request timed out".to_string());
        }
        Self::UpstreamUnavailable(format!("embedding: {}", redact(&err.to_string())))
    }
}

impl From<arsenal_rerank::ProviderError> for ToolError {
    fn from(err: arsenal_rerank::ProviderError) -> Self {
        if err.is_timeout() {
            return Self::UpstreamUnavailable("rerank request timed out".to_string());
        }
        Self::UpstreamUnavailable(format!("rerank: {}", redact(&err.to_string())))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("backend client: {0}")]
    Backend(#[from] BackendError),
    #[error("embedding client: {0}")]
    Embedding(#[from] arsenal_embed::ProviderError),
    #[error("rerank client: {0}")]
    Rerank(#[from] arsenal_rerank::ProviderError),
}

const MAX_ERROR_TEXT: usize = 400;

/// Masks credential-looking words in upstream error text and caps its
/// length.
pub fn redact(text: &str) -> String {
    let mut out = Vec::new();
    let mut after_bearer = false;
    for word in text.split(' ') {
        let lowered = word.to_ascii_lowercase();
        let secret = after_bearer
            || word.starts_with("ya29.")
            || word.starts_with("sk-")
            || word.starts_with("eyJ")
            || lowered.contains("apikey=")
            || lowered.contains("api_key=")
            || lowered.contains("token=");
        after_bearer = lowered == "bearer";
        out.push(if secret { "[redacted]" } else { word });
    }

    let joined = out.join(" ");
    if joined.chars().count() > MAX_ERROR_TEXT {
        let cut: String = joined.chars().take(MAX_ERROR_TEXT).collect();
        format!("{cut}...")
    } else {
        joined
    }
}

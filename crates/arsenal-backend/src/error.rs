use thiserror::Error;

/// Error code the REST layer returns when a single-object request matched no
/// rows.
pub const NOT_FOUND_CODE: &str = "PGRST116";

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("backend returned invalid response: {0}")]
    InvalidResponse(String),

    #[error("backend API error: status={status}, code={}, message={message}", code.as_deref().unwrap_or("-"))]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { code: Some(code), .. } if code == NOT_FOUND_CODE)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(err) if err.is_timeout())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::Api {
            status: 406,
            code: Some(NOT_FOUND_CODE.to_string()),
            message: message.into(),
        }
    }
}

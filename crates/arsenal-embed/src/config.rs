use std::path::PathBuf;
use std::time::Duration;

/// Where Vertex bearer tokens come from.
#[derive(Debug, Clone)]
pub enum VertexCredentials {
    /// Pre-issued access token, used as is and never refreshed.
    StaticToken(String),
    /// Path to a service account key file.
    ServiceAccountFile(PathBuf),
    /// Service account key JSON held in memory.
    ServiceAccountJson(String),
    /// `gcloud auth print-access-token`.
    GcloudCli,
}

#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub project: String,
    pub location: String,
    pub model: String,
    pub credentials: VertexCredentials,
    pub timeout: Duration,
    pub output_dimensionality: Option<usize>,
    /// Overrides `https://{location}-aiplatform.googleapis.com`.
    pub base_url: Option<String>,
}

impl VertexConfig {
    pub fn new(project: impl Into<String>, credentials: VertexCredentials) -> Self {
        Self {
            project: project.into(),
            location: "us-central1".to_string(),
            model: "text-multilingual-embedding-002".to_string(),
            credentials,
            timeout: Duration::from_secs(15),
            output_dimensionality: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiCompatibleConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.openai.com".to_string(),
            model: model.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EmbeddingProviderConfig {
    Vertex(VertexConfig),
    OpenAiCompatible(OpenAiCompatibleConfig),
}

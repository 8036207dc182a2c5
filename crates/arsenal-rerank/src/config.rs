use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CohereRerankConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl CohereRerankConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "rerank-multilingual-v3.0".to_string(),
            endpoint: "https://api.cohere.com/v2/rerank".to_string(),
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JinaRerankConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl JinaRerankConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "jina-reranker-v2-base-multilingual".to_string(),
            endpoint: "https://api.jina.ai/v1/rerank".to_string(),
            timeout: Duration::from_secs(8),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RerankProviderConfig {
    Cohere(CohereRerankConfig),
    Jina(JinaRerankConfig),
}

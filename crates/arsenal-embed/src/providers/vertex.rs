use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::auth::TokenSource;
use crate::config::VertexConfig;
use crate::error::ProviderError;
use crate::traits::EmbeddingProvider;
use crate::types::{EmbeddingRequest, EmbeddingResponse, EmbeddingTask};

/// Text embeddings through the Vertex AI `:predict` endpoint of a
/// publisher model.
pub struct VertexEmbeddingProvider {
    config: VertexConfig,
    client: Client,
    tokens: TokenSource,
}

impl VertexEmbeddingProvider {
    pub fn new(config: VertexConfig) -> Result<Self, ProviderError> {
        if config.project.trim().is_empty() {
            return Err(ProviderError::Config(
                "vertex project id is empty".to_string(),
            ));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        let tokens = TokenSource::new(config.credentials.clone(), client.clone(), config.timeout);
        Ok(Self {
            config,
            client,
            tokens,
        })
    }

    fn predict_url(&self) -> String {
        let base = self.config.base_url.clone().unwrap_or_else(|| {
            format!("https://{}-aiplatform.googleapis.com", self.config.location)
        });
        format!(
            "{}/v1/projects/{}/locations/{}/publishers/google/models/{}:predict",
            base.trim_end_matches('/'),
            self.config.project,
            self.config.location,
            self.config.model
        )
    }

    fn map_task(task: Option<EmbeddingTask>) -> Option<&'static str> {
        match task {
            Some(EmbeddingTask::Query) => Some("RETRIEVAL_QUERY"),
            Some(EmbeddingTask::Document) => Some("RETRIEVAL_DOCUMENT"),
            None => None,
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for VertexEmbeddingProvider {
    fn name(&self) -> &'static str {
        "vertex"
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        if request.inputs.is_empty() {
            return Err(ProviderError::Config(
                "embedding input is empty".to_string(),
            ));
        }

        let task_type = Self::map_task(request.task);
        let payload = PredictRequest {
            instances: request
                .inputs
                .iter()
                .map(|content| Instance { content, task_type })
                .collect(),
            parameters: request
                .dimensions
                .or(self.config.output_dimensionality)
                .map(|d| Parameters {
                    output_dimensionality: d,
                }),
        };

        let token = self.tokens.token().await?;
        let res = self
            .client
            .post(self.predict_url())
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: PredictResponse = res.json().await?;
        if parsed.predictions.len() != request.inputs.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} predictions, got {}",
                request.inputs.len(),
                parsed.predictions.len()
            )));
        }

        Ok(EmbeddingResponse {
            provider: self.name().to_string(),
            model: self.config.model.clone(),
            vectors: parsed
                .predictions
                .into_iter()
                .map(|p| p.embeddings.values)
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    instances: Vec<Instance<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Parameters>,
}

#[derive(Debug, Serialize)]
struct Instance<'a> {
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_type: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Parameters {
    output_dimensionality: usize,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    embeddings: PredictionEmbeddings,
}

#[derive(Debug, Deserialize)]
struct PredictionEmbeddings {
    values: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VertexCredentials;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> VertexEmbeddingProvider {
        let mut cfg = VertexConfig::new(
            "demo-project",
            VertexCredentials::StaticToken("ya29.test".to_string()),
        );
        cfg.base_url = Some(server.uri());
        cfg.timeout = Duration::from_secs(2);
        VertexEmbeddingProvider::new(cfg).expect("provider")
    }

    #[tokio::test]
    async fn predict_sends_task_type_and_parses_values() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/v1/projects/demo-project/locations/us-central1/publishers/google/models/text-multilingual-embedding-002:predict",
            ))
            .and(header("authorization", "Bearer ya29.test"))
            .and(body_partial_json(serde_json::json!({
                "instances": [{"content": "tênis de corrida", "task_type": "RETRIEVAL_QUERY"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "predictions": [{"embeddings": {"values": [0.1, 0.2, 0.3], "statistics": {"token_count": 4}}}]
            })))
            .mount(&server)
            .await;

        let res = provider_for(&server)
            .embed(EmbeddingRequest::single("tênis de corrida", EmbeddingTask::Query))
            .await
            .expect("embed");
        assert_eq!(res.provider, "vertex");
        assert_eq!(res.into_single(), Some(vec![0.1, 0.2, 0.3]));
    }

    #[tokio::test]
    async fn non_success_status_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("permission denied"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .embed(EmbeddingRequest::single("x", EmbeddingTask::Query))
            .await
            .expect_err("403");
        assert!(matches!(err, ProviderError::Api { status: 403, .. }));
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let mut cfg = VertexConfig::new(
            "demo-project",
            VertexCredentials::StaticToken("t".to_string()),
        );
        cfg.base_url = Some(server.uri());
        cfg.timeout = Duration::from_millis(200);
        let err = VertexEmbeddingProvider::new(cfg)
            .expect("provider")
            .embed(EmbeddingRequest::single("x", EmbeddingTask::Query))
            .await
            .expect_err("timeout");
        assert!(err.is_timeout());
    }
}

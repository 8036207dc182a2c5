use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::CohereRerankConfig;
use crate::error::ProviderError;
use crate::traits::RerankProvider;
use crate::types::{RerankItem, RerankRequest, RerankResponse};

#[derive(Clone)]
pub struct CohereRerankProvider {
    config: CohereRerankConfig,
    client: Client,
}

impl CohereRerankProvider {
    pub fn new(config: CohereRerankConfig) -> Result<Self, ProviderError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }
}

#[async_trait::async_trait]
impl RerankProvider for CohereRerankProvider {
    fn name(&self) -> &'static str {
        "cohere"
    }

    async fn rerank(&self, request: RerankRequest) -> Result<RerankResponse, ProviderError> {
        if request.documents.is_empty() {
            return Err(ProviderError::Config(
                "rerank documents is empty".to_string(),
            ));
        }

        let payload = CohereRerankBody {
            model: &self.config.model,
            query: &request.query,
            top_n: request.top_n.unwrap_or(request.documents.len()),
            documents: &request.documents,
        };

        let res = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Api { status, body });
        }

        let parsed: CohereRerankResponse = res.json().await?;
        if parsed.results.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "cohere rerank returned empty results".to_string(),
            ));
        }

        Ok(RerankResponse {
            provider: self.name().to_string(),
            model: self.config.model.clone(),
            items: parsed
                .results
                .into_iter()
                .map(|it| RerankItem {
                    index: it.index,
                    score: it.score,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CohereRerankBody<'a> {
    model: &'a str,
    query: &'a str,
    top_n: usize,
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct CohereRerankResponse {
    results: Vec<CohereRerankItem>,
}

#[derive(Debug, Deserialize)]
struct CohereRerankItem {
    index: usize,
    #[serde(alias = "relevance_score", alias = "score")]
    score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(endpoint: String) -> CohereRerankProvider {
        let mut cfg = CohereRerankConfig::new("co-test");
        cfg.endpoint = endpoint;
        CohereRerankProvider::new(cfg).expect("provider")
    }

    #[tokio::test]
    async fn rerank_posts_query_and_parses_scores() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer co-test"))
            .and(body_partial_json(serde_json::json!({
                "query": "objeção de preço",
                "top_n": 2
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"index": 1, "relevance_score": 0.91},
                    {"index": 0, "relevance_score": 0.12}
                ]
            })))
            .mount(&server)
            .await;

        let res = provider(format!("{}/v2/rerank", server.uri()))
            .rerank(RerankRequest {
                query: "objeção de preço".to_string(),
                documents: vec!["a".to_string(), "b".to_string()],
                top_n: None,
            })
            .await
            .expect("rerank");
        assert_eq!(res.items.len(), 2);
        assert_eq!(res.ranked_indices(2, 1), vec![1]);
    }

    #[tokio::test]
    async fn empty_documents_fail_before_network() {
        let err = provider("http://127.0.0.1:9/unreachable".to_string())
            .rerank(RerankRequest {
                query: "q".to_string(),
                documents: Vec::new(),
                top_n: None,
            })
            .await
            .expect_err("empty");
        assert!(matches!(err, ProviderError::Config(_)));
    }

    #[test]
    fn cohere_response_score_aliases_parse() {
        let v1 = r#"{"results":[{"index":1,"relevance_score":0.91}]}"#;
        let p1: CohereRerankResponse = serde_json::from_str(v1).expect("parse cohere v1");
        assert_eq!(p1.results[0].index, 1);

        let v2 = r#"{"results":[{"index":0,"score":0.77}]}"#;
        let p2: CohereRerankResponse = serde_json::from_str(v2).expect("parse cohere v2");
        assert!((p2.results[0].score - 0.77).abs() < 1e-6);
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::BackendError;
use crate::query::{Filter, SelectQuery};
use crate::{Backend, Row};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const OPENAPI: &str = "application/openapi+json";
const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    pub base_url: String,
    pub service_key: String,
    pub timeout: Duration,
}

impl PostgrestConfig {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Backend over the managed service's `/rest/v1` and `/storage/v1` APIs,
/// authenticated with the service key.
#[derive(Clone)]
pub struct PostgrestBackend {
    base: Url,
    client: Client,
}

impl PostgrestBackend {
    pub fn new(config: PostgrestConfig) -> Result<Self, BackendError> {
        let base = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|e| BackendError::Config(format!("invalid backend url: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Config(format!(
                "backend url cannot be a base: {base}"
            )));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.service_key)
            .map_err(|_| BackendError::Config("service key is not a valid header".to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_key))
            .map_err(|_| BackendError::Config("service key is not a valid header".to_string()))?;
        headers.insert("apikey", key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self { base, client })
    }

    fn endpoint<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| BackendError::Config("backend url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn table_url(&self, table: &str) -> Result<Url, BackendError> {
        if table.trim().is_empty() {
            return Err(BackendError::InvalidInput("table name is empty".to_string()));
        }
        self.endpoint(["rest", "v1", table])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        debug!(%method, path = url.path(), "backend request");
        self.client.request(method, url)
    }

    async fn write(
        &self,
        method: Method,
        table: &str,
        filters: &[Filter],
        body: Option<Value>,
    ) -> Result<Vec<Row>, BackendError> {
        if filters.is_empty() {
            return Err(BackendError::InvalidInput(format!(
                "{method} on {table} requires at least one filter"
            )));
        }
        let pairs = filters.iter().map(Filter::to_query_pair).collect::<Vec<_>>();
        let mut req = self
            .request(method, self.table_url(table)?)
            .query(&pairs)
            .header("Prefer", RETURN_REPRESENTATION);
        if let Some(body) = body {
            req = req.json(&body);
        }
        read_json(req.send().await?).await
    }
}

#[async_trait]
impl Backend for PostgrestBackend {
    fn name(&self) -> &'static str {
        "postgrest"
    }

    async fn select(&self, query: SelectQuery) -> Result<Vec<Row>, BackendError> {
        let res = self
            .request(Method::GET, self.table_url(&query.table)?)
            .query(&query.to_query_pairs())
            .send()
            .await?;
        read_json(res).await
    }

    async fn select_single(&self, query: SelectQuery) -> Result<Row, BackendError> {
        let res = self
            .request(Method::GET, self.table_url(&query.table)?)
            .query(&query.to_query_pairs())
            .header(ACCEPT, SINGLE_OBJECT)
            .send()
            .await?;
        read_json(res).await
    }

    async fn insert(&self, table: &str, rows: Value) -> Result<Vec<Row>, BackendError> {
        if !rows.is_object() && !rows.is_array() {
            return Err(BackendError::InvalidInput(
                "insert payload must be an object or an array of objects".to_string(),
            ));
        }
        let res = self
            .request(Method::POST, self.table_url(table)?)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(&rows)
            .send()
            .await?;
        read_json(res).await
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        on_conflict: &str,
    ) -> Result<Vec<Row>, BackendError> {
        let res = self
            .request(Method::POST, self.table_url(table)?)
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", MERGE_DUPLICATES)
            .json(&row)
            .send()
            .await?;
        read_json(res).await
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        self.write(Method::PATCH, table, filters, Some(Value::Object(patch)))
            .await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        self.write(Method::DELETE, table, filters, None).await
    }

    async fn rpc(&self, function: &str, params: Value) -> Result<Value, BackendError> {
        let res = self
            .request(Method::POST, self.endpoint(["rest", "v1", "rpc", function])?)
            .json(&params)
            .send()
            .await?;
        read_json(res).await
    }

    async fn list_tables(&self) -> Result<Vec<String>, BackendError> {
        let res = self
            .request(Method::GET, self.endpoint(["rest", "v1", ""])?)
            .header(ACCEPT, OPENAPI)
            .send()
            .await?;
        let doc: OpenApiDoc = read_json(res).await?;
        Ok(doc.table_names())
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, BackendError> {
        if bucket.trim().is_empty() || path.trim().is_empty() {
            return Err(BackendError::InvalidInput(
                "bucket and path are required".to_string(),
            ));
        }
        let mut segments = vec!["storage", "v1", "object", "sign", bucket];
        segments.extend(path.split('/'));
        let res = self
            .request(Method::POST, self.endpoint(segments)?)
            .json(&json!({ "expiresIn": expires_in_secs }))
            .send()
            .await?;
        let signed: SignedUrlResponse = read_json(res).await?;

        // The storage API answers with a path relative to `/storage/v1`.
        if signed.signed_url.starts_with("http") {
            return Ok(signed.signed_url);
        }
        Ok(format!(
            "{}/storage/v1{}",
            self.base.as_str().trim_end_matches('/'),
            signed.signed_url
        ))
    }
}

async fn read_json<T: DeserializeOwned>(res: Response) -> Result<T, BackendError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(api_error(status.as_u16(), &body));
    }
    let bytes = res.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        BackendError::InvalidResponse(format!("unexpected response body ({e})"))
    })
}

fn api_error(status: u16, body: &str) -> BackendError {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| body.trim().to_string());
    let code = parsed.code.map(|c| match c {
        Value::String(s) => s,
        other => other.to_string(),
    });
    BackendError::Api {
        status,
        code,
        message,
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct OpenApiDoc {
    #[serde(default)]
    definitions: serde_json::Map<String, Value>,
    #[serde(default)]
    paths: serde_json::Map<String, Value>,
}

impl OpenApiDoc {
    fn table_names(&self) -> Vec<String> {
        let mut names = if self.definitions.is_empty() {
            self.paths
                .keys()
                .filter_map(|p| p.strip_prefix('/'))
                .filter(|p| !p.is_empty() && !p.starts_with("rpc/"))
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        } else {
            self.definitions.keys().cloned().collect()
        };
        names.sort();
        names.dedup();
        names
    }
}

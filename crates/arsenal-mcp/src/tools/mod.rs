//! Tool handlers. Each handler validates its arguments, talks to the
//! injected clients and returns a [`ToolOutput`] or a [`ToolError`].

mod arsenal;
mod leads;
mod storage;
mod tables;

use std::sync::Arc;

use arsenal_backend::Backend;
use arsenal_embed::EmbeddingProvider;
use arsenal_rerank::RerankProvider;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::config::{SearchConfig, TableAccess, TableNames};
use crate::error::ToolError;
use crate::registry::ToolKind;

/// Clients and settings shared by every handler. Built once at startup.
#[derive(Clone)]
pub struct ToolContext {
    pub backend: Arc<dyn Backend>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub reranker: Option<Arc<dyn RerankProvider>>,
    pub search: SearchConfig,
    pub tables: TableNames,
    pub access: TableAccess,
}

impl ToolContext {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            embedder: None,
            reranker: None,
            search: SearchConfig::default(),
            tables: TableNames::default(),
            access: TableAccess::default(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn RerankProvider>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    fn ensure_table_allowed(&self, table: &str) -> Result<(), ToolError> {
        if self.access.permits(table) {
            Ok(())
        } else {
            Err(ToolError::invalid(format!("tabela não permitida: {table}")))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub structured: Value,
}

impl ToolOutput {
    /// Output whose text block is the structured value serialized as JSON.
    fn json(structured: Value) -> Self {
        Self {
            text: structured.to_string(),
            structured,
        }
    }
}

pub async fn call(ctx: &ToolContext, kind: ToolKind, args: Value) -> Result<ToolOutput, ToolError> {
    match kind {
        ToolKind::BuscarArsenal => arsenal::search(ctx, parse_args(args)?).await,
        ToolKind::ReindexarArsenal => arsenal::reindex(ctx, parse_args(args)?).await,
        ToolKind::BuscarLead => leads::find(ctx, parse_args(args)?).await,
        ToolKind::AtualizarLead => leads::update(ctx, parse_args(args)?).await,
        ToolKind::SalvarLead => leads::save(ctx, parse_args(args)?).await,
        ToolKind::LerTabela => tables::read(ctx, parse_args(args)?).await,
        ToolKind::ModificarDados => tables::modify(ctx, parse_args(args)?).await,
        ToolKind::ListarTabelas => tables::list(ctx).await,
        ToolKind::GerarLinkDownload => storage::signed_link(ctx, parse_args(args)?).await,
    }
}

/// Missing or null arguments decode as an empty object so handlers report
/// the specific field that is absent.
fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    let args = if args.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        args
    };
    serde_json::from_value(args).map_err(|err| ToolError::invalid(err.to_string()))
}

fn required(field: &str, value: Option<String>) -> Result<String, ToolError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ToolError::invalid(format!("'{field}' é obrigatório")))
}

/// Accepts `5` as well as `"5"`; orchestration clients often template
/// numbers into strings.
fn lenient_usize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                serde::de::Error::custom(format!("expected a positive integer, got {n}"))
            }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| {
                serde::de::Error::custom(format!("expected a positive integer, got {s:?}"))
            }),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a positive integer, got {other}"
        ))),
    }
}

/// Accepts strings and numbers, so a phone number sent as `5511999990000`
/// is not rejected.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "lenient_usize")]
        limit: Option<usize>,
        #[serde(default, deserialize_with = "lenient_string")]
        telefone: Option<String>,
    }

    #[test]
    fn lenient_fields_accept_strings_and_numbers() {
        let probe: Probe = parse_args(json!({"limit": "7", "telefone": 5511999990000_u64}))
            .expect("probe");
        assert_eq!(probe.limit, Some(7));
        assert_eq!(probe.telefone.as_deref(), Some("5511999990000"));

        let probe: Probe = parse_args(Value::Null).expect("empty");
        assert_eq!(probe.limit, None);
    }

    #[test]
    fn negative_limit_is_invalid_argument() {
        let err = parse_args::<Probe>(json!({"limit": -1})).expect_err("negative");
        assert_eq!(err.kind(), "InvalidArgument");
    }

    #[test]
    fn required_rejects_blank() {
        assert!(required("telefone", Some("  ".to_string())).is_err());
        assert_eq!(
            required("telefone", Some(" 55 ".to_string())).ok().as_deref(),
            Some("55")
        );
    }
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use arsenal_backend::PostgrestBackend;
use arsenal_embed::build_embedding_provider;
use arsenal_rerank::build_rerank_provider;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::error::ConfigError;
use crate::protocol::{
    tool_error_result, tool_result, JsonRpcRequest, JsonRpcResponse, INVALID_PARAMS,
    INVALID_REQUEST, METHOD_NOT_FOUND,
};
use crate::registry::ToolRegistry;
use crate::session::SessionTable;
use crate::tools::{self, ToolContext};

const DEFAULT_MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC dispatcher shared by every transport.
pub struct McpServer {
    registry: ToolRegistry,
    ctx: ToolContext,
    sessions: Arc<SessionTable>,
}

impl McpServer {
    pub fn new(ctx: ToolContext, registry: ToolRegistry, session_ttl: Duration) -> Self {
        Self {
            registry,
            ctx,
            sessions: Arc::new(SessionTable::new(session_ttl)),
        }
    }

    /// Builds every client from configuration. No network call is made.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let backend = PostgrestBackend::new(config.backend.clone())?;
        let mut ctx = ToolContext::new(Arc::new(backend));
        if let Some(cfg) = config.embedding.clone() {
            ctx = ctx.with_embedder(build_embedding_provider(cfg)?);
        }
        if let Some(cfg) = config.rerank.clone() {
            ctx = ctx.with_reranker(build_rerank_provider(cfg)?);
        }
        ctx.search = config.search.clone();
        ctx.tables = config.tables.clone();
        ctx.access = config.access.clone();

        info!(
            embedder = ctx.embedder.as_ref().map_or("none", |e| e.name()),
            reranker = ctx.reranker.as_ref().map_or("none", |r| r.name()),
            maintenance_tools = config.maintenance_tools,
            "tool clients ready"
        );
        if ctx.embedder.is_none() {
            warn!("no embedding provider configured, buscar_arsenal will use keyword matching");
        }
        if config.access.allowlist.is_none() {
            warn!("TABLE_ALLOWLIST is unset, generic table tools can reach every table");
        }

        Ok(Self::new(
            ctx,
            ToolRegistry::new(config.maintenance_tools),
            config.session_ttl,
        ))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// `None` for notifications, which are acknowledged but never executed.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                "invalid jsonrpc version",
            ));
        }

        let id = request.id?;

        let response = match request.method.as_str() {
            "initialize" => {
                let protocol_version = request
                    .params
                    .get("protocolVersion")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_MCP_PROTOCOL_VERSION);
                JsonRpcResponse::success(
                    id,
                    json!({
                        "protocolVersion": protocol_version,
                        "serverInfo": {"name": "arsenal-bridge", "version": env!("CARGO_PKG_VERSION")},
                        "capabilities": {
                            "tools": {"listChanged": false}
                        }
                    }),
                )
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::success(id, self.registry.list()),
            "tools/call" => match serde_json::from_value::<ToolsCallParams>(request.params) {
                Ok(params) => JsonRpcResponse::success(
                    id,
                    self.call_tool(&params.name, params.arguments).await,
                ),
                Err(err) => {
                    JsonRpcResponse::error(id, INVALID_PARAMS, format!("invalid params: {err}"))
                }
            },
            _ => JsonRpcResponse::error(id, METHOD_NOT_FOUND, "method not found"),
        };

        Some(response)
    }

    /// Runs one tool and wraps the outcome in the tool result envelope.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        let kind = match self.registry.resolve(name) {
            Ok(kind) => kind,
            Err(err) => {
                warn!(tool = name, "unknown tool requested");
                return tool_error_result(err.kind(), err.to_string());
            }
        };

        let start = Instant::now();
        let outcome = tools::call(&self.ctx, kind, arguments).await;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        match outcome {
            Ok(output) => {
                info!(tool = name, latency_ms, "tool call succeeded");
                tool_result(output.text, Some(output.structured))
            }
            Err(err) => {
                warn!(tool = name, latency_ms, kind = err.kind(), error = %err, "tool call failed");
                tool_error_result(err.kind(), err.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ToolsCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

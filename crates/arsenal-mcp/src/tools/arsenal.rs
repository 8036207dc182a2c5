use arsenal_backend::{Filter, Row, SelectQuery};
use arsenal_embed::{EmbeddingRequest, EmbeddingTask};
use arsenal_rerank::RerankRequest;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use super::{ToolContext, ToolOutput, lenient_usize, required};
use crate::error::ToolError;

const DEFAULT_LIMIT: usize = 5;
const MAX_LIMIT: usize = 50;
const DEFAULT_REINDEX_BATCH: usize = 20;
const MAX_REINDEX_BATCH: usize = 200;
const CONTENT_PREVIEW_CHARS: usize = 300;

const EMBEDDING_COLUMN: &str = "embedding";
const ITEM_COLUMNS: &str = "id,nome_arquivo,link_publico,categoria,modelo_associado,conteudo,detalhes_visuais,descricao_semantica,emocao_predominante,melhor_momento_uso";
const KEYWORD_COLUMNS: [&str; 3] = ["conteudo", "descricao_semantica", "nome_arquivo"];
const DOCUMENT_COLUMNS: [&str; 6] = [
    "nome_arquivo",
    "descricao_semantica",
    "conteudo",
    "detalhes_visuais",
    "emocao_predominante",
    "melhor_momento_uso",
];

#[derive(Debug, Deserialize)]
pub(super) struct SearchArgs {
    #[serde(default, alias = "busca")]
    query: Option<String>,
    #[serde(default, deserialize_with = "lenient_usize")]
    limit: Option<usize>,
    #[serde(default)]
    category: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    Vector,
    Reranked,
    Keyword,
}

impl SearchMode {
    const fn label(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Reranked => "vector+rerank",
            Self::Keyword => "keyword",
        }
    }
}

pub(super) async fn search(ctx: &ToolContext, args: SearchArgs) -> Result<ToolOutput, ToolError> {
    let query = required("query", args.query)?;
    let limit = args.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let category = args
        .category
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    let found = vector_search(ctx, &query, limit, category.as_deref()).await?;
    let (mut items, mut mode) = found.unwrap_or((Vec::new(), SearchMode::Keyword));
    if items.is_empty() {
        debug!(query = %query, "vector search empty, using keyword match");
        items = keyword_search(ctx, &query, limit, category.as_deref()).await?;
        mode = SearchMode::Keyword;
    }

    let structured = json!({
        "query": query,
        "mode": mode.label(),
        "items": items,
    });
    if items.is_empty() {
        return Ok(ToolOutput {
            text: format!("Nenhum item encontrado no arsenal para: \"{query}\""),
            structured,
        });
    }

    let blocks = items
        .iter()
        .enumerate()
        .map(|(idx, item)| format_item(idx + 1, item))
        .collect::<Vec<_>>();
    Ok(ToolOutput {
        text: format!(
            "Encontrados {} itens no arsenal para: \"{query}\"\n\n{}",
            items.len(),
            blocks.join("\n\n")
        ),
        structured,
    })
}

/// `None` when no embedding provider is configured.
async fn vector_search(
    ctx: &ToolContext,
    query: &str,
    limit: usize,
    category: Option<&str>,
) -> Result<Option<(Vec<Row>, SearchMode)>, ToolError> {
    let Some(embedder) = ctx.embedder.as_ref() else {
        return Ok(None);
    };

    let vector = embedder
        .embed(EmbeddingRequest::single(query, EmbeddingTask::Query))
        .await?
        .into_single()
        .ok_or_else(|| {
            ToolError::UpstreamUnavailable("embedding provider returned no vector".to_string())
        })?;

    let match_count = if ctx.reranker.is_some() {
        limit * ctx.search.overfetch_factor
    } else {
        limit
    };
    let raw = ctx
        .backend
        .rpc(
            &ctx.search.match_function,
            json!({
                "query_embedding": vector,
                "match_threshold": ctx.search.match_threshold,
                "match_count": match_count,
            }),
        )
        .await?;

    let mut candidates = rows_from(raw)?;
    if let Some(category) = category {
        candidates.retain(|row| text_field(row, "categoria") == Some(category));
    }
    for row in &mut candidates {
        row.remove(EMBEDDING_COLUMN);
    }

    match ctx.reranker.as_ref() {
        Some(reranker) if !candidates.is_empty() => {
            let documents = candidates.iter().map(document_text).collect::<Vec<_>>();
            let ranked = reranker
                .rerank(RerankRequest {
                    query: query.to_string(),
                    documents,
                    top_n: Some(limit),
                })
                .await?
                .ranked_indices(candidates.len(), limit);
            let reordered = ranked
                .into_iter()
                .filter_map(|idx| candidates.get(idx).cloned())
                .collect();
            Ok(Some((reordered, SearchMode::Reranked)))
        }
        _ => {
            candidates.truncate(limit);
            Ok(Some((candidates, SearchMode::Vector)))
        }
    }
}

async fn keyword_search(
    ctx: &ToolContext,
    query: &str,
    limit: usize,
    category: Option<&str>,
) -> Result<Vec<Row>, ToolError> {
    let mut select = SelectQuery::new(&ctx.tables.arsenal)
        .columns(ITEM_COLUMNS)
        .filter(Filter::ilike_any(KEYWORD_COLUMNS, query))
        .limit(limit);
    if let Some(category) = category {
        select = select.filter(Filter::eq("categoria", category));
    }
    Ok(ctx.backend.select(select).await?)
}

fn rows_from(raw: Value) -> Result<Vec<Row>, ToolError> {
    match raw {
        Value::Null => Ok(Vec::new()),
        Value::Array(values) => values
            .into_iter()
            .map(|value| match value {
                Value::Object(row) => Ok(row),
                other => Err(ToolError::UpstreamUnavailable(format!(
                    "similarity search returned a non-object row: {other}"
                ))),
            })
            .collect(),
        other => Err(ToolError::UpstreamUnavailable(format!(
            "similarity search returned {other} instead of rows"
        ))),
    }
}

fn text_field<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

fn display_field(row: &Row, column: &str) -> String {
    match row.get(column) {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Text sent to the reranker and embedded on reindex.
fn document_text(row: &Row) -> String {
    DOCUMENT_COLUMNS
        .iter()
        .filter_map(|column| text_field(row, column))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn preview(content: &str) -> String {
    if content.chars().count() > CONTENT_PREVIEW_CHARS {
        let cut: String = content.chars().take(CONTENT_PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        content.to_string()
    }
}

pub(super) fn format_item(position: usize, item: &Row) -> String {
    format!(
        "[{position}] {}\nLink: {}\nCategoria: {} | Modelo: {}\nEmoção: {} | Melhor momento: {}\nConteúdo: {}",
        display_field(item, "nome_arquivo"),
        display_field(item, "link_publico"),
        display_field(item, "categoria"),
        display_field(item, "modelo_associado"),
        display_field(item, "emocao_predominante"),
        display_field(item, "melhor_momento_uso"),
        preview(&display_field(item, "conteudo")),
    )
}

#[derive(Debug, Deserialize)]
pub(super) struct ReindexArgs {
    #[serde(default, deserialize_with = "lenient_usize")]
    limite: Option<usize>,
}

/// Backfills missing embeddings. Rows that fail are counted and skipped.
pub(super) async fn reindex(ctx: &ToolContext, args: ReindexArgs) -> Result<ToolOutput, ToolError> {
    let embedder = ctx.embedder.as_ref().ok_or_else(|| {
        ToolError::UpstreamUnavailable("embedding provider is not configured".to_string())
    })?;
    let batch = args
        .limite
        .unwrap_or(DEFAULT_REINDEX_BATCH)
        .clamp(1, MAX_REINDEX_BATCH);

    let rows = ctx
        .backend
        .select(
            SelectQuery::new(&ctx.tables.arsenal)
                .columns(ITEM_COLUMNS)
                .filter(Filter::is_null(EMBEDDING_COLUMN))
                .limit(batch),
        )
        .await?;

    let scanned = rows.len();
    let mut updated = 0_usize;
    let mut failed = 0_usize;
    for row in rows {
        let Some(id) = row.get("id").filter(|v| !v.is_null()).cloned() else {
            failed += 1;
            continue;
        };
        let text = document_text(&row);
        if text.is_empty() {
            warn!(id = %id, "arsenal item has no text to embed");
            failed += 1;
            continue;
        }

        let vector = match embedder
            .embed(EmbeddingRequest::single(text, EmbeddingTask::Document))
            .await
            .map(arsenal_embed::EmbeddingResponse::into_single)
        {
            Ok(Some(vector)) => vector,
            Ok(None) => {
                warn!(id = %id, "embedding provider returned no vector");
                failed += 1;
                continue;
            }
            Err(err) => {
                warn!(id = %id, error = %ToolError::from(err), "embedding failed");
                failed += 1;
                continue;
            }
        };

        let mut patch = Map::new();
        patch.insert(EMBEDDING_COLUMN.to_string(), json!(vector));
        match ctx
            .backend
            .update(&ctx.tables.arsenal, &[Filter::eq("id", id.clone())], patch)
            .await
        {
            Ok(_) => updated += 1,
            Err(err) => {
                warn!(id = %id, error = %ToolError::from(err), "embedding write failed");
                failed += 1;
            }
        }
    }

    let structured = json!({
        "scanned": scanned,
        "updated": updated,
        "failed": failed,
    });
    Ok(ToolOutput {
        text: format!("Reindexação: {scanned} lidos, {updated} atualizados, {failed} com falha"),
        structured,
    })
}

use arsenal_backend::{Filter, SelectQuery};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolOutput, lenient_usize, required};
use crate::error::ToolError;

const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 1000;

/// Column list given either as `"a,b"` or `["a", "b"]`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Columns {
    Text(String),
    List(Vec<String>),
}

impl Columns {
    fn render(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::List(list) => list.join(","),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ReadArgs {
    #[serde(default)]
    tabela: Option<String>,
    #[serde(default)]
    colunas: Option<Columns>,
    #[serde(default, deserialize_with = "lenient_usize")]
    limite: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    const fn label(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ModifyArgs {
    #[serde(default)]
    acao: Option<Action>,
    #[serde(default)]
    tabela: Option<String>,
    #[serde(default)]
    dados: Option<Value>,
    #[serde(default)]
    id_alvo: Option<Value>,
}

pub(super) async fn read(ctx: &ToolContext, args: ReadArgs) -> Result<ToolOutput, ToolError> {
    let table = required("tabela", args.tabela)?;
    ctx.ensure_table_allowed(&table)?;
    let limit = args.limite.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let columns = args
        .colunas
        .map(Columns::render)
        .unwrap_or_else(|| "*".to_string());

    let rows = ctx
        .backend
        .select(SelectQuery::new(&table).columns(columns).limit(limit))
        .await?;

    let text = match rows.as_slice() {
        [only] => Value::Object(only.clone()).to_string(),
        _ => json!(rows).to_string(),
    };
    Ok(ToolOutput {
        text,
        structured: json!({"tabela": table, "count": rows.len(), "rows": rows}),
    })
}

pub(super) async fn modify(ctx: &ToolContext, args: ModifyArgs) -> Result<ToolOutput, ToolError> {
    let action = args
        .acao
        .ok_or_else(|| ToolError::invalid("'acao' é obrigatório (insert, update ou delete)"))?;
    let table = required("tabela", args.tabela)?;
    if !ctx.access.allow_writes {
        return Err(ToolError::invalid("escrita genérica desabilitada"));
    }
    ctx.ensure_table_allowed(&table)?;

    let rows = match action {
        Action::Insert => {
            let data = args
                .dados
                .filter(|d| d.is_object() || d.is_array())
                .ok_or_else(|| ToolError::invalid("'dados' é obrigatório para insert"))?;
            ctx.backend.insert(&table, data).await?
        }
        Action::Update => {
            let target = target_filter(args.id_alvo, action)?;
            let data = match args.dados {
                Some(Value::Object(data)) if !data.is_empty() => data,
                _ => return Err(ToolError::invalid("'dados' é obrigatório para update")),
            };
            ctx.backend.update(&table, &[target], data).await?
        }
        Action::Delete => {
            let target = target_filter(args.id_alvo, action)?;
            ctx.backend.delete(&table, &[target]).await?
        }
    };

    let structured = json!({
        "acao": action.label(),
        "tabela": table,
        "count": rows.len(),
        "rows": rows,
    });
    Ok(ToolOutput::json(structured))
}

fn target_filter(id: Option<Value>, action: Action) -> Result<Filter, ToolError> {
    match id {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Filter::eq("id", s.trim())),
        Some(n @ Value::Number(_)) => Ok(Filter::eq("id", n)),
        _ => Err(ToolError::invalid(format!(
            "'id_alvo' é obrigatório para {}",
            action.label()
        ))),
    }
}

pub(super) async fn list(ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
    let tables = ctx
        .backend
        .list_tables()
        .await?
        .into_iter()
        .filter(|t| ctx.access.permits(t))
        .collect::<Vec<_>>();
    Ok(ToolOutput::json(json!({"count": tables.len(), "tables": tables})))
}

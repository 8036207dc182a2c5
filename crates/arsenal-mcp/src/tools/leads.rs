use arsenal_backend::{Filter, Row, SelectQuery};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ToolContext, ToolOutput, lenient_string, required};
use crate::error::ToolError;

const PHONE_COLUMN: &str = "telefone";

#[derive(Debug, Deserialize)]
pub(super) struct FindArgs {
    #[serde(default, deserialize_with = "lenient_string")]
    telefone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateArgs {
    #[serde(default, deserialize_with = "lenient_string")]
    telefone: Option<String>,
    #[serde(default)]
    funnel_stage: Option<String>,
    #[serde(default)]
    perfil_completo_ia: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SaveArgs {
    #[serde(default, deserialize_with = "lenient_string")]
    telefone: Option<String>,
    #[serde(default)]
    nome: Option<String>,
    #[serde(default)]
    interesse: Option<String>,
    #[serde(default)]
    stage: Option<String>,
}

pub(super) async fn find(ctx: &ToolContext, args: FindArgs) -> Result<ToolOutput, ToolError> {
    let phone = required(PHONE_COLUMN, args.telefone)?;
    let query = SelectQuery::new(&ctx.tables.leads).filter(Filter::eq(PHONE_COLUMN, phone));
    match ctx.backend.select_single(query).await {
        Ok(lead) => Ok(ToolOutput::json(json!({"found": true, "lead": lead}))),
        Err(err) if err.is_not_found() => {
            Ok(ToolOutput::json(json!({"found": false, "lead": null})))
        }
        Err(err) => Err(err.into()),
    }
}

pub(super) async fn update(ctx: &ToolContext, args: UpdateArgs) -> Result<ToolOutput, ToolError> {
    let phone = required(PHONE_COLUMN, args.telefone)?;
    let mut patch = lead_patch(phone);
    if let Some(stage) = args.funnel_stage {
        patch.insert("funnel_stage".to_string(), Value::String(stage));
    }
    if let Some(profile) = args.perfil_completo_ia {
        patch.insert("perfil_completo_ia".to_string(), profile);
    }
    upsert(ctx, patch).await
}

pub(super) async fn save(ctx: &ToolContext, args: SaveArgs) -> Result<ToolOutput, ToolError> {
    let phone = required(PHONE_COLUMN, args.telefone)?;
    let mut patch = lead_patch(phone);
    for (column, value) in [
        ("nome", args.nome),
        ("interesse", args.interesse),
        ("funnel_stage", args.stage),
    ] {
        if let Some(value) = value {
            patch.insert(column.to_string(), Value::String(value));
        }
    }
    upsert(ctx, patch).await
}

/// Natural key plus the interaction timestamp; optional fields are added by
/// the caller only when supplied.
fn lead_patch(phone: String) -> Row {
    let mut patch = Row::new();
    patch.insert(PHONE_COLUMN.to_string(), Value::String(phone));
    patch.insert(
        "ultima_interacao".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    patch
}

async fn upsert(ctx: &ToolContext, patch: Row) -> Result<ToolOutput, ToolError> {
    let rows = ctx
        .backend
        .upsert(&ctx.tables.leads, patch.clone(), PHONE_COLUMN)
        .await?;
    let lead = rows.into_iter().next().unwrap_or(patch);
    Ok(ToolOutput::json(json!({"success": true, "lead": lead})))
}

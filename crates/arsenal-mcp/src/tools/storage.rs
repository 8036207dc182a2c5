use serde::Deserialize;
use serde_json::json;

use super::{ToolContext, ToolOutput, required};
use crate::error::ToolError;

/// Lifetime of generated download links.
const LINK_TTL_SECS: u64 = 3600;

#[derive(Debug, Deserialize)]
pub(super) struct LinkArgs {
    #[serde(default)]
    bucket: Option<String>,
    #[serde(default)]
    caminho: Option<String>,
}

pub(super) async fn signed_link(
    ctx: &ToolContext,
    args: LinkArgs,
) -> Result<ToolOutput, ToolError> {
    let bucket = required("bucket", args.bucket)?;
    let path = required("caminho", args.caminho)?;
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Err(ToolError::invalid("'caminho' é obrigatório"));
    }

    let url = ctx
        .backend
        .create_signed_url(&bucket, path, LINK_TTL_SECS)
        .await?;
    Ok(ToolOutput {
        text: url.clone(),
        structured: json!({"url": url, "expires_in": LINK_TTL_SECS}),
    })
}

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{RerankRequest, RerankResponse};

/// Reorders over-fetched arsenal candidates. Search asks the vector store for
/// `limit * overfetch` rows, sends their text here with `top_n = limit`, and
/// keeps rows in the order of [`RerankResponse::ranked_indices`]. Returned
/// item indices refer to positions in `request.documents`.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn rerank(&self, request: RerankRequest) -> Result<RerankResponse, ProviderError>;
}

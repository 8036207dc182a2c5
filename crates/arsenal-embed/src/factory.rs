use std::sync::Arc;

use crate::config::EmbeddingProviderConfig;
use crate::error::ProviderError;
use crate::providers::{OpenAiCompatibleEmbeddingProvider, VertexEmbeddingProvider};
use crate::traits::EmbeddingProvider;

pub fn build_embedding_provider(
    cfg: EmbeddingProviderConfig,
) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
    match cfg {
        EmbeddingProviderConfig::Vertex(c) => Ok(Arc::new(VertexEmbeddingProvider::new(c)?)),
        EmbeddingProviderConfig::OpenAiCompatible(c) => {
            Ok(Arc::new(OpenAiCompatibleEmbeddingProvider::new(c)?))
        }
    }
}

pub mod openai_compatible;
pub mod vertex;

pub use openai_compatible::OpenAiCompatibleEmbeddingProvider;
pub use vertex::VertexEmbeddingProvider;

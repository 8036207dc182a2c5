pub mod cohere;
pub mod jina;

pub use cohere::CohereRerankProvider;
pub use jina::JinaRerankProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    /// Short search text.
    Query,
    /// Stored content that queries are matched against.
    Document,
}

#[derive(Debug, Clone)]
pub struct EmbeddingRequest {
    pub inputs: Vec<String>,
    pub task: Option<EmbeddingTask>,
    pub dimensions: Option<usize>,
}

impl EmbeddingRequest {
    pub fn single(input: impl Into<String>, task: EmbeddingTask) -> Self {
        Self {
            inputs: vec![input.into()],
            task: Some(task),
            dimensions: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub provider: String,
    pub model: String,
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingResponse {
    /// The first vector, if the provider returned a non-empty one.
    pub fn into_single(self) -> Option<Vec<f32>> {
        self.vectors.into_iter().next().filter(|v| !v.is_empty())
    }
}

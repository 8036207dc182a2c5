use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct RerankRequest {
    pub query: String,
    pub documents: Vec<String>,
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RerankItem {
    pub index: usize,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct RerankResponse {
    pub provider: String,
    pub model: String,
    pub items: Vec<RerankItem>,
}

impl RerankResponse {
    /// Candidate indices in descending relevance, at most `limit` of them.
    ///
    /// Indices outside `0..candidates` and repeats are dropped so callers can
    /// index their candidate slice directly.
    pub fn ranked_indices(&self, candidates: usize, limit: usize) -> Vec<usize> {
        let mut items = self.items.clone();
        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        let mut seen = HashSet::new();
        items
            .into_iter()
            .map(|it| it.index)
            .filter(|idx| *idx < candidates && seen.insert(*idx))
            .take(limit)
            .collect()
    }
}

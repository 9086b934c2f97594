use crate::SearchError;

/// Nearest-neighbour primitive over vectors stored in row order.
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    /// Returns `k` parallel `(row, score)` entries, best first. Rows are `-1`
    /// when fewer than `k` vectors exist.
    fn search(&self, query: &[f32], k: usize) -> Result<(Vec<i64>, Vec<f32>), SearchError>;
}

/// Second-stage scorer over `(query, passage)` pairs.
pub trait PairScorer: Send + Sync {
    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, SearchError>;
}

use crate::candidates::{assign_ranks, make_candidates};
use crate::models::{RetrievalOptions, SearchHit};
use crate::reranker::OptionalReranker;
use crate::store::ArtifactStore;
use crate::traits::VectorIndex;
use crate::SearchError;
use std::sync::Arc;
use tracing::debug;

/// Single retrieval entrypoint. Built once per process and shared by every
/// request handler.
pub struct SearchCoordinator {
    store: Arc<ArtifactStore>,
    reranker: OptionalReranker,
    options: RetrievalOptions,
}

impl SearchCoordinator {
    pub fn new(store: Arc<ArtifactStore>, reranker: OptionalReranker) -> Self {
        Self::with_options(store, reranker, RetrievalOptions::default())
    }

    pub fn with_options(
        store: Arc<ArtifactStore>,
        reranker: OptionalReranker,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            store,
            reranker,
            options,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn reranker(&self) -> &OptionalReranker {
        &self.reranker
    }

    /// Best `top_k` chunks for `query`, highest score first.
    pub fn search(
        &self,
        query: &str,
        top_k: usize,
        rerank: bool,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if top_k == 0 {
            return Err(SearchError::InvalidArgument(
                "top_k must be positive".to_string(),
            ));
        }
        if query.trim().is_empty() {
            return Err(SearchError::InvalidArgument("query is empty".to_string()));
        }
        if !self.store.is_ready() {
            return Err(SearchError::MissingArtifacts(format!(
                "{}; run ingest, chunk and build-index first",
                self.store.missing_artifacts().join(", ")
            )));
        }

        let query_vector = self.store.encode_query(query)?;
        let index = self.store.index()?;
        let chunks = self.store.ordered_chunks()?;
        if index.len() != chunks.len() {
            return Err(SearchError::CorruptArtifacts(format!(
                "index holds {} vectors for {} ids",
                index.len(),
                chunks.len()
            )));
        }

        let candidate_count = top_k.max(self.options.candidate_floor).min(index.len());
        if candidate_count == 0 {
            return Ok(Vec::new());
        }

        let (rows, scores) = index.search(&query_vector, candidate_count)?;
        let mut candidates = make_candidates(&rows, &scores, &chunks, self.options.preview_chars);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        debug!(candidates = candidates.len(), top_k, rerank, "first stage done");

        if rerank {
            candidates = self.reranker.rerank(query, candidates, top_k)?;
        } else {
            candidates.truncate(top_k);
            assign_ranks(&mut candidates);
        }

        Ok(candidates.into_iter().map(SearchHit::from).collect())
    }
}

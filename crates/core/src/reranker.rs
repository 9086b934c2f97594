//! Optional second-stage reranking with a cross-encoder.
//!
//! The scorer is resolved once per process. When it cannot be reached the
//! first-stage order is kept, so search never fails for lack of a reranker.

use crate::candidates::assign_ranks;
use crate::embeddings::{PASSAGE_PREFIX, QUERY_PREFIX};
use crate::models::Candidate;
use crate::traits::PairScorer;
use crate::SearchError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_RERANK_MODEL: &str = "BAAI/bge-reranker-base";

pub type ScorerLoader = Box<dyn Fn() -> Result<Arc<dyn PairScorer>, SearchError> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Base URL of a `/v1/rerank` service. `None` leaves reranking unavailable.
    pub endpoint: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: DEFAULT_RERANK_MODEL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Cross-encoder served over an OpenAI-compatible `/v1/rerank` endpoint.
#[derive(Debug, Clone)]
pub struct HttpCrossEncoder {
    endpoint: Url,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: String,
    documents: Vec<String>,
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankItem>,
}

#[derive(Debug, Deserialize)]
struct RerankItem {
    index: usize,
    relevance_score: f32,
}

impl HttpCrossEncoder {
    /// Resolves the endpoint and checks that the service answers `/health`.
    pub fn connect(config: &RerankerConfig) -> Result<Self, SearchError> {
        let base = config
            .endpoint
            .as_deref()
            .ok_or_else(|| SearchError::Rerank("no rerank endpoint configured".to_string()))?
            .trim_end_matches('/');
        let endpoint = Url::parse(&format!("{base}/v1/rerank"))?;
        let health = Url::parse(&format!("{base}/health"))?;

        let client = Client::builder().timeout(config.timeout).build()?;
        let response = client.get(health).send()?;
        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: base.to_string(),
                details: format!("health check returned {}", response.status()),
            });
        }

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            timeout: config.timeout,
        })
    }

    fn backend_error(&self, details: String) -> SearchError {
        SearchError::BackendResponse {
            backend: self.endpoint.to_string(),
            details,
        }
    }
}

impl PairScorer for HttpCrossEncoder {
    fn score_pairs(&self, query: &str, passages: &[String]) -> Result<Vec<f32>, SearchError> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let client = Client::builder().timeout(self.timeout).build()?;
        let response = client
            .post(self.endpoint.clone())
            .json(&RerankRequest {
                model: &self.model,
                query: format!("{QUERY_PREFIX}{query}"),
                documents: passages
                    .iter()
                    .map(|passage| format!("{PASSAGE_PREFIX}{passage}"))
                    .collect(),
                top_n: passages.len(),
            })
            .send()?;
        if !response.status().is_success() {
            return Err(self.backend_error(format!("status {}", response.status())));
        }

        let payload: RerankResponse = response.json()?;
        scores_by_position(payload, passages.len()).map_err(|details| self.backend_error(details))
    }
}

fn scores_by_position(payload: RerankResponse, expected: usize) -> Result<Vec<f32>, String> {
    let mut scores = vec![None; expected];
    for item in payload.results {
        match scores.get_mut(item.index) {
            Some(slot) if slot.is_none() => *slot = Some(item.relevance_score),
            _ => return Err(format!("unexpected result index {}", item.index)),
        }
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(position, score)| score.ok_or_else(|| format!("no score for document {position}")))
        .collect()
}

/// Lazily resolved reranker that degrades to a passthrough.
pub struct OptionalReranker {
    loader: ScorerLoader,
    scorer: OnceLock<Option<Arc<dyn PairScorer>>>,
}

impl OptionalReranker {
    pub fn new(loader: ScorerLoader) -> Self {
        Self {
            loader,
            scorer: OnceLock::new(),
        }
    }

    pub fn from_config(config: RerankerConfig) -> Self {
        Self::new(Box::new(move || {
            let scorer: Arc<dyn PairScorer> = Arc::new(HttpCrossEncoder::connect(&config)?);
            Ok(scorer)
        }))
    }

    /// A reranker that never scores anything.
    pub fn disabled() -> Self {
        Self::new(Box::new(|| {
            Err(SearchError::Rerank("reranking disabled".to_string()))
        }))
    }

    fn scorer(&self) -> Option<&Arc<dyn PairScorer>> {
        self.scorer
            .get_or_init(|| match (self.loader)() {
                Ok(scorer) => {
                    info!("reranker available");
                    Some(scorer)
                }
                Err(error) => {
                    warn!(%error, "reranker unavailable, keeping first-stage order");
                    None
                }
            })
            .as_ref()
    }

    /// Resolves the scorer if that has not happened yet.
    pub fn is_available(&self) -> bool {
        self.scorer().is_some()
    }

    /// Rescores `candidates` and returns the best `top_k`, ranks reassigned.
    ///
    /// Without a scorer the input order is kept and only truncated.
    pub fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<Candidate>,
        top_k: usize,
    ) -> Result<Vec<Candidate>, SearchError> {
        if let Some(scorer) = self.scorer() {
            let passages = candidates
                .iter()
                .map(|candidate| candidate.text.clone())
                .collect::<Vec<_>>();
            let scores = scorer.score_pairs(query, &passages)?;
            if scores.len() != candidates.len() {
                return Err(SearchError::Rerank(format!(
                    "expected {} scores, got {}",
                    candidates.len(),
                    scores.len()
                )));
            }

            for (candidate, score) in candidates.iter_mut().zip(scores) {
                candidate.score = score;
            }
            // Stable, so equal scores keep first-stage order.
            candidates.sort_by(|left, right| right.score.total_cmp(&left.score));
        }

        candidates.truncate(top_k);
        assign_ranks(&mut candidates);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(id: &str, text: &str, score: f32) -> Candidate {
        Candidate {
            id: id.to_string(),
            score,
            page_start: 1,
            page_end: 1,
            start_char: 0,
            end_char: text.chars().count(),
            preview: text.to_string(),
            text: text.to_string(),
            rank: 0,
        }
    }

    fn first_stage() -> Vec<Candidate> {
        vec![
            candidate("c-0", "short", 0.9),
            candidate("c-1", "a much longer passage", 0.8),
            candidate("c-2", "medium text", 0.7),
        ]
    }

    /// Scores a passage by its length.
    struct LengthScorer;

    impl PairScorer for LengthScorer {
        fn score_pairs(&self, _query: &str, passages: &[String]) -> Result<Vec<f32>, SearchError> {
            Ok(passages.iter().map(|passage| passage.len() as f32).collect())
        }
    }

    struct FailingScorer;

    impl PairScorer for FailingScorer {
        fn score_pairs(&self, _query: &str, _passages: &[String]) -> Result<Vec<f32>, SearchError> {
            Err(SearchError::Rerank("model crashed".to_string()))
        }
    }

    #[test]
    fn unavailable_reranker_truncates_and_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let reranker = OptionalReranker::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SearchError::Rerank("not installed".to_string()))
        }));

        for _ in 0..3 {
            let reranked = reranker.rerank("q", first_stage(), 2).unwrap();
            let ids = reranked.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
            assert_eq!(ids, ["c-0", "c-1"]);
            assert_eq!(reranked[1].rank, 1);
            assert_eq!(reranked[1].score, 0.8);
        }
        assert!(!reranker.is_available());
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scorer_reorders_and_replaces_scores() {
        let reranker =
            OptionalReranker::new(Box::new(|| Ok(Arc::new(LengthScorer) as Arc<dyn PairScorer>)));
        assert!(reranker.is_available());

        let reranked = reranker.rerank("q", first_stage(), 2).unwrap();
        let ids = reranked.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, ["c-1", "c-2"]);
        assert_eq!(reranked[0].score, 21.0);
        assert_eq!(reranked[0].rank, 0);
        assert_eq!(reranked[1].rank, 1);
    }

    #[test]
    fn scoring_errors_after_load_propagate() {
        let reranker =
            OptionalReranker::new(Box::new(|| Ok(Arc::new(FailingScorer) as Arc<dyn PairScorer>)));
        assert!(matches!(
            reranker.rerank("q", first_stage(), 2),
            Err(SearchError::Rerank(_))
        ));
    }

    #[test]
    fn disabled_reranker_is_a_passthrough() {
        let reranker = OptionalReranker::disabled();
        let reranked = reranker.rerank("q", first_stage(), 10).unwrap();
        assert_eq!(reranked.len(), 3);
        assert_eq!(reranked[2].id, "c-2");
    }

    #[test]
    fn cross_encoder_without_endpoint_fails_to_connect() {
        assert!(matches!(
            HttpCrossEncoder::connect(&RerankerConfig::default()),
            Err(SearchError::Rerank(_))
        ));
    }

    #[test]
    fn rerank_payload_is_mapped_back_to_positions() {
        let payload = RerankResponse {
            results: vec![
                RerankItem { index: 1, relevance_score: 0.9 },
                RerankItem { index: 0, relevance_score: 0.2 },
            ],
        };
        assert_eq!(scores_by_position(payload, 2).unwrap(), vec![0.2, 0.9]);

        let partial = RerankResponse {
            results: vec![RerankItem { index: 0, relevance_score: 0.2 }],
        };
        assert!(scores_by_position(partial, 2).is_err());
    }
}

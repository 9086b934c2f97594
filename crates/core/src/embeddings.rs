use crate::error::SearchError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;
pub const DEFAULT_EMBED_MODEL: &str = "intfloat/e5-large-v2";
pub const QUERY_PREFIX: &str = "query: ";
pub const PASSAGE_PREFIX: &str = "passage: ";

/// Text to vector. Implementations are shared across request threads.
pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> String;
    /// Where inference runs, recorded in the build manifest.
    fn device(&self) -> String;
    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

pub fn l2_normalize(vector: &mut [f32]) {
    let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> String {
        format!("char-trigram-{}", self.dimensions)
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }
}

/// OpenAI-compatible `/v1/embeddings` client.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: Url,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        dimensions: usize,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SearchError> {
        let endpoint = Url::parse(&format!("{}/v1/embeddings", base_url.trim_end_matches('/')))?;
        Ok(Self {
            endpoint,
            model: model.into(),
            dimensions,
            api_key,
            timeout,
        })
    }

    fn backend_error(&self, details: String) -> SearchError {
        SearchError::BackendResponse {
            backend: self.endpoint.to_string(),
            details,
        }
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn device(&self) -> String {
        format!("remote:{}", self.endpoint.host_str().unwrap_or("unknown"))
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| self.backend_error("no embedding returned".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let client = Client::builder().timeout(self.timeout).build()?;
        let mut request = client.post(self.endpoint.clone()).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(self.backend_error(format!("status {}", response.status())));
        }

        let payload: EmbeddingResponse = response.json()?;
        order_embeddings(payload, texts.len(), self.dimensions)
            .map_err(|details| self.backend_error(details))
    }
}

fn order_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, String> {
    if payload.data.len() != expected {
        return Err(format!(
            "expected {expected} embeddings, got {}",
            payload.data.len()
        ));
    }

    let mut ordered = vec![Vec::new(); expected];
    for item in payload.data {
        if item.embedding.len() != dimensions {
            return Err(format!(
                "embedding dimension {} != {dimensions}",
                item.embedding.len()
            ));
        }
        match ordered.get_mut(item.index) {
            Some(slot) if slot.is_empty() => *slot = item.embedding,
            _ => return Err(format!("unexpected embedding index {}", item.index)),
        }
    }
    Ok(ordered)
}

/// How the artifact store and index builder obtain their embedder.
#[derive(Debug, Clone)]
pub enum EmbedderConfig {
    CharacterNgram {
        dimensions: usize,
    },
    Http {
        base_url: String,
        model: String,
        dimensions: usize,
        api_key: Option<String>,
        timeout: Duration,
    },
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self::CharacterNgram {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl EmbedderConfig {
    pub fn load(&self) -> Result<Box<dyn Embedder>, SearchError> {
        match self {
            EmbedderConfig::CharacterNgram { dimensions } => {
                if *dimensions == 0 {
                    return Err(SearchError::Embedding(
                        "embedding dimensions must be positive".to_string(),
                    ));
                }
                Ok(Box::new(CharacterNgramEmbedder {
                    dimensions: *dimensions,
                }))
            }
            EmbedderConfig::Http {
                base_url,
                model,
                dimensions,
                api_key,
                timeout,
            } => Ok(Box::new(HttpEmbedder::new(
                base_url,
                model.clone(),
                *dimensions,
                api_key.clone(),
                *timeout,
            )?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedder_is_deterministic() {
        let embedder = CharacterNgramEmbedder::default();
        let first = embedder.embed("Hydraulic pressure and flow").unwrap();
        let second = embedder.embed("Hydraulic pressure and flow").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn embedder_outputs_expected_length() {
        let embedder = CharacterNgramEmbedder { dimensions: 32 };
        let vector = embedder.embed("abc").unwrap();
        assert_eq!(vector.len(), 32);
    }

    #[test]
    fn embeddings_are_unit_length() {
        let vector = CharacterNgramEmbedder::default()
            .embed("passage: overlapping windows of text")
            .unwrap();
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn short_text_embeds_to_zero_vector() {
        let vector = CharacterNgramEmbedder { dimensions: 8 }.embed("ab").unwrap();
        assert!(vector.iter().all(|value| *value == 0.0));
    }

    #[test]
    fn http_payload_is_reordered_by_index() {
        let payload = EmbeddingResponse {
            data: vec![
                EmbeddingItem {
                    index: 1,
                    embedding: vec![0.0, 1.0],
                },
                EmbeddingItem {
                    index: 0,
                    embedding: vec![1.0, 0.0],
                },
            ],
        };
        let ordered = order_embeddings(payload, 2, 2).unwrap();
        assert_eq!(ordered, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn http_payload_with_wrong_dimension_is_rejected() {
        let payload = EmbeddingResponse {
            data: vec![EmbeddingItem {
                index: 0,
                embedding: vec![1.0, 0.0, 0.0],
            }],
        };
        assert!(order_embeddings(payload, 1, 2).is_err());
    }

    #[test]
    fn http_embedder_rejects_bad_url() {
        let result = EmbedderConfig::Http {
            base_url: "not a url".to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            dimensions: 1024,
            api_key: None,
            timeout: Duration::from_secs(5),
        }
        .load();
        assert!(matches!(result, Err(SearchError::Url(_))));
    }

    #[test]
    fn http_endpoint_appends_embeddings_path() {
        let embedder = HttpEmbedder::new(
            "http://127.0.0.1:8081/",
            "e5",
            4,
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(embedder.endpoint.as_str(), "http://127.0.0.1:8081/v1/embeddings");
        assert_eq!(embedder.device(), "remote:127.0.0.1");
    }
}

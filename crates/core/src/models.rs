use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Width of the `"\n\n"` separator placed between paragraphs and pages.
pub const SEPARATOR_CHARS: usize = 2;
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

pub const DEFAULT_TARGET_CHARS: usize = 1_400;
pub const DEFAULT_MIN_CHARS: usize = 1_100;
pub const DEFAULT_OVERLAP_RATIO: f64 = 0.15;
pub const DEFAULT_ID_PREFIX: &str = "chunk";

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_CANDIDATES: usize = 50;
pub const PREVIEW_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    #[serde(rename = "page")]
    pub page_number: u32,
    #[serde(default)]
    pub text: String,
}

/// A blank-line delimited block with offsets into the conceptual document
/// formed by joining every paragraph with [`PARAGRAPH_SEPARATOR`].
/// Offsets count characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph {
    pub page: u32,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

impl Paragraph {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Unit of retrieval. Also the on-disk chunk metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
    pub start_char: usize,
    pub end_char: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalOptions {
    /// Minimum number of nearest neighbours fetched before truncation or rerank.
    pub candidate_floor: usize,
    pub preview_chars: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            candidate_floor: DEFAULT_CANDIDATES,
            preview_chars: PREVIEW_CHARS,
        }
    }
}

/// Working record inside the retrieval pipeline. Carries the full chunk
/// text for the reranker; never leaves the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub score: f32,
    pub page_start: u32,
    pub page_end: u32,
    pub start_char: usize,
    pub end_char: usize,
    pub preview: String,
    pub text: String,
    pub rank: usize,
}

/// Externally visible retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub page_start: u32,
    pub page_end: u32,
    pub start_char: usize,
    pub end_char: usize,
    pub preview: String,
}

impl From<Candidate> for SearchHit {
    fn from(candidate: Candidate) -> Self {
        Self {
            id: candidate.id,
            score: candidate.score,
            page_start: candidate.page_start,
            page_end: candidate.page_end,
            start_char: candidate.start_char,
            end_char: candidate.end_char,
            preview: candidate.preview,
        }
    }
}

/// File locations for one corpus. Everything hangs off a single root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub pages: PathBuf,
    pub raw_text: PathBuf,
    pub chunks: PathBuf,
    pub ids: PathBuf,
    pub index: PathBuf,
    pub manifest: PathBuf,
}

impl ArtifactPaths {
    pub fn from_root(root: &Path) -> Self {
        let data = root.join("data");
        let index = root.join("index");
        Self {
            pages: data.join("pages.jsonl"),
            raw_text: data.join("raw.txt"),
            chunks: data.join("chunks.jsonl"),
            ids: index.join("ids.json"),
            index: index.join("flat_ip.index"),
            manifest: index.join("meta.json"),
        }
    }

    /// The three files required to serve queries.
    pub fn required(&self) -> [&Path; 3] {
        [&self.chunks, &self.ids, &self.index]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPaths {
    pub chunks: String,
    pub ids: String,
    pub index: String,
}

/// Informational build record written next to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildManifest {
    pub model_name: String,
    pub embedding_dimension: usize,
    pub chunk_count: usize,
    pub built_at: DateTime<Utc>,
    pub paths: ManifestPaths,
    pub batch_size: usize,
    pub device: String,
    pub source_sha256: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_records_use_page_key_on_the_wire() {
        let record = PageRecord {
            page_number: 3,
            text: "body".to_string(),
        };
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(line, r#"{"page":3,"text":"body"}"#);

        let missing_text: PageRecord = serde_json::from_str(r#"{"page":4}"#).unwrap();
        assert_eq!(missing_text.text, "");
    }

    #[test]
    fn candidate_conversion_drops_internal_fields() {
        let candidate = Candidate {
            id: "chunk-000001".to_string(),
            score: 0.5,
            page_start: 1,
            page_end: 2,
            start_char: 10,
            end_char: 40,
            preview: "preview".to_string(),
            text: "full text".to_string(),
            rank: 7,
        };
        let value = serde_json::to_value(SearchHit::from(candidate)).unwrap();
        assert!(value.get("text").is_none());
        assert!(value.get("rank").is_none());
        assert_eq!(value["id"], "chunk-000001");
    }

    #[test]
    fn artifact_paths_share_one_root() {
        let paths = ArtifactPaths::from_root(Path::new("/srv/corpus"));
        assert_eq!(paths.chunks, Path::new("/srv/corpus/data/chunks.jsonl"));
        assert_eq!(paths.index, Path::new("/srv/corpus/index/flat_ip.index"));
        assert_eq!(paths.required().len(), 3);
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed record at {path}:{line}: {details}")]
    MalformedRecord {
        path: String,
        line: usize,
        details: String,
    },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("retrieval artifacts missing: {0}")]
    MissingArtifacts(String),

    #[error("retrieval artifacts are inconsistent: {0}")]
    CorruptArtifacts(String),

    #[error("expected a {expected} index, found {found}")]
    IndexType { expected: String, found: String },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("rerank failed: {0}")]
    Rerank(String),

    #[error("{resource} failed to load earlier: {reason}")]
    LoadFailed {
        resource: &'static str,
        reason: String,
    },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SearchError {
    /// Failures worth trying again on the next call. Everything else is
    /// remembered by the lazy loaders.
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::Io(_) | SearchError::Http(_))
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

pub mod builder;
pub mod candidates;
pub mod chunking;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod models;
pub mod orchestrator;
pub mod reranker;
pub mod store;
pub mod traits;

pub use builder::{build_index, digest_file, DEFAULT_BATCH_SIZE};
pub use candidates::make_candidates;
pub use chunking::{
    build_chunk_file, chunk_pages, chunk_paragraphs, explode_paragraphs, load_chunks, load_pages,
    ChunkingConfig,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbedderConfig, HttpEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_EMBED_MODEL,
};
pub use error::{IngestError, SearchError};
pub use extractor::{ingest_pdf, normalize_whitespace, LopdfExtractor, PdfExtractor};
pub use index::{FlatIndex, Metric};
pub use models::{
    ArtifactPaths, BuildManifest, Candidate, Chunk, PageRecord, Paragraph, RetrievalOptions,
    SearchHit, DEFAULT_TOP_K,
};
pub use orchestrator::SearchCoordinator;
pub use reranker::{HttpCrossEncoder, OptionalReranker, RerankerConfig, DEFAULT_RERANK_MODEL};
pub use store::ArtifactStore;
pub use traits::{PairScorer, VectorIndex};

use crate::chunking::load_chunks;
use crate::embeddings::{l2_normalize, Embedder, PASSAGE_PREFIX};
use crate::index::FlatIndex;
use crate::models::{ArtifactPaths, BuildManifest, ManifestPaths};
use crate::traits::VectorIndex;
use crate::{IngestError, SearchError};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_BATCH_SIZE: usize = 16;

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Embeds every chunk of `paths.chunks` and writes the id list, the flat
/// inner-product index and the build manifest.
pub fn build_index(
    paths: &ArtifactPaths,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<BuildManifest, IngestError> {
    if batch_size == 0 {
        return Err(IngestError::InvalidArgument(
            "batch size must be positive".to_string(),
        ));
    }

    let chunks = load_chunks(&paths.chunks)?;
    if chunks.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no chunks found at {}; run the chunk step first",
            paths.chunks.display()
        )));
    }

    let dimensions = embedder.dimensions();
    let mut index = FlatIndex::new(dimensions);
    for (batch_number, batch) in chunks.chunks(batch_size).enumerate() {
        let texts = batch
            .iter()
            .map(|chunk| format!("{PASSAGE_PREFIX}{}", chunk.text))
            .collect::<Vec<_>>();
        let vectors = embedder.embed_batch(&texts)?;
        if vectors.len() != texts.len() {
            return Err(SearchError::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            ))
            .into());
        }
        for mut vector in vectors {
            l2_normalize(&mut vector);
            index.add(&vector)?;
        }
        debug!(batch = batch_number, size = batch.len(), "batch embedded");
    }

    if index.len() != chunks.len() {
        return Err(SearchError::CorruptArtifacts(format!(
            "index holds {} vectors for {} chunks",
            index.len(),
            chunks.len()
        ))
        .into());
    }

    let ids = chunks.iter().map(|chunk| chunk.id.as_str()).collect::<Vec<_>>();
    if let Some(parent) = paths.ids.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&paths.ids, serde_json::to_string_pretty(&ids)?)?;
    index.write(&paths.index)?;

    let manifest = BuildManifest {
        model_name: embedder.model_name(),
        embedding_dimension: dimensions,
        chunk_count: chunks.len(),
        built_at: Utc::now(),
        paths: ManifestPaths {
            chunks: paths.chunks.display().to_string(),
            ids: paths.ids.display().to_string(),
            index: paths.index.display().to_string(),
        },
        batch_size,
        device: embedder.device(),
        source_sha256: digest_file(&paths.chunks)?,
    };
    fs::write(&paths.manifest, serde_json::to_string_pretty(&manifest)?)?;

    info!(
        chunks = manifest.chunk_count,
        dimensions,
        model = %manifest.model_name,
        index = %paths.index.display(),
        "index built"
    );
    Ok(manifest)
}

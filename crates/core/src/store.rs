use crate::embeddings::{l2_normalize, Embedder, EmbedderConfig, QUERY_PREFIX};
use crate::index::FlatIndex;
use crate::models::{ArtifactPaths, Chunk};
use crate::traits::VectorIndex;
use crate::SearchError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

pub type EmbedderLoader = Box<dyn Fn() -> Result<Box<dyn Embedder>, SearchError> + Send + Sync>;

/// A value materialized at most once.
///
/// Loaded values are read without locking. Non-transient failures are
/// remembered so later callers fail fast instead of reloading.
pub(crate) struct LazyResource<T> {
    name: &'static str,
    value: OnceLock<Arc<T>>,
    failure: OnceLock<String>,
    lock: Mutex<()>,
}

impl<T> LazyResource<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            value: OnceLock::new(),
            failure: OnceLock::new(),
            lock: Mutex::new(()),
        }
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.value.get().is_some()
    }

    fn settled(&self) -> Option<Result<Arc<T>, SearchError>> {
        if let Some(value) = self.value.get() {
            return Some(Ok(Arc::clone(value)));
        }
        self.failure.get().map(|reason| {
            Err(SearchError::LoadFailed {
                resource: self.name,
                reason: reason.clone(),
            })
        })
    }

    pub(crate) fn get_or_load<F>(&self, load: F) -> Result<Arc<T>, SearchError>
    where
        F: FnOnce() -> Result<T, SearchError>,
    {
        if let Some(settled) = self.settled() {
            return settled;
        }

        let _guard = self.lock.lock();
        if let Some(settled) = self.settled() {
            return settled;
        }

        match load() {
            Ok(value) => {
                let value = Arc::new(value);
                let _ = self.value.set(Arc::clone(&value));
                Ok(value)
            }
            Err(error) => {
                if !error.is_transient() {
                    warn!(resource = self.name, %error, "resource load failed permanently");
                    let _ = self.failure.set(error.to_string());
                }
                Err(error)
            }
        }
    }
}

/// Owns the read-only serving artifacts of one corpus for the process lifetime.
///
/// Nothing is read from disk until first use; a rebuilt artifact set needs a
/// fresh store.
pub struct ArtifactStore {
    paths: ArtifactPaths,
    embedder_loader: EmbedderLoader,
    chunk_lookup: LazyResource<HashMap<String, Chunk>>,
    ids: LazyResource<Vec<String>>,
    ordered_chunks: LazyResource<Vec<Chunk>>,
    index: LazyResource<FlatIndex>,
    embedder: LazyResource<Box<dyn Embedder>>,
}

impl ArtifactStore {
    pub fn new(paths: ArtifactPaths, embedder: EmbedderConfig) -> Self {
        Self::with_embedder_loader(paths, Box::new(move || embedder.load()))
    }

    pub fn with_embedder_loader(paths: ArtifactPaths, embedder_loader: EmbedderLoader) -> Self {
        Self {
            paths,
            embedder_loader,
            chunk_lookup: LazyResource::new("chunk metadata"),
            ids: LazyResource::new("id ordering"),
            ordered_chunks: LazyResource::new("ordered chunks"),
            index: LazyResource::new("vector index"),
            embedder: LazyResource::new("embedder"),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Whether the chunk metadata, id list and index files exist. Loads nothing.
    pub fn is_ready(&self) -> bool {
        self.paths.required().iter().all(|path| path.exists())
    }

    pub fn missing_artifacts(&self) -> Vec<String> {
        self.paths
            .required()
            .iter()
            .filter(|path| !path.exists())
            .map(|path| path.display().to_string())
            .collect()
    }

    pub fn chunk_lookup(&self) -> Result<Arc<HashMap<String, Chunk>>, SearchError> {
        self.chunk_lookup
            .get_or_load(|| load_chunk_lookup(&self.paths.chunks))
    }

    pub fn ids(&self) -> Result<Arc<Vec<String>>, SearchError> {
        self.ids.get_or_load(|| {
            let ids: Vec<String> = serde_json::from_slice(&fs::read(&self.paths.ids)?)
                .map_err(|error| {
                    SearchError::CorruptArtifacts(format!(
                        "{}: {error}",
                        self.paths.ids.display()
                    ))
                })?;
            info!(count = ids.len(), "id ordering loaded");
            Ok(ids)
        })
    }

    /// Chunks in vector-row order, following the persisted id list.
    pub fn ordered_chunks(&self) -> Result<Arc<Vec<Chunk>>, SearchError> {
        self.ordered_chunks.get_or_load(|| {
            let lookup = self.chunk_lookup()?;
            let ids = self.ids()?;
            ids.iter()
                .map(|id| {
                    lookup.get(id).cloned().ok_or_else(|| {
                        SearchError::CorruptArtifacts(format!(
                            "chunk id {id} missing from chunk metadata"
                        ))
                    })
                })
                .collect()
        })
    }

    pub fn index(&self) -> Result<Arc<FlatIndex>, SearchError> {
        self.index.get_or_load(|| {
            let index = FlatIndex::read_inner_product(&self.paths.index)?;
            info!(
                path = %self.paths.index.display(),
                rows = index.len(),
                dimensions = index.dimensions(),
                "vector index loaded"
            );
            Ok(index)
        })
    }

    pub fn embedder(&self) -> Result<Arc<Box<dyn Embedder>>, SearchError> {
        self.embedder.get_or_load(|| {
            let embedder = (self.embedder_loader)()?;
            info!(model = %embedder.model_name(), "embedder loaded");
            Ok(embedder)
        })
    }

    pub fn is_embedder_loaded(&self) -> bool {
        self.embedder.is_loaded()
    }

    /// Embeds `"query: " + query` and returns a unit-length vector.
    pub fn encode_query(&self, query: &str) -> Result<Vec<f32>, SearchError> {
        let embedder = self.embedder()?;
        let mut vector = embedder.embed(&format!("{QUERY_PREFIX}{query}"))?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

fn load_chunk_lookup(path: &Path) -> Result<HashMap<String, Chunk>, SearchError> {
    let reader = BufReader::new(File::open(path)?);
    let mut lookup = HashMap::new();

    for (line_index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunk: Chunk = serde_json::from_str(line).map_err(|error| {
            SearchError::CorruptArtifacts(format!(
                "{}:{}: {error}",
                path.display(),
                line_index + 1
            ))
        })?;
        lookup.insert(chunk.id.clone(), chunk);
    }

    info!(count = lookup.len(), "chunk metadata loaded");
    Ok(lookup)
}

mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use passage_search_core::models::{
    DEFAULT_ID_PREFIX, DEFAULT_MIN_CHARS, DEFAULT_OVERLAP_RATIO, DEFAULT_TARGET_CHARS,
};
use passage_search_core::{
    build_chunk_file, build_index, ingest_pdf, ArtifactPaths, ArtifactStore, ChunkingConfig,
    EmbedderConfig, LopdfExtractor, OptionalReranker, RerankerConfig, SearchCoordinator,
    DEFAULT_BATCH_SIZE, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBED_MODEL, DEFAULT_RERANK_MODEL,
    DEFAULT_TOP_K,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "passage-search", version, about = "Chunk a PDF and search its passages locally")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Corpus directory holding `data/` and `index/`.
    #[arg(long, global = true, env = "PASSAGE_SEARCH_ROOT", default_value = ".")]
    root: PathBuf,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    reranker: RerankerArgs,
}

#[derive(Args)]
struct EmbedderArgs {
    /// OpenAI-compatible embeddings server. Without it the offline
    /// character-trigram embedder is used.
    #[arg(long, global = true, env = "PASSAGE_SEARCH_EMBED_ENDPOINT")]
    embed_endpoint: Option<String>,

    #[arg(
        long,
        global = true,
        env = "PASSAGE_SEARCH_EMBED_MODEL",
        default_value = DEFAULT_EMBED_MODEL
    )]
    embed_model: String,

    /// Must match the model's output width when an endpoint is set.
    #[arg(
        long,
        global = true,
        env = "PASSAGE_SEARCH_EMBED_DIMENSIONS",
        default_value_t = DEFAULT_EMBEDDING_DIMENSIONS
    )]
    embed_dimensions: usize,

    #[arg(long, global = true, env = "PASSAGE_SEARCH_EMBED_API_KEY", hide_env_values = true)]
    embed_api_key: Option<String>,

    #[arg(long, global = true, default_value_t = 60)]
    embed_timeout_secs: u64,
}

impl EmbedderArgs {
    fn config(&self) -> EmbedderConfig {
        match &self.embed_endpoint {
            Some(base_url) => EmbedderConfig::Http {
                base_url: base_url.clone(),
                model: self.embed_model.clone(),
                dimensions: self.embed_dimensions,
                api_key: self.embed_api_key.clone(),
                timeout: Duration::from_secs(self.embed_timeout_secs),
            },
            None => EmbedderConfig::CharacterNgram {
                dimensions: self.embed_dimensions,
            },
        }
    }
}

#[derive(Args)]
struct RerankerArgs {
    /// Cross-encoder `/v1/rerank` server. Without it reranking is a passthrough.
    #[arg(long, global = true, env = "PASSAGE_SEARCH_RERANK_ENDPOINT")]
    rerank_endpoint: Option<String>,

    #[arg(
        long,
        global = true,
        env = "PASSAGE_SEARCH_RERANK_MODEL",
        default_value = DEFAULT_RERANK_MODEL
    )]
    rerank_model: String,

    #[arg(long, global = true, default_value_t = 30)]
    rerank_timeout_secs: u64,
}

impl RerankerArgs {
    fn config(&self) -> RerankerConfig {
        RerankerConfig {
            endpoint: self.rerank_endpoint.clone(),
            model: self.rerank_model.clone(),
            timeout: Duration::from_secs(self.rerank_timeout_secs),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Extract page text from a PDF into `data/pages.jsonl` and `data/raw.txt`.
    Ingest {
        #[arg(long)]
        pdf: PathBuf,
    },
    /// Split extracted pages into overlapping paragraph windows.
    Chunk {
        #[arg(long, default_value_t = DEFAULT_TARGET_CHARS)]
        target_chars: usize,
        #[arg(long, default_value_t = DEFAULT_MIN_CHARS)]
        min_chars: usize,
        #[arg(long = "overlap", default_value_t = DEFAULT_OVERLAP_RATIO)]
        overlap_ratio: f64,
        #[arg(long, default_value = DEFAULT_ID_PREFIX)]
        id_prefix: String,
    },
    /// Embed chunks and write the id list, vector index and build manifest.
    BuildIndex {
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,
    },
    /// Query the index and print JSON results.
    Search {
        #[arg(short = 'q', long)]
        query: String,
        /// Number of results to return.
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        k: usize,
        /// Skip the cross-encoder reranker.
        #[arg(long, default_value_t = false)]
        no_rerank: bool,
        #[arg(long, default_value_t = false)]
        pretty: bool,
    },
    /// Serve the retrieval API for the local UI.
    Serve {
        #[arg(long, env = "PASSAGE_SEARCH_BIND", default_value = "127.0.0.1:8000")]
        bind: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let paths = ArtifactPaths::from_root(&cli.root);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        root = %cli.root.display(),
        started_at = %Utc::now().to_rfc3339(),
        "passage-search boot"
    );

    match cli.command {
        Command::Ingest { pdf } => {
            let pages = ingest_pdf(&LopdfExtractor, &pdf, &paths)
                .with_context(|| format!("failed to ingest {}", pdf.display()))?;
            println!(
                "{} pages written to {}",
                pages.len(),
                paths.pages.display()
            );
        }
        Command::Chunk {
            target_chars,
            min_chars,
            overlap_ratio,
            id_prefix,
        } => {
            let config = ChunkingConfig {
                target_chars,
                min_chars,
                overlap_ratio,
                id_prefix,
            };
            let chunks = build_chunk_file(&paths.pages, &paths.chunks, &config)?;
            println!(
                "{} chunks written to {}",
                chunks.len(),
                paths.chunks.display()
            );
        }
        Command::BuildIndex { batch_size } => {
            let embedder = cli.embedder.config().load()?;
            let manifest = build_index(&paths, embedder.as_ref(), batch_size)?;
            println!(
                "{} vectors of dimension {} written to {}",
                manifest.chunk_count,
                manifest.embedding_dimension,
                paths.index.display()
            );
        }
        Command::Search {
            query,
            k,
            no_rerank,
            pretty,
        } => {
            let coordinator = coordinator(&cli.embedder, &cli.reranker, paths);
            let hits = coordinator.search(&query, k, !no_rerank)?;
            let output = if pretty {
                serde_json::to_string_pretty(&hits)?
            } else {
                serde_json::to_string(&hits)?
            };
            println!("{output}");
        }
        Command::Serve { bind } => {
            let coordinator = Arc::new(coordinator(&cli.embedder, &cli.reranker, paths));
            if !coordinator.store().is_ready() {
                warn!(
                    missing = ?coordinator.store().missing_artifacts(),
                    "serving without a complete artifact set"
                );
            }
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?
                .block_on(server::serve(coordinator, &bind))?;
        }
    }

    Ok(())
}

fn coordinator(
    embedder: &EmbedderArgs,
    reranker: &RerankerArgs,
    paths: ArtifactPaths,
) -> SearchCoordinator {
    let store = ArtifactStore::new(paths, embedder.config());
    SearchCoordinator::new(
        Arc::new(store),
        OptionalReranker::from_config(reranker.config()),
    )
}

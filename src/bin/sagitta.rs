//! Sagitta CLI binary.
//!
//! A thin front end over [`sagitta::engine::SearchEngine`] backed by file
//! storage: ingest text files, run searches, delete documents, and trigger
//! rebuilds from the command line.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use sagitta::engine::{EngineConfig, SearchEngine};
use sagitta::error::Result;
use sagitta::index::IndexKind;
use sagitta::ingest::{HashEmbedder, split_chunk_doc_id};
use sagitta::query::SearchRequest;
use sagitta::storage::{FileStorage, Storage};
use sagitta::store::STORE_FILE;
use sagitta::vector::DistanceMetric;

#[derive(Parser)]
#[command(name = "sagitta", version, about = "Vector similarity search engine")]
struct SagittaArgs {
    /// Data directory holding the persisted store and index.
    #[arg(short, long, env = "SAGITTA_DATA_DIR", default_value = "./sagitta-data")]
    data_dir: PathBuf,

    /// Embedding dimension. Must stay constant per data directory.
    #[arg(long, default_value_t = 128)]
    dimension: usize,

    /// Distance metric: cosine, l2, or inner_product.
    #[arg(long, default_value = "cosine")]
    metric: String,

    /// Index structure: flat, ivf_flat, or hnsw.
    #[arg(long, default_value = "flat")]
    index: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk and ingest a text file as one source document.
    Ingest {
        /// Source document id.
        #[arg(long)]
        source_id: u64,
        /// Path to the text file.
        #[arg(long)]
        file: PathBuf,
    },
    /// Search for the k most similar chunks to a query text.
    Search {
        /// Query text, embedded with the same provider used at ingest.
        query: String,
        /// Number of results.
        #[arg(short, default_value_t = 10)]
        k: usize,
    },
    /// Delete a document by id. Idempotent.
    Delete {
        /// Document id.
        id: u64,
    },
    /// Rebuild the index from the current store contents.
    Rebuild,
    /// Print collection statistics.
    Stats,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = SagittaArgs::parse();
    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: SagittaArgs) -> Result<()> {
    let storage = FileStorage::new(&args.data_dir)?;
    let config = EngineConfig {
        index: sagitta::index::IndexConfig {
            dimension: args.dimension,
            metric: DistanceMetric::parse_str(&args.metric)?,
            kind: parse_index_kind(&args.index)?,
            ..Default::default()
        },
        ..Default::default()
    };
    let provider = Arc::new(HashEmbedder::new(args.dimension)?);

    let engine = if storage.file_exists(STORE_FILE) {
        SearchEngine::open(config, provider, &storage)?
    } else {
        SearchEngine::new(config, provider)?
    };

    match args.command {
        Command::Ingest { source_id, file } => {
            let content = std::fs::read_to_string(&file)?;
            let doc_ids = engine.ingest_text(source_id, &content).await?;
            engine.persist(&storage)?;
            println!("ingested {} chunks from {}", doc_ids.len(), file.display());
        }
        Command::Search { query, k } => {
            let embedding = engine.embed_query(&query).await?;
            let mut request = SearchRequest::knn(embedding, k);
            request.include_content = true;

            let hits = engine.search(&request)?;
            for hit in hits {
                let (source, chunk) = split_chunk_doc_id(hit.doc_id);
                let preview: String = hit
                    .content
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(80)
                    .collect();
                println!(
                    "{:.4}  source={} chunk={}  {}",
                    hit.distance, source, chunk, preview
                );
            }
        }
        Command::Delete { id } => {
            engine.delete(id)?;
            engine.persist(&storage)?;
            println!("deleted {id}");
        }
        Command::Rebuild => {
            let version = engine.rebuild()?;
            engine.persist(&storage)?;
            println!("rebuilt index, snapshot version {version}");
        }
        Command::Stats => {
            let snapshot = engine.index().snapshot();
            println!("documents: {}", engine.len());
            println!("index kind: {}", snapshot.kind().name());
            println!("index vectors: {}", snapshot.len());
            println!("snapshot version: {}", snapshot.version());
        }
    }

    Ok(())
}

fn parse_index_kind(s: &str) -> Result<IndexKind> {
    match s.to_lowercase().as_str() {
        "flat" => Ok(IndexKind::Flat),
        "ivf_flat" | "ivf" => Ok(IndexKind::IvfFlat),
        "hnsw" => Ok(IndexKind::Hnsw),
        _ => Err(sagitta::error::SagittaError::invalid_argument(format!(
            "Unknown index kind: {s}"
        ))),
    }
}

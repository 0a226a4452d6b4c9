use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use hybridrag_core::config::Config;
use hybridrag_core::data_processor::DataProcessor;
use hybridrag_core::types::{ChunkId, DocumentId, QueryFilters, SourceType};
use hybridrag_hybrid::{HybridEngine, QueryRequest, QueryResponse, RetrievalMode};

#[derive(Parser)]
#[command(name = "hybridrag", about = "Hybrid BM25 + vector retrieval with cited context")]
struct Cli {
    /// Snapshot file (overrides storage.snapshot_path).
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every .txt file under a directory.
    Ingest {
        dir: PathBuf,
        /// Only the first N files (sorted by path).
        #[arg(long)]
        limit: Option<usize>,
    },
    Query {
        text: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long, default_value = "hybrid")]
        mode: RetrievalMode,
        /// Restrict to a document (repeatable), e.g. `doc-3`.
        #[arg(long = "doc")]
        documents: Vec<DocumentId>,
        /// Restrict to a source type (repeatable): file, web, structured.
        #[arg(long = "source")]
        sources: Vec<SourceType>,
        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Run the query in hybrid, lexical and vector mode side by side.
    Compare {
        text: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    RemoveDoc { id: DocumentId },
    RemoveChunk { id: ChunkId },
    Stats,
    /// Embed stored chunks that have no vector (e.g. after changing provider).
    Backfill,
}

fn print_response(response: &QueryResponse) {
    if response.results.is_empty() {
        println!("No results.");
    }
    for (i, r) in response.results.iter().enumerate() {
        let p = &r.provenance;
        let rank = |x: Option<usize>| x.map_or_else(|| "-".to_string(), |v| v.to_string());
        println!(
            "  {}. {}  {}  fused={:.5}  lexical={}  vector={}{}",
            i + 1,
            r.chunk_id,
            r.document_id,
            r.fused_score,
            rank(p.lexical_rank),
            rank(p.vector_rank),
            p.rerank_score.map(|s| format!("  rerank={s:.3}")).unwrap_or_default()
        );
    }
    for d in &response.degradations {
        println!("⚠️  {d}");
    }
    if !response.context.is_empty() {
        println!("\n{}", response.context.render());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().engine()?;
    if let Some(path) = &cli.snapshot {
        config.storage.snapshot_path = path.to_string_lossy().to_string();
    }
    let snapshot_path = config.storage.snapshot_path();
    let engine = HybridEngine::open(config)?;

    let mutated = match cli.command {
        Command::Ingest { dir, limit } => {
            let processor = DataProcessor::new();
            let sources = match limit {
                Some(n) => processor.process_directory_limited(&dir, n)?,
                None => processor.process_directory(&dir)?,
            };
            let files = sources.len();
            let batch = engine.submit_batch(sources).await?;
            let chunks = batch.chunk_count();
            let bar = ProgressBar::new_spinner();
            bar.set_style(ProgressStyle::with_template("{spinner} {msg} [{elapsed}]").context("progress template")?);
            bar.set_message(format!("embedding {chunks} chunks from {files} files"));
            bar.enable_steady_tick(Duration::from_millis(120));
            if let Err(e) = batch.embedded().await {
                tracing::warn!(error = %e, "embedding incomplete; run `hybridrag backfill`");
            }
            bar.finish_and_clear();
            let stats = engine.stats().await;
            println!("✅ Ingested {chunks} chunks ({}/{} stored chunks embedded)", stats.vector_chunks, stats.chunks);
            true
        }
        Command::Query { text, k, mode, documents, sources, json } => {
            let mut filters = QueryFilters::default();
            filters.document_ids.extend(documents);
            filters.source_types.extend(sources);
            let mut request = QueryRequest::new(text).with_mode(mode).with_filters(filters);
            request.k = k;
            let response = engine.query(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response);
            }
            false
        }
        Command::Compare { text, k } => {
            let mut request = QueryRequest::new(text);
            request.k = k;
            for (mode, outcome) in engine.compare_modes(&request).await {
                println!("== {mode} ==");
                match outcome {
                    Ok(response) => print_response(&response),
                    Err(e) => println!("❌ {e}"),
                }
            }
            false
        }
        Command::RemoveDoc { id } => {
            let (doc, chunks) = engine.remove_document(id).await?;
            println!("Removed {} ({}) and {} chunks", doc.id, doc.label(), chunks.len());
            true
        }
        Command::RemoveChunk { id } => {
            let chunk = engine.remove_chunk(id).await?;
            println!("Removed {} of {}", chunk.id, chunk.document_id);
            true
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&engine.stats().await)?);
            false
        }
        Command::Backfill => {
            let n = engine.backfill_embeddings().await?;
            println!("✅ Embedded {n} chunks");
            n > 0
        }
    };

    if mutated {
        engine.save_snapshot(&snapshot_path).await?;
    }
    Ok(())
}

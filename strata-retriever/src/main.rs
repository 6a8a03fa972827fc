use anyhow::{Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use half::f16;
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use strata_gateway::{EmbeddingProvider, EmbeddingResult};
use strata_retriever::{FsContentSource, SearchHit, StrataConfig, StrataEngine};

/// A CLI tool to ingest documents and query the strata index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional TOML config file; STRATA_* environment variables fill in
    /// only the keys it leaves unset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory document paths are resolved against
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database and run startup recovery without ingesting
    Init,
    /// Queue documents for import and drain the queue inline
    Ingest {
        /// Logical document paths, relative to the root
        paths: Vec<String>,
        /// Queue priority; higher runs first
        #[arg(short, long, default_value_t = 0)]
        priority: i64,
    },
    /// Drain pending tasks without enqueueing anything new
    Drain,
    /// Search the index
    Search {
        /// Query text, embedded with the built-in offline model
        query: Option<String>,
        /// Raw query embedding (comma-separated floats) instead of text
        #[arg(long, value_delimiter = ',')]
        embedding: Vec<f32>,
        /// Maximum number of results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
        /// Maximum cosine distance; defaults to the configured threshold
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show a document's summary and outline
    Overview {
        path: String,
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Soft-delete a document and purge its chunks and vectors
    Delete { path: String },
    /// Show index and queue statistics
    Stats {
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Remove completed and failed tasks past the retention window
    Prune,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

/// Deterministic feature-hashed embedding, so the CLI works end to end
/// without a model gateway. Swap in a real provider for production use.
#[derive(Debug, Default)]
struct OfflineEmbedding;

const OFFLINE_DIMENSION: usize = 256;

#[async_trait]
impl EmbeddingProvider for OfflineEmbedding {
    async fn embed_texts(&self, texts: &[String]) -> strata_gateway::Result<EmbeddingResult> {
        let embeddings = texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; OFFLINE_DIMENSION];
                for token in text.split(|c: char| !c.is_alphanumeric()) {
                    if token.is_empty() {
                        continue;
                    }
                    let digest = blake3::hash(token.to_lowercase().as_bytes());
                    let bucket = u32::from_le_bytes(
                        digest.as_bytes()[..4].try_into().unwrap_or([0; 4]),
                    );
                    v[bucket as usize % OFFLINE_DIMENSION] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in &mut v {
                        *x /= norm;
                    }
                }
                v.into_iter().map(f16::from_f32).collect()
            })
            .collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        OFFLINE_DIMENSION
    }

    fn model_id(&self) -> &str {
        "offline-hash-256"
    }
}

#[derive(Serialize)]
struct HitOutput {
    path: String,
    title: String,
    tier: String,
    seq: usize,
    distance: f32,
    expanded: bool,
    section_path: Option<String>,
    content: String,
}

impl From<&SearchHit> for HitOutput {
    fn from(hit: &SearchHit) -> Self {
        Self {
            path: hit.path.clone(),
            title: hit.title.clone(),
            tier: hit.tier.to_string(),
            seq: hit.seq,
            distance: hit.distance,
            expanded: hit.expanded,
            section_path: hit.section_path.clone(),
            content: hit.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct StatsOutput {
    documents: usize,
    chunks: usize,
    vectors: usize,
    tasks_pending: usize,
    tasks_processing: usize,
    tasks_completed: usize,
    tasks_failed: usize,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let config = StrataConfig::load(args.config.as_deref())?;

    let engine = Arc::new(
        StrataEngine::open(
            config,
            Arc::new(FsContentSource::new(&args.root)),
            None,
            Arc::new(OfflineEmbedding),
        )
        .await?,
    );

    match args.command {
        Commands::Init => {
            println!("Database ready at {}", engine.config().db_path.display());
        }
        Commands::Ingest { paths, priority } => {
            if paths.is_empty() {
                bail!("no paths given");
            }
            for path in &paths {
                engine.enqueue_import(path, priority).await?;
            }
            let stats = engine.drain_now().await?;
            println!(
                "Processed {} task(s): {} completed, {} failed",
                stats.processed, stats.completed, stats.failed
            );
        }
        Commands::Drain => {
            let stats = engine.drain_now().await?;
            if stats.lock_contended {
                println!("Skipped: another processor holds the lock");
            } else {
                println!(
                    "Processed {} task(s): {} completed, {} failed",
                    stats.processed, stats.completed, stats.failed
                );
            }
        }
        Commands::Search {
            query,
            embedding,
            limit,
            threshold,
            format,
        } => {
            let threshold = threshold.unwrap_or(engine.config().search_threshold);
            let hits = if !embedding.is_empty() {
                let vector: Vec<f16> = embedding.iter().map(|v| f16::from_f32(*v)).collect();
                engine
                    .search_embedding_with_threshold(&vector, limit, threshold)
                    .await?
            } else if let Some(query) = query {
                engine.search_with_threshold(&query, limit, threshold).await?
            } else {
                bail!("give either query text or --embedding");
            };
            print_hits(&hits, &format)?;
        }
        Commands::Overview { path, format } => match engine.document_overview(&path).await? {
            Some(overview) => match format {
                OutputFormat::Json => {
                    let value = serde_json::json!({
                        "path": overview.document.path,
                        "title": overview.document.title,
                        "content_hash": hex::encode(overview.document.content_hash),
                        "size": overview.document.size,
                        "summary": overview.summary,
                        "outline": overview.outline,
                    });
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
                OutputFormat::Summary => {
                    println!("{} ({})", overview.document.title, overview.document.path);
                    if let Some(summary) = overview.summary {
                        println!("\n{summary}");
                    }
                    if !overview.outline.is_empty() {
                        println!("\nOutline:");
                        for item in overview.outline {
                            println!("  {item}");
                        }
                    }
                }
            },
            None => bail!("no document at {path}"),
        },
        Commands::Delete { path } => {
            if engine.delete_document(&path).await? {
                println!("Deleted {path}");
            } else {
                bail!("no document at {path}");
            }
        }
        Commands::Stats { format } => {
            let stats = engine.stats().await?;
            let output = StatsOutput {
                documents: stats.documents,
                chunks: stats.chunks,
                vectors: stats.vectors,
                tasks_pending: stats.queue.pending,
                tasks_processing: stats.queue.processing,
                tasks_completed: stats.queue.completed,
                tasks_failed: stats.queue.failed,
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Summary => {
                    println!("Documents: {}", output.documents);
                    println!("Chunks:    {}", output.chunks);
                    println!("Vectors:   {}", output.vectors);
                    println!(
                        "Tasks:     {} pending, {} processing, {} completed, {} failed",
                        output.tasks_pending,
                        output.tasks_processing,
                        output.tasks_completed,
                        output.tasks_failed
                    );
                }
            }
        }
        Commands::Prune => {
            let removed = engine.prune_tasks().await?;
            println!("Pruned {removed} finished task(s)");
        }
    }

    Ok(())
}

fn print_hits(hits: &[SearchHit], format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output: Vec<HitOutput> = hits.iter().map(HitOutput::from).collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Summary => {
            if hits.is_empty() {
                println!("No results");
                return Ok(());
            }
            for (index, hit) in hits.iter().enumerate() {
                let marker = if hit.expanded { " (context)" } else { "" };
                println!(
                    "{}. [{:.3}] {} {}#{}{}",
                    index + 1,
                    hit.distance,
                    hit.path,
                    hit.tier,
                    hit.seq,
                    marker
                );
                let preview: String = hit.content.chars().take(120).collect();
                println!("   {preview}");
            }
        }
    }
    Ok(())
}

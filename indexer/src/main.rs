use anyhow::Result;
use clap::{Parser, Subcommand};
use engine::config::EngineConfig;
use engine::persist::{publish, save_meta, staging_dir, IndexPaths, MetaFile, FORMAT_VERSION};
use engine::stats::index_stats;
use engine::{builder, merger, offsets, pagerank, QueryEngine, QuerySession};
use tracing_subscriber::{fmt, EnvFilter};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build, inspect and query a TF-IDF + PageRank index", long_about = None)]
struct Cli {
    /// JSON config file; defaults apply to anything it leaves out
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage into a staging directory, then publish it over the output
    Build {
        /// Corpus root: one directory per site, one JSON document per file
        #[arg(long)]
        corpus: PathBuf,
        /// Output index directory
        #[arg(long)]
        output: PathBuf,
        /// Documents per partial index
        #[arg(long)]
        batch_size: Option<usize>,
        /// Hamming distance at or below which documents are near-duplicates
        #[arg(long)]
        similarity_threshold: Option<u32>,
    },
    /// Tokenize the corpus into partial indexes, the document mapping and the link graph
    Ingest {
        #[arg(long)]
        corpus: PathBuf,
        #[arg(long)]
        index: PathBuf,
    },
    /// Merge partial indexes into TF-IDF shards
    Merge {
        #[arg(long)]
        index: PathBuf,
    },
    /// Write flat retrieval files and offset maps
    Compile {
        #[arg(long)]
        index: PathBuf,
    },
    /// Compute PageRank over the link graph
    Pagerank {
        #[arg(long)]
        index: PathBuf,
        #[arg(long)]
        damping: Option<f64>,
        #[arg(long)]
        max_iterations: Option<usize>,
    },
    /// Print document count, vocabulary size and index size
    Stats {
        #[arg(long)]
        index: PathBuf,
    },
    /// Run one query and print ranked URLs
    Search {
        #[arg(long, default_value = "./index")]
        index: PathBuf,
        #[arg(long)]
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let mut cfg = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Build { corpus, output, batch_size, similarity_threshold } => {
            if let Some(n) = batch_size {
                cfg.build.batch_size = n;
            }
            if let Some(t) = similarity_threshold {
                cfg.build.similarity_threshold = t;
            }
            build(&corpus, &output, &cfg)
        }
        Commands::Ingest { corpus, index } => {
            builder::build_partial_indexes(&corpus, &IndexPaths::new(index), &cfg.build)?;
            Ok(())
        }
        Commands::Merge { index } => {
            merger::merge_partial_indexes(&IndexPaths::new(index))?;
            Ok(())
        }
        Commands::Compile { index } => {
            offsets::compile_offsets(&IndexPaths::new(index))?;
            Ok(())
        }
        Commands::Pagerank { index, damping, max_iterations } => {
            if let Some(d) = damping {
                cfg.pagerank.damping = d;
            }
            if let Some(n) = max_iterations {
                cfg.pagerank.max_iterations = n;
            }
            let outcome = pagerank::run_pagerank(&IndexPaths::new(index), &cfg.pagerank)?;
            println!("iterations={} converged={} delta={:e}", outcome.iterations, outcome.converged, outcome.delta);
            Ok(())
        }
        Commands::Stats { index } => {
            let stats = index_stats(&IndexPaths::new(index))?;
            println!("Number of Indexed Documents: {}", stats.documents);
            println!("Number of Unique Tokens: {}", stats.unique_terms);
            println!("Total Index Size on Disk: {:.2} KB", stats.final_index_kb);
            Ok(())
        }
        Commands::Search { index, query, limit } => search(&index, &query, limit, cfg),
    }
}

fn build(corpus: &Path, output: &Path, cfg: &EngineConfig) -> Result<()> {
    let staging = staging_dir(output);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let report = engine::build_index(corpus, &staging, cfg)?;
    let meta = MetaFile {
        num_docs: report.merge.total_docs,
        num_terms: report.merge.terms,
        created_at: time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap_or_else(|_| "".into()),
        version: FORMAT_VERSION,
    };
    save_meta(&IndexPaths::new(&staging), &meta)?;
    publish(&staging, output)?;

    tracing::info!(output = %output.display(), docs = meta.num_docs, terms = meta.num_terms, "index build complete");
    Ok(())
}

fn search(index: &Path, query: &str, limit: Option<usize>, cfg: EngineConfig) -> Result<()> {
    let start = Instant::now();
    let limit = limit.unwrap_or(cfg.search.default_limit).min(cfg.search.max_limit);
    let timeout = Duration::from_millis(cfg.search.timeout_ms);
    let session = QuerySession::open(index, cfg.search)?;
    let terms: Vec<&str> = query.split_whitespace().collect();
    let hits = QueryEngine::new(&session).with_deadline(Instant::now() + timeout).search(&terms, limit)?;
    for hit in &hits {
        println!("{} (score: {:.4})", hit.url, hit.score);
    }
    println!("\n{} results in {:.3}s", hits.len(), start.elapsed().as_secs_f64());
    Ok(())
}

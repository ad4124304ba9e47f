use anyhow::Context;
use clap::{Parser, Subcommand};
use rag_embed::{EmbeddingProvider, FastEmbedProvider};
use rag_retriever::{
    RetrieverError,
    config::RetrieverConfig,
    retrieval::{
        index_builder::{BuildReport, IndexBuilder},
        ranker::SearchHit,
        searcher::{DEFAULT_TOP_K, Searcher},
    },
    storage::IndexStore,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Number of paths listed by `info`.
const INFO_PATH_PREVIEW: usize = 10;

/// Build and query a semantic search index over a codebase.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directory of the codebase to index (env: CODEBASE_PATH)
    #[arg(long, global = true)]
    codebase: Option<PathBuf>,

    /// Directory holding the index files (env: RAG_STORAGE_PATH)
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Embedding model name (env: RAG_MODEL_NAME)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Directory for downloaded model files (env: RAG_MODEL_CACHE)
    #[arg(long, global = true)]
    model_cache: Option<PathBuf>,

    /// TOML file with default settings; environment and flags override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index every eligible file under the codebase, replacing the stored index
    Build {
        /// Skip files larger than this many bytes (env: RAG_MAX_FILE_SIZE)
        #[arg(long)]
        max_file_size: Option<u64>,
        /// Number of files embedded per model call
        #[arg(long)]
        batch_size: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Find the files most similar to a query
    Search {
        /// Free-text query
        query: String,
        /// Maximum number of results; zero or less returns nothing
        #[arg(
            short = 'k',
            long,
            default_value_t = DEFAULT_TOP_K as i64,
            allow_negative_numbers = true
        )]
        top_k: i64,
        /// Drop results scoring below this value
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show what the stored index contains
    Info {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
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

#[derive(Serialize)]
struct SearchOutput<'a> {
    query: &'a str,
    top_k: usize,
    results: &'a [SearchHit],
}

#[derive(Serialize)]
struct IndexInfo<'a> {
    storage_path: &'a Path,
    files: usize,
    dimension: usize,
    file_paths: &'a [String],
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut overrides = RetrieverConfig {
        codebase_path: args.codebase,
        storage_path: args.storage,
        model_name: args.model,
        model_cache_dir: args.model_cache,
        ..Default::default()
    };
    if let Commands::Build {
        max_file_size,
        batch_size,
        ..
    } = &args.command
    {
        overrides.max_file_size = *max_file_size;
        overrides.batch_size = *batch_size;
    }
    let config = RetrieverConfig::resolve(args.config.as_deref(), overrides)?;

    match args.command {
        Commands::Build { format, .. } => {
            // Fail on configuration problems before paying for a model load
            let codebase = config.require_codebase()?;
            config.require_storage()?;
            if !codebase.is_dir() {
                return Err(RetrieverError::CodebaseNotFound {
                    path: codebase.to_path_buf(),
                }
                .into());
            }

            let provider = load_provider(&config).await?;
            let builder = IndexBuilder::for_config(&config, provider)?;
            let report = match builder.build().await {
                Ok(report) => report,
                Err(RetrieverError::EmptyCorpus { root }) => {
                    eprintln!(
                        "No readable files found under {}; nothing was indexed.",
                        root.display()
                    );
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            print_build_report(&report, &format)?;
            Ok(())
        }
        Commands::Search {
            query,
            top_k,
            threshold,
            format,
        } => {
            let top_k = usize::try_from(top_k).unwrap_or(0);
            let store = IndexStore::new(config.require_storage()?);
            // Load the index first so a missing index is reported without a model download
            let index = store.load()?;
            let hits = if top_k == 0 {
                Vec::new()
            } else {
                let provider = load_provider(&config).await?;
                Searcher::new(index, provider)
                    .search_with_threshold(&query, top_k, threshold)
                    .await?
            };

            match format {
                OutputFormat::Json => {
                    let output = SearchOutput {
                        query: &query,
                        top_k,
                        results: &hits,
                    };
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                OutputFormat::Summary => {
                    if hits.is_empty() {
                        println!("No results found.");
                    }
                    for hit in &hits {
                        println!("File: {}, Score: {}", hit.file_path, hit.score);
                    }
                }
            }
            Ok(())
        }
        Commands::Info { format } => {
            let store = IndexStore::new(config.require_storage()?);
            let index = store.load()?;
            let preview = &index.file_paths()[..index.len().min(INFO_PATH_PREVIEW)];

            match format {
                OutputFormat::Json => {
                    let info = IndexInfo {
                        storage_path: store.dir(),
                        files: index.len(),
                        dimension: index.dimension(),
                        file_paths: index.file_paths(),
                    };
                    println!("{}", serde_json::to_string_pretty(&info)?);
                }
                OutputFormat::Summary => {
                    println!("Index: {}", store.dir().display());
                    println!("Files: {}", index.len());
                    println!("Dimension: {}", index.dimension());
                    for path in preview {
                        println!("  {path}");
                    }
                    if index.len() > preview.len() {
                        println!("  ... and {} more", index.len() - preview.len());
                    }
                }
            }
            Ok(())
        }
    }
}

async fn load_provider(config: &RetrieverConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let embed_config = config.embed_config();
    let model = embed_config.model_name.clone();
    let provider = FastEmbedProvider::create(embed_config)
        .await
        .with_context(|| format!("Failed to load embedding model {model}"))?;
    Ok(Arc::new(provider))
}

fn print_build_report(report: &BuildReport, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Summary => {
            println!(
                "Indexed {} files ({} dimensions) into {}",
                report.indexed_files,
                report.dimension,
                report.storage_dir.display()
            );
            if let Some(ignore_file) = &report.ignore_file {
                println!("Exclusion rules from {}", ignore_file.display());
            }
            let skipped = &report.skipped;
            if skipped.total() > 0 {
                println!(
                    "Skipped {} files: {} excluded, {} not UTF-8, {} unreadable, {} unsupported paths, {} too large",
                    skipped.total(),
                    skipped.excluded,
                    skipped.not_utf8,
                    skipped.unreadable,
                    skipped.unsupported_path,
                    skipped.too_large
                );
            }
            if !report.pruned_dirs.is_empty() {
                println!("Excluded directories: {}", report.pruned_dirs.join(", "));
            }
        }
    }
    Ok(())
}

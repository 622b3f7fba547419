mod util;

use clap::{Parser, Subcommand};
use colored::Colorize;
use eduindex::{
    BackendKind, ExtractorRegistry, IndexError, ResourceBackend, ResourceType, Settings,
    open_backend,
};
use log::warn;
use std::path::{Path, PathBuf};
use util::{IngestionResult, ResourceIngestor};

#[derive(Parser)]
#[command(name = "eduindex")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Settings file (default: the config.toml in the user config directory)
    #[clap(long, global = true, help = "Path to a TOML settings file.")]
    config: Option<PathBuf>,
    /// Record store path, overriding the settings
    #[clap(long, global = true, help = "Path to the JSON record store.")]
    index: Option<PathBuf>,
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and index resources from a directory or file
    Index {
        /// Path to directory or file to index
        path: PathBuf,
        /// Backend: simple or vector
        #[clap(
            long,
            help = "Backend to index into: 'simple' for keyword search only, 'vector' to also embed records."
        )]
        backend: Option<BackendKind>,
        /// Per-file extraction timeout in seconds
        #[clap(long, help = "Per-file extraction timeout in seconds; 0 disables it.")]
        timeout: Option<u64>,
    },
    /// Search indexed resources
    Search {
        /// Search query
        query: String,
        /// Search mode: keyword or similarity
        #[clap(
            long,
            help = "Type of search to perform: 'keyword' for substring matching, 'similarity' for embedding-based search."
        )]
        mode: Option<BackendKind>,
        /// Restrict results to one resource type
        #[clap(long = "type", help = "Only return resources of this type: text, pdf, video or image.")]
        resource_type: Option<ResourceType>,
        /// Maximum number of results to return
        #[clap(long, help = "Maximum number of search results to return.")]
        limit: Option<usize>,
        /// Output results as pretty format instead of json text
        #[clap(
            long,
            help = "Output search results in pretty format instead of json text."
        )]
        pretty: bool,
    },
    /// Re-embed every record and rewrite the vector index
    Rebuild,
    /// Show index statistics
    Stats {
        /// Also list indexed files that no longer exist
        #[clap(long, help = "List indexed paths whose files no longer exist.")]
        stale: bool,
    },
}

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::discover()?,
    };
    if let Some(index) = &cli.index {
        settings.index.path = Some(index.clone());
    }
    Ok(settings)
}

fn validate_index_presence(index_path: &Path) -> anyhow::Result<()> {
    if !index_path.exists() {
        return Err(anyhow::anyhow!(
            "Index file '{}' does not exist. Please run the 'index' command first to create and populate the index.",
            index_path.display()
        ));
    }
    Ok(())
}

fn open(settings: &Settings, kind: BackendKind) -> Box<dyn ResourceBackend> {
    let (backend, warnings) = open_backend(settings, kind);
    report_warnings(&warnings);
    backend
}

fn report_warnings(warnings: &[IndexError]) {
    for warning in warnings {
        warn!("{}", warning);
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .init();

    let mut settings = load_settings(&cli)?;

    match cli.command {
        Commands::Index {
            path,
            backend,
            timeout,
        } => {
            if let Some(timeout) = timeout {
                settings.ingest.timeout_secs = timeout;
            }
            let kind = backend.unwrap_or(settings.search.backend);
            println!(
                "Indexing resources from: {} into: {}",
                path.display(),
                settings.index_path().display()
            );

            let backend = open(&settings, kind);
            let registry = ExtractorRegistry::with_defaults(&settings);
            let ingestion_result: IngestionResult =
                ResourceIngestor::new(&registry, backend.as_ref()).ingest(&path)?;
            backend.persist()?;

            let mut failed_files = ingestion_result.failed_files().peekable();
            if failed_files.peek().is_some() {
                println!("Failed files:");
                for file_path in failed_files {
                    println!(" - {}", file_path.red());
                }
            }
            println!(
                "Indexing completed! \nIndexed {} new and {} updated file(s). Total resources in the index: {}",
                ingestion_result.report.added,
                ingestion_result.report.updated,
                ingestion_result.total_document_count
            );
        }
        Commands::Search {
            query,
            mode,
            resource_type,
            limit,
            pretty,
        } => {
            if pretty {
                println!("Searching for: \"{}\"", query);
            }
            validate_index_presence(&settings.index_path())?;

            let kind = mode.unwrap_or(settings.search.backend);
            let limit = limit.unwrap_or(settings.search.default_limit);
            let backend = open(&settings, kind);
            let results = backend.search(&query, resource_type, limit);

            if !pretty {
                let json_output = serde_json::json!({
                    "query": query,
                    "search_type": backend.search_type(),
                    "backend": backend.name(),
                    "results_count": results.len(),
                    "results": results.iter().map(|result| {
                        serde_json::json!({
                            "path": result.record.file_path(),
                            "resource_type": result.record.resource_type(),
                            "similarity_score": result.similarity_score,
                            "metadata": result.record.metadata,
                        })
                    }).collect::<Vec<_>>()
                });
                println!("{}", serde_json::to_string_pretty(&json_output)?);
                return Ok(());
            }

            if results.is_empty() {
                println!("No results found.");
                return Ok(());
            }

            println!("Found {} results:", results.len());
            println!();

            for (i, result) in results.iter().enumerate() {
                let record = &result.record;
                match result.similarity_score {
                    Some(distance) => println!(
                        "{} - Distance: {:.4}",
                        format!("Result {}", i + 1).bold(),
                        distance
                    ),
                    None => println!("{}", format!("Result {}", i + 1).bold()),
                }
                println!("   Path: {}", record.file_path().cyan());
                println!("   Type: {}", record.resource_type().to_string().green());
                if let Some(summary) = record.metadata.get("summary").and_then(|v| v.as_str()) {
                    println!("   Summary: {}", summary);
                }
                println!();
            }
        }
        Commands::Rebuild => {
            validate_index_presence(&settings.index_path())?;
            let backend = open(&settings, BackendKind::Vector);
            if backend.search_type() != eduindex::SearchType::Similarity {
                anyhow::bail!("Vector backend is unavailable, nothing to rebuild");
            }
            let count = backend.rebuild();
            backend.persist()?;
            println!("Rebuilt vector index with {} vectors", count);
        }
        Commands::Stats { stale } => {
            validate_index_presence(&settings.index_path())?;
            let backend = open(&settings, settings.search.backend);
            let mut output = serde_json::json!({
                "backend": backend.name(),
                "index_path": settings.index_path(),
                "stats": backend.stats(),
            });
            if stale {
                output["stale_paths"] = serde_json::json!(backend.stale_paths());
            }
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

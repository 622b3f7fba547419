//! # eduindex
//!
//! A local ingestion pipeline and dual-mode index for educational resources.
//!
//! ## Features
//!
//! - Text, Markdown, JSON, PDF, image and video extraction into one record shape
//! - Failed files are kept as error records instead of aborting a batch
//! - JSON record store keyed by file path, with in-place re-ingestion
//! - Keyword search and vector similarity search over local fastembed embeddings
//! - Vector index persisted to SQLite and checked against the store on load
//! - Configurable directories and settings using system directories
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eduindex::{Embedder, ExtractorRegistry, Indexer, LocalEmbedder, QueryCache, SearchEngine, Settings};
//!
//! # fn main() -> anyhow::Result<()> {
//! let settings = Settings::discover()?;
//!
//! // Downloads AllMiniLML6V2 into the cache directory on first use
//! let embedder: Arc<dyn Embedder> = Arc::new(LocalEmbedder::new_with_default_model()?);
//!
//! let (indexer, warnings) = Indexer::open(
//!     settings.index_path(),
//!     settings.vector_path(),
//!     Some(embedder.clone()),
//! );
//! for warning in warnings {
//!     eprintln!("warning: {}", warning);
//! }
//!
//! // Extract and index a directory tree
//! let registry = ExtractorRegistry::with_defaults(&settings);
//! let report = indexer.add_resources(registry.ingest_directory("resources".as_ref()));
//! println!("{} added, {} failed", report.added, report.failed.len());
//! indexer.save()?;
//!
//! // Search
//! let engine = SearchEngine::new(indexer.corpus(), Some(embedder), QueryCache::default());
//! let keyword = engine.search_by_keyword("recursion", None);
//! let similar = engine.search_by_similarity("how do loops work", 5, None);
//! # Ok(())
//! # }
//! ```

pub mod traits;
pub use traits::{Embedder, Extractor, ResourceBackend, SearchResult, SearchType};

pub mod error;
pub use error::{ConfigError, ExtractionError, IndexError, Result};

pub mod record;
pub use record::{ResourceMetadata, ResourceRecord, ResourceType};

pub mod config;
pub use config::{BackendKind, EduIndexDirs, Settings};

pub mod embed;
pub use embed::LocalEmbedder;

pub mod extract;
pub use extract::ExtractorRegistry;

pub mod store;
pub use store::{IndexStore, LoadStatus};

pub mod vector;
pub use vector::VectorIndex;

pub mod cache;
pub use cache::QueryCache;

pub mod indexer;
pub use indexer::{IndexStats, Indexer, IngestReport};

pub mod search;
pub use search::SearchEngine;

pub mod engines;
pub use engines::{SimpleBackend, VectorBackend, open_backend, open_backend_with};

//! Concrete backends behind [`ResourceBackend`].

pub mod sqlite;

pub use sqlite::SqliteVectorStore;

use crate::cache::QueryCache;
use crate::config::{BackendKind, Settings};
use crate::embed::LocalEmbedder;
use crate::error::{IndexError, Result};
use crate::indexer::{IndexOutcome, IndexStats, Indexer, read_corpus};
use crate::record::{ResourceRecord, ResourceType};
use crate::search::SearchEngine;
use crate::traits::{Embedder, ResourceBackend, SearchResult, SearchType};
use log::{info, warn};
use std::sync::Arc;

/// Indexer and search engine sharing one corpus.
struct Parts {
    indexer: Indexer,
    engine: SearchEngine,
}

impl Parts {
    fn open(settings: &Settings, embedder: Option<Arc<dyn Embedder>>) -> (Self, Vec<IndexError>) {
        let (indexer, warnings) =
            Indexer::open(settings.index_path(), settings.vector_path(), embedder.clone());
        let engine = SearchEngine::new(
            indexer.corpus(),
            embedder,
            QueryCache::new(settings.search.query_cache_size),
        );
        (Self { indexer, engine }, warnings)
    }

    fn stale_paths(&self) -> Vec<String> {
        let corpus = self.indexer.corpus();
        let corpus = read_corpus(&corpus);
        corpus
            .store
            .stale_paths()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// JSON store with keyword search. Never loads an embedding model.
pub struct SimpleBackend {
    parts: Parts,
}

impl SimpleBackend {
    pub fn open(settings: &Settings) -> (Self, Vec<IndexError>) {
        let (parts, warnings) = Parts::open(settings, None);
        (Self { parts }, warnings)
    }

    pub fn indexer(&self) -> &Indexer {
        &self.parts.indexer
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.parts.engine
    }
}

impl ResourceBackend for SimpleBackend {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn search_type(&self) -> SearchType {
        SearchType::Keyword
    }

    fn index(&self, record: ResourceRecord) -> Result<IndexOutcome> {
        self.parts.indexer.add_resource(record)
    }

    fn search(
        &self,
        query: &str,
        resource_type: Option<ResourceType>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let mut results = self.parts.engine.search_by_keyword(query, resource_type);
        results.truncate(limit);
        results
    }

    fn persist(&self) -> Result<()> {
        self.parts.indexer.save()
    }

    fn stats(&self) -> IndexStats {
        self.parts.indexer.stats()
    }

    fn stale_paths(&self) -> Vec<String> {
        self.parts.stale_paths()
    }
}

/// JSON store plus vector index, answering queries by similarity.
pub struct VectorBackend {
    parts: Parts,
}

impl VectorBackend {
    pub fn open(settings: &Settings, embedder: Arc<dyn Embedder>) -> (Self, Vec<IndexError>) {
        let (parts, warnings) = Parts::open(settings, Some(embedder));
        (Self { parts }, warnings)
    }

    pub fn indexer(&self) -> &Indexer {
        &self.parts.indexer
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.parts.engine
    }
}

impl ResourceBackend for VectorBackend {
    fn name(&self) -> &'static str {
        "vector"
    }

    fn search_type(&self) -> SearchType {
        SearchType::Similarity
    }

    fn index(&self, record: ResourceRecord) -> Result<IndexOutcome> {
        self.parts.indexer.add_resource(record)
    }

    fn search(
        &self,
        query: &str,
        resource_type: Option<ResourceType>,
        limit: usize,
    ) -> Vec<SearchResult> {
        self.parts
            .engine
            .search_by_similarity(query, limit, resource_type)
    }

    fn persist(&self) -> Result<()> {
        self.parts.indexer.save()
    }

    fn stats(&self) -> IndexStats {
        self.parts.indexer.stats()
    }

    fn rebuild(&self) -> usize {
        self.parts.indexer.rebuild_vectors()
    }

    fn stale_paths(&self) -> Vec<String> {
        self.parts.stale_paths()
    }
}

/// Opens the backend selected by `kind`, loading the local embedding model for
/// [`BackendKind::Vector`].
///
/// A vector backend whose model cannot be initialized degrades to [`SimpleBackend`];
/// the [`IndexError::BackendUnavailable`] is returned among the warnings.
pub fn open_backend(
    settings: &Settings,
    kind: BackendKind,
) -> (Box<dyn ResourceBackend>, Vec<IndexError>) {
    let embedder = match kind {
        BackendKind::Simple => None,
        BackendKind::Vector => match LocalEmbedder::from_settings(&settings.embedding) {
            Ok(embedder) => Some(Arc::new(embedder) as Arc<dyn Embedder>),
            Err(err) => return degrade(settings, err),
        },
    };
    open_backend_with(settings, kind, embedder)
}

/// Like [`open_backend`], with the embedder supplied by the caller.
pub fn open_backend_with(
    settings: &Settings,
    kind: BackendKind,
    embedder: Option<Arc<dyn Embedder>>,
) -> (Box<dyn ResourceBackend>, Vec<IndexError>) {
    match (kind, embedder) {
        (BackendKind::Vector, Some(embedder)) => {
            let (backend, warnings) = VectorBackend::open(settings, embedder);
            info!("Opened vector backend at {:?}", settings.index_path());
            (Box::new(backend), warnings)
        }
        (BackendKind::Vector, None) => degrade(
            settings,
            IndexError::BackendUnavailable {
                backend: "vector".to_string(),
                reason: "no embedder available".to_string(),
            },
        ),
        (BackendKind::Simple, _) => {
            let (backend, warnings) = SimpleBackend::open(settings);
            info!("Opened simple backend at {:?}", settings.index_path());
            (Box::new(backend), warnings)
        }
    }
}

fn degrade(settings: &Settings, cause: IndexError) -> (Box<dyn ResourceBackend>, Vec<IndexError>) {
    warn!("{}; falling back to the simple backend", cause);
    let (backend, mut warnings) = SimpleBackend::open(settings);
    warnings.insert(0, cause);
    (Box::new(backend), warnings)
}

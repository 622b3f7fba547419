//! Query-time keyword and similarity retrieval over a shared corpus.

use crate::cache::QueryCache;
use crate::indexer::{SharedCorpus, read_corpus};
use crate::record::{ResourceRecord, ResourceType};
use crate::traits::{Embedder, SearchResult};
use log::{debug, warn};
use std::sync::Arc;

pub struct SearchEngine {
    corpus: SharedCorpus,
    embedder: Option<Arc<dyn Embedder>>,
    cache: QueryCache,
}

impl SearchEngine {
    pub fn new(
        corpus: SharedCorpus,
        embedder: Option<Arc<dyn Embedder>>,
        cache: QueryCache,
    ) -> Self {
        Self {
            corpus,
            embedder,
            cache,
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Whether similarity search can return anything this session.
    pub fn similarity_available(&self) -> bool {
        self.embedder.is_some() && read_corpus(&self.corpus).vectors.is_enabled()
    }

    /// Case-insensitive substring match on content or file name, in store order.
    ///
    /// A blank term matches nothing.
    pub fn search_by_keyword(
        &self,
        term: &str,
        resource_type: Option<ResourceType>,
    ) -> Vec<SearchResult> {
        if term.trim().is_empty() {
            debug!("Blank keyword query, returning no results");
            return Vec::new();
        }

        let needle = term.to_lowercase();
        let matches = |record: &ResourceRecord| {
            !record.has_error()
                && (record.content().to_lowercase().contains(&needle)
                    || record.metadata.file_name.to_lowercase().contains(&needle))
        };

        let corpus = read_corpus(&self.corpus);
        let results: Vec<SearchResult> = corpus
            .store
            .filter(resource_type, Some(&matches))
            .map(|(_, record)| SearchResult {
                record: record.clone(),
                similarity_score: None,
            })
            .collect();
        debug!("Keyword search for {:?} matched {} records", term, results.len());
        results
    }

    /// The `k` records nearest to `query_text`, ascending by L2 distance. The type
    /// filter is applied after the nearest-neighbor lookup, so fewer than `k` results
    /// may come back.
    pub fn search_by_similarity(
        &self,
        query_text: &str,
        k: usize,
        resource_type: Option<ResourceType>,
    ) -> Vec<SearchResult> {
        let Some(embedder) = &self.embedder else {
            debug!("Similarity search requested without an embedder");
            return Vec::new();
        };
        if query_text.trim().is_empty() || k == 0 {
            return Vec::new();
        }
        if !read_corpus(&self.corpus).vectors.is_enabled() {
            debug!("Vector index disabled, returning no similarity results");
            return Vec::new();
        }

        let query = match self
            .cache
            .get_or_try_insert(query_text, || embedder.embed(query_text))
        {
            Ok(query) => query,
            Err(e) => {
                warn!("Failed to embed query {:?}: {}", query_text, e);
                return Vec::new();
            }
        };

        let corpus = read_corpus(&self.corpus);
        let hits = match corpus.vectors.search(&query, k) {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Vector search failed: {}", e);
                return Vec::new();
            }
        };

        hits.into_iter()
            .filter_map(|(position, distance)| {
                let record = corpus.store.get(position)?;
                (!record.has_error()
                    && resource_type.is_none_or(|t| record.resource_type() == t))
                .then(|| SearchResult {
                    record: record.clone(),
                    similarity_score: Some(distance),
                })
            })
            .collect()
    }

    /// Every searchable record of one type, in store order.
    pub fn search_by_type(&self, resource_type: ResourceType) -> Vec<ResourceRecord> {
        let usable = |record: &ResourceRecord| !record.has_error();
        read_corpus(&self.corpus)
            .store
            .filter(Some(resource_type), Some(&usable))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Every searchable record, in store order.
    pub fn all_resources(&self) -> Vec<ResourceRecord> {
        let usable = |record: &ResourceRecord| !record.has_error();
        read_corpus(&self.corpus)
            .store
            .filter(None, Some(&usable))
            .map(|(_, record)| record.clone())
            .collect()
    }
}

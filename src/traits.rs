use crate::error::Result;
use crate::indexer::{IndexOutcome, IndexStats};
use crate::record::{ResourceRecord, ResourceType};
use serde::Serialize;
use std::path::Path;

/// Search strategy for querying resources. Strategies are never merged implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SearchType {
    Keyword,
    Similarity,
}

/// A matched record, with the L2 distance attached for similarity searches.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub record: ResourceRecord,
    pub similarity_score: Option<f32>,
}

/// Turns text into a fixed-length vector. The dimension never changes for an instance.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embeds several texts, in order. Defaults to one `embed` call per text.
    fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn dimension(&self) -> usize;
}

/// Converts one file of a given modality into a record.
///
/// Extraction never fails outright: a file that cannot be converted yields a record
/// with empty content and `metadata.error` set.
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn resource_type(&self) -> ResourceType;
    /// Lowercase extensions without the leading dot.
    fn extensions(&self) -> &'static [&'static str];
    fn extract(&self, path: &Path) -> ResourceRecord;

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }
}

/// Capability interface over a concrete index/search backend.
pub trait ResourceBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn search_type(&self) -> SearchType;
    fn index(&self, record: ResourceRecord) -> Result<IndexOutcome>;
    fn search(
        &self,
        query: &str,
        resource_type: Option<ResourceType>,
        limit: usize,
    ) -> Vec<SearchResult>;
    fn persist(&self) -> Result<()>;
    fn stats(&self) -> IndexStats;

    /// Re-embeds the store. Backends without vectors have nothing to rebuild.
    fn rebuild(&self) -> usize {
        0
    }

    /// Indexed paths that no longer exist on disk.
    fn stale_paths(&self) -> Vec<String>;
}

//! Single writer over the record store and the vector index.

use crate::engines::sqlite::SqliteVectorStore;
use crate::error::{IndexError, Result};
use crate::record::{ResourceRecord, ResourceType};
use crate::store::{IndexStore, LoadStatus};
use crate::traits::Embedder;
use crate::vector::{VectorIndex, embedding_input};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Record store and vector index, always mutated together.
pub struct Corpus {
    pub store: IndexStore,
    pub vectors: VectorIndex,
}

pub type SharedCorpus = Arc<RwLock<Corpus>>;

pub(crate) fn read_corpus(corpus: &SharedCorpus) -> RwLockReadGuard<'_, Corpus> {
    corpus.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_corpus(corpus: &SharedCorpus) -> RwLockWriteGuard<'_, Corpus> {
    corpus.write().unwrap_or_else(PoisonError::into_inner)
}

/// What [`Indexer::add_resource`] did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexOutcome {
    pub position: usize,
    pub is_new: bool,
    pub embedded: bool,
}

/// Totals for one batch passed to [`Indexer::add_resources`].
#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub added: usize,
    pub updated: usize,
    /// Records stored with an extraction error.
    pub failed: Vec<String>,
    /// Records refused before reaching the store.
    pub rejected: Vec<String>,
}

impl IngestReport {
    /// Indexes `record` through `index` and folds the outcome into the totals.
    pub fn index_with(
        &mut self,
        record: ResourceRecord,
        index: impl FnOnce(ResourceRecord) -> Result<IndexOutcome>,
    ) -> Result<IndexOutcome> {
        let path = record.file_path().to_string();
        let error = record.metadata.error.clone().filter(|_| record.has_error());
        let result = index(record);
        match &result {
            Ok(outcome) => {
                if outcome.is_new {
                    self.added += 1;
                } else {
                    self.updated += 1;
                }
                if let Some(error) = error {
                    self.failed.push(format!("{}: {}", path, error));
                }
            }
            Err(e) => {
                warn!("Rejected record {:?}: {}", path, e);
                self.rejected.push(format!("{:?}: {}", path, e));
            }
        }
        result
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub records: usize,
    pub failed: usize,
    pub vectors: usize,
    pub vector_index_enabled: bool,
    pub by_type: BTreeMap<ResourceType, usize>,
}

impl IndexStats {
    pub fn from_corpus(corpus: &Corpus) -> Self {
        Self {
            records: corpus.store.len(),
            failed: corpus.store.len() - corpus.store.non_error_count(),
            vectors: corpus.vectors.len(),
            vector_index_enabled: corpus.vectors.is_enabled(),
            by_type: corpus.store.count_by_type(),
        }
    }
}

pub struct Indexer {
    corpus: SharedCorpus,
    embedder: Option<Arc<dyn Embedder>>,
    vector_path: Option<PathBuf>,
    writer: Mutex<()>,
}

impl Indexer {
    /// Wraps an already loaded store. Without an embedder the vector index is disabled.
    pub fn new(store: IndexStore, embedder: Option<Arc<dyn Embedder>>) -> Self {
        let vectors = match &embedder {
            Some(embedder) => VectorIndex::new(embedder.dimension()),
            None => VectorIndex::disabled("no embedding backend configured"),
        };
        Self {
            corpus: Arc::new(RwLock::new(Corpus { store, vectors })),
            embedder,
            vector_path: None,
            writer: Mutex::new(()),
        }
    }

    /// Loads the JSON store and the vector artifact, rebuilding the vectors when the two
    /// disagree. Recoverable problems are returned as warnings.
    pub fn open(
        index_path: impl Into<PathBuf>,
        vector_path: impl Into<PathBuf>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> (Self, Vec<IndexError>) {
        let mut warnings = Vec::new();
        let mut store = IndexStore::new(index_path);
        let store_corrupt = match store.load() {
            LoadStatus::Corrupt(err) => {
                warnings.push(err);
                true
            }
            LoadStatus::Loaded(_) | LoadStatus::Missing => false,
        };

        let mut indexer = Self::new(store, embedder);
        indexer.vector_path = Some(vector_path.into());

        if let Some(embedder) = indexer.embedder.clone() {
            let restored = indexer.restore_vectors(embedder.dimension());
            let needs_rebuild = match restored {
                Ok(Some(vectors)) => {
                    write_corpus(&indexer.corpus).vectors = vectors;
                    false
                }
                Ok(None) => !read_corpus(&indexer.corpus).store.is_empty(),
                Err(err) => {
                    warn!("{}; rebuilding vector index", err);
                    warnings.push(err);
                    true
                }
            };
            if needs_rebuild || store_corrupt {
                let mut corpus = write_corpus(&indexer.corpus);
                rebuild(&mut corpus, embedder.as_ref());
            }
        }

        (indexer, warnings)
    }

    fn restore_vectors(&self, dimension: usize) -> Result<Option<VectorIndex>> {
        let Some(path) = &self.vector_path else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let persisted = SqliteVectorStore::open(path)
            .and_then(|s| s.load())
            .map_err(|e| IndexError::PartialPersistence(format!("unreadable vector artifact: {}", e)))?;
        let Some(persisted) = persisted else {
            return Ok(None);
        };
        let corpus = read_corpus(&self.corpus);
        let vectors = persisted.restore(&corpus.store, dimension)?;
        debug!("Restored {} vectors from {:?}", vectors.len(), path);
        Ok(Some(vectors))
    }

    pub fn corpus(&self) -> SharedCorpus {
        Arc::clone(&self.corpus)
    }

    pub fn embedder(&self) -> Option<Arc<dyn Embedder>> {
        self.embedder.clone()
    }

    /// Adds or replaces the record keyed by its `file_path` and keeps its vector slot
    /// in step with its store position.
    pub fn add_resource(&self, mut record: ResourceRecord) -> Result<IndexOutcome> {
        if record.file_path().trim().is_empty() {
            return Err(IndexError::InvalidRecord(
                "metadata.file_path is empty".to_string(),
            ));
        }
        record.refresh_processed_content();
        record.embedding = None;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let (vectors_enabled, previous_embedding) = {
            let corpus = read_corpus(&self.corpus);
            let previous = corpus
                .store
                .find_by_path(record.file_path())
                .filter(|prev| prev.content() == record.content() && !prev.has_error())
                .and_then(|prev| prev.embedding.clone());
            (corpus.vectors.is_enabled(), previous)
        };

        let wants_vector =
            vectors_enabled && !record.has_error() && !record.content().trim().is_empty();
        let mut embedded = false;
        let embedding = match (&self.embedder, wants_vector) {
            (Some(embedder), true) => match previous_embedding {
                Some(existing) if existing.len() == embedder.dimension() => Some(existing),
                _ => match embedder.embed(embedding_input(record.content())) {
                    Ok(embedding) => {
                        embedded = true;
                        Some(embedding)
                    }
                    Err(e) => {
                        warn!("Failed to embed {}: {}", record.file_path(), e);
                        None
                    }
                },
            },
            _ => None,
        };

        let mut corpus = write_corpus(&self.corpus);
        let corpus = &mut *corpus;
        let outcome = corpus.store.upsert(record);
        let position = outcome.position;

        match embedding {
            Some(embedding) => match corpus.vectors.upsert_at(position, embedding.clone()) {
                Ok(()) => corpus.store.set_embedding(position, Some(embedding)),
                Err(e) => {
                    warn!("Dropping vector for slot {}: {}", position, e);
                    corpus.store.set_embedding(position, None);
                    embedded = false;
                }
            },
            None => {
                if corpus.vectors.remove(position) {
                    debug!("Cleared vector slot {}", position);
                }
            }
        }

        debug!(
            "{} record at position {}",
            if outcome.is_new() { "Added" } else { "Replaced" },
            position
        );
        Ok(IndexOutcome {
            position,
            is_new: outcome.is_new(),
            embedded,
        })
    }

    /// Adds every record, collecting per-record problems instead of stopping.
    pub fn add_resources(&self, records: impl IntoIterator<Item = ResourceRecord>) -> IngestReport {
        let mut report = IngestReport::default();
        for record in records {
            let _ = report.index_with(record, |record| self.add_resource(record));
        }
        info!(
            "Ingested batch: {} added, {} updated, {} failed, {} rejected",
            report.added,
            report.updated,
            report.failed.len(),
            report.rejected.len()
        );
        report
    }

    /// Writes the JSON store, then the vector artifact.
    pub fn save(&self) -> Result<()> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let corpus = read_corpus(&self.corpus);
        corpus.store.save()?;

        if let Some(path) = &self.vector_path
            && corpus.vectors.is_enabled()
        {
            SqliteVectorStore::open(path)
                .and_then(|mut vectors| vectors.save(&corpus.vectors, &corpus.store))
                .map_err(|e| {
                    IndexError::PartialPersistence(format!(
                        "records saved but vectors were not: {}",
                        e
                    ))
                })?;
        }
        Ok(())
    }

    /// Re-populates the vector index from the store. Returns the number of vectors.
    pub fn rebuild_vectors(&self) -> usize {
        let Some(embedder) = &self.embedder else {
            return 0;
        };
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut corpus = write_corpus(&self.corpus);
        rebuild(&mut corpus, embedder.as_ref())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats::from_corpus(&read_corpus(&self.corpus))
    }
}

/// Rebuilds vectors from the store and mirrors them onto the records.
fn rebuild(corpus: &mut Corpus, embedder: &dyn Embedder) -> usize {
    if !corpus.vectors.is_enabled() {
        return 0;
    }
    if let Err(e) = corpus.vectors.build_from(&corpus.store, embedder) {
        warn!("Vector rebuild failed: {}", e);
    }
    for position in 0..corpus.store.len() {
        let embedding = corpus.vectors.get(position).map(<[f32]>::to_vec);
        corpus.store.set_embedding(position, embedding);
    }
    corpus.vectors.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ResourceMetadata;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Counts calls and maps text onto a 3-dimensional bag of letters.
    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let count = |c: char| text.chars().filter(|x| *x == c).count() as f32;
            Ok(vec![count('a'), count('o'), count('e')])
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    fn text_record(path: &str, content: &str) -> ResourceRecord {
        let metadata = ResourceMetadata::for_path(Path::new(path), ResourceType::Text);
        ResourceRecord::new(metadata, content)
    }

    fn create_test_indexer(dir: &TempDir, embedder: Option<Arc<dyn Embedder>>) -> Indexer {
        let (indexer, warnings) = Indexer::open(
            dir.path().join("resources.json"),
            dir.path().join("vectors.db"),
            embedder,
        );
        assert!(warnings.is_empty());
        indexer
    }

    #[test]
    fn test_rejects_record_without_path() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, None);
        let mut record = text_record("a.txt", "loops");
        record.metadata.file_path = "  ".to_string();

        let result = indexer.add_resource(record);
        assert!(matches!(result, Err(IndexError::InvalidRecord(_))));
        assert_eq!(indexer.stats().records, 0);
    }

    #[test]
    fn test_reingest_replaces_in_place() {
        let dir = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let indexer = create_test_indexer(&dir, Some(embedder.clone()));

        let first = indexer.add_resource(text_record("a.txt", "loops")).unwrap();
        indexer.add_resource(text_record("b.txt", "variables")).unwrap();
        let second = indexer.add_resource(text_record("a.txt", "arrays")).unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(second.position, 0);
        assert!(second.embedded);

        let stats = indexer.stats();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.vectors, 2);

        let corpus = indexer.corpus();
        let corpus = read_corpus(&corpus);
        assert_eq!(corpus.vectors.get(0), Some(&[2.0, 0.0, 0.0][..]));
        assert_eq!(
            corpus.store.get(0).unwrap().embedding.as_deref(),
            Some(&[2.0, 0.0, 0.0][..])
        );
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unchanged_content_is_not_reembedded() {
        let dir = TempDir::new().unwrap();
        let embedder = CountingEmbedder::new();
        let indexer = create_test_indexer(&dir, Some(embedder.clone()));

        indexer.add_resource(text_record("a.txt", "loops")).unwrap();
        let again = indexer.add_resource(text_record("a.txt", "loops")).unwrap();

        assert!(!again.embedded);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(indexer.stats().vectors, 1);
    }

    #[test]
    fn test_failed_update_clears_vector_slot() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, Some(CountingEmbedder::new()));

        indexer.add_resource(text_record("a.txt", "loops")).unwrap();
        let metadata = ResourceMetadata::for_path(Path::new("a.txt"), ResourceType::Text);
        indexer
            .add_resource(ResourceRecord::failed(metadata, "file vanished"))
            .unwrap();

        let stats = indexer.stats();
        assert_eq!(stats.records, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.vectors, 0);
    }

    #[test]
    fn test_vector_count_never_exceeds_valid_records() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, Some(CountingEmbedder::new()));
        let metadata = |p: &str| ResourceMetadata::for_path(Path::new(p), ResourceType::Text);

        let batch = vec![
            text_record("a.txt", "loops"),
            ResourceRecord::failed(metadata("b.pdf"), "broken"),
            text_record("c.txt", ""),
            text_record("a.txt", "arrays"),
            ResourceRecord::failed(metadata("c.txt"), "gone"),
            text_record("b.pdf", "recovered"),
        ];
        for record in batch {
            indexer.add_resource(record).unwrap();
            let corpus = indexer.corpus();
            let corpus = read_corpus(&corpus);
            assert!(corpus.vectors.len() <= corpus.store.non_error_count());
        }
        assert_eq!(indexer.stats().vectors, 2);
    }

    #[test]
    fn test_add_resources_report() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, None);
        let metadata = ResourceMetadata::for_path(Path::new("c.pdf"), ResourceType::Pdf);
        let mut nameless = text_record("x.txt", "x");
        nameless.metadata.file_path.clear();

        let report = indexer.add_resources(vec![
            text_record("a.txt", "loops"),
            ResourceRecord::failed(metadata, "no content could be extracted"),
            nameless,
            text_record("a.txt", "loops again"),
        ]);
        assert_eq!(report.added, 2);
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.rejected.len(), 1);
    }

    #[test]
    fn test_save_and_reopen_restores_vectors() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, Some(CountingEmbedder::new()));
        indexer.add_resource(text_record("a.txt", "loops")).unwrap();
        indexer.add_resource(text_record("b.txt", "variables")).unwrap();
        indexer.save().unwrap();

        let embedder = CountingEmbedder::new();
        let reopened = create_test_indexer(&dir, Some(embedder.clone()));
        assert_eq!(reopened.stats().vectors, 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_partial_persistence_forces_rebuild() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, Some(CountingEmbedder::new()));
        indexer.add_resource(text_record("a.txt", "loops")).unwrap();
        indexer.save().unwrap();

        // records saved again without the vector artifact
        indexer.add_resource(text_record("b.txt", "variables")).unwrap();
        read_corpus(&indexer.corpus()).store.save().unwrap();

        let (reopened, warnings) = Indexer::open(
            dir.path().join("resources.json"),
            dir.path().join("vectors.db"),
            Some(CountingEmbedder::new()),
        );
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], IndexError::PartialPersistence(_)));
        assert_eq!(reopened.stats().vectors, 2);
    }

    #[test]
    fn test_record_fixed_without_vectors_is_embedded_on_reopen() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, Some(CountingEmbedder::new()));
        indexer.add_resource(text_record("a.txt", "aaa")).unwrap();
        let metadata = ResourceMetadata::for_path(Path::new("b.txt"), ResourceType::Text);
        indexer
            .add_resource(ResourceRecord::failed(metadata, "not valid UTF-8"))
            .unwrap();
        indexer.save().unwrap();

        // a keyword-only session repairs b.txt and saves only the records
        let keyword_only = create_test_indexer(&dir, None);
        keyword_only.add_resource(text_record("b.txt", "ooo")).unwrap();
        keyword_only.save().unwrap();

        let (reopened, warnings) = Indexer::open(
            dir.path().join("resources.json"),
            dir.path().join("vectors.db"),
            Some(CountingEmbedder::new()),
        );
        assert!(matches!(
            warnings.as_slice(),
            [IndexError::PartialPersistence(_)]
        ));
        assert_eq!(reopened.stats().vectors, 2);
    }

    #[test]
    fn test_corrupt_index_opens_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("resources.json"), "{ not json").unwrap();

        let (indexer, warnings) = Indexer::open(
            dir.path().join("resources.json"),
            dir.path().join("vectors.db"),
            Some(CountingEmbedder::new()),
        );
        assert!(matches!(
            warnings.as_slice(),
            [IndexError::IndexCorruption { .. }]
        ));
        assert_eq!(indexer.stats().records, 0);
        indexer.add_resource(text_record("a.txt", "loops")).unwrap();
        assert_eq!(indexer.stats().vectors, 1);
    }

    #[test]
    fn test_without_embedder_vectors_are_disabled() {
        let dir = TempDir::new().unwrap();
        let indexer = create_test_indexer(&dir, None);
        let outcome = indexer.add_resource(text_record("a.txt", "loops")).unwrap();
        assert!(!outcome.embedded);

        let stats = indexer.stats();
        assert!(!stats.vector_index_enabled);
        assert_eq!(stats.vectors, 0);
        indexer.save().unwrap();
        assert!(!dir.path().join("vectors.db").exists());
    }
}

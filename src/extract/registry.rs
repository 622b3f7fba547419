//! Extractor registry and directory ingestion.

use super::{ImageExtractor, PdfExtractor, TextExtractor, VideoExtractor, failure_record};
use crate::config::Settings;
use crate::error::ExtractionError;
use crate::record::{ResourceRecord, ResourceType};
use crate::traits::Extractor;
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use walkdir::{DirEntry, WalkDir};

/// Registry of extractors keyed by file extension.
pub struct ExtractorRegistry {
    extractors: Vec<Arc<dyn Extractor>>,
    /// Lowercase extension to index into `extractors`
    by_extension: HashMap<String, usize>,
    timeout: Option<Duration>,
    threads: usize,
}

impl ExtractorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
            by_extension: HashMap::new(),
            timeout: None,
            threads: 0,
        }
    }

    /// A registry with the text, PDF, image and video extractors.
    pub fn with_defaults(settings: &Settings) -> Self {
        let timeout = settings.ingest.timeout();
        let mut registry = Self::new()
            .with_timeout(timeout)
            .with_threads(settings.ingest.threads);
        registry.register(TextExtractor::new());
        registry.register(PdfExtractor::new());
        registry.register(ImageExtractor::new());
        registry.register(VideoExtractor::new(settings.video.clone(), timeout));
        registry
    }

    /// Bounds every single-file extraction. `None` lets extraction run to completion.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Worker threads for directory ingestion; 0 uses the global rayon pool.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Register an extractor. Later registrations win for shared extensions.
    pub fn register<E: Extractor + 'static>(&mut self, extractor: E) {
        let index = self.extractors.len();
        for ext in extractor.extensions() {
            self.by_extension.insert((*ext).to_string(), index);
        }
        self.extractors.push(Arc::new(extractor));
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn Extractor>> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        self.by_extension
            .get(&ext)
            .map(|&i| Arc::clone(&self.extractors[i]))
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }

    /// Extracts one file, or `None` when no extractor handles its extension.
    pub fn extract_file(&self, path: &Path) -> Option<ResourceRecord> {
        let extractor = self.for_path(path)?;
        let record = match self.timeout {
            Some(timeout) => extract_with_timeout(extractor, path, timeout),
            None => extract_guarded(extractor.as_ref(), path),
        };
        Some(record)
    }

    /// Supported files under `root`, sorted by path. Hidden entries are skipped.
    pub fn discover(&self, root: &Path) -> Vec<PathBuf> {
        if root.is_file() {
            return if self.supports(root) {
                vec![root.to_path_buf()]
            } else {
                Vec::new()
            };
        }

        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|path| self.supports(path))
            .collect();
        files.sort();
        files
    }

    /// Extracts every supported file under `root` in parallel. Failed files are part
    /// of the result, with `metadata.error` set.
    pub fn ingest_directory(&self, root: &Path) -> Vec<ResourceRecord> {
        let files = self.discover(root);
        info!("Found {} files to process under {:?}", files.len(), root);

        let extract_all = || {
            files
                .par_iter()
                .filter_map(|path| self.extract_file(path))
                .collect::<Vec<_>>()
        };

        let records = match self.pool() {
            Some(pool) => pool.install(extract_all),
            None => extract_all(),
        };

        let failed = records.iter().filter(|r| r.has_error()).count();
        info!(
            "Extracted {} files ({} succeeded, {} failed)",
            records.len(),
            records.len() - failed,
            failed
        );
        records
    }

    /// Ingests the conventional `text/`, `pdf/`, `video/` and `image/` folders of a
    /// resource root, or the whole tree when none of them exist.
    pub fn ingest_categories(&self, root: &Path) -> Vec<ResourceRecord> {
        let folders: Vec<PathBuf> = ResourceType::ALL
            .iter()
            .map(|t| root.join(t.as_str()))
            .filter(|dir| dir.is_dir())
            .collect();

        if folders.is_empty() {
            debug!("No category folders under {:?}, walking the whole tree", root);
            return self.ingest_directory(root);
        }
        folders
            .iter()
            .flat_map(|dir| self.ingest_directory(dir))
            .collect()
    }

    fn pool(&self) -> Option<rayon::ThreadPool> {
        if self.threads == 0 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("Could not build extraction pool: {}, using the global pool", e);
                None
            }
        }
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

/// Runs `extractor`, turning a panic inside it into an error record for `path`.
pub fn extract_guarded(extractor: &dyn Extractor, path: &Path) -> ResourceRecord {
    panic::catch_unwind(AssertUnwindSafe(|| extractor.extract(path))).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!("Extractor {} panicked on {:?}: {}", extractor.name(), path, reason);
        failure_record(
            path,
            extractor.resource_type(),
            ExtractionError::ToolFailed {
                tool: extractor.name().to_string(),
                reason: format!("panicked: {}", reason),
            },
        )
    })
}

/// Runs `extractor` on a worker thread and gives up after `timeout`. A timed out file
/// yields an error record; the worker is left to finish on its own.
pub fn extract_with_timeout(
    extractor: Arc<dyn Extractor>,
    path: &Path,
    timeout: Duration,
) -> ResourceRecord {
    let resource_type = extractor.resource_type();
    let (tx, rx) = mpsc::channel();
    let worker_extractor = Arc::clone(&extractor);
    let worker_path = path.to_path_buf();

    let spawned = thread::Builder::new()
        .name(format!("extract-{}", extractor.name()))
        .spawn(move || {
            let _ = tx.send(extract_guarded(worker_extractor.as_ref(), &worker_path));
        });
    if let Err(e) = spawned {
        return failure_record(path, resource_type, ExtractionError::Io(e));
    }

    match rx.recv_timeout(timeout) {
        Ok(record) => record,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!("Extraction of {:?} timed out after {:?}", path, timeout);
            failure_record(path, resource_type, ExtractionError::Timeout(timeout))
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => failure_record(
            path,
            resource_type,
            ExtractionError::ToolFailed {
                tool: extractor.name().to_string(),
                reason: "extractor stopped without a result".to_string(),
            },
        ),
    }
}

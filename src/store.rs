//! Durable, ordered collection of resource records keyed by `file_path`.

use crate::error::{IndexError, Result};
use crate::record::{ResourceRecord, ResourceType};
use chrono::Utc;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Outcome of [`IndexStore::load`].
#[derive(Debug)]
pub enum LoadStatus {
    Loaded(usize),
    /// No file on disk; the store starts empty.
    Missing,
    /// The file could not be read back; the store starts empty.
    Corrupt(IndexError),
}

/// Outcome of [`IndexStore::upsert`].
#[derive(Debug)]
pub struct UpsertOutcome {
    pub position: usize,
    /// The record that was replaced, if any.
    pub previous: Option<ResourceRecord>,
}

impl UpsertOutcome {
    pub fn is_new(&self) -> bool {
        self.previous.is_none()
    }

    pub fn content_changed(&self, current: &ResourceRecord) -> bool {
        self.previous
            .as_ref()
            .is_none_or(|prev| prev.content() != current.content())
    }
}

pub struct IndexStore {
    path: PathBuf,
    records: Vec<ResourceRecord>,
    positions: HashMap<String, usize>,
}

impl IndexStore {
    /// Creates an empty store persisted at `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory collection with the persisted one.
    pub fn load(&mut self) -> LoadStatus {
        self.records.clear();
        self.positions.clear();

        if !self.path.exists() {
            debug!("No index file at {:?}, starting empty", self.path);
            return LoadStatus::Missing;
        }

        let parsed = fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|data| {
                serde_json::from_str::<Vec<ResourceRecord>>(&data).map_err(|e| e.to_string())
            });

        match parsed {
            Ok(records) => {
                for record in records {
                    self.insert_loaded(record);
                }
                info!("Loaded {} records from {:?}", self.records.len(), self.path);
                LoadStatus::Loaded(self.records.len())
            }
            Err(reason) => {
                let err = IndexError::IndexCorruption {
                    path: self.path.clone(),
                    reason,
                };
                warn!("{}; continuing with an empty index", err);
                LoadStatus::Corrupt(err)
            }
        }
    }

    fn insert_loaded(&mut self, mut record: ResourceRecord) {
        if record.file_path().trim().is_empty() {
            warn!("Dropping persisted record without a file_path");
            return;
        }
        record.refresh_processed_content();
        match self.positions.get(record.file_path()) {
            Some(&position) => {
                warn!(
                    "Duplicate persisted record for {}, keeping the later one",
                    record.file_path()
                );
                self.records[position] = record;
            }
            None => {
                self.positions
                    .insert(record.file_path().to_string(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Atomically writes the whole collection as a JSON array.
    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer_pretty(&mut writer, &self.records)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| IndexError::Io(e.error))?;

        debug!("Saved {} records to {:?}", self.records.len(), self.path);
        Ok(())
    }

    pub fn find_by_path(&self, path: &str) -> Option<&ResourceRecord> {
        self.position_of(path).map(|p| &self.records[p])
    }

    pub fn position_of(&self, path: &str) -> Option<usize> {
        self.positions.get(path).copied()
    }

    /// Replaces the record with the same `file_path` in place, or appends it.
    pub fn upsert(&mut self, mut record: ResourceRecord) -> UpsertOutcome {
        let now = Utc::now();
        match self.positions.get(record.file_path()).copied() {
            Some(position) => {
                record.metadata.indexed_at = self.records[position]
                    .metadata
                    .indexed_at
                    .or(record.metadata.indexed_at);
                record.metadata.updated_at = Some(now);
                let previous = std::mem::replace(&mut self.records[position], record);
                UpsertOutcome {
                    position,
                    previous: Some(previous),
                }
            }
            None => {
                record.metadata.indexed_at = Some(now);
                record.metadata.updated_at = None;
                let position = self.records.len();
                self.positions
                    .insert(record.file_path().to_string(), position);
                self.records.push(record);
                UpsertOutcome {
                    position,
                    previous: None,
                }
            }
        }
    }

    /// Lazily yields matching records in insertion order. The iterator is `Clone`,
    /// so a copy taken before iterating can be replayed.
    pub fn filter<'a>(
        &'a self,
        resource_type: Option<ResourceType>,
        predicate: Option<&'a dyn Fn(&ResourceRecord) -> bool>,
    ) -> RecordFilter<'a> {
        RecordFilter {
            records: &self.records,
            next: 0,
            resource_type,
            predicate,
        }
    }

    pub fn get(&self, position: usize) -> Option<&ResourceRecord> {
        self.records.get(position)
    }

    pub fn records(&self) -> &[ResourceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn non_error_count(&self) -> usize {
        self.records.iter().filter(|r| !r.has_error()).count()
    }

    pub fn count_by_type(&self) -> BTreeMap<ResourceType, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.resource_type()).or_insert(0) += 1;
        }
        counts
    }

    pub fn set_embedding(&mut self, position: usize, embedding: Option<Vec<f32>>) {
        if let Some(record) = self.records.get_mut(position) {
            record.embedding = embedding;
        }
    }

    /// Paths of records whose file no longer exists. Nothing is removed.
    pub fn stale_paths(&self) -> Vec<&str> {
        self.records
            .iter()
            .map(|r| r.file_path())
            .filter(|p| !Path::new(p).exists())
            .collect()
    }
}

/// Restartable, order-preserving view over an [`IndexStore`].
#[derive(Clone)]
pub struct RecordFilter<'a> {
    records: &'a [ResourceRecord],
    next: usize,
    resource_type: Option<ResourceType>,
    predicate: Option<&'a dyn Fn(&ResourceRecord) -> bool>,
}

impl RecordFilter<'_> {
    /// Rewinds to the first record.
    pub fn restart(&mut self) {
        self.next = 0;
    }

    fn matches(&self, record: &ResourceRecord) -> bool {
        self.resource_type
            .is_none_or(|t| record.resource_type() == t)
            && self.predicate.is_none_or(|p| p(record))
    }
}

impl<'a> Iterator for RecordFilter<'a> {
    type Item = (usize, &'a ResourceRecord);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.records.len() {
            let position = self.next;
            self.next += 1;
            let record = &self.records[position];
            if self.matches(record) {
                return Some((position, record));
            }
        }
        None
    }
}

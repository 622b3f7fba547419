use crate::error::{IndexError, Result};
use crate::store::IndexStore;
use crate::vector::VectorIndex;
use log::{debug, info};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Vectors read back from disk, not yet checked against the record store.
#[derive(Debug, Clone)]
pub struct PersistedVectors {
    pub dimension: usize,
    pub record_count: usize,
    pub entries: Vec<PersistedVector>,
}

#[derive(Debug, Clone)]
pub struct PersistedVector {
    pub position: usize,
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

/// SQLite artifact holding the vector index next to the JSON record store.
pub struct SqliteVectorStore {
    db_path: PathBuf,
    conn: Connection,
}

impl SqliteVectorStore {
    /// Opens (or creates) the vector artifact at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        debug!("Opening vector store at {:?}", db_path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        let store = SqliteVectorStore {
            db_path: db_path.to_path_buf(),
            conn,
        };
        store.create_table()?;
        Ok(store)
    }

    fn create_table(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS vector_meta (
                    key TEXT PRIMARY KEY,
                    value INTEGER NOT NULL
                )",
            [],
        )?;
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS vectors (
                    position INTEGER PRIMARY KEY,
                    content_hash TEXT NOT NULL,
                    embedding BLOB NOT NULL
                )",
            [],
        )?;
        debug!("Created vector tables if they did not exist.");
        Ok(())
    }

    /// Replaces the persisted vectors with the contents of `index` in one transaction.
    pub fn save(&mut self, index: &VectorIndex, store: &IndexStore) -> Result<()> {
        let Some(dimension) = index.dimension() else {
            debug!("Vector index disabled, nothing to persist");
            return Ok(());
        };

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM vectors", [])?;
        tx.execute("DELETE FROM vector_meta", [])?;
        tx.execute(
            "INSERT INTO vector_meta (key, value) VALUES ('dimension', ?1), ('record_count', ?2)",
            rusqlite::params![dimension as i64, store.len() as i64],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO vectors (position, content_hash, embedding) VALUES (?1, ?2, ?3)",
            )?;
            for (position, embedding) in index.iter() {
                let Some(record) = store.get(position) else {
                    return Err(IndexError::PartialPersistence(format!(
                        "vector slot {} has no record",
                        position
                    )));
                };
                let embedding_bytes: Vec<u8> =
                    embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
                stmt.execute(rusqlite::params![
                    position as i64,
                    content_hash(record.content()),
                    embedding_bytes
                ])?;
            }
        }
        tx.commit()?;

        info!("Persisted {} vectors to {:?}", index.len(), self.db_path);
        Ok(())
    }

    /// Reads the persisted vectors, or `None` when nothing was ever saved.
    pub fn load(&self) -> Result<Option<PersistedVectors>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM vector_meta")?;
        let mut dimension = None;
        let mut record_count = None;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: i64 = row.get(1)?;
            Ok((key, value))
        })?;
        for row in rows {
            let (key, value) = row?;
            match key.as_str() {
                "dimension" => dimension = Some(value as usize),
                "record_count" => record_count = Some(value as usize),
                _ => {}
            }
        }
        let (Some(dimension), Some(record_count)) = (dimension, record_count) else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT position, content_hash, embedding FROM vectors ORDER BY position")?;
        let rows = stmt.query_map([], |row| {
            let position: i64 = row.get(0)?;
            let content_hash: String = row.get(1)?;
            let embedding_bytes: Vec<u8> = row.get(2)?;
            Ok((position, content_hash, embedding_bytes))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (position, content_hash, embedding_bytes) = row?;
            let embedding: Vec<f32> = embedding_bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();
            entries.push(PersistedVector {
                position: position as usize,
                content_hash,
                embedding,
            });
        }

        debug!("Read {} persisted vectors from {:?}", entries.len(), self.db_path);
        Ok(Some(PersistedVectors {
            dimension,
            record_count,
            entries,
        }))
    }
}

impl PersistedVectors {
    /// Rebuilds a [`VectorIndex`] if these vectors still describe `store` exactly.
    pub fn restore(self, store: &IndexStore, dimension: usize) -> Result<VectorIndex> {
        let mismatch = |reason: String| Err(IndexError::PartialPersistence(reason));

        if self.dimension != dimension {
            return mismatch(format!(
                "persisted dimension {} differs from embedder dimension {}",
                self.dimension, dimension
            ));
        }
        if self.record_count != store.len() {
            return mismatch(format!(
                "vectors were saved for {} records, store has {}",
                self.record_count,
                store.len()
            ));
        }

        let mut index = VectorIndex::new(dimension);
        for entry in self.entries {
            let Some(record) = store.get(entry.position) else {
                return mismatch(format!("slot {} is out of range", entry.position));
            };
            if record.has_error() {
                return mismatch(format!(
                    "slot {} points at failed record {}",
                    entry.position,
                    record.file_path()
                ));
            }
            if content_hash(record.content()) != entry.content_hash {
                return mismatch(format!(
                    "slot {} is stale for {}",
                    entry.position,
                    record.file_path()
                ));
            }
            index.add(entry.position, entry.embedding)?;
        }

        // every searchable record needs a slot
        let missing = store
            .records()
            .iter()
            .enumerate()
            .find(|(position, record)| {
                !record.has_error()
                    && !record.content().trim().is_empty()
                    && index.get(*position).is_none()
            });
        if let Some((position, record)) = missing {
            return mismatch(format!(
                "record {} at slot {} has no vector",
                record.file_path(),
                position
            ));
        }
        Ok(index)
    }
}

pub fn content_hash(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ResourceMetadata, ResourceRecord, ResourceType};
    use tempfile::TempDir;

    fn create_test_store() -> IndexStore {
        let mut store = IndexStore::new("unused.json");
        for (path, content) in [("a.txt", "loops"), ("b.txt", "variables")] {
            let metadata = ResourceMetadata::for_path(Path::new(path), ResourceType::Text);
            store.upsert(ResourceRecord::new(metadata, content));
        }
        store
    }

    fn create_test_vectors() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index.add(0, vec![0.1, 0.2, 0.3]).unwrap();
        index.add(1, vec![-1.0, 0.5, 2.25]).unwrap();
        index
    }

    #[test]
    fn test_save_and_restore() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = create_test_store();
        let index = create_test_vectors();

        let mut vectors = SqliteVectorStore::open(&temp_dir.path().join("vectors.db")).unwrap();
        vectors.save(&index, &store).unwrap();

        let persisted = vectors.load().unwrap().expect("vectors were saved");
        assert_eq!(persisted.dimension, 3);
        assert_eq!(persisted.record_count, 2);

        let restored = persisted.restore(&store, 3).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.get(1), Some(&[-1.0, 0.5, 2.25][..]));
    }

    #[test]
    fn test_load_empty_artifact() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let vectors = SqliteVectorStore::open(&temp_dir.path().join("vectors.db")).unwrap();
        assert!(vectors.load().unwrap().is_none());
    }

    #[test]
    fn test_restore_detects_count_mismatch() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut store = create_test_store();
        let mut vectors = SqliteVectorStore::open(&temp_dir.path().join("vectors.db")).unwrap();
        vectors.save(&create_test_vectors(), &store).unwrap();

        let metadata = ResourceMetadata::for_path(Path::new("c.txt"), ResourceType::Text);
        store.upsert(ResourceRecord::new(metadata, "recursion"));

        let result = vectors.load().unwrap().unwrap().restore(&store, 3);
        assert!(matches!(result, Err(IndexError::PartialPersistence(_))));
    }

    #[test]
    fn test_restore_detects_stale_content() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut store = create_test_store();
        let mut vectors = SqliteVectorStore::open(&temp_dir.path().join("vectors.db")).unwrap();
        vectors.save(&create_test_vectors(), &store).unwrap();

        let metadata = ResourceMetadata::for_path(Path::new("a.txt"), ResourceType::Text);
        store.upsert(ResourceRecord::new(metadata, "arrays"));

        let result = vectors.load().unwrap().unwrap().restore(&store, 3);
        assert!(matches!(result, Err(IndexError::PartialPersistence(_))));
    }

    #[test]
    fn test_restore_detects_record_without_vector() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = create_test_store();
        let mut partial = VectorIndex::new(3);
        partial.add(0, vec![0.1, 0.2, 0.3]).unwrap();

        let mut vectors = SqliteVectorStore::open(&temp_dir.path().join("vectors.db")).unwrap();
        vectors.save(&partial, &store).unwrap();

        let result = vectors.load().unwrap().unwrap().restore(&store, 3);
        assert!(matches!(result, Err(IndexError::PartialPersistence(_))));
    }

    #[test]
    fn test_restore_detects_dimension_change() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = create_test_store();
        let mut vectors = SqliteVectorStore::open(&temp_dir.path().join("vectors.db")).unwrap();
        vectors.save(&create_test_vectors(), &store).unwrap();

        let result = vectors.load().unwrap().unwrap().restore(&store, 384);
        assert!(matches!(result, Err(IndexError::PartialPersistence(_))));
    }
}

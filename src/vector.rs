//! Exact nearest-neighbor index over record embeddings.
//!
//! Slots are keyed by the position of the owning record in the [`IndexStore`], so
//! replacing a record overwrites its slot instead of appending a new one.

use crate::error::{IndexError, Result};
use crate::record::ResourceRecord;
use crate::store::IndexStore;
use crate::traits::Embedder;
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// Number of content characters fed to the embedder per record.
pub const EMBED_CHAR_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
enum State {
    Disabled {
        reason: String,
    },
    Active {
        dimension: usize,
        slots: BTreeMap<usize, Vec<f32>>,
    },
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    state: State,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            state: State::Active {
                dimension,
                slots: BTreeMap::new(),
            },
        }
    }

    /// An index that accepts every call as a no-op and never returns results.
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            state: State::Disabled {
                reason: reason.into(),
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        match &self.state {
            State::Disabled { reason } => Some(reason),
            State::Active { .. } => None,
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        match &self.state {
            State::Active { dimension, .. } => Some(*dimension),
            State::Disabled { .. } => None,
        }
    }

    pub fn len(&self) -> usize {
        match &self.state {
            State::Active { slots, .. } => slots.len(),
            State::Disabled { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&mut self) {
        if let State::Active { slots, .. } = &mut self.state {
            slots.clear();
        }
    }

    pub fn get(&self, position: usize) -> Option<&[f32]> {
        match &self.state {
            State::Active { slots, .. } => slots.get(&position).map(Vec::as_slice),
            State::Disabled { .. } => None,
        }
    }

    /// Occupied slots in position order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f32])> {
        let slots = match &self.state {
            State::Active { slots, .. } => Some(slots),
            State::Disabled { .. } => None,
        };
        slots
            .into_iter()
            .flat_map(|s| s.iter().map(|(p, e)| (*p, e.as_slice())))
    }

    /// Stores `embedding` in an empty slot.
    pub fn add(&mut self, position: usize, embedding: Vec<f32>) -> Result<()> {
        let State::Active { dimension, slots } = &mut self.state else {
            return Ok(());
        };
        if embedding.len() != *dimension {
            return Err(IndexError::DimensionMismatch {
                expected: *dimension,
                actual: embedding.len(),
            });
        }
        if slots.contains_key(&position) {
            return Err(IndexError::SlotOccupied(position));
        }
        slots.insert(position, embedding);
        Ok(())
    }

    /// Clears a slot. Returns whether it was occupied.
    pub fn remove(&mut self, position: usize) -> bool {
        match &mut self.state {
            State::Active { slots, .. } => slots.remove(&position).is_some(),
            State::Disabled { .. } => false,
        }
    }

    /// Remove-then-add. On a dimension mismatch the slot is left empty.
    pub fn upsert_at(&mut self, position: usize, embedding: Vec<f32>) -> Result<()> {
        self.remove(position);
        self.add(position, embedding)
    }

    /// The `k` nearest slots to `query`, ascending by L2 distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        let State::Active { dimension, slots } = &self.state else {
            return Ok(Vec::new());
        };
        if query.len() != *dimension {
            return Err(IndexError::DimensionMismatch {
                expected: *dimension,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut hits: Vec<(usize, f32)> = slots
            .iter()
            .map(|(position, embedding)| (*position, l2_distance(query, embedding)))
            .collect();
        hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        hits.truncate(k);
        debug!("Vector search returned {} hits", hits.len());
        Ok(hits)
    }

    /// Discards every slot and re-populates from the store.
    ///
    /// Stored record embeddings of the right dimension are reused; everything else is
    /// re-embedded. Records with an error or no content get no slot.
    pub fn build_from(&mut self, store: &IndexStore, embedder: &dyn Embedder) -> Result<usize> {
        let Some(dimension) = self.dimension() else {
            return Ok(0);
        };
        self.reset();

        let mut reused = 0;
        let mut pending: Vec<(usize, &ResourceRecord)> = Vec::new();
        for (position, record) in store.records().iter().enumerate() {
            if record.has_error() || record.content().trim().is_empty() {
                continue;
            }
            match &record.embedding {
                Some(existing) if existing.len() == dimension => {
                    reused += 1;
                    self.add_or_warn(position, record, existing.clone());
                }
                _ => pending.push((position, record)),
            }
        }

        if !pending.is_empty() {
            let inputs: Vec<&str> = pending
                .iter()
                .map(|(_, record)| embedding_input(record.content()))
                .collect();
            match embedder.embed_batch(&inputs) {
                Ok(embeddings) if embeddings.len() == pending.len() => {
                    for ((position, record), embedding) in pending.into_iter().zip(embeddings) {
                        self.add_or_warn(position, record, embedding);
                    }
                }
                batch => {
                    if let Err(e) = batch {
                        warn!("Batch embedding failed, embedding records one by one: {}", e);
                    }
                    for (position, record) in pending {
                        match embedder.embed(embedding_input(record.content())) {
                            Ok(embedding) => self.add_or_warn(position, record, embedding),
                            Err(e) => warn!("Skipping vector for {}: {}", record.file_path(), e),
                        }
                    }
                }
            }
        }

        info!(
            "Rebuilt vector index: {} vectors ({} reused) over {} records",
            self.len(),
            reused,
            store.len()
        );
        Ok(self.len())
    }

    fn add_or_warn(&mut self, position: usize, record: &ResourceRecord, embedding: Vec<f32>) {
        if let Err(e) = self.add(position, embedding) {
            warn!("Skipping vector for {}: {}", record.file_path(), e);
        }
    }
}

/// The prefix of `content` that is embedded for a record.
pub fn embedding_input(content: &str) -> &str {
    match content.char_indices().nth(EMBED_CHAR_LIMIT) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ResourceMetadata, ResourceRecord, ResourceType};
    use std::path::Path;

    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_add_and_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        index.add(0, vec![0.0, 0.0, 1.0]).unwrap();
        assert_eq!(index.len(), 1);

        let err = index.add(1, vec![1.0]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
        assert!(matches!(
            index.add(0, vec![1.0, 1.0, 1.0]),
            Err(IndexError::SlotOccupied(0))
        ));
    }

    #[test]
    fn test_upsert_at_overwrites_slot() {
        let mut index = VectorIndex::new(2);
        index.add(4, vec![1.0, 1.0]).unwrap();
        index.upsert_at(4, vec![2.0, 2.0]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(4), Some(&[2.0, 2.0][..]));

        assert!(index.remove(4));
        assert!(!index.remove(4));
        assert!(index.is_empty());
    }

    #[test]
    fn test_search_orders_by_distance() {
        let mut index = VectorIndex::new(2);
        index.add(0, vec![5.0, 5.0]).unwrap();
        index.add(1, vec![1.0, 0.0]).unwrap();
        index.add(2, vec![0.0, 0.0]).unwrap();
        index.add(3, vec![3.0, 4.0]).unwrap();

        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<_> = hits.iter().map(|(p, _)| *p).collect();
        assert_eq!(positions, vec![2, 1, 3]);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
        assert!((hits[2].1 - 5.0).abs() < 1e-6);

        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
        assert!(index.search(&[0.0], 1).is_err());
    }

    #[test]
    fn test_disabled_index_is_a_no_op() {
        let mut index = VectorIndex::disabled("model not available");
        assert!(!index.is_enabled());
        assert_eq!(index.disabled_reason(), Some("model not available"));
        index.add(0, vec![1.0]).unwrap();
        index.upsert_at(1, vec![1.0, 2.0]).unwrap();
        assert_eq!(index.len(), 0);
        assert!(index.search(&[1.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_build_from_skips_failed_records() {
        let mut store = IndexStore::new("unused.json");
        let meta = |p: &str| ResourceMetadata::for_path(Path::new(p), ResourceType::Text);
        store.upsert(ResourceRecord::new(meta("a.txt"), "loops"));
        store.upsert(ResourceRecord::failed(meta("b.txt"), "unreadable"));
        let mut reused = ResourceRecord::new(meta("c.txt"), "arrays");
        reused.embedding = Some(vec![9.0, 9.0]);
        store.upsert(reused);
        store.upsert(ResourceRecord::new(meta("d.txt"), "   "));

        let mut index = VectorIndex::new(2);
        index.add(1, vec![0.0, 0.0]).unwrap();
        let built = index.build_from(&store, &LengthEmbedder).unwrap();

        assert_eq!(built, 2);
        assert_eq!(index.get(0), Some(&[5.0, 1.0][..]));
        assert_eq!(index.get(1), None);
        assert_eq!(index.get(2), Some(&[9.0, 9.0][..]));
        assert!(index.len() <= store.non_error_count());
    }

    /// Counts batch calls; a batch containing "boom" fails as a whole.
    struct BatchEmbedder {
        batches: std::sync::atomic::AtomicUsize,
    }

    impl Embedder for BatchEmbedder {
        fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            if text == "boom" {
                anyhow::bail!("cannot embed");
            }
            Ok(vec![text.len() as f32, 0.0])
        }

        fn embed_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.batches
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if texts.contains(&"boom") {
                anyhow::bail!("batch rejected");
            }
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    #[test]
    fn test_build_from_embeds_in_one_batch() {
        let mut store = IndexStore::new("unused.json");
        let meta = |p: &str| ResourceMetadata::for_path(Path::new(p), ResourceType::Text);
        store.upsert(ResourceRecord::new(meta("a.txt"), "loops"));
        store.upsert(ResourceRecord::new(meta("b.txt"), "recursion"));
        let embedder = BatchEmbedder {
            batches: Default::default(),
        };

        let mut index = VectorIndex::new(2);
        assert_eq!(index.build_from(&store, &embedder).unwrap(), 2);
        assert_eq!(embedder.batches.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(index.get(1), Some(&[9.0, 0.0][..]));
    }

    #[test]
    fn test_build_from_falls_back_when_batch_fails() {
        let mut store = IndexStore::new("unused.json");
        let meta = |p: &str| ResourceMetadata::for_path(Path::new(p), ResourceType::Text);
        store.upsert(ResourceRecord::new(meta("a.txt"), "loops"));
        store.upsert(ResourceRecord::new(meta("b.txt"), "boom"));
        store.upsert(ResourceRecord::new(meta("c.txt"), "graphs"));
        let embedder = BatchEmbedder {
            batches: Default::default(),
        };

        let mut index = VectorIndex::new(2);
        assert_eq!(index.build_from(&store, &embedder).unwrap(), 2);
        assert_eq!(index.get(1), None);
        assert_eq!(index.get(2), Some(&[6.0, 0.0][..]));
    }

    #[test]
    fn test_embedding_input_truncates_on_char_boundary() {
        let text = "é".repeat(EMBED_CHAR_LIMIT + 10);
        let input = embedding_input(&text);
        assert_eq!(input.chars().count(), EMBED_CHAR_LIMIT);
        assert_eq!(embedding_input("short"), "short");
    }
}

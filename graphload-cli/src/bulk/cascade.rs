//! Cascade collection for delete previews
//!
//! Walks reverse references breadth-first from a set of root records and
//! gathers every stored row the storage engine would remove along with
//! them. Only `Cascade` edges are followed. Rows that would merely have a
//! reference nulled, or that would block the delete, are tallied on the
//! side. Collection only reads.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use super::error::{BulkError, Result};
use crate::metadata::{CascadePolicy, EntityType, MetadataProvider};
use crate::records::{Instance, RecordKey, RecordSet};
use crate::storage::RecordReader;

/// Rows affected by deleting a set of roots
#[derive(Debug, Clone, Default)]
pub struct CascadeSet {
    removed: BTreeMap<String, BTreeMap<RecordKey, Instance>>,
    nullified: BTreeMap<String, BTreeSet<RecordKey>>,
    blocking: BTreeMap<String, BTreeSet<RecordKey>>,
}

impl CascadeSet {
    /// Number of `entity` rows that would be removed
    pub fn count(&self, entity: &str) -> usize {
        self.removed.get(entity).map_or(0, BTreeMap::len)
    }

    /// Removal counts for every affected entity
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.removed
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(name, rows)| (name.clone(), rows.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.removed.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn contains(&self, entity: &str, key: RecordKey) -> bool {
        self.removed
            .get(entity)
            .is_some_and(|rows| rows.contains_key(&key))
    }

    /// Removed rows of `entity`, in key order
    pub fn instances(&self, entity: &str) -> impl Iterator<Item = &Instance> {
        self.removed.get(entity).into_iter().flat_map(BTreeMap::values)
    }

    /// Rows whose reference would be set to null, per entity
    pub fn nullified_counts(&self) -> BTreeMap<String, usize> {
        self.nullified
            .iter()
            .map(|(name, keys)| (name.clone(), keys.len()))
            .collect()
    }

    /// Surviving rows that would make the delete fail, per entity
    pub fn blocking(&self) -> &BTreeMap<String, BTreeSet<RecordKey>> {
        &self.blocking
    }

    pub fn is_blocked(&self) -> bool {
        !self.blocking.is_empty()
    }

    /// Add rows, returning the keys not seen before
    fn absorb(&mut self, entity: &str, rows: Vec<Instance>) -> Vec<RecordKey> {
        let bucket = self.removed.entry(entity.to_string()).or_default();
        let mut fresh = Vec::new();
        for row in rows {
            let Some(key) = row.key else { continue };
            if let std::collections::btree_map::Entry::Vacant(slot) = bucket.entry(key) {
                slot.insert(row);
                fresh.push(key);
            }
        }
        fresh
    }

    /// Drop side tallies for rows that are themselves being removed
    fn settle(&mut self) {
        let removed = &self.removed;
        for tally in [&mut self.nullified, &mut self.blocking] {
            for (name, keys) in tally.iter_mut() {
                if let Some(rows) = removed.get(name) {
                    keys.retain(|k| !rows.contains_key(k));
                }
            }
            tally.retain(|_, keys| !keys.is_empty());
        }
    }
}

/// Computes cascade sets from relationship metadata
#[derive(Clone)]
pub struct CascadeCollector {
    metadata: Arc<dyn MetadataProvider>,
}

impl CascadeCollector {
    pub fn new(metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { metadata }
    }

    /// Collect everything removed by deleting `roots` of `entity`
    ///
    /// Roots must carry keys. Roots that no longer exist in storage are not
    /// counted.
    pub async fn collect(
        &self,
        reader: &mut dyn RecordReader,
        entity: &str,
        roots: &[Instance],
    ) -> Result<CascadeSet> {
        let (root_type, keys) = self.root_keys(entity, roots)?;
        let mut set = CascadeSet::default();
        self.expand(reader, &mut set, &root_type, &keys).await?;
        set.settle();
        Ok(set)
    }

    /// Union of the cascade sets of several root collections
    pub async fn collect_many(
        &self,
        reader: &mut dyn RecordReader,
        roots: &[RecordSet],
    ) -> Result<CascadeSet> {
        let validated = roots
            .iter()
            .map(|record_set| self.root_keys(&record_set.entity, &record_set.records))
            .collect::<Result<Vec<_>>>()?;

        let mut set = CascadeSet::default();
        for (root_type, keys) in &validated {
            self.expand(reader, &mut set, root_type, keys).await?;
        }
        set.settle();
        Ok(set)
    }

    /// Sorted, deduplicated root keys; every root must be saved
    fn root_keys(&self, entity: &str, roots: &[Instance]) -> Result<(Arc<EntityType>, Vec<RecordKey>)> {
        let root_type = self.entity(entity)?;

        let mut keys = Vec::with_capacity(roots.len());
        for (position, root) in roots.iter().enumerate() {
            match root.key {
                Some(key) => keys.push(key),
                None => {
                    return Err(BulkError::validation(format!(
                        "{} record at position {} has no key and cannot be deleted",
                        entity, position
                    )));
                }
            }
        }
        keys.sort_unstable();
        keys.dedup();
        Ok((root_type, keys))
    }

    async fn expand(
        &self,
        reader: &mut dyn RecordReader,
        set: &mut CascadeSet,
        root_type: &EntityType,
        keys: &[RecordKey],
    ) -> Result<()> {
        let existing = reader.fetch_by_keys(root_type, keys).await?;
        let fresh = set.absorb(&root_type.name, existing);

        let mut frontier: VecDeque<(String, Vec<RecordKey>)> = VecDeque::new();
        frontier.push_back((root_type.name.clone(), fresh));

        while let Some((current, keys)) = frontier.pop_front() {
            if keys.is_empty() {
                continue;
            }

            for reverse in self.metadata.reverse_references(&current) {
                let source = self.entity(&reverse.source)?;

                match reverse.on_delete {
                    CascadePolicy::Cascade => {
                        let rows = reader.fetch_referencing(&source, &reverse.field, &keys).await?;
                        let fresh = set.absorb(&reverse.source, rows);
                        if !fresh.is_empty() {
                            log::trace!(
                                "Cascade {} -> {}.{}: {} new rows",
                                current,
                                reverse.source,
                                reverse.field,
                                fresh.len()
                            );
                            frontier.push_back((reverse.source.clone(), fresh));
                        }
                    }
                    CascadePolicy::SetNull => {
                        let rows = reader.fetch_referencing(&source, &reverse.field, &keys).await?;
                        set.nullified
                            .entry(reverse.source.clone())
                            .or_default()
                            .extend(rows.iter().filter_map(|r| r.key));
                    }
                    CascadePolicy::Restrict | CascadePolicy::DoNothing => {
                        let rows = reader.fetch_referencing(&source, &reverse.field, &keys).await?;
                        set.blocking
                            .entry(reverse.source.clone())
                            .or_default()
                            .extend(rows.iter().filter_map(|r| r.key));
                    }
                }
            }
        }

        Ok(())
    }

    fn entity(&self, name: &str) -> Result<Arc<EntityType>> {
        self.metadata
            .entity(name)
            .ok_or_else(|| BulkError::UnknownEntity(name.to_string()))
    }
}

//! Multi-type bulk operations
//!
//! Orders the record sets of one call by their reference dependencies and
//! runs the executor one type at a time. Every chunk of a type finishes
//! before the next type starts. `Ref` values pointing at records created
//! earlier in the same call are replaced by the created keys.

use std::collections::HashMap;
use std::sync::Arc;

use log::{info, warn};

use super::cascade::CascadeSet;
use super::dependency_graph::DependencyGraph;
use super::error::{BulkError, Result};
use super::executor::{BulkExecutor, BulkOutcome, DeleteSummary};
use crate::metadata::{EntityType, MetadataProvider};
use crate::records::{Instance, RecordKey, RecordSet, Value};

/// Per-type outcomes of a multi-type call, in execution order
#[derive(Debug)]
pub struct MultiOutcome<T> {
    /// Scheduled execution order
    pub order: Vec<String>,
    pub results: Vec<(String, BulkOutcome<T>)>,
    /// Types not started because an earlier type had failed chunks
    pub skipped: Vec<String>,
}

impl<T> MultiOutcome<T> {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.results.iter().all(|(_, o)| o.is_complete())
    }

    pub fn get(&self, entity: &str) -> Option<&BulkOutcome<T>> {
        self.results
            .iter()
            .find(|(name, _)| name == entity)
            .map(|(_, outcome)| outcome)
    }
}

/// Sequences the bulk executor across entity types
#[derive(Clone)]
pub struct Orchestrator {
    executor: BulkExecutor,
}

impl Orchestrator {
    pub fn new(executor: BulkExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &BulkExecutor {
        &self.executor
    }

    /// Dependency graph of the types present in `sets`
    pub fn graph(&self, sets: &[RecordSet]) -> Result<DependencyGraph> {
        let names: Vec<&str> = sets.iter().map(|s| s.entity.as_str()).collect();
        DependencyGraph::build(self.executor.metadata().as_ref(), &names)
    }

    /// Creation order for `sets` without touching storage
    pub fn plan(&self, sets: &[RecordSet]) -> Result<Vec<String>> {
        let graph = self.graph(sets)?;
        check_refs(self.executor.metadata().as_ref(), sets)?;
        Ok(graph.insert_order()?)
    }

    /// Create every record set in dependency order
    ///
    /// Stops before the next type once a type finishes with failed chunks.
    pub async fn create_all(&self, sets: Vec<RecordSet>) -> Result<MultiOutcome<Vec<Instance>>> {
        let order = self.plan(&sets)?;
        self.executor.config().validate().map_err(BulkError::Config)?;
        for set in &sets {
            let entity = self.entity(&set.entity)?;
            if let Some((position, field)) = set.records.iter().enumerate().find_map(|(i, r)| {
                r.values
                    .keys()
                    .find(|f| !entity.has_column(f))
                    .map(|f| (i, f.clone()))
            }) {
                return Err(BulkError::validation(format!(
                    "{} record at position {} sets unknown field '{}'",
                    set.entity, position, field
                )));
            }
        }

        info!("Creating {} entity types in order: {}", order.len(), order.join(" -> "));

        let mut pending: HashMap<String, Vec<Instance>> =
            sets.into_iter().map(|s| (s.entity, s.records)).collect();
        let mut created: HashMap<String, Vec<Option<RecordKey>>> = HashMap::new();
        let mut results = Vec::with_capacity(order.len());
        let mut skipped = Vec::new();
        let mut halted = false;

        for name in &order {
            if halted {
                skipped.push(name.clone());
                continue;
            }

            let mut records = pending.remove(name).unwrap_or_default();
            resolve_refs(name, &mut records, &created)?;

            let outcome = self.executor.create(name, records).await?;
            created.insert(name.clone(), outcome.result.iter().map(|r| r.key).collect());
            if !outcome.is_complete() {
                warn!(
                    "{} finished with {} failed chunks; remaining types will not be created",
                    name,
                    outcome.failures.len()
                );
                halted = true;
            }
            results.push((name.clone(), outcome));
        }

        Ok(MultiOutcome {
            order,
            results,
            skipped,
        })
    }

    /// Delete every record set, dependents before their dependencies
    pub async fn delete_all(&self, sets: Vec<RecordSet>) -> Result<MultiOutcome<DeleteSummary>> {
        let order = self.graph(&sets)?.delete_order()?;
        self.executor.config().validate().map_err(BulkError::Config)?;
        for set in &sets {
            if let Some(position) = set.records.iter().position(|r| !r.is_saved()) {
                return Err(BulkError::validation(format!(
                    "{} record at position {} has no key",
                    set.entity, position
                )));
            }
        }

        info!("Deleting {} entity types in order: {}", order.len(), order.join(" -> "));

        let mut pending: HashMap<String, Vec<Instance>> =
            sets.into_iter().map(|s| (s.entity, s.records)).collect();
        let mut results = Vec::with_capacity(order.len());
        let mut skipped = Vec::new();
        let mut halted = false;

        for name in &order {
            if halted {
                skipped.push(name.clone());
                continue;
            }
            let records = pending.remove(name).unwrap_or_default();
            let outcome = self.executor.delete(name, records).await?;
            if !outcome.is_complete() {
                warn!(
                    "{} finished with {} failed chunks; remaining types will not be deleted",
                    name,
                    outcome.failures.len()
                );
                halted = true;
            }
            results.push((name.clone(), outcome));
        }

        Ok(MultiOutcome {
            order,
            results,
            skipped,
        })
    }

    /// Preview deleting every record set at once
    pub async fn simulate_all(&self, sets: &[RecordSet]) -> Result<CascadeSet> {
        self.executor.simulate_delete_many(sets).await
    }

    fn entity(&self, name: &str) -> Result<Arc<EntityType>> {
        self.executor
            .metadata()
            .entity(name)
            .ok_or_else(|| BulkError::UnknownEntity(name.to_string()))
    }
}

/// `Ref` values must sit in a reference field, point at that field's
/// target, and name another type of the call with an index inside it
pub fn check_refs(metadata: &dyn MetadataProvider, sets: &[RecordSet]) -> Result<()> {
    let sizes: HashMap<&str, usize> = sets.iter().map(|s| (s.entity.as_str(), s.len())).collect();

    for set in sets {
        let entity = metadata
            .entity(&set.entity)
            .ok_or_else(|| BulkError::UnknownEntity(set.entity.clone()))?;
        for (position, record) in set.records.iter().enumerate() {
            for (field, target) in record.pending_refs() {
                let at = || format!("{} record at position {}, field '{}'", set.entity, position, field);

                let Some(reference) = entity.reference_for(field) else {
                    return Err(BulkError::validation(format!(
                        "{}: only reference fields can hold record refs",
                        at()
                    )));
                };
                if reference.target != target.entity {
                    return Err(BulkError::validation(format!(
                        "{}: ref points at {} but the field references {}",
                        at(),
                        target.entity,
                        reference.target
                    )));
                }
                if target.entity == set.entity {
                    return Err(BulkError::validation(format!(
                        "{}: refs to records of the same type are not supported",
                        at()
                    )));
                }
                match sizes.get(target.entity.as_str()) {
                    None => {
                        return Err(BulkError::validation(format!(
                            "{}: {} is not part of this call",
                            at(),
                            target.entity
                        )));
                    }
                    Some(len) if target.index >= *len => {
                        return Err(BulkError::validation(format!(
                            "{}: index {} is out of range for {} ({} records)",
                            at(),
                            target.index,
                            target.entity,
                            len
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
    }
    Ok(())
}

/// Replace `Ref` values with keys of records created earlier in the call
fn resolve_refs(
    entity: &str,
    records: &mut [Instance],
    created: &HashMap<String, Vec<Option<RecordKey>>>,
) -> Result<()> {
    for (position, record) in records.iter_mut().enumerate() {
        for (field, value) in record.values.iter_mut() {
            let key = match value {
                Value::Ref(target) => created
                    .get(&target.entity)
                    .and_then(|keys| keys.get(target.index).copied().flatten())
                    .ok_or_else(|| {
                        BulkError::validation(format!(
                            "{} record at position {}, field '{}': {}[{}] has not been created",
                            entity, position, field, target.entity, target.index
                        ))
                    })?,
                _ => continue,
            };
            *value = Value::Int(key);
        }
    }
    Ok(())
}

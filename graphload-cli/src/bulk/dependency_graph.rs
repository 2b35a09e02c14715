//! Dependency graph logic for ordering entity operations
//!
//! This module provides functions to:
//! - Build a dependency graph from the reference metadata of the types in one call
//! - Perform a stable topological sort for insert/delete ordering
//! - Categorize entities as standalone, dependent, or junction

use std::collections::{BTreeSet, HashMap, HashSet};

use super::error::{BulkError, CycleError, Result};
use crate::metadata::MetadataProvider;

/// A reference field as seen from inside one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupInfo {
    pub field_name: String,
    pub target_entity: String,
    /// Target is one of the types in this call
    pub is_internal: bool,
}

/// Entity with its lookup relationships
#[derive(Debug, Clone)]
pub struct EntityWithLookups {
    pub name: String,
    pub lookups: Vec<LookupInfo>,
}

impl EntityWithLookups {
    /// Get internal lookups (to other types in the call)
    pub fn internal_lookups(&self) -> Vec<&LookupInfo> {
        self.lookups.iter().filter(|l| l.is_internal).collect()
    }

    /// Get external lookups (to types assumed to be persisted already)
    pub fn external_lookups(&self) -> Vec<&LookupInfo> {
        self.lookups.iter().filter(|l| !l.is_internal).collect()
    }

    /// Count of unique internal lookup targets (excluding self-references)
    pub fn internal_target_count(&self) -> usize {
        let targets: HashSet<_> = self
            .internal_lookups()
            .iter()
            .map(|l| &l.target_entity)
            .filter(|t| *t != &self.name)
            .collect();
        targets.len()
    }
}

/// How an entity relates to the other types of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyCategory {
    /// No references to other types in the call
    Standalone,
    /// References exactly one other type
    Dependent,
    /// References two or more other types
    Junction,
}

impl DependencyCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Dependent => "dependent",
            Self::Junction => "junction",
        }
    }
}

/// Dependency graph for the entity types of one bulk call
///
/// Edge `a -> b` (stored as `b` in `dependencies[a]`) means `b` must be
/// created before `a`. Self-edges are never stored.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Entity names in input order
    pub order: Vec<String>,
    /// All entities in the graph
    pub entities: HashMap<String, EntityWithLookups>,
    /// Adjacency list: entity -> entities it depends on
    pub dependencies: HashMap<String, HashSet<String>>,
    /// Reverse adjacency: entity -> entities that depend on it
    pub dependents: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    /// Build the graph for `names`, reading references from `metadata`
    ///
    /// References to types outside `names` are kept as external lookups and
    /// do not produce edges.
    pub fn build<S: AsRef<str>>(metadata: &dyn MetadataProvider, names: &[S]) -> Result<Self> {
        let selected: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        if selected.len() != names.len() {
            return Err(BulkError::validation("an entity type is listed more than once"));
        }

        let mut graph = DependencyGraph::default();

        for name in names {
            let name = name.as_ref();
            if metadata.entity(name).is_none() {
                return Err(BulkError::UnknownEntity(name.to_string()));
            }

            let lookups = metadata
                .references(name)
                .into_iter()
                .map(|r| LookupInfo {
                    is_internal: selected.contains(r.target.as_str()),
                    field_name: r.field,
                    target_entity: r.target,
                })
                .collect();

            graph.order.push(name.to_string());
            graph.entities.insert(
                name.to_string(),
                EntityWithLookups {
                    name: name.to_string(),
                    lookups,
                },
            );
        }

        for name in &graph.order {
            let entity = &graph.entities[name];
            let deps: HashSet<String> = entity
                .internal_lookups()
                .iter()
                .map(|l| l.target_entity.clone())
                // Don't include self-references
                .filter(|t| t != name)
                .collect();

            for dep in &deps {
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(name.clone());
            }
            graph.dependencies.insert(name.clone(), deps);
        }

        for name in &graph.order {
            graph.dependents.entry(name.clone()).or_default();
        }

        Ok(graph)
    }

    /// Categorize an entity based on its lookup relationships
    pub fn categorize(&self, entity_name: &str) -> DependencyCategory {
        let entity = match self.entities.get(entity_name) {
            Some(e) => e,
            None => return DependencyCategory::Standalone,
        };

        match entity.internal_target_count() {
            0 => DependencyCategory::Standalone,
            1 => DependencyCategory::Dependent,
            _ => DependencyCategory::Junction,
        }
    }

    /// Kahn's algorithm; among ready entities the earliest in input order
    /// goes first, so equal input always yields the same order.
    /// Returns entities in insert order (dependencies first).
    pub fn topological_sort(&self) -> std::result::Result<Vec<String>, CycleError> {
        let position: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        // Remaining unplaced dependencies per entity
        let mut pending: Vec<usize> = self
            .order
            .iter()
            .map(|name| self.dependencies.get(name).map_or(0, HashSet::len))
            .collect();

        let mut ready: BTreeSet<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();

        let mut result = Vec::with_capacity(self.order.len());

        while let Some(next) = ready.pop_first() {
            let entity = &self.order[next];
            result.push(entity.clone());

            if let Some(dependents) = self.dependents.get(entity) {
                for dependent in dependents {
                    let Some(&i) = position.get(dependent.as_str()) else {
                        continue;
                    };
                    pending[i] -= 1;
                    if pending[i] == 0 {
                        ready.insert(i);
                    }
                }
            }
        }

        if result.len() != self.order.len() {
            let placed: HashSet<&String> = result.iter().collect();
            let remaining = self
                .order
                .iter()
                .filter(|e| !placed.contains(e))
                .cloned()
                .collect();
            return Err(CycleError { entities: remaining });
        }

        Ok(result)
    }

    /// Get insert order (dependencies before dependents)
    pub fn insert_order(&self) -> std::result::Result<Vec<String>, CycleError> {
        self.topological_sort()
    }

    /// Get delete order (dependents before dependencies - reverse of insert)
    pub fn delete_order(&self) -> std::result::Result<Vec<String>, CycleError> {
        let mut order = self.topological_sort()?;
        order.reverse();
        Ok(order)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

//! Multi-clause retrieve queries
//!
//! A [`Retrieve`] is a list of clauses. Each clause selects resource rows
//! (by ID, type, predicate and page), and [`Retrieve::traverse_to`] seals
//! it and opens the next clause, seeded with the IDs reached by walking
//! relationships from the current one:
//!
//! ```ignore
//! let grandchildren = ontology
//!     .new_retrieve()
//!     .where_ids(vec![rack])
//!     .traverse_to(CHILDREN)
//!     .traverse_to(CHILDREN)
//!     .exec_entries()
//!     .await?;
//! ```
//!
//! Author: hephaex@gmail.com

use ontograph_core::relationship::outgoing_prefix_of_type;
use ontograph_core::{OntologyError, Relationship, Resource, Result, Type, ID, PARENT_OF};
use ontograph_kv::Tx;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::service::Registry;
use crate::storage::{
    decode_relationship_key, relationship_prefix, resource_key, resource_type_prefix, ResourceRow,
    RELATIONSHIP_PREFIX, RESOURCE_PREFIX,
};

// ============================================================================
// Traversers
// ============================================================================

/// Which end of a matching relationship becomes the next clause's seed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Follow `from -> to`
    Forward,
    /// Follow `to -> from`
    Backward,
}

impl Direction {
    fn step(self, rel: Relationship) -> ID {
        match self {
            Direction::Forward => rel.to,
            Direction::Backward => rel.from,
        }
    }
}

/// Describes one hop between clauses
#[derive(Clone, Copy)]
pub struct Traverser {
    /// Whether `relationship` leads away from the resource `id`
    pub filter: fn(&ID, &Relationship) -> bool,
    pub direction: Direction,
    /// Relationship key prefix covering every candidate edge of `id`. When
    /// absent the whole relationship keyspace is scanned.
    pub prefix: Option<fn(&ID) -> String>,
}

fn is_parent(id: &ID, rel: &Relationship) -> bool {
    rel.relationship_type == PARENT_OF && rel.from == *id
}

fn is_child(id: &ID, rel: &Relationship) -> bool {
    rel.relationship_type == PARENT_OF && rel.to == *id
}

fn children_prefix(id: &ID) -> String {
    outgoing_prefix_of_type(id, &PARENT_OF)
}

/// From a resource to its children, by prefix scan
pub const CHILDREN: Traverser = Traverser {
    filter: is_parent,
    direction: Direction::Forward,
    prefix: Some(children_prefix),
};

/// From a resource to its parents. Needs a full relationship scan.
pub const PARENTS: Traverser = Traverser {
    filter: is_child,
    direction: Direction::Backward,
    prefix: None,
};

// ============================================================================
// Clauses
// ============================================================================

/// Predicate evaluated against the stored ID and name of a resource
pub type Predicate = Arc<dyn Fn(&Resource) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Many,
    One,
}

#[derive(Clone, Default)]
struct Clause {
    ids: Option<Vec<ID>>,
    types: Vec<Type>,
    filter: Option<Predicate>,
    limit: Option<usize>,
    offset: usize,
    exclude_field_data: bool,
    traverser: Option<Traverser>,
    sink: Option<Sink>,
}

impl Clause {
    /// An ID-only clause can hand its IDs straight to the next hop
    fn is_passthrough(&self) -> bool {
        self.ids.is_some()
            && self.types.is_empty()
            && self.filter.is_none()
            && self.limit.is_none()
            && self.offset == 0
    }
}

/// Resources collected at each clause that had a sink bound, plus the
/// final clause
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieved {
    clauses: Vec<Vec<Resource>>,
}

impl Retrieved {
    /// Entries of clause `index`; empty for clauses that were not
    /// materialized
    pub fn entries(&self, index: usize) -> &[Resource] {
        self.clauses.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last(&self) -> &[Resource] {
        self.clauses.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn into_last(mut self) -> Vec<Resource> {
        self.clauses.pop().unwrap_or_default()
    }
}

// ============================================================================
// Retrieve
// ============================================================================

/// A consuming query builder
pub struct Retrieve<'a> {
    tx: &'a dyn Tx,
    registry: &'a Registry,
    clauses: Vec<Clause>,
}

impl<'a> Retrieve<'a> {
    pub fn new(tx: &'a dyn Tx, registry: &'a Registry) -> Self {
        Self {
            tx,
            registry,
            clauses: vec![Clause::default()],
        }
    }

    fn current(&mut self) -> &mut Clause {
        if self.clauses.is_empty() {
            self.clauses.push(Clause::default());
        }
        let last = self.clauses.len() - 1;
        &mut self.clauses[last]
    }

    /// Restrict the current clause to these IDs, returned in this order
    pub fn where_ids(mut self, ids: Vec<ID>) -> Self {
        self.current().ids = Some(ids);
        self
    }

    pub fn where_types(mut self, types: Vec<Type>) -> Self {
        self.current().types = types;
        self
    }

    /// Keep only rows matching `predicate`. It sees the stored ID and name,
    /// not the service data, and runs before pagination.
    pub fn where_filter(
        mut self,
        predicate: impl Fn(&Resource) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.current().filter = Some(Arc::new(predicate));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.current().limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.current().offset = offset;
        self
    }

    /// Return ID/name shells without calling the owning services
    pub fn exclude_field_data(mut self) -> Self {
        self.current().exclude_field_data = true;
        self
    }

    /// Seal the current clause and start a new one seeded by `traverser`
    pub fn traverse_to(mut self, traverser: Traverser) -> Self {
        self.current().traverser = Some(traverser);
        self.clauses.push(Clause::default());
        self
    }

    /// Collect the current clause's resources, skipping ones whose service
    /// no longer knows them
    pub fn entries(mut self) -> Self {
        self.current().sink = Some(Sink::Many);
        self
    }

    /// Collect exactly one resource at the current clause. A missing
    /// resource fails the query with `NotFound` and more than one match
    /// fails it with `Validation`.
    pub fn entry(mut self) -> Self {
        self.current().sink = Some(Sink::One);
        self
    }

    /// Execute against the transaction the query was opened on
    pub async fn exec(self) -> Result<Retrieved> {
        let tx = self.tx;
        self.exec_with(tx).await
    }

    pub async fn exec_entries(self) -> Result<Vec<Resource>> {
        Ok(self.entries().exec().await?.into_last())
    }

    pub async fn exec_entry(self) -> Result<Resource> {
        self.entry()
            .exec()
            .await?
            .into_last()
            .into_iter()
            .next()
            .ok_or_else(|| OntologyError::NotFound("query matched no resource".into()))
    }

    /// Execute against another transaction
    pub async fn exec_with(self, tx: &dyn Tx) -> Result<Retrieved> {
        let registry = self.registry;
        let last = self.clauses.len().saturating_sub(1);
        let mut seeds: Option<Vec<ID>> = None;
        let mut retrieved = Retrieved::default();

        for (index, mut clause) in self.clauses.into_iter().enumerate() {
            if let Some(ids) = seeds.take() {
                clause.ids = Some(ids);
            }
            let materialize = index == last || clause.sink.is_some();
            let exhausted = index > 0 && clause.ids.as_ref().is_some_and(Vec::is_empty);

            let mut entries = Vec::new();
            let ids = if exhausted {
                Vec::new()
            } else if clause.is_passthrough() && !materialize {
                clause.ids.clone().unwrap_or_default()
            } else {
                let rows = query_rows(tx, &clause).await?;
                let ids = rows.iter().map(|row| row.id.clone()).collect();
                if materialize {
                    entries = materialize_rows(tx, registry, &clause, rows).await?;
                }
                ids
            };

            if clause.sink == Some(Sink::One) {
                match entries.len() {
                    0 => {
                        return Err(OntologyError::NotFound(format!(
                            "clause {index} matched no resource"
                        )))
                    }
                    1 => {}
                    n => {
                        return Err(OntologyError::Validation(format!(
                            "clause {index} expected one resource, matched {n}"
                        )))
                    }
                }
            }
            debug!(
                clause = index,
                ids = ids.len(),
                entries = entries.len(),
                "retrieve clause executed"
            );
            retrieved.clauses.push(entries);

            if let Some(traverser) = clause.traverser {
                seeds = Some(traverse(tx, &traverser, &ids).await?);
            }
        }
        Ok(retrieved)
    }
}

// ============================================================================
// Execution
// ============================================================================

async fn query_rows(tx: &dyn Tx, clause: &Clause) -> Result<Vec<ResourceRow>> {
    let mut rows = Vec::new();
    match &clause.ids {
        Some(ids) => {
            for id in ids {
                match tx.get(&resource_key(id)).await? {
                    Some(value) => rows.push(ResourceRow::decode(&value)?),
                    None if clause.sink == Some(Sink::One) => {
                        return Err(OntologyError::not_found(id))
                    }
                    None => {}
                }
            }
            if !clause.types.is_empty() {
                rows.retain(|row| clause.types.contains(&row.id.resource_type));
            }
        }
        None if !clause.types.is_empty() => {
            let mut types = clause.types.clone();
            types.sort();
            types.dedup();
            for resource_type in &types {
                for pair in tx.scan_prefix(&resource_type_prefix(resource_type)).await? {
                    rows.push(ResourceRow::decode(&pair.value)?);
                }
            }
        }
        None => {
            for pair in tx.scan_prefix(RESOURCE_PREFIX.as_bytes()).await? {
                rows.push(ResourceRow::decode(&pair.value)?);
            }
        }
    }

    if let Some(filter) = &clause.filter {
        rows.retain(|row| filter(&Resource::shell(row.id.clone(), row.name.clone())));
    }
    let rows = rows.into_iter().skip(clause.offset);
    Ok(match clause.limit {
        Some(limit) => rows.take(limit).collect(),
        None => rows.collect(),
    })
}

async fn materialize_rows(
    tx: &dyn Tx,
    registry: &Registry,
    clause: &Clause,
    rows: Vec<ResourceRow>,
) -> Result<Vec<Resource>> {
    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
        if clause.exclude_field_data {
            entries.push(Resource::shell(row.id, row.name));
            continue;
        }
        match registry.retrieve_resource(&row.id, tx).await {
            Ok(resource) => entries.push(resource),
            Err(e) if e.is_not_found() && clause.sink != Some(Sink::One) => {
                debug!(id = %row.id, "skipping resource unknown to its service");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(entries)
}

/// IDs reached from `ids` in one hop, deduplicated in discovery order
async fn traverse(tx: &dyn Tx, traverser: &Traverser, ids: &[ID]) -> Result<Vec<ID>> {
    let mut next = Vec::new();
    if ids.is_empty() {
        return Ok(next);
    }
    let mut seen = HashSet::new();
    let mut push = |rel: Relationship| {
        let id = traverser.direction.step(rel);
        if seen.insert(id.clone()) {
            next.push(id);
        }
    };

    match traverser.prefix {
        Some(prefix) => {
            for id in ids {
                for pair in tx.scan_prefix(&relationship_prefix(&prefix(id))).await? {
                    let rel = decode_relationship_key(&pair.key)?;
                    if (traverser.filter)(id, &rel) {
                        push(rel);
                    }
                }
            }
        }
        None => {
            for pair in tx.scan_prefix(RELATIONSHIP_PREFIX.as_bytes()).await? {
                let rel = decode_relationship_key(&pair.key)?;
                if ids.iter().any(|id| (traverser.filter)(id, &rel)) {
                    push(rel);
                }
            }
        }
    }
    Ok(next)
}

// ============================================================================
// Tests
// ============================================================================

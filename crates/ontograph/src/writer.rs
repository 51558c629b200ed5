//! Mutations of the resource graph
//!
//! The writer keeps the graph acyclic: a relationship `from -> to` is
//! rejected when `from` is reachable from `to` through outgoing edges of
//! any type. The reachability check and the insert run against the same
//! transaction so they commit together.
//!
//! Author: hephaex@gmail.com

use ontograph_core::relationship::{outgoing_prefix, outgoing_prefix_of_type};
use ontograph_core::{OntologyError, Relationship, RelationshipType, Result, ID, PARENT_OF};
use ontograph_kv::{KvPair, Tx};
use std::collections::HashSet;

use crate::retrieve::Retrieve;
use crate::service::Registry;
use crate::storage::{
    decode_relationship_key, relationship_key, relationship_prefix, resource_key, ResourceRow,
    RELATIONSHIP_PREFIX,
};

/// Writes resources and relationships through one transaction
pub struct Writer<'a> {
    tx: &'a dyn Tx,
    registry: &'a Registry,
}

impl<'a> Writer<'a> {
    pub fn new(tx: &'a dyn Tx, registry: &'a Registry) -> Self {
        Self { tx, registry }
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Define a resource. Redefining an existing resource is a no-op.
    pub async fn define_resource(&self, id: &ID) -> Result<()> {
        id.validate()?;
        if self.has_resource(id).await? {
            return Ok(());
        }
        self.put_row(id, "").await
    }

    /// Define a resource and persist its display name, replacing any
    /// previous name
    pub async fn define_named_resource(&self, id: &ID, name: &str) -> Result<()> {
        id.validate()?;
        self.put_row(id, name).await
    }

    async fn put_row(&self, id: &ID, name: &str) -> Result<()> {
        let row = ResourceRow {
            id: id.clone(),
            name: name.to_string(),
        };
        self.tx.set(&resource_key(id), &row.encode()?).await
    }

    /// Define many resources. Nothing is written unless every ID is valid.
    pub async fn define_many_resources(&self, ids: &[ID]) -> Result<()> {
        ID::validate_many(ids)?;
        let mut pairs = Vec::with_capacity(ids.len());
        for id in ids {
            if self.has_resource(id).await? {
                continue;
            }
            let row = ResourceRow {
                id: id.clone(),
                name: String::new(),
            };
            pairs.push(KvPair {
                key: resource_key(id),
                value: row.encode()?,
            });
        }
        self.tx.set_many(&pairs).await
    }

    pub async fn has_resource(&self, id: &ID) -> Result<bool> {
        self.tx.exists(&resource_key(id)).await
    }

    async fn check_resource(&self, id: &ID) -> Result<()> {
        if self.has_resource(id).await? {
            Ok(())
        } else {
            Err(OntologyError::not_found(id))
        }
    }

    /// Delete a resource and every relationship it takes part in.
    /// Deleting a missing resource succeeds.
    pub async fn delete_resource(&self, id: &ID) -> Result<()> {
        self.delete_many_resources(std::slice::from_ref(id)).await
    }

    /// Delete many resources and their relationships
    pub async fn delete_many_resources(&self, ids: &[ID]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let targets: HashSet<&ID> = ids.iter().collect();
        let mut keys = Vec::new();
        for rel in self.all_relationships().await? {
            if targets.contains(&rel.from) || targets.contains(&rel.to) {
                keys.push(relationship_key(&rel));
            }
        }
        keys.extend(ids.iter().map(resource_key));
        tracing::debug!(resources = ids.len(), rows = keys.len(), "deleting resources");
        self.tx.delete_many(&keys).await
    }

    // ------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------

    pub async fn has_relationship(
        &self,
        from: &ID,
        relationship_type: &RelationshipType,
        to: &ID,
    ) -> Result<bool> {
        let rel = Relationship::new(from.clone(), relationship_type.clone(), to.clone());
        self.tx.exists(&relationship_key(&rel)).await
    }

    /// Define `from -type-> to`. Defining an existing relationship is a
    /// no-op. Fails with `Cycle` when the edge would close a loop and with
    /// `NotFound` when either end does not exist.
    pub async fn define_relationship(
        &self,
        from: &ID,
        relationship_type: &RelationshipType,
        to: &ID,
    ) -> Result<()> {
        let rel = Relationship::new(from.clone(), relationship_type.clone(), to.clone());
        rel.validate()?;
        if self.tx.exists(&relationship_key(&rel)).await? {
            return Ok(());
        }
        if self.tx.exists(&relationship_key(&rel.reversed())).await? {
            return Err(OntologyError::Cycle(format!(
                "{} already exists",
                rel.reversed()
            )));
        }
        self.check_resource(from).await?;
        self.check_resource(to).await?;
        self.check_acyclic(&rel).await?;
        self.tx.set(&relationship_key(&rel), &[]).await
    }

    /// Define `from -type-> to` for every target. Nothing is written if any
    /// target is missing or would close a loop.
    pub async fn define_from_one_to_many_relationships(
        &self,
        from: &ID,
        relationship_type: &RelationshipType,
        to: &[ID],
    ) -> Result<()> {
        self.check_resource(from).await?;
        for target in to {
            self.check_resource(target).await?;
        }
        let mut pairs = Vec::with_capacity(to.len());
        for target in to {
            let rel = Relationship::new(from.clone(), relationship_type.clone(), target.clone());
            rel.validate()?;
            self.check_acyclic(&rel).await?;
            pairs.push(KvPair {
                key: relationship_key(&rel),
                value: Vec::new(),
            });
        }
        self.tx.set_many(&pairs).await
    }

    async fn check_acyclic(&self, rel: &Relationship) -> Result<()> {
        if rel.from == rel.to || self.descendants(&rel.to).await?.contains(&rel.from) {
            return Err(OntologyError::Cycle(format!(
                "{rel} would make {} its own descendant",
                rel.from
            )));
        }
        Ok(())
    }

    /// Every resource reachable from `id` through outgoing relationships of
    /// any type, excluding `id` itself unless it lies on a cycle
    pub async fn descendants(&self, id: &ID) -> Result<HashSet<ID>> {
        let mut visited = HashSet::new();
        let mut stack = vec![id.clone()];
        while let Some(node) = stack.pop() {
            for rel in self.retrieve_relationships(&node).await? {
                if visited.insert(rel.to.clone()) {
                    stack.push(rel.to);
                }
            }
        }
        Ok(visited)
    }

    /// Delete one relationship. Deleting a missing relationship succeeds.
    pub async fn delete_relationship(
        &self,
        from: &ID,
        relationship_type: &RelationshipType,
        to: &ID,
    ) -> Result<()> {
        let rel = Relationship::new(from.clone(), relationship_type.clone(), to.clone());
        self.tx.delete(&relationship_key(&rel)).await
    }

    pub async fn delete_outgoing_relationships_of_type(
        &self,
        from: &ID,
        relationship_type: &RelationshipType,
    ) -> Result<()> {
        let prefix = relationship_prefix(&outgoing_prefix_of_type(from, relationship_type));
        let keys: Vec<Vec<u8>> = self
            .tx
            .scan_prefix(&prefix)
            .await?
            .into_iter()
            .map(|pair| pair.key)
            .collect();
        self.tx.delete_many(&keys).await
    }

    pub async fn delete_incoming_relationships_of_type(
        &self,
        to: &ID,
        relationship_type: &RelationshipType,
    ) -> Result<()> {
        let keys: Vec<Vec<u8>> = self
            .all_relationships()
            .await?
            .iter()
            .filter(|rel| rel.to == *to && rel.relationship_type == *relationship_type)
            .map(relationship_key)
            .collect();
        self.tx.delete_many(&keys).await
    }

    /// Outgoing relationships of `from`, in key order
    pub async fn retrieve_relationships(&self, from: &ID) -> Result<Vec<Relationship>> {
        let pairs = self
            .tx
            .scan_prefix(&relationship_prefix(&outgoing_prefix(from)))
            .await?;
        pairs
            .iter()
            .map(|pair| decode_relationship_key(&pair.key))
            .collect()
    }

    /// Incoming relationships of `to`, in key order
    pub async fn retrieve_incoming_relationships(&self, to: &ID) -> Result<Vec<Relationship>> {
        Ok(self
            .all_relationships()
            .await?
            .into_iter()
            .filter(|rel| rel.to == *to)
            .collect())
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>> {
        let pairs = self
            .tx
            .scan_prefix(RELATIONSHIP_PREFIX.as_bytes())
            .await?;
        pairs
            .iter()
            .map(|pair| decode_relationship_key(&pair.key))
            .collect()
    }

    // ------------------------------------------------------------------
    // Tree helpers
    // ------------------------------------------------------------------

    /// Make `parent` the parent of every child
    pub async fn add_children(&self, parent: &ID, children: &[ID]) -> Result<()> {
        self.define_from_one_to_many_relationships(parent, &PARENT_OF, children)
            .await
    }

    pub async fn remove_children(&self, parent: &ID, children: &[ID]) -> Result<()> {
        for child in children {
            self.delete_relationship(parent, &PARENT_OF, child).await?;
        }
        Ok(())
    }

    /// Re-parent children from `from` to `to`
    pub async fn move_children(&self, from: &ID, to: &ID, children: &[ID]) -> Result<()> {
        self.remove_children(from, children).await?;
        self.add_children(to, children).await
    }

    /// A query that observes this writer's uncommitted changes
    pub fn new_retrieve(&self) -> Retrieve<'a> {
        Retrieve::new(self.tx, self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_core::CREATED_BY;
    use ontograph_kv::{MemStore, Store};

    fn id(key: &str) -> ID {
        ID::new("node", key)
    }

    async fn define(w: &Writer<'_>, keys: &[&str]) {
        for k in keys {
            w.define_resource(&id(k)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_define_resource_idempotent() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);

        w.define_named_resource(&id("a"), "alpha").await.unwrap();
        w.define_resource(&id("a")).await.unwrap();
        assert!(w.has_resource(&id("a")).await.unwrap());
        assert_eq!(store.len().await, 1);

        // The name survives redefinition
        let row = ResourceRow::decode(&store.get(&resource_key(&id("a"))).await.unwrap().unwrap())
            .unwrap();
        assert_eq!(row.name, "alpha");
    }

    #[tokio::test]
    async fn test_define_many_is_all_or_nothing() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);

        let err = w
            .define_many_resources(&[id("a"), ID::new("", "bad")])
            .await
            .unwrap_err();
        assert!(matches!(err, OntologyError::Validation(_)));
        assert!(store.is_empty().await);

        w.define_many_resources(&[id("a"), id("b")]).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_define_relationship_requires_resources() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a"]).await;

        let err = w
            .define_relationship(&id("a"), &PARENT_OF, &id("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_define_relationship_idempotent() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b"]).await;

        w.define_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap();
        w.define_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap();
        assert_eq!(w.retrieve_relationships(&id("a")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reverse_edge_is_cycle() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b"]).await;

        w.define_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap();
        let err = w
            .define_relationship(&id("b"), &PARENT_OF, &id("a"))
            .await
            .unwrap_err();
        assert!(err.is_cycle());
    }

    #[tokio::test]
    async fn test_transitive_cycle_rejected() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b", "c"]).await;

        w.define_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap();
        w.define_relationship(&id("b"), &PARENT_OF, &id("c")).await.unwrap();
        let err = w
            .define_relationship(&id("c"), &PARENT_OF, &id("a"))
            .await
            .unwrap_err();
        assert!(err.is_cycle());
    }

    #[tokio::test]
    async fn test_cycle_check_spans_relationship_types() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b", "c"]).await;

        w.define_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap();
        w.define_relationship(&id("b"), &CREATED_BY, &id("c")).await.unwrap();
        let err = w
            .define_relationship(&id("c"), &PARENT_OF, &id("a"))
            .await
            .unwrap_err();
        assert!(err.is_cycle());
    }

    #[tokio::test]
    async fn test_self_loop_rejected() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a"]).await;
        assert!(w
            .define_relationship(&id("a"), &PARENT_OF, &id("a"))
            .await
            .unwrap_err()
            .is_cycle());
    }

    #[tokio::test]
    async fn test_diamond_is_not_a_cycle() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b", "c", "d"]).await;

        w.add_children(&id("a"), &[id("b"), id("c")]).await.unwrap();
        w.define_relationship(&id("b"), &PARENT_OF, &id("d")).await.unwrap();
        w.define_relationship(&id("c"), &PARENT_OF, &id("d")).await.unwrap();

        let descendants = w.descendants(&id("a")).await.unwrap();
        assert_eq!(descendants.len(), 3);
        assert!(w
            .define_relationship(&id("d"), &PARENT_OF, &id("a"))
            .await
            .unwrap_err()
            .is_cycle());
    }

    #[tokio::test]
    async fn test_one_to_many_no_partial_insert() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b", "c"]).await;
        w.define_relationship(&id("c"), &PARENT_OF, &id("a")).await.unwrap();

        let err = w
            .define_from_one_to_many_relationships(&id("a"), &PARENT_OF, &[id("b"), id("c")])
            .await
            .unwrap_err();
        assert!(err.is_cycle());
        assert!(!w.has_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap());

        let err = w
            .define_from_one_to_many_relationships(&id("a"), &PARENT_OF, &[id("b"), id("zz")])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(!w.has_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_resource_cascades() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b", "c"]).await;
        w.define_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap();
        w.define_relationship(&id("b"), &PARENT_OF, &id("c")).await.unwrap();

        w.delete_resource(&id("b")).await.unwrap();
        assert!(!w.has_resource(&id("b")).await.unwrap());
        assert!(w.retrieve_relationships(&id("a")).await.unwrap().is_empty());
        assert!(w.retrieve_incoming_relationships(&id("c")).await.unwrap().is_empty());

        // Idempotent
        w.delete_resource(&id("b")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_relationships_of_type() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["a", "b", "c", "u"]).await;
        w.add_children(&id("a"), &[id("b"), id("c")]).await.unwrap();
        w.define_relationship(&id("b"), &CREATED_BY, &id("u")).await.unwrap();
        w.define_relationship(&id("c"), &CREATED_BY, &id("u")).await.unwrap();

        w.delete_outgoing_relationships_of_type(&id("a"), &PARENT_OF)
            .await
            .unwrap();
        assert!(w.retrieve_relationships(&id("a")).await.unwrap().is_empty());

        w.delete_incoming_relationships_of_type(&id("u"), &CREATED_BY)
            .await
            .unwrap();
        assert!(w.retrieve_incoming_relationships(&id("u")).await.unwrap().is_empty());

        // No-op when nothing matches
        w.delete_incoming_relationships_of_type(&id("u"), &CREATED_BY)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_move_children() {
        let store = MemStore::new();
        let registry = Registry::new();
        let w = Writer::new(&store, &registry);
        define(&w, &["p1", "p2", "x"]).await;
        w.add_children(&id("p1"), &[id("x")]).await.unwrap();

        w.move_children(&id("p1"), &id("p2"), &[id("x")]).await.unwrap();
        assert!(!w.has_relationship(&id("p1"), &PARENT_OF, &id("x")).await.unwrap());
        assert!(w.has_relationship(&id("p2"), &PARENT_OF, &id("x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_writes_visible_only_after_commit() {
        let store = MemStore::new();
        let registry = Registry::new();
        let tx = store.begin();
        {
            let w = Writer::new(tx.as_tx(), &registry);
            define(&w, &["a", "b"]).await;
            w.define_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap();
            assert!(w.has_relationship(&id("a"), &PARENT_OF, &id("b")).await.unwrap());
        }
        assert!(store.is_empty().await);
        tx.commit().await.unwrap();
        assert_eq!(store.len().await, 3);
    }
}

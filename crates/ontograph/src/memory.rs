//! A service holding its resources in memory
//!
//! Useful for static or configuration-defined resource sets and for tests.
//! Data is validated against the service schema on every write.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ontograph_core::{
    Disconnect, Handler, Observer, OntologyError, Resource, ResourceChange, ResourceChanges,
    Result, Schema, Type, ID,
};
use ontograph_kv::Tx;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::service::{Nexter, Service};

pub struct MemoryService {
    schema: Schema,
    resources: RwLock<BTreeMap<String, Resource>>,
    observer: Observer<ResourceChanges>,
}

impl MemoryService {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            resources: RwLock::new(BTreeMap::new()),
            observer: Observer::new(),
        }
    }

    fn check(&self, resource: &Resource) -> Result<()> {
        if resource.id.resource_type != self.schema.resource_type {
            return Err(OntologyError::Validation(format!(
                "{} does not belong to service {}",
                resource.id, self.schema.resource_type
            )));
        }
        resource.id.validate()?;
        self.schema.validate(&resource.data)
    }

    /// Create or replace a resource
    pub async fn set(&self, resource: Resource) -> Result<()> {
        self.set_many(vec![resource]).await
    }

    /// Create or replace several resources, published as one change batch
    pub async fn set_many(&self, resources: Vec<Resource>) -> Result<()> {
        resources.iter().try_for_each(|r| self.check(r))?;
        let mut map = self.resources.write().await;
        let changes: ResourceChanges = resources
            .into_iter()
            .map(|resource| {
                map.insert(resource.id.key.clone(), resource.clone());
                ResourceChange::Set { resource }
            })
            .collect();
        self.observer.notify(&changes);
        Ok(())
    }

    /// Remove a resource. Removing a missing key is a no-op.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.resources.write().await;
        if map.remove(key).is_some() {
            let id = ID::new(self.schema.resource_type.clone(), key);
            self.observer.notify(&vec![ResourceChange::Delete { id }]);
        }
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Service for MemoryService {
    fn resource_type(&self) -> Type {
        self.schema.resource_type.clone()
    }

    fn schema(&self) -> Schema {
        self.schema.clone()
    }

    async fn retrieve_resource(&self, key: &str, _tx: &dyn Tx) -> Result<Resource> {
        self.resources
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| {
                OntologyError::not_found(ID::new(self.schema.resource_type.clone(), key))
            })
    }

    fn on_change(&self, handler: Handler<ResourceChanges>) -> Disconnect {
        self.observer.on_change(move |changes| handler(changes))
    }

    async fn open_nexter(&self) -> Result<Nexter> {
        let snapshot: Vec<Result<Resource>> = self
            .resources
            .read()
            .await
            .values()
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(snapshot).boxed())
    }
}

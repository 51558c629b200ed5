//! Service contract and registry
//!
//! Every domain module that owns a resource type implements [`Service`] and
//! registers it with the ontology. The registry maps each type to exactly
//! one provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use ontograph_core::{
    Disconnect, Handler, OntologyError, Resource, ResourceChanges, Result, Schema, Type, ID,
};
use ontograph_kv::Tx;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Lazy enumeration of every resource a service owns
pub type Nexter = BoxStream<'static, Result<Resource>>;

/// Trait implemented by every resource provider
#[async_trait]
pub trait Service: Send + Sync {
    /// Type tag of every resource this service owns
    fn resource_type(&self) -> Type;

    /// Structure of the `data` carried by this service's resources
    fn schema(&self) -> Schema;

    /// Rehydrate one resource with its full data
    async fn retrieve_resource(&self, key: &str, tx: &dyn Tx) -> Result<Resource>;

    /// Subscribe to this service's own resource changes
    fn on_change(&self, handler: Handler<ResourceChanges>) -> Disconnect;

    /// Enumerate every resource the service currently owns. The stream is
    /// finite and single-use; open a new one to restart.
    async fn open_nexter(&self) -> Result<Nexter>;
}

/// Map from resource type to its provider
#[derive(Default)]
pub struct Registry {
    services: BTreeMap<Type, Arc<dyn Service>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service. A second provider for the same type is a wiring
    /// error.
    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<()> {
        let resource_type = service.resource_type();
        if self.services.contains_key(&resource_type) {
            return Err(OntologyError::DuplicateService(resource_type));
        }
        self.services.insert(resource_type, service);
        Ok(())
    }

    pub fn get(&self, resource_type: &Type) -> Result<&Arc<dyn Service>> {
        self.services
            .get(resource_type)
            .ok_or_else(|| OntologyError::UnregisteredType(resource_type.clone()))
    }

    pub fn contains(&self, resource_type: &Type) -> bool {
        self.services.contains_key(resource_type)
    }

    /// Rehydrate a resource through its owning service
    pub async fn retrieve_resource(&self, id: &ID, tx: &dyn Tx) -> Result<Resource> {
        self.get(&id.resource_type)?
            .retrieve_resource(&id.key, tx)
            .await
    }

    /// Registered services in type order
    pub fn services(&self) -> impl Iterator<Item = &Arc<dyn Service>> {
        self.services.values()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::BuiltinService;
    use crate::memory::MemoryService;
    use ontograph_core::BUILTIN_TYPE;
    use ontograph_kv::MemStore;

    #[test]
    fn test_duplicate_registration_is_fatal() {
        let mut registry = Registry::new();
        registry.register(Arc::new(BuiltinService)).unwrap();
        let err = registry.register(Arc::new(BuiltinService)).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, OntologyError::DuplicateService(t) if t == BUILTIN_TYPE));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_retrieve_unregistered_type_is_fatal() {
        let registry = Registry::new();
        let store = MemStore::new();
        let err = registry
            .retrieve_resource(&ID::new("rack", "1"), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, OntologyError::UnregisteredType(_)));
    }

    #[tokio::test]
    async fn test_retrieve_delegates_to_service() {
        let mut registry = Registry::new();
        let svc = Arc::new(MemoryService::new(Schema::new(Type::from("label"))));
        svc.set(Resource::new(ID::new("label", "a"), "alpha"))
            .await
            .unwrap();
        registry.register(svc).unwrap();

        let store = MemStore::new();
        let r = registry
            .retrieve_resource(&ID::new("label", "a"), &store)
            .await
            .unwrap();
        assert_eq!(r.name, "alpha");
        assert!(registry
            .retrieve_resource(&ID::new("label", "b"), &store)
            .await
            .unwrap_err()
            .is_not_found());
    }
}

//! Built-in resources present in every ontology

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ontograph_core::{
    Disconnect, Handler, OntologyError, Resource, ResourceChanges, Result, Schema, Type,
    BUILTIN_TYPE, ID,
};
use ontograph_kv::Tx;

use crate::service::{Nexter, Service};

pub const ROOT_NAME: &str = "root";

pub fn root_resource() -> Resource {
    Resource::new(ID::root(), ROOT_NAME)
}

/// Serves the root of the resource tree. Its resource set never changes.
pub struct BuiltinService;

#[async_trait]
impl Service for BuiltinService {
    fn resource_type(&self) -> Type {
        BUILTIN_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::new(BUILTIN_TYPE)
    }

    async fn retrieve_resource(&self, key: &str, _tx: &dyn Tx) -> Result<Resource> {
        if key == ID::root().key {
            Ok(root_resource())
        } else {
            Err(OntologyError::not_found(ID::new(BUILTIN_TYPE, key)))
        }
    }

    fn on_change(&self, _handler: Handler<ResourceChanges>) -> Disconnect {
        Disconnect::noop()
    }

    async fn open_nexter(&self) -> Result<Nexter> {
        Ok(stream::iter(vec![Ok(root_resource())]).boxed())
    }
}

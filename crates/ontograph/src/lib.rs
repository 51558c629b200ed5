//! Ontograph - Typed resource graph over an ordered key-value store
//!
//! This crate implements the graph engine:
//! - A registry mapping each resource type to the service that owns it
//! - A writer that keeps the relationship graph acyclic
//! - Multi-clause retrieve queries with prefix-indexed and scanning traversal
//! - The [`Ontology`] facade wiring services, change observers and search
//! - A change capture codec for replicating graph mutations
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(MemStore::new());
//! let ontology = Ontology::open(OntologyConfig::new(store)).await?;
//!
//! let writer = ontology.new_writer(None);
//! writer.define_resource(&rack).await?;
//! writer.define_relationship(&ID::root(), &PARENT_OF, &rack).await?;
//!
//! let children = ontology
//!     .new_retrieve()
//!     .where_ids(vec![ID::root()])
//!     .traverse_to(CHILDREN)
//!     .exec_entries()
//!     .await?;
//! ```
//!
//! Author: hephaex@gmail.com

pub mod builtin;
pub mod cdc;
pub mod memory;
pub mod ontology;
pub mod retrieve;
pub mod service;
pub mod storage;
pub mod writer;

pub use builtin::{root_resource, BuiltinService, ROOT_NAME};
pub use cdc::{CdcChannel, CdcEvent, CdcFrame};
pub use memory::MemoryService;
pub use ontology::{Ontology, OntologyConfig};
pub use retrieve::{Direction, Predicate, Retrieve, Retrieved, Traverser, CHILDREN, PARENTS};
pub use service::{Nexter, Registry, Service};
pub use writer::Writer;

pub use ontograph_core::{OntologyError, Result};

//! Ontograph Core - Data model, errors, and shared types
//!
//! This crate defines the core abstractions used throughout ontograph:
//! - Resource identifiers and their string encoding
//! - Resources, schemas, and typed relationships
//! - Change events and the observer primitive used to publish them
//! - Common error types
//! - Configuration management
//!
//! Author: hephaex@gmail.com

pub mod change;
pub mod config;
pub mod id;
pub mod observe;
pub mod relationship;
pub mod resource;

pub use change::{
    RelationshipChange, RelationshipChanges, ResourceChange, ResourceChanges, Variant,
};
pub use config::{AppConfig, ConfigError, LoggingConfig, OntologySettings};
pub use id::{Type, BUILTIN_TYPE, ID};
pub use observe::{Disconnect, Handler, Observer};
pub use relationship::{Relationship, RelationshipType, CREATED_BY, PARENT_OF};
pub use resource::{Field, FieldKind, Resource, Schema};

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for ontology operations
#[derive(Error, Debug)]
pub enum OntologyError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cycle detected: {0}")]
    Cycle(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service already registered for type {0}")]
    DuplicateService(Type),

    #[error("No service registered for type {0}")]
    UnregisteredType(Type),

    #[error("Search is not enabled on this ontology")]
    SearchDisabled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OntologyError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::Cycle(_))
    }

    /// Wiring errors that should halt startup rather than be retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DuplicateService(_) | Self::UnregisteredType(_))
    }
}

pub type Result<T> = std::result::Result<T, OntologyError>;

// ============================================================================
// Tests
// ============================================================================

//! Ontograph Search - Searchable index over ontology resources
//!
//! The ontology feeds an index with a one-time backfill of every resource
//! and then with live change events. The index only answers with IDs; the
//! ontology rehydrates full resources itself.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use ontograph_core::{Resource, ResourceChange, Result, Type, ID};
use serde::{Deserialize, Serialize};

pub mod tantivy_index;

pub use tantivy_index::TantivyIndex;

/// Default maximum number of results
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// A search query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free text to match against resource names and searchable fields
    pub term: String,

    /// Restrict results to these types (empty means all)
    #[serde(default)]
    pub types: Vec<Type>,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_SEARCH_LIMIT
}

impl SearchRequest {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            types: Vec::new(),
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_types(mut self, types: Vec<Type>) -> Self {
        self.types = types;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Trait for search index backends
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Declare the extra data fields to tokenize for a resource type
    async fn register(&self, resource_type: Type, fields: Vec<String>);

    /// Add or replace resources
    async fn index(&self, resources: Vec<Resource>) -> Result<()>;

    /// Apply live changes in the order given
    async fn apply(&self, changes: Vec<ResourceChange>) -> Result<()>;

    /// IDs of matching resources, best match first
    async fn search(&self, request: &SearchRequest) -> Result<Vec<ID>>;

    /// Get index name for logging
    fn name(&self) -> &str;
}

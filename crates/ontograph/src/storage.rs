//! Key layout of ontology rows in the backing store
//!
//! ```text
//! __ontology__/resource/{type}:{key}               -> {"id": ..., "name": ...}
//! __ontology__/relationship/{from}->{type}->{to}   -> (empty)
//! ```
//!
//! Resource keys sort by type, so a type filter is a prefix scan. Relationship
//! keys lead with `from`, so outgoing edges are a prefix scan while incoming
//! edges need a full scan of the relationship keyspace.

use ontograph_core::{OntologyError, Relationship, Result, Type, ID};
use serde::{Deserialize, Serialize};

pub const RESOURCE_PREFIX: &str = "__ontology__/resource/";
pub const RELATIONSHIP_PREFIX: &str = "__ontology__/relationship/";

/// The persisted part of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRow {
    pub id: ID,
    #[serde(default)]
    pub name: String,
}

impl ResourceRow {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(value: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(value)?)
    }
}

pub fn resource_key(id: &ID) -> Vec<u8> {
    format!("{RESOURCE_PREFIX}{id}").into_bytes()
}

pub fn resource_type_prefix(resource_type: &Type) -> Vec<u8> {
    format!("{RESOURCE_PREFIX}{resource_type}:").into_bytes()
}

pub fn relationship_key(rel: &Relationship) -> Vec<u8> {
    format!("{RELATIONSHIP_PREFIX}{rel}").into_bytes()
}

/// Store prefix for a relationship key prefix such as `"{from}->parent->"`
pub fn relationship_prefix(key_prefix: &str) -> Vec<u8> {
    format!("{RELATIONSHIP_PREFIX}{key_prefix}").into_bytes()
}

pub fn decode_relationship_key(key: &[u8]) -> Result<Relationship> {
    let s = std::str::from_utf8(key)
        .map_err(|e| OntologyError::Storage(format!("relationship key is not utf-8: {e}")))?;
    let s = s.strip_prefix(RELATIONSHIP_PREFIX).ok_or_else(|| {
        OntologyError::Storage(format!("{s:?} is not a relationship key"))
    })?;
    Relationship::parse(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph_core::PARENT_OF;

    #[test]
    fn test_relationship_key_round_trip() {
        let rel = Relationship::new(ID::new("a", "1"), PARENT_OF, ID::new("b", "2"));
        let key = relationship_key(&rel);
        assert_eq!(decode_relationship_key(&key).unwrap(), rel);
        assert!(decode_relationship_key(&resource_key(&rel.from)).is_err());
    }

    #[test]
    fn test_type_prefix_matches_only_that_type() {
        let prefix = resource_type_prefix(&Type::from("chan"));
        assert!(resource_key(&ID::new("chan", "1")).starts_with(&prefix));
        assert!(!resource_key(&ID::new("channel", "1")).starts_with(&prefix));
    }
}

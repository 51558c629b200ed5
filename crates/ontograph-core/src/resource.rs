//! Resources and the schemas describing their data

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::{Type, ID};
use crate::{OntologyError, Result};

/// A named, typed entity tracked by the ontology
///
/// Only `id` and `name` are persisted in the graph store. `data` belongs to
/// the owning service and is rebuilt on every retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ID,
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Resource {
    pub fn new(id: ID, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// A resource carrying only its identity, as returned when field data
    /// is excluded from a query
    pub fn shell(id: ID, name: impl Into<String>) -> Self {
        Self::new(id, name)
    }
}

/// Kind of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    /// Any JSON value
    Json,
}

impl FieldKind {
    fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Json => true,
        }
    }
}

/// Field definition within a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub kind: FieldKind,
    /// Whether the search index should tokenize this field
    #[serde(default)]
    pub searchable: bool,
}

/// Structural description of the `data` carried by one resource type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub resource_type: Type,
    pub fields: BTreeMap<String, Field>,
}

impl Schema {
    pub fn new(resource_type: Type) -> Self {
        Self {
            resource_type,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(
            name.into(),
            Field {
                kind,
                searchable: false,
            },
        );
        self
    }

    /// Add a string field that the search index should tokenize
    pub fn with_searchable_field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(
            name.into(),
            Field {
                kind: FieldKind::String,
                searchable: true,
            },
        );
        self
    }

    pub fn searchable_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, f)| f.searchable)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Check `data` against the declared fields. Missing fields are allowed;
    /// present fields must have the declared kind.
    pub fn validate(&self, data: &serde_json::Value) -> Result<()> {
        if data.is_null() {
            return Ok(());
        }
        let obj = data.as_object().ok_or_else(|| {
            OntologyError::Validation(format!(
                "{} data must be an object",
                self.resource_type
            ))
        })?;
        for (name, field) in &self.fields {
            if let Some(value) = obj.get(name) {
                if !field.kind.matches(value) {
                    return Err(OntologyError::Validation(format!(
                        "{}.{name}: expected {:?}, got {value}",
                        self.resource_type, field.kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn channel_schema() -> Schema {
        Schema::new(Type::from_static("channel"))
            .with_searchable_field("name")
            .with_field("rate", FieldKind::Float)
            .with_field("virtual", FieldKind::Boolean)
    }

    #[test]
    fn test_schema_validate_ok() {
        let schema = channel_schema();
        assert!(schema
            .validate(&json!({"name": "sensor", "rate": 10.5, "virtual": false}))
            .is_ok());
        assert!(schema.validate(&json!({"name": "partial"})).is_ok());
        assert!(schema.validate(&serde_json::Value::Null).is_ok());
    }

    #[test]
    fn test_schema_validate_wrong_kind() {
        let schema = channel_schema();
        let err = schema.validate(&json!({"rate": "fast"})).unwrap_err();
        assert!(matches!(err, OntologyError::Validation(_)));
        assert!(schema.validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_searchable_fields() {
        assert_eq!(channel_schema().searchable_fields(), vec!["name".to_string()]);
    }

    #[test]
    fn test_resource_json() {
        let r = Resource::new(ID::new("channel", "1"), "sensor").with_data(json!({"rate": 1.0}));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["id"], "channel:1");
        assert_eq!(v["data"]["rate"], 1.0);
    }
}

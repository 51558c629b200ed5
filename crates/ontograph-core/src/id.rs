//! Resource identifiers
//!
//! An [`ID`] is a `(type, key)` pair that serializes to `"{type}:{key}"`.
//! The string form is used both as the storage key suffix and on the wire,
//! so parsing and formatting must be exact inverses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::{OntologyError, Result};

/// Separator between the type and key of an ID
pub const TYPE_KEY_SEPARATOR: char = ':';

/// Separator between the segments of a relationship key
pub const RELATIONSHIP_SEPARATOR: &str = "->";

/// Tag identifying every resource owned by one service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Type(Cow<'static, str>);

impl Type {
    /// Create a type from a static string (usable in constants)
    pub const fn from_static(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }

    pub fn new(s: impl Into<String>) -> Self {
        Self(Cow::Owned(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Type {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Type {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

/// Type of the built-in resources every ontology carries
pub const BUILTIN_TYPE: Type = Type::from_static("builtin");

/// Unique identifier of a resource
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ID {
    pub resource_type: Type,
    pub key: String,
}

impl Default for Type {
    fn default() -> Self {
        Self::from_static("")
    }
}

impl ID {
    pub fn new(resource_type: impl Into<Type>, key: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            key: key.into(),
        }
    }

    /// The well-known root of the resource tree
    pub fn root() -> Self {
        Self {
            resource_type: BUILTIN_TYPE,
            key: "root".to_string(),
        }
    }

    /// The "no resource" sentinel
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.resource_type.is_empty() && self.key.is_empty()
    }

    /// Parse an ID from its `"{type}:{key}"` form, splitting on the first `:`
    pub fn parse(s: &str) -> Result<Self> {
        let (resource_type, key) = s.split_once(TYPE_KEY_SEPARATOR).ok_or_else(|| {
            OntologyError::Validation(format!("invalid id {s:?}: expected type:key"))
        })?;
        let id = Self::new(resource_type, key);
        id.validate()?;
        Ok(id)
    }

    /// Check that the ID can be embedded in storage and relationship keys
    pub fn validate(&self) -> Result<()> {
        if self.resource_type.is_empty() {
            return Err(OntologyError::Validation(format!(
                "id {self} has an empty type"
            )));
        }
        if self.key.is_empty() {
            return Err(OntologyError::Validation(format!(
                "id {self} has an empty key"
            )));
        }
        if self.resource_type.as_str().contains(TYPE_KEY_SEPARATOR) {
            return Err(OntologyError::Validation(format!(
                "id type {:?} must not contain ':'",
                self.resource_type.as_str()
            )));
        }
        for part in [self.resource_type.as_str(), self.key.as_str()] {
            if part.contains(RELATIONSHIP_SEPARATOR) || part.contains('\n') {
                return Err(OntologyError::Validation(format!(
                    "id {self} must not contain '->' or newlines"
                )));
            }
        }
        Ok(())
    }

    /// Validate many IDs, failing on the first invalid one
    pub fn validate_many(ids: &[ID]) -> Result<()> {
        ids.iter().try_for_each(ID::validate)
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.resource_type, TYPE_KEY_SEPARATOR, self.key)
    }
}

impl FromStr for ID {
    type Err = OntologyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ID {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ID {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ID::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_and_parse() {
        let id = ID::new("channel", "42");
        assert_eq!(id.to_string(), "channel:42");
        assert_eq!(ID::parse("channel:42").unwrap(), id);
    }

    #[test]
    fn test_id_parse_splits_on_first_colon() {
        let id = ID::parse("range:a:b").unwrap();
        assert_eq!(id.resource_type.as_str(), "range");
        assert_eq!(id.key, "a:b");
    }

    #[test]
    fn test_id_parse_rejects_malformed() {
        assert!(ID::parse("nocolon").is_err());
        assert!(ID::parse(":key").is_err());
        assert!(ID::parse("type:").is_err());
        assert!(ID::parse("type:a->b").is_err());
    }

    #[test]
    fn test_zero_id() {
        assert!(ID::zero().is_zero());
        assert!(!ID::root().is_zero());
        assert!(ID::zero().validate().is_err());
    }

    #[test]
    fn test_id_serde_as_string() {
        let id = ID::new("rack", "7");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"rack:7\"");
        let back: ID = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}

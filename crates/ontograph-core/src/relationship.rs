//! Directed, typed relationships between resources
//!
//! A relationship is keyed by `"{from}->{type}->{to}"`. Because the `from`
//! ID leads the key, all outgoing edges of a resource (optionally of one
//! type) share a byte prefix and can be range-scanned.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::id::{ID, RELATIONSHIP_SEPARATOR};
use crate::{OntologyError, Result};

/// Tag identifying the kind of a relationship
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipType(Cow<'static, str>);

impl RelationshipType {
    pub const fn from_static(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }

    pub fn new(s: impl Into<String>) -> Self {
        Self(Cow::Owned(s.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelationshipType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// `from` is the parent of `to` in the resource tree
pub const PARENT_OF: RelationshipType = RelationshipType::from_static("parent");

/// `from` was created by `to`
pub const CREATED_BY: RelationshipType = RelationshipType::from_static("created_by");

/// A directed edge `from -type-> to`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Relationship {
    pub from: ID,
    pub relationship_type: RelationshipType,
    pub to: ID,
}

impl Relationship {
    pub fn new(from: ID, relationship_type: RelationshipType, to: ID) -> Self {
        Self {
            from,
            relationship_type,
            to,
        }
    }

    /// The same edge pointing the other way
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            relationship_type: self.relationship_type.clone(),
            to: self.from.clone(),
        }
    }

    /// Parse `"{from}->{type}->{to}"`. Anything that does not split into
    /// exactly three segments is rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split(RELATIONSHIP_SEPARATOR).collect();
        let [from, relationship_type, to] = segments.as_slice() else {
            return Err(OntologyError::Validation(format!(
                "invalid relationship {s:?}: expected from->type->to"
            )));
        };
        if relationship_type.is_empty() {
            return Err(OntologyError::Validation(format!(
                "invalid relationship {s:?}: empty type"
            )));
        }
        Ok(Self {
            from: ID::parse(from)?,
            relationship_type: RelationshipType::new(*relationship_type),
            to: ID::parse(to)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.from.validate()?;
        self.to.validate()?;
        let t = self.relationship_type.as_str();
        if t.is_empty() || t.contains(RELATIONSHIP_SEPARATOR) || t.contains('\n') {
            return Err(OntologyError::Validation(format!(
                "invalid relationship type {t:?}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.from,
            self.relationship_type,
            self.to,
            sep = RELATIONSHIP_SEPARATOR
        )
    }
}

impl FromStr for Relationship {
    type Err = OntologyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Relationship {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Relationship {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Relationship::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Key prefix shared by every outgoing edge of `from`
pub fn outgoing_prefix(from: &ID) -> String {
    format!("{from}{RELATIONSHIP_SEPARATOR}")
}

/// Key prefix shared by every outgoing edge of `from` with the given type
pub fn outgoing_prefix_of_type(from: &ID, relationship_type: &RelationshipType) -> String {
    format!("{from}{sep}{relationship_type}{sep}", sep = RELATIONSHIP_SEPARATOR)
}

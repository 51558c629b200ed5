//! Change events emitted by services and by the graph store

use serde::{Deserialize, Serialize};

use crate::id::ID;
use crate::relationship::Relationship;
use crate::resource::Resource;

/// Kind of a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Set,
    Delete,
}

/// A resource was created/updated or removed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "lowercase")]
pub enum ResourceChange {
    Set { resource: Resource },
    Delete { id: ID },
}

impl ResourceChange {
    pub fn id(&self) -> &ID {
        match self {
            Self::Set { resource } => &resource.id,
            Self::Delete { id } => id,
        }
    }

    pub fn variant(&self) -> Variant {
        match self {
            Self::Set { .. } => Variant::Set,
            Self::Delete { .. } => Variant::Delete,
        }
    }
}

/// A relationship was created or removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipChange {
    pub variant: Variant,
    pub relationship: Relationship,
}

impl RelationshipChange {
    pub fn set(relationship: Relationship) -> Self {
        Self {
            variant: Variant::Set,
            relationship,
        }
    }

    pub fn delete(relationship: Relationship) -> Self {
        Self {
            variant: Variant::Delete,
            relationship,
        }
    }
}

/// Changes committed together, in commit order
pub type ResourceChanges = Vec<ResourceChange>;

/// Relationship changes committed together, in commit order
pub type RelationshipChanges = Vec<RelationshipChange>;

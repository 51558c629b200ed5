//! Seed files
//!
//! A seed describes a static resource graph in TOML:
//!
//! ```toml
//! [types.rack]
//! searchable = ["location"]
//!
//! [[resources]]
//! type = "rack"
//! key = "r1"
//! name = "Rack 1"
//! data = { location = "hall a" }
//!
//! [[relationships]]
//! from = "rack:r1"
//! type = "parent"
//! to = "device:d1"
//! ```
//!
//! Each resource type is served by its own `MemoryService`. Resources that
//! no seed relationship names as a child are attached under the root.
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use ontograph::{MemoryService, Ontology};
use ontograph_core::{RelationshipType, Resource, Schema, Type, ID, PARENT_OF};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub types: BTreeMap<String, SeedType>,
    pub resources: Vec<SeedResource>,
    pub relationships: Vec<SeedRelationship>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedType {
    /// Data fields to feed to the search index
    pub searchable: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedResource {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SeedResource {
    fn id(&self) -> ID {
        ID::new(self.resource_type.as_str(), self.key.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct SeedRelationship {
    pub from: ID,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub to: ID,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub services: usize,
    pub resources: usize,
    pub relationships: usize,
}

impl SeedFile {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("invalid seed file")
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        Self::from_toml(&content)
    }

    fn schema(&self, resource_type: &str) -> Schema {
        let mut schema = Schema::new(Type::new(resource_type));
        if let Some(seed_type) = self.types.get(resource_type) {
            for field in &seed_type.searchable {
                schema = schema.with_searchable_field(field.as_str());
            }
        }
        schema
    }

    /// Register one service per seeded type, then define every resource
    /// and relationship in a single transaction
    pub async fn load(&self, ontology: &mut Ontology) -> anyhow::Result<SeedSummary> {
        let mut by_type: BTreeMap<&str, Vec<Resource>> = BTreeMap::new();
        for seed in &self.resources {
            let resource = Resource::new(seed.id(), seed.name.as_str()).with_data(seed.data.clone());
            by_type
                .entry(seed.resource_type.as_str())
                .or_default()
                .push(resource);
        }

        for (resource_type, resources) in &by_type {
            let service = Arc::new(MemoryService::new(self.schema(resource_type)));
            service
                .set_many(resources.clone())
                .await
                .with_context(|| format!("invalid {resource_type} resources"))?;
            ontology.register_service(service)?;
        }

        let tx = ontology.begin();
        {
            let writer = ontology.new_writer(Some(tx.as_tx()));
            for seed in &self.resources {
                writer.define_named_resource(&seed.id(), &seed.name).await?;
            }
            for rel in &self.relationships {
                writer
                    .define_relationship(&rel.from, &rel.relationship_type, &rel.to)
                    .await
                    .with_context(|| {
                        format!("cannot define {}->{}->{}", rel.from, rel.relationship_type, rel.to)
                    })?;
            }

            let children: HashSet<&ID> = self
                .relationships
                .iter()
                .filter(|rel| rel.relationship_type == PARENT_OF)
                .map(|rel| &rel.to)
                .collect();
            let top_level: Vec<ID> = self
                .resources
                .iter()
                .map(SeedResource::id)
                .filter(|id| !children.contains(id))
                .collect();
            writer.add_children(&ID::root(), &top_level).await?;
        }
        tx.commit().await?;

        let summary = SeedSummary {
            services: by_type.len(),
            resources: self.resources.len(),
            relationships: self.relationships.len(),
        };
        info!(
            services = summary.services,
            resources = summary.resources,
            relationships = summary.relationships,
            "loaded seed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ontograph::{OntologyConfig, CHILDREN};
    use ontograph_kv::MemStore;

    const SEED: &str = r#"
        [types.rack]
        searchable = ["location"]

        [[resources]]
        type = "rack"
        key = "r1"
        name = "Rack 1"
        data = { location = "hall a" }

        [[resources]]
        type = "device"
        key = "d1"
        name = "Device 1"

        [[relationships]]
        from = "rack:r1"
        type = "parent"
        to = "device:d1"
    "#;

    async fn open() -> Ontology {
        let config = OntologyConfig::new(Arc::new(MemStore::new())).with_search_enabled(false);
        Ontology::open(config).await.unwrap()
    }

    #[test]
    fn test_parse_seed() {
        let seed = SeedFile::from_toml(SEED).unwrap();
        assert_eq!(seed.resources.len(), 2);
        assert_eq!(seed.relationships[0].from, ID::new("rack", "r1"));
        assert_eq!(seed.relationships[0].relationship_type, PARENT_OF);
        assert_eq!(seed.schema("rack").searchable_fields(), vec!["location"]);
        assert!(SeedFile::from_toml("[[relationships]]\nfrom = \"bad\"").is_err());
    }

    #[tokio::test]
    async fn test_load_attaches_top_level_under_root() {
        let mut ontology = open().await;
        let seed = SeedFile::from_toml(SEED).unwrap();
        let summary = seed.load(&mut ontology).await.unwrap();
        assert_eq!(
            summary,
            SeedSummary {
                services: 2,
                resources: 2,
                relationships: 1
            }
        );

        let top = ontology
            .new_retrieve()
            .where_ids(vec![ID::root()])
            .traverse_to(CHILDREN)
            .exec_entries()
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "Rack 1");
        assert_eq!(top[0].data["location"], "hall a");
    }

    #[tokio::test]
    async fn test_cyclic_seed_is_rejected() {
        let mut ontology = open().await;
        let seed = SeedFile::from_toml(
            r#"
            [[resources]]
            type = "node"
            key = "a"
            [[resources]]
            type = "node"
            key = "b"
            [[relationships]]
            from = "node:a"
            type = "parent"
            to = "node:b"
            [[relationships]]
            from = "node:b"
            type = "parent"
            to = "node:a"
            "#,
        )
        .unwrap();
        assert!(seed.load(&mut ontology).await.is_err());
    }
}

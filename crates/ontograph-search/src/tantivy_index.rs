//! Tantivy full-text search backend
//!
//! Every resource becomes one document in an in-RAM index. The `id` field is
//! the exact `"{type}:{key}"` string used to replace and delete documents,
//! `type` filters results, and `key`, `name` and `data` are tokenized text.
//! Searchable fields are registered per type after the schema is built, so
//! their string values share the single `data` field.
//!
//! A query term matches a document when one of its indexed terms starts
//! with it. Each matched query term scores 1, and ties are broken by ID.
//!
//! Author: hephaex@gmail.com

use async_trait::async_trait;
use ontograph_core::{OntologyError, Resource, ResourceChange, Result, Type, ID};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, ConstScoreQuery, Occur, Query, RegexQuery, TermQuery};
use tantivy::schema::{document::Value, Field, IndexRecordOption, Schema, STORED, STRING, TEXT};
use tantivy::tokenizer::TokenStream;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use crate::{SearchIndex, SearchRequest};

/// Writer heap shared by the indexing threads
const WRITER_MEMORY_BUDGET: usize = 50_000_000;

fn index_error(e: tantivy::TantivyError) -> OntologyError {
    OntologyError::Search(e.to_string())
}

/// Full-text index over resource names, keys and searchable fields
pub struct TantivyIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: RwLock<HashMap<Type, Vec<String>>>,
    // Field handles
    id_field: Field,
    type_field: Field,
    key_field: Field,
    name_field: Field,
    data_field: Field,
}

impl TantivyIndex {
    /// Create an empty in-RAM index
    pub fn new() -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let type_field = schema_builder.add_text_field("type", STRING);
        let key_field = schema_builder.add_text_field("key", TEXT);
        let name_field = schema_builder.add_text_field("name", TEXT);
        let data_field = schema_builder.add_text_field("data", TEXT);
        let index = Index::create_in_ram(schema_builder.build());

        // Reloaded after every commit so searches see the writes at once
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_error)?;
        let writer: IndexWriter = index.writer(WRITER_MEMORY_BUDGET).map_err(index_error)?;

        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields: RwLock::new(HashMap::new()),
            id_field,
            type_field,
            key_field,
            name_field,
            data_field,
        })
    }

    /// Number of live documents
    pub fn len(&self) -> usize {
        self.reader.searcher().num_docs() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn id_term(&self, id: &ID) -> Term {
        Term::from_field_text(self.id_field, &id.to_string())
    }

    fn document(&self, resource: &Resource) -> TantivyDocument {
        let data = self
            .fields
            .read()
            .get(&resource.id.resource_type)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|field| resource.data.get(field).and_then(|v| v.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        doc!(
            self.id_field => resource.id.to_string(),
            self.type_field => resource.id.resource_type.to_string(),
            self.key_field => resource.id.key.clone(),
            self.name_field => resource.name.clone(),
            self.data_field => data,
        )
    }

    /// Apply changes in order and make them visible to searches
    fn write(&self, changes: &[ResourceChange]) -> Result<()> {
        let mut writer = self.writer.lock();
        for change in changes {
            match change {
                ResourceChange::Set { resource } => {
                    writer.delete_term(self.id_term(&resource.id));
                    writer
                        .add_document(self.document(resource))
                        .map_err(index_error)?;
                }
                ResourceChange::Delete { id } => {
                    writer.delete_term(self.id_term(id));
                }
            }
        }
        writer.commit().map_err(index_error)?;
        self.reader.reload().map_err(index_error)
    }

    /// Query terms, tokenized the way the text fields are
    fn query_terms(&self, text: &str) -> Result<Vec<String>> {
        let mut analyzer = self
            .index
            .tokenizer_for_field(self.name_field)
            .map_err(index_error)?;
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        while stream.advance() {
            terms.push(stream.token().text.clone());
        }
        terms.dedup();
        Ok(terms)
    }

    fn build_query(&self, terms: &[String], types: &[Type]) -> Result<Box<dyn Query>> {
        let mut matches: Vec<(Occur, Box<dyn Query>)> = Vec::with_capacity(terms.len());
        for term in terms {
            // Tokens are alphanumeric runs, so they need no regex escaping
            let pattern = format!("{term}.*");
            let mut fields: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            for field in [self.key_field, self.name_field, self.data_field] {
                let prefix = RegexQuery::from_pattern(&pattern, field).map_err(index_error)?;
                fields.push((Occur::Should, Box::new(prefix)));
            }
            let any_field = ConstScoreQuery::new(Box::new(BooleanQuery::new(fields)), 1.0);
            matches.push((Occur::Should, Box::new(any_field)));
        }
        let matches: Box<dyn Query> = Box::new(BooleanQuery::new(matches));
        if types.is_empty() {
            return Ok(matches);
        }

        let types: Vec<(Occur, Box<dyn Query>)> = types
            .iter()
            .map(|t| {
                let term = Term::from_field_text(self.type_field, t.as_str());
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Should, query)
            })
            .collect();
        let types: Box<dyn Query> =
            Box::new(ConstScoreQuery::new(Box::new(BooleanQuery::new(types)), 0.0));
        Ok(Box::new(BooleanQuery::new(vec![
            (Occur::Must, matches),
            (Occur::Must, types),
        ])))
    }
}

#[async_trait]
impl SearchIndex for TantivyIndex {
    async fn register(&self, resource_type: Type, fields: Vec<String>) {
        self.fields.write().insert(resource_type, fields);
    }

    async fn index(&self, resources: Vec<Resource>) -> Result<()> {
        let changes: Vec<ResourceChange> = resources
            .into_iter()
            .map(|resource| ResourceChange::Set { resource })
            .collect();
        self.write(&changes)
    }

    async fn apply(&self, changes: Vec<ResourceChange>) -> Result<()> {
        self.write(&changes)
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<ID>> {
        let terms = self.query_terms(&request.term)?;
        if terms.is_empty() || request.limit == 0 {
            return Ok(Vec::new());
        }
        let query = self.build_query(&terms, &request.types)?;

        // Scores are match counts, so collect every hit and order ties by ID
        let searcher = self.reader.searcher();
        let everything = TopDocs::with_limit((searcher.num_docs() as usize).max(1));
        let top_docs = searcher.search(&query, &everything).map_err(index_error)?;

        let mut scored = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address).map_err(index_error)?;
            let id = doc
                .get_first(self.id_field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| OntologyError::Search("document without id".into()))?;
            scored.push((score, ID::parse(id)?));
        }
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        debug!(term = %request.term, hits = scored.len(), "tantivy search");

        Ok(scored
            .into_iter()
            .take(request.limit)
            .map(|(_, id)| id)
            .collect())
    }

    fn name(&self) -> &str {
        "tantivy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(t: &str, key: &str, name: &str) -> Resource {
        Resource::new(ID::new(t, key), name)
    }

    #[test]
    fn test_query_terms_follow_field_tokenizer() {
        let index = TantivyIndex::new().unwrap();
        let terms = index.query_terms("Stage-Entry pressure_01").unwrap();
        assert_eq!(terms, vec!["stage", "entry", "pressure", "01"]);
    }

    #[tokio::test]
    async fn test_search_prefix_and_rank() {
        let index = TantivyIndex::new().unwrap();
        index
            .index(vec![
                resource("channel", "1", "tank pressure"),
                resource("channel", "2", "tank temperature"),
                resource("rack", "1", "pressure rack"),
            ])
            .await
            .unwrap();

        let ids = index
            .search(&SearchRequest::new("tank press"))
            .await
            .unwrap();
        assert_eq!(
            ids,
            vec![
                ID::new("channel", "1"),
                ID::new("channel", "2"),
                ID::new("rack", "1")
            ]
        );

        let racks = index
            .search(&SearchRequest::new("press").with_types(vec![Type::from("rack")]))
            .await
            .unwrap();
        assert_eq!(racks, vec![ID::new("rack", "1")]);
    }

    #[tokio::test]
    async fn test_registered_fields_are_searchable() {
        let index = TantivyIndex::new().unwrap();
        index
            .register(Type::from("device"), vec!["model".to_string()])
            .await;
        index
            .index(vec![resource("device", "d1", "daq")
                .with_data(json!({"model": "USB-6000", "serial": "zzz"}))])
            .await
            .unwrap();

        assert_eq!(index.search(&SearchRequest::new("usb")).await.unwrap().len(), 1);
        // Unregistered fields are not indexed
        assert!(index.search(&SearchRequest::new("zzz")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reindex_replaces_document() {
        let index = TantivyIndex::new().unwrap();
        index
            .index(vec![resource("label", "l1", "urgent")])
            .await
            .unwrap();
        index
            .index(vec![resource("label", "l1", "routine")])
            .await
            .unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.search(&SearchRequest::new("urgent")).await.unwrap().is_empty());
        assert_eq!(
            index.search(&SearchRequest::new("rout")).await.unwrap(),
            vec![ID::new("label", "l1")]
        );
    }

    #[tokio::test]
    async fn test_apply_changes_in_order() {
        let index = TantivyIndex::new().unwrap();
        let r = resource("label", "l1", "critical");
        index
            .apply(vec![
                ResourceChange::Set {
                    resource: r.clone(),
                },
                ResourceChange::Delete { id: r.id.clone() },
            ])
            .await
            .unwrap();
        assert!(index.is_empty());

        index
            .apply(vec![ResourceChange::Set { resource: r }])
            .await
            .unwrap();
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_limit_and_empty_query() {
        let index = TantivyIndex::new().unwrap();
        let resources = (0..10)
            .map(|i| resource("channel", &i.to_string(), "sensor"))
            .collect();
        index.index(resources).await.unwrap();

        let ids = index
            .search(&SearchRequest::new("sensor").with_limit(3))
            .await
            .unwrap();
        assert_eq!(
            ids,
            vec![
                ID::new("channel", "0"),
                ID::new("channel", "1"),
                ID::new("channel", "2")
            ]
        );
        assert!(index.search(&SearchRequest::new("  ")).await.unwrap().is_empty());
    }
}

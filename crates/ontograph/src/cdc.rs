//! Change capture codec
//!
//! Graph mutations are replicated as frames on four logical channels. A
//! payload is a sequence of UTF-8 records separated by a single `\n`:
//!
//! - IDs are encoded as `"{type}:{key}"`
//! - relationships use their storage key, `"{from}->{type}->{to}"`
//! - resource sets carry one JSON document per record
//!
//! Decoding splits strictly on `\n` and reparses each record with the same
//! parsers used for storage keys. One trailing newline is tolerated.
//!
//! Author: hephaex@gmail.com

use ontograph_core::{
    OntologyError, Relationship, RelationshipChange, Resource, ResourceChange, Result, Variant, ID,
};
use serde::{Deserialize, Serialize};

const RECORD_SEPARATOR: u8 = b'\n';

// ============================================================================
// Records
// ============================================================================

fn join<I: IntoIterator<Item = Vec<u8>>>(records: I) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, record) in records.into_iter().enumerate() {
        if i > 0 {
            out.push(RECORD_SEPARATOR);
        }
        out.extend_from_slice(&record);
    }
    out
}

fn split(payload: &[u8]) -> Result<Vec<&str>> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    let payload = payload.strip_suffix(&[RECORD_SEPARATOR]).unwrap_or(payload);
    let text = std::str::from_utf8(payload)
        .map_err(|e| OntologyError::Validation(format!("cdc payload is not utf-8: {e}")))?;
    Ok(text.split(RECORD_SEPARATOR as char).collect())
}

pub fn encode_id(id: &ID) -> Vec<u8> {
    id.to_string().into_bytes()
}

/// The zero ID encodes to a bare separator
const ZERO_ID_RECORD: &str = ":";

fn parse_id(record: &str) -> Result<ID> {
    if record == ZERO_ID_RECORD {
        return Ok(ID::zero());
    }
    ID::parse(record)
}

pub fn decode_id(record: &[u8]) -> Result<ID> {
    let text = std::str::from_utf8(record)
        .map_err(|e| OntologyError::Validation(format!("id is not utf-8: {e}")))?;
    parse_id(text)
}

pub fn encode_ids(ids: &[ID]) -> Vec<u8> {
    join(ids.iter().map(encode_id))
}

pub fn decode_ids(payload: &[u8]) -> Result<Vec<ID>> {
    split(payload)?.into_iter().map(parse_id).collect()
}

pub fn encode_relationship(rel: &Relationship) -> Vec<u8> {
    rel.to_string().into_bytes()
}

pub fn decode_relationship(record: &[u8]) -> Result<Relationship> {
    let text = std::str::from_utf8(record)
        .map_err(|e| OntologyError::Validation(format!("relationship is not utf-8: {e}")))?;
    Relationship::parse(text)
}

pub fn encode_relationships(rels: &[Relationship]) -> Vec<u8> {
    join(rels.iter().map(encode_relationship))
}

pub fn decode_relationships(payload: &[u8]) -> Result<Vec<Relationship>> {
    split(payload)?
        .into_iter()
        .map(Relationship::parse)
        .collect()
}

/// Newline-delimited JSON. serde_json never emits a raw newline in compact
/// output, so records stay separable.
pub fn encode_resource_sets(resources: &[Resource]) -> Result<Vec<u8>> {
    let records = resources
        .iter()
        .map(serde_json::to_vec)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(join(records))
}

pub fn decode_resource_sets(payload: &[u8]) -> Result<Vec<Resource>> {
    split(payload)?
        .into_iter()
        .map(|record| serde_json::from_str::<Resource>(record).map_err(OntologyError::from))
        .collect()
}

// ============================================================================
// Frames
// ============================================================================

/// Logical replication channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdcChannel {
    ResourceSet,
    ResourceDelete,
    RelationshipSet,
    RelationshipDelete,
}

impl CdcChannel {
    pub fn name(&self) -> &'static str {
        match self {
            CdcChannel::ResourceSet => "ontology_resource_set",
            CdcChannel::ResourceDelete => "ontology_resource_delete",
            CdcChannel::RelationshipSet => "ontology_relationship_set",
            CdcChannel::RelationshipDelete => "ontology_relationship_delete",
        }
    }
}

impl std::fmt::Display for CdcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One encoded batch on one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdcFrame {
    pub channel: CdcChannel,
    pub payload: Vec<u8>,
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq)]
pub enum CdcEvent {
    ResourceSets(Vec<Resource>),
    ResourceDeletes(Vec<ID>),
    RelationshipSets(Vec<Relationship>),
    RelationshipDeletes(Vec<Relationship>),
}

impl CdcFrame {
    pub fn decode(&self) -> Result<CdcEvent> {
        Ok(match self.channel {
            CdcChannel::ResourceSet => CdcEvent::ResourceSets(decode_resource_sets(&self.payload)?),
            CdcChannel::ResourceDelete => CdcEvent::ResourceDeletes(decode_ids(&self.payload)?),
            CdcChannel::RelationshipSet => {
                CdcEvent::RelationshipSets(decode_relationships(&self.payload)?)
            }
            CdcChannel::RelationshipDelete => {
                CdcEvent::RelationshipDeletes(decode_relationships(&self.payload)?)
            }
        })
    }
}

/// Split `items` into maximal runs sharing the same key, keeping order
fn runs<T, K: PartialEq>(items: &[T], key: impl Fn(&T) -> K) -> Vec<&[T]> {
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=items.len() {
        if i == items.len() || key(&items[i]) != key(&items[start]) {
            out.push(&items[start..i]);
            start = i;
        }
    }
    out
}

/// Encode resource changes as frames. Consecutive changes of the same
/// variant share a frame so replay order matches commit order.
pub fn encode_resource_changes(changes: &[ResourceChange]) -> Result<Vec<CdcFrame>> {
    let mut frames = Vec::new();
    for run in runs(changes, ResourceChange::variant) {
        let frame = match run[0].variant() {
            Variant::Set => {
                let resources: Vec<Resource> = run
                    .iter()
                    .filter_map(|change| match change {
                        ResourceChange::Set { resource } => Some(resource.clone()),
                        ResourceChange::Delete { .. } => None,
                    })
                    .collect();
                CdcFrame {
                    channel: CdcChannel::ResourceSet,
                    payload: encode_resource_sets(&resources)?,
                }
            }
            Variant::Delete => {
                let ids: Vec<ID> = run.iter().map(|change| change.id().clone()).collect();
                CdcFrame {
                    channel: CdcChannel::ResourceDelete,
                    payload: encode_ids(&ids),
                }
            }
        };
        frames.push(frame);
    }
    Ok(frames)
}

pub fn encode_relationship_changes(changes: &[RelationshipChange]) -> Vec<CdcFrame> {
    runs(changes, |change| change.variant)
        .into_iter()
        .map(|run| {
            let rels: Vec<Relationship> =
                run.iter().map(|change| change.relationship.clone()).collect();
            let channel = match run[0].variant {
                Variant::Set => CdcChannel::RelationshipSet,
                Variant::Delete => CdcChannel::RelationshipDelete,
            };
            CdcFrame {
                channel,
                payload: encode_relationships(&rels),
            }
        })
        .collect()
}

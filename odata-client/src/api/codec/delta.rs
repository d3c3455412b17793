//! Delta (change tracking) payloads
//!
//! Only the JSON format carries deltas. Entries are classified by their
//! context URL fragment (`$deletedEntity`, `$link`, `$deletedLink`) or by the
//! `@removed` / `@odata.removed` annotation; everything else is a changed entity.

use serde_json::{Map, Value as Json};

use super::Representation;
use super::entity::EntityInstance;
use super::json::JsonCodec;
use crate::api::error::CodecError;

/// A tombstone for an entity removed since the previous delta link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedEntity {
    pub id: String,
    /// `deleted` or `changed` (no longer matching the query)
    pub reason: Option<String>,
}

/// A relationship added or removed between two entities
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaLink {
    pub source: String,
    pub relationship: String,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Delta {
    pub changed: Vec<EntityInstance>,
    pub deleted: Vec<DeletedEntity>,
    pub added_links: Vec<DeltaLink>,
    pub deleted_links: Vec<DeltaLink>,
    pub delta_link: Option<String>,
    pub next_link: Option<String>,
}

enum EntryKind {
    Changed,
    Deleted,
    Link,
    DeletedLink,
}

fn string_field(obj: &Map<String, Json>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| obj.get(*n).and_then(Json::as_str))
        .map(str::to_string)
}

impl JsonCodec<'_> {
    fn entry_kind(&self, obj: &Map<String, Json>) -> EntryKind {
        let context = self
            .annotation(obj, "context")
            .and_then(Json::as_str)
            .unwrap_or("");
        if context.ends_with("$deletedEntity") {
            EntryKind::Deleted
        } else if context.ends_with("$deletedLink") {
            EntryKind::DeletedLink
        } else if context.ends_with("$link") {
            EntryKind::Link
        } else if obj.contains_key("@removed") || obj.contains_key("@odata.removed") {
            EntryKind::Deleted
        } else {
            EntryKind::Changed
        }
    }

    pub fn read_delta(&self, json: &Json, expected: &str) -> Result<Delta, CodecError> {
        let obj = json
            .as_object()
            .ok_or_else(|| CodecError::malformed("expected an object wrapping a delta"))?;
        let entries = obj
            .get("value")
            .and_then(Json::as_array)
            .ok_or_else(|| CodecError::malformed("delta payload has no 'value' array"))?;

        let mut delta = Delta {
            delta_link: self
                .annotation(obj, "deltaLink")
                .and_then(Json::as_str)
                .map(str::to_string),
            next_link: self
                .annotation(obj, "nextLink")
                .and_then(Json::as_str)
                .map(str::to_string),
            ..Default::default()
        };

        for entry in entries {
            let entry_obj = entry
                .as_object()
                .ok_or_else(|| CodecError::malformed("delta entry is not an object"))?;
            match self.entry_kind(entry_obj) {
                EntryKind::Changed => delta.changed.push(self.read_entity(entry, expected)?),
                EntryKind::Deleted => {
                    let id = string_field(entry_obj, &["id", "@id", "@odata.id"]).ok_or_else(|| {
                        CodecError::malformed("deleted entity carries no id")
                    })?;
                    let reason = string_field(entry_obj, &["reason"]).or_else(|| {
                        ["@removed", "@odata.removed"]
                            .iter()
                            .find_map(|n| entry_obj.get(*n))
                            .and_then(|r| r.get("reason"))
                            .and_then(Json::as_str)
                            .map(str::to_string)
                    });
                    delta.deleted.push(DeletedEntity { id, reason });
                }
                kind @ (EntryKind::Link | EntryKind::DeletedLink) => {
                    let field = |name: &str| {
                        string_field(entry_obj, &[name]).ok_or_else(|| {
                            CodecError::malformed(format!("delta link is missing '{}'", name))
                        })
                    };
                    let link = DeltaLink {
                        source: field("source")?,
                        relationship: field("relationship")?,
                        target: field("target")?,
                    };
                    match kind {
                        EntryKind::Link => delta.added_links.push(link),
                        _ => delta.deleted_links.push(link),
                    }
                }
            }
        }

        Ok(delta)
    }

    /// Write a delta using the 4.01 `@removed` form for tombstones
    pub fn write_delta(&self, delta: &Delta) -> Result<Json, CodecError> {
        let mut entries = Vec::new();
        for entity in &delta.changed {
            entries.push(self.write_entity(entity, Representation::Full)?);
        }
        for deleted in &delta.deleted {
            let mut removed = Map::new();
            if let Some(reason) = &deleted.reason {
                removed.insert("reason".to_string(), Json::String(reason.clone()));
            }
            let mut obj = Map::new();
            obj.insert("@removed".to_string(), Json::Object(removed));
            obj.insert("@id".to_string(), Json::String(deleted.id.clone()));
            entries.push(Json::Object(obj));
        }
        let links = delta
            .added_links
            .iter()
            .map(|l| ("$link", l))
            .chain(delta.deleted_links.iter().map(|l| ("$deletedLink", l)));
        for (context, link) in links {
            let mut obj = Map::new();
            obj.insert("@odata.context".to_string(), Json::String(format!("#{}", context)));
            obj.insert("source".to_string(), Json::String(link.source.clone()));
            obj.insert("relationship".to_string(), Json::String(link.relationship.clone()));
            obj.insert("target".to_string(), Json::String(link.target.clone()));
            entries.push(Json::Object(obj));
        }

        let mut obj = Map::new();
        obj.insert("value".to_string(), Json::Array(entries));
        if let Some(next) = &delta.next_link {
            obj.insert("@odata.nextLink".to_string(), Json::String(next.clone()));
        }
        if let Some(link) = &delta.delta_link {
            obj.insert("@odata.deltaLink".to_string(), Json::String(link.clone()));
        }
        Ok(Json::Object(obj))
    }
}

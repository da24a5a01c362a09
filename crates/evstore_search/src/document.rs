//! Search documents and the bulk wire format.
//!
//! Each event becomes one document keyed by its hex id. Bulk requests are
//! newline-delimited JSON: an action line per item, followed by the
//! document source for upserts.

use crate::error::SearchResult;
use evstore_codec::{Event, EventId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Kind of encrypted direct messages, whose content is never searchable.
pub const ENCRYPTED_DM_KIND: u32 = 4;

/// The document stored in the search index for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedEvent {
    /// The full event, for retrieval and keyword filters.
    pub event: Event,
    /// Analyzed full-text field.
    pub content_search: String,
}

impl IndexedEvent {
    /// Builds the document for `event`.
    pub fn from_event(event: &Event) -> Self {
        let content_search = if event.kind == ENCRYPTED_DM_KIND {
            String::new()
        } else {
            event.content.clone()
        };
        Self {
            event: event.clone(),
            content_search,
        }
    }
}

/// Index settings and mappings sent when the index is created.
///
/// Only the identifying fields and the analyzed content are mapped; the rest
/// of the event is kept in the source without being indexed.
pub fn index_mapping() -> Value {
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "dynamic": false,
            "properties": {
                "event": {
                    "dynamic": false,
                    "properties": {
                        "id": { "type": "keyword" },
                        "pubkey": { "type": "keyword" },
                        "kind": { "type": "integer" },
                        "tags": { "type": "keyword" },
                        "created_at": { "type": "date" }
                    }
                },
                "content_search": { "type": "text" }
            }
        }
    })
}

/// One item of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAction {
    /// Upsert the document under its event id.
    Index(Box<IndexedEvent>),
    /// Remove the document with this id.
    Delete(EventId),
}

impl BulkAction {
    /// Upsert action for `event`.
    pub fn index(event: &Event) -> Self {
        Self::Index(Box::new(IndexedEvent::from_event(event)))
    }

    /// Document id the action targets.
    pub fn id(&self) -> EventId {
        match self {
            Self::Index(doc) => doc.event.id,
            Self::Delete(id) => *id,
        }
    }

    /// Action name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Index(_) => "index",
            Self::Delete(_) => "delete",
        }
    }
}

/// Builds the NDJSON body of a bulk request against `index`.
///
/// # Errors
///
/// Returns a serialization error if a document cannot be encoded.
pub fn bulk_body(index: &str, actions: &[BulkAction]) -> SearchResult<String> {
    let mut body = String::new();
    for action in actions {
        let mut meta = Map::new();
        meta.insert(
            action.name().to_owned(),
            json!({ "_index": index, "_id": action.id().to_hex() }),
        );
        body.push_str(&serde_json::to_string(&meta)?);
        body.push('\n');
        if let BulkAction::Index(doc) = action {
            body.push_str(&serde_json::to_string(doc)?);
            body.push('\n');
        }
    }
    Ok(body)
}

/// Per-item result of a bulk request, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemResponse {
    /// Targeted document id.
    pub id: String,
    /// HTTP-style status code.
    pub status: u16,
    /// Failure details when the status is not a success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

impl BulkItemResponse {
    /// A successful item.
    pub fn ok(id: impl Into<String>, status: u16) -> Self {
        Self {
            id: id.into(),
            status,
            error: None,
        }
    }

    /// A failed item.
    pub fn failed(
        id: impl Into<String>,
        status: u16,
        kind: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status,
            error: Some(BulkItemError {
                kind: kind.into(),
                reason: reason.into(),
            }),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `"type: reason"`, or the bare status when no details were given.
    pub fn describe(&self) -> String {
        match &self.error {
            Some(e) => format!("{}: {}", e.kind, e.reason),
            None => format!("status {}", self.status),
        }
    }
}

/// Failure details of a bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Error type, e.g. `mapper_parsing_exception`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable reason.
    pub reason: String,
}

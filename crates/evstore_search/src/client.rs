//! Search client abstraction.
//!
//! The indexer never talks HTTP itself. Implement [`SearchClient`] over the
//! HTTP library of your choice; [`MemorySearchClient`] serves tests.

use crate::document::{BulkItemResponse, IndexedEvent};
use crate::error::{SearchError, SearchResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;

/// Blocking client for a bulk-capable search index.
///
/// Calls are made from blocking worker threads, never from the async
/// executor.
pub trait SearchClient: Send + Sync {
    /// Creates `index` with the given settings and mappings.
    ///
    /// An index that already exists must be reported as a `Rejected` error
    /// whose reason contains `resource_already_exists_exception`.
    fn create_index(&self, index: &str, mapping: &Value) -> SearchResult<()>;

    /// Sends one NDJSON bulk body and returns the per-item results in
    /// request order.
    fn bulk(&self, index: &str, body: &str) -> SearchResult<Vec<BulkItemResponse>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    indexes: BTreeMap<String, BTreeMap<String, IndexedEvent>>,
    bulk_requests: usize,
    failing_requests: usize,
    rejected_ids: Vec<String>,
}

/// In-memory search index for tests.
///
/// Parses bulk bodies exactly as a server would, so the body builder is
/// exercised end to end.
#[derive(Debug, Default)]
pub struct MemorySearchClient {
    state: Mutex<MemoryState>,
}

impl MemorySearchClient {
    /// Creates an empty client with no indexes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` bulk requests fail as a whole.
    pub fn fail_next_requests(&self, count: usize) {
        self.state.lock().failing_requests = count;
    }

    /// Makes every upsert of `id` fail with a mapping error.
    pub fn reject_id(&self, id: impl Into<String>) {
        self.state.lock().rejected_ids.push(id.into());
    }

    /// Number of bulk requests received, failed ones included.
    pub fn bulk_requests(&self) -> usize {
        self.state.lock().bulk_requests
    }

    /// Returns true if `index` was created.
    pub fn has_index(&self, index: &str) -> bool {
        self.state.lock().indexes.contains_key(index)
    }

    /// Number of documents in `index`.
    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indexes
            .get(index)
            .map_or(0, BTreeMap::len)
    }

    /// Returns the document stored under the hex `id`.
    pub fn document(&self, index: &str, id: &str) -> Option<IndexedEvent> {
        self.state
            .lock()
            .indexes
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Hex ids of documents whose searchable content contains `term`,
    /// case-insensitively.
    pub fn search(&self, index: &str, term: &str) -> Vec<String> {
        let needle = term.to_lowercase();
        self.state
            .lock()
            .indexes
            .get(index)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| doc.content_search.to_lowercase().contains(&needle))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn meta_id(meta: &Value) -> SearchResult<String> {
    meta.get("_id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| SearchError::client("bulk action without _id"))
}

impl SearchClient for MemorySearchClient {
    fn create_index(&self, index: &str, _mapping: &Value) -> SearchResult<()> {
        let mut state = self.state.lock();
        if state.indexes.contains_key(index) {
            return Err(SearchError::rejected(
                400,
                format!("resource_already_exists_exception: index [{index}] already exists"),
            ));
        }
        state.indexes.insert(index.to_owned(), BTreeMap::new());
        Ok(())
    }

    fn bulk(&self, index: &str, body: &str) -> SearchResult<Vec<BulkItemResponse>> {
        let mut state = self.state.lock();
        state.bulk_requests += 1;
        if state.failing_requests > 0 {
            state.failing_requests -= 1;
            return Err(SearchError::client("connection refused"));
        }

        let rejected = state.rejected_ids.clone();
        let docs = state
            .indexes
            .get_mut(index)
            .ok_or_else(|| SearchError::rejected(404, format!("index_not_found_exception: {index}")))?;

        let mut responses = Vec::new();
        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        while let Some(line) = lines.next() {
            let action: Value = serde_json::from_str(line)?;
            if let Some(meta) = action.get("index") {
                let id = meta_id(meta)?;
                let source = lines
                    .next()
                    .ok_or_else(|| SearchError::client("index action without source"))?;
                let doc: IndexedEvent = serde_json::from_str(source)?;
                if rejected.contains(&id) {
                    responses.push(BulkItemResponse::failed(
                        id,
                        400,
                        "mapper_parsing_exception",
                        "failed to parse",
                    ));
                } else {
                    let status = if docs.insert(id.clone(), doc).is_some() { 200 } else { 201 };
                    responses.push(BulkItemResponse::ok(id, status));
                }
            } else if let Some(meta) = action.get("delete") {
                let id = meta_id(meta)?;
                if docs.remove(&id).is_some() {
                    responses.push(BulkItemResponse::ok(id, 200));
                } else {
                    responses.push(BulkItemResponse::failed(id, 404, "not_found", "document missing"));
                }
            } else {
                return Err(SearchError::client(format!("unknown bulk action: {line}")));
            }
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{bulk_body, index_mapping, BulkAction};
    use evstore_codec::{Event, EventId, PublicKey, Signature};

    fn event(seed: u8, content: &str) -> Event {
        Event {
            id: EventId::from_bytes([seed; 32]),
            pubkey: PublicKey::from_bytes([1; 32]),
            created_at: 100,
            kind: 1,
            tags: Vec::new(),
            content: content.into(),
            sig: Signature::from_bytes([0; 64]),
        }
    }

    #[test]
    fn create_index_twice_reports_existing() {
        let client = MemorySearchClient::new();
        client.create_index("events", &index_mapping()).unwrap();
        let err = client.create_index("events", &index_mapping()).unwrap_err();
        assert!(err.is_already_exists());
    }

    #[test]
    fn bulk_applies_in_order() {
        let client = MemorySearchClient::new();
        client.create_index("events", &index_mapping()).unwrap();
        let a = event(1, "Hello relay");
        let b = event(2, "other");

        let body = bulk_body("events", &[BulkAction::index(&a), BulkAction::index(&b)]).unwrap();
        let items = client.bulk("events", &body).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(BulkItemResponse::is_success));
        assert_eq!(client.document_count("events"), 2);
        assert_eq!(client.search("events", "hello"), vec![a.id.to_hex()]);

        let body = bulk_body("events", &[BulkAction::Delete(a.id), BulkAction::Delete(a.id)]).unwrap();
        let items = client.bulk("events", &body).unwrap();
        assert_eq!(items[0].status, 200);
        assert_eq!(items[1].status, 404);
        assert_eq!(client.document_count("events"), 1);
    }

    #[test]
    fn injected_failures() {
        let client = MemorySearchClient::new();
        client.create_index("events", &index_mapping()).unwrap();
        client.fail_next_requests(1);
        let ev = event(3, "x");
        let body = bulk_body("events", &[BulkAction::index(&ev)]).unwrap();
        assert!(matches!(client.bulk("events", &body), Err(SearchError::Client(_))));

        client.reject_id(ev.id.to_hex());
        let items = client.bulk("events", &body).unwrap();
        assert_eq!(items[0].status, 400);
        assert_eq!(client.bulk_requests(), 2);
        assert_eq!(client.document_count("events"), 0);
    }

    #[test]
    fn missing_index() {
        let client = MemorySearchClient::new();
        let err = client.bulk("nope", "").unwrap_err();
        assert!(err.is_not_found());
    }
}

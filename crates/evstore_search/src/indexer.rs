//! Batched, concurrent indexing.
//!
//! Requests flow through three stages:
//! 1. `index`/`delete` push onto an unbounded queue and hand back a ticket
//! 2. A dispatcher task groups queued requests into batches, cutting one
//!    when `batch_size` is reached or the flush interval ticks
//! 3. `workers` tasks send batches to the client, one bulk request each, and
//!    resolve every ticket with its item's outcome

use crate::client::SearchClient;
use crate::config::IndexerConfig;
use crate::document::{bulk_body, index_mapping, BulkAction, BulkItemResponse};
use crate::error::{SearchError, SearchResult};
use evstore_codec::{Event, EventId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

struct Request {
    action: BulkAction,
    respond_to: oneshot::Sender<SearchResult<()>>,
}

type BatchReceiver = Arc<AsyncMutex<mpsc::Receiver<Vec<Request>>>>;

/// Handle to one queued request.
///
/// Resolves to the request's terminal outcome once its batch has been
/// answered. Dropping the ticket abandons the wait; the request is still
/// sent.
pub struct SinkTicket {
    id: EventId,
    receiver: oneshot::Receiver<SearchResult<()>>,
}

impl SinkTicket {
    /// Id of the targeted document.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Waits for the outcome.
    ///
    /// # Errors
    ///
    /// Returns the item's rejection, the client failure of its batch, or
    /// `Closed` if the indexer stopped first.
    pub async fn wait(self) -> SearchResult<()> {
        self.await
    }
}

impl Future for SinkTicket {
    type Output = SearchResult<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|_| Err(SearchError::Closed)))
    }
}

impl fmt::Debug for SinkTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkTicket")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    flushes: AtomicU64,
}

/// Snapshot of indexer activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexerStats {
    /// Requests accepted onto the queue.
    pub queued: u64,
    /// Requests that reached a successful outcome.
    pub succeeded: u64,
    /// Requests that failed.
    pub failed: u64,
    /// Bulk requests sent.
    pub flushes: u64,
}

/// Asynchronous, best-effort bulk indexer.
///
/// Must be started inside a tokio runtime.
pub struct BulkIndexer {
    config: IndexerConfig,
    queue: mpsc::UnboundedSender<Request>,
    tasks: Vec<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl BulkIndexer {
    /// Creates the index if needed and spawns the dispatcher and workers.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid configuration or if the index can
    /// neither be created nor found.
    pub async fn start(client: Arc<dyn SearchClient>, config: IndexerConfig) -> SearchResult<Self> {
        config.validate()?;
        ensure_index(Arc::clone(&client), config.index.clone()).await?;

        let (queue, requests) = mpsc::unbounded_channel();
        let (batches, batch_rx) = mpsc::channel(config.workers);
        let batch_rx: BatchReceiver = Arc::new(AsyncMutex::new(batch_rx));
        let counters = Arc::new(Counters::default());

        let mut tasks = Vec::with_capacity(config.workers + 1);
        tasks.push(tokio::spawn(dispatch(
            requests,
            batches,
            config.batch_size,
            config.flush_interval,
        )));
        for worker in 0..config.workers {
            tasks.push(tokio::spawn(work(
                worker,
                Arc::clone(&batch_rx),
                Arc::clone(&client),
                config.index.clone(),
                Arc::clone(&counters),
            )));
        }

        info!(
            index = %config.index,
            workers = config.workers,
            batch_size = config.batch_size,
            "search indexer started"
        );
        Ok(Self {
            config,
            queue,
            tasks,
            counters,
        })
    }

    /// Queues an upsert of `event`.
    pub fn index(&self, event: &Event) -> SinkTicket {
        debug!("indexing event {}", event.id);
        self.submit(BulkAction::index(event))
    }

    /// Queues removal of the document for `id`. A missing document counts
    /// as removed.
    pub fn delete(&self, id: &EventId) -> SinkTicket {
        debug!("removing event {}", id);
        self.submit(BulkAction::Delete(*id))
    }

    fn submit(&self, action: BulkAction) -> SinkTicket {
        let (respond_to, receiver) = oneshot::channel();
        let id = action.id();
        match self.queue.send(Request { action, respond_to }) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::SendError(request)) => {
                let _ = request.respond_to.send(Err(SearchError::Closed));
            }
        }
        SinkTicket { id, receiver }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    /// Returns activity counters.
    pub fn stats(&self) -> IndexerStats {
        IndexerStats {
            queued: self.counters.queued.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            flushes: self.counters.flushes.load(Ordering::Relaxed),
        }
    }

    /// Flushes everything queued and waits for the tasks to finish.
    #[instrument(skip_all, fields(index = %self.config.index))]
    pub async fn close(self) {
        let Self { queue, tasks, .. } = self;
        drop(queue);
        for task in tasks {
            if let Err(e) = task.await {
                warn!("search indexer task failed: {}", e);
            }
        }
        info!("search indexer closed");
    }
}

impl fmt::Debug for BulkIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkIndexer")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn ensure_index(client: Arc<dyn SearchClient>, index: String) -> SearchResult<()> {
    let name = index.clone();
    let mapping = index_mapping();
    let created = tokio::task::spawn_blocking(move || client.create_index(&index, &mapping))
        .await
        .map_err(|e| SearchError::client(format!("create index task failed: {e}")))?;
    match created {
        Ok(()) => info!("created search index {}", name),
        Err(e) if e.is_already_exists() => debug!("search index {} already exists", name),
        Err(e) => return Err(e),
    }
    Ok(())
}

async fn dispatch(
    mut requests: mpsc::UnboundedReceiver<Request>,
    batches: mpsc::Sender<Vec<Request>>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending = Vec::with_capacity(batch_size);

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(request) => {
                    pending.push(request);
                    if pending.len() >= batch_size && !send_batch(&batches, &mut pending).await {
                        return;
                    }
                }
                None => break,
            },
            _ = ticker.tick() => {
                if !send_batch(&batches, &mut pending).await {
                    return;
                }
            }
        }
    }

    send_batch(&batches, &mut pending).await;
    debug!("search dispatcher stopped");
}

/// Hands the pending requests to the workers. Returns false once no worker
/// is left to take them.
async fn send_batch(batches: &mpsc::Sender<Vec<Request>>, pending: &mut Vec<Request>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let batch = std::mem::take(pending);
    match batches.send(batch).await {
        Ok(()) => true,
        Err(mpsc::error::SendError(batch)) => {
            for request in batch {
                let _ = request.respond_to.send(Err(SearchError::Closed));
            }
            false
        }
    }
}

async fn work(
    worker: usize,
    batches: BatchReceiver,
    client: Arc<dyn SearchClient>,
    index: String,
    counters: Arc<Counters>,
) {
    loop {
        let batch = batches.lock().await.recv().await;
        let Some(batch) = batch else { break };
        flush(worker, &client, &index, batch, &counters).await;
    }
    debug!(worker, "search worker stopped");
}

async fn flush(
    worker: usize,
    client: &Arc<dyn SearchClient>,
    index: &str,
    batch: Vec<Request>,
    counters: &Counters,
) {
    counters.flushes.fetch_add(1, Ordering::Relaxed);
    let deletes: Vec<bool> = batch
        .iter()
        .map(|r| matches!(r.action, BulkAction::Delete(_)))
        .collect();
    let (actions, responders): (Vec<_>, Vec<_>) = batch
        .into_iter()
        .map(|r| (r.action, r.respond_to))
        .unzip();
    debug!(worker, items = actions.len(), "flushing bulk request");

    let outcome = match bulk_body(index, &actions) {
        Ok(body) => {
            let client = Arc::clone(client);
            let index = index.to_owned();
            tokio::task::spawn_blocking(move || client.bulk(&index, &body))
                .await
                .unwrap_or_else(|e| Err(SearchError::client(format!("bulk task failed: {e}"))))
        }
        Err(e) => Err(e),
    };

    match outcome {
        Ok(items) => {
            if items.len() != responders.len() {
                warn!(
                    expected = responders.len(),
                    received = items.len(),
                    "bulk response item count mismatch"
                );
            }
            let mut items = items.into_iter();
            for (responder, is_delete) in responders.into_iter().zip(deletes) {
                let result = match items.next() {
                    Some(item) => item_outcome(&item, is_delete),
                    None => Err(SearchError::client("missing bulk response item")),
                };
                if let Err(e) = &result {
                    warn!("search item failed: {}", e);
                }
                record(counters, &result);
                let _ = responder.send(result);
            }
        }
        Err(e) => {
            warn!(worker, "bulk request failed: {}", e);
            for responder in responders {
                let result = Err(replicate(&e));
                record(counters, &result);
                let _ = responder.send(result);
            }
        }
    }
}

fn item_outcome(item: &BulkItemResponse, is_delete: bool) -> SearchResult<()> {
    if item.is_success() || (is_delete && item.status == 404) {
        Ok(())
    } else {
        Err(SearchError::rejected(item.status, item.describe()))
    }
}

fn record(counters: &Counters, result: &SearchResult<()>) {
    let counter = if result.is_ok() {
        &counters.succeeded
    } else {
        &counters.failed
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Copies a batch-wide failure for each ticket in the batch.
fn replicate(error: &SearchError) -> SearchError {
    match error {
        SearchError::Client(message) => SearchError::Client(message.clone()),
        SearchError::Rejected { status, reason } => SearchError::rejected(*status, reason.clone()),
        SearchError::Closed => SearchError::Closed,
        other => SearchError::client(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemorySearchClient;
    use evstore_codec::{PublicKey, Signature};

    fn event(seed: u8, kind: u32, content: &str) -> Event {
        Event {
            id: EventId::from_bytes([seed; 32]),
            pubkey: PublicKey::from_bytes([9; 32]),
            created_at: 1_700_000_000 + u64::from(seed),
            kind,
            tags: Vec::new(),
            content: content.into(),
            sig: Signature::from_bytes([0; 64]),
        }
    }

    async fn start(
        client: &Arc<MemorySearchClient>,
        config: IndexerConfig,
    ) -> BulkIndexer {
        let dyn_client: Arc<dyn SearchClient> = client.clone();
        BulkIndexer::start(dyn_client, config).await.unwrap()
    }

    fn quick() -> IndexerConfig {
        IndexerConfig::default().with_flush_interval(Duration::from_millis(20))
    }

    #[test]
    fn item_outcomes() {
        assert!(item_outcome(&BulkItemResponse::ok("a", 201), false).is_ok());
        assert!(item_outcome(&BulkItemResponse::failed("a", 404, "not_found", "x"), true).is_ok());
        assert!(item_outcome(&BulkItemResponse::failed("a", 404, "not_found", "x"), false).is_err());
        let err = item_outcome(&BulkItemResponse::failed("a", 409, "conflict", "v"), true).unwrap_err();
        assert!(matches!(err, SearchError::Rejected { status: 409, .. }));
    }

    #[tokio::test]
    async fn start_creates_index_once() {
        let client = Arc::new(MemorySearchClient::new());
        start(&client, quick()).await.close().await;
        assert!(client.has_index("events"));
        // A second start finds the existing index.
        start(&client, quick()).await.close().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let client: Arc<dyn SearchClient> = Arc::new(MemorySearchClient::new());
        let err = BulkIndexer::start(client, IndexerConfig::default().with_workers(0))
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn ticket_resolves_after_flush_interval() {
        let client = Arc::new(MemorySearchClient::new());
        let indexer = start(&client, quick().with_batch_size(1_000)).await;
        let ev = event(1, 1, "gm nostr");

        let ticket = indexer.index(&ev);
        assert_eq!(ticket.id(), ev.id);
        ticket.await.unwrap();

        let doc = client.document("events", &ev.id.to_hex()).unwrap();
        assert_eq!(doc.content_search, "gm nostr");
        indexer.close().await;
    }

    #[tokio::test]
    async fn full_batches_flush_immediately() {
        let client = Arc::new(MemorySearchClient::new());
        let config = IndexerConfig::default()
            .with_batch_size(2)
            .with_flush_interval(Duration::from_secs(3_600));
        let indexer = start(&client, config).await;

        let a = indexer.index(&event(1, 1, "a"));
        let b = indexer.index(&event(2, 1, "b"));
        tokio::time::timeout(Duration::from_secs(5), async {
            a.await.unwrap();
            b.await.unwrap();
        })
        .await
        .unwrap();
        assert_eq!(client.document_count("events"), 2);
        indexer.close().await;
    }

    #[tokio::test]
    async fn delete_of_missing_document_succeeds() {
        let client = Arc::new(MemorySearchClient::new());
        let indexer = start(&client, quick()).await;
        let ev = event(3, 1, "bye");

        indexer.index(&ev).await.unwrap();
        indexer.delete(&ev.id).await.unwrap();
        indexer.delete(&ev.id).await.unwrap();
        assert_eq!(client.document_count("events"), 0);
        indexer.close().await;
    }

    #[tokio::test]
    async fn failures_reach_their_tickets() {
        let client = Arc::new(MemorySearchClient::new());
        let indexer = start(&client, quick()).await;

        client.fail_next_requests(1);
        let err = indexer.index(&event(4, 1, "x")).await.unwrap_err();
        assert!(matches!(err, SearchError::Client(_)));

        let rejected = event(5, 1, "y");
        client.reject_id(rejected.id.to_hex());
        let err = indexer.index(&rejected).await.unwrap_err();
        assert!(matches!(err, SearchError::Rejected { status: 400, .. }));

        let stats = indexer.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.succeeded, 0);
        indexer.close().await;
    }

    #[tokio::test]
    async fn close_flushes_pending_requests() {
        let client = Arc::new(MemorySearchClient::new());
        let config = IndexerConfig::default().with_flush_interval(Duration::from_secs(3_600));
        let indexer = start(&client, config).await;

        // The first tick fires at once; let it pass so the request waits.
        tokio::task::yield_now().await;
        let ticket = indexer.index(&event(6, 1, "late"));
        indexer.close().await;
        ticket.await.unwrap();
        assert_eq!(client.document_count("events"), 1);
    }

    #[tokio::test]
    async fn dropped_ticket_still_writes() {
        let client = Arc::new(MemorySearchClient::new());
        let indexer = start(&client, quick()).await;
        drop(indexer.index(&event(7, 1, "fire and forget")));
        indexer.index(&event(8, 1, "marker")).await.unwrap();
        indexer.close().await;
        assert_eq!(client.document_count("events"), 2);
    }
}

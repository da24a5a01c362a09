//! The search sink mirroring a real store.

use evstore_core::{Config, EventStore, IndexScan};
use evstore_search::{
    BulkIndexer, IndexerConfig, MemorySearchClient, MirrorError, MirroredStore, SearchClient,
};
use evstore_testkit::{author, EventBuilder};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn indexer(client: &Arc<MemorySearchClient>, batch_size: usize) -> BulkIndexer {
    let dyn_client: Arc<dyn SearchClient> = client.clone();
    let config = IndexerConfig::new("notes")
        .with_batch_size(batch_size)
        .with_flush_interval(Duration::from_millis(25));
    BulkIndexer::start(dyn_client, config).await.unwrap()
}

#[tokio::test]
async fn direct_messages_stay_out_of_full_text() {
    let client = Arc::new(MemorySearchClient::new());
    let store = MirroredStore::new(EventStore::open_in_memory().unwrap(), indexer(&client, 16).await);

    let note = EventBuilder::new().kind(1).content("meet at the relay").build();
    let dm = EventBuilder::new().kind(4).content("meet at the relay, secretly").build();
    store.save(&note).await.unwrap();
    store.save(&dm).await.unwrap();

    assert_eq!(client.document_count("notes"), 2);
    assert_eq!(client.search("notes", "relay"), vec![note.id.to_hex()]);
    let stored_dm = client.document("notes", &dm.id.to_hex()).unwrap();
    assert_eq!(stored_dm.event, dm);
    assert!(stored_dm.content_search.is_empty());
    store.close().await.unwrap();
}

#[tokio::test]
async fn delete_of_unindexed_event_succeeds() {
    let client = Arc::new(MemorySearchClient::new());
    let store = MirroredStore::new(EventStore::open_in_memory().unwrap(), indexer(&client, 16).await);
    let ev = EventBuilder::new().content("never indexed").build();

    // Saved behind the mirror's back, so the index has no document.
    store.store().save(&ev).unwrap();
    store.delete(&ev).await.unwrap();
    assert!(!store.store().contains(&ev.id).unwrap());
    store.close().await.unwrap();
}

#[tokio::test]
async fn rejected_document_is_a_secondary_error() {
    let client = Arc::new(MemorySearchClient::new());
    let store = MirroredStore::new(EventStore::open_in_memory().unwrap(), indexer(&client, 16).await);
    let ev = EventBuilder::new().content("unmappable").build();
    client.reject_id(ev.id.to_hex());

    let err = store.save(&ev).await.unwrap_err();
    assert!(matches!(err, MirrorError::Sink(_)));
    assert!(store.store().contains(&ev.id).unwrap());
    assert_eq!(store.sink().stats().failed, 1);
    store.close().await.unwrap();
}

#[tokio::test]
async fn bulk_load_through_tickets() {
    let client = Arc::new(MemorySearchClient::new());
    let dir = TempDir::new().unwrap();
    let store = EventStore::open(&dir.path().join("db"), Config::default()).unwrap();
    let sink = indexer(&client, 8).await;

    let events: Vec<_> = (0..40u64)
        .map(|i| {
            EventBuilder::new()
                .pubkey(author((i % 2) as u8))
                .created_at(1_000 + i)
                .content(format!("bulk {i}"))
                .build()
        })
        .collect();

    let mut tickets = Vec::new();
    for ev in &events {
        store.save(ev).unwrap();
        tickets.push(sink.index(ev));
    }
    for ticket in tickets {
        ticket.await.unwrap();
    }

    assert_eq!(client.document_count("notes"), 40);
    assert!(client.bulk_requests() >= 5);
    assert_eq!(sink.stats().succeeded, 40);
    assert_eq!(store.scan(&IndexScan::pubkey(&author(1))).unwrap().len(), 20);

    let mirrored = MirroredStore::new(store, sink);
    mirrored.delete(&events[0]).await.unwrap();
    assert_eq!(client.document_count("notes"), 39);
    mirrored.close().await.unwrap();
}

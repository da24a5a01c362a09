//! Benchmark utilities.

#![allow(missing_docs)]

use evstore_codec::{Event, EventId, PublicKey, Signature};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate random content of the specified size.
pub fn random_content(size: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect()
}

/// Generate a random event with a short and a 32-byte tag.
pub fn random_event(content_size: usize) -> Event {
    let mut rng = rand::thread_rng();
    Event {
        id: EventId::from_bytes(rng.gen()),
        pubkey: PublicKey::from_bytes([rng.gen_range(0..16); 32]),
        created_at: rng.gen_range(1_600_000_000..1_700_000_000),
        kind: rng.gen_range(0..8),
        tags: vec![
            vec!["t".into(), format!("topic{}", rng.gen_range(0..32))],
            vec!["e".into(), hex::encode(rng.gen::<[u8; 32]>())],
        ],
        content: random_content(content_size),
        sig: Signature::from_bytes([0; 64]),
    }
}

/// Generate a batch of random events.
pub fn generate_events(count: usize, content_size: usize) -> Vec<Event> {
    (0..count).map(|_| random_event(content_size)).collect()
}

//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random events, tags and operation
//! sequences.

use crate::fixtures::EventBuilder;
use evstore_codec::{Event, EventId, PublicKey, Tag};
use evstore_core::{MAX_CREATED_AT, MAX_KIND};
use proptest::prelude::*;

/// Strategy for generating event ids.
pub fn event_id_strategy() -> impl Strategy<Value = EventId> {
    prop::array::uniform32(any::<u8>()).prop_map(EventId::from_bytes)
}

/// Strategy for generating author keys from a small pool, so scans by
/// author hit more than one event.
pub fn pubkey_strategy() -> impl Strategy<Value = PublicKey> {
    (0u8..4).prop_map(|seed| PublicKey::from_bytes([seed; 32]))
}

/// Strategy for tag values covering every indexing class: short text,
/// 32-byte hex, over-long and empty values.
pub fn tag_value_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        6 => prop::string::string_regex("[a-z0-9]{1,12}").expect("Invalid regex"),
        2 => prop::array::uniform32(any::<u8>()).prop_map(hex::encode),
        1 => prop::string::string_regex("[a-z]{101,120}").expect("Invalid regex"),
        1 => Just(String::new()),
    ]
}

/// Strategy for tags, including ones that are never indexed (long names,
/// single elements).
pub fn tag_strategy() -> impl Strategy<Value = Tag> {
    prop_oneof![
        6 => (prop::string::string_regex("[a-z]").expect("Invalid regex"), tag_value_strategy())
            .prop_map(|(name, value)| vec![name, value]),
        1 => (prop::string::string_regex("[a-z]{2,5}").expect("Invalid regex"), tag_value_strategy())
            .prop_map(|(name, value)| vec![name, value]),
        1 => prop::string::string_regex("[a-z]").expect("Invalid regex").prop_map(|name| vec![name]),
    ]
}

/// Strategy for events within the storable range.
pub fn event_strategy() -> impl Strategy<Value = Event> {
    (
        pubkey_strategy(),
        0..=MAX_CREATED_AT,
        0..=MAX_KIND,
        prop::collection::vec(tag_strategy(), 0..6),
        ".{0,64}",
    )
        .prop_map(|(pubkey, created_at, kind, tags, content)| {
            tags.into_iter()
                .fold(
                    EventBuilder::new()
                        .pubkey(pubkey)
                        .created_at(created_at)
                        .kind(kind),
                    EventBuilder::raw_tag,
                )
                .content(content)
                .build()
        })
}

/// Strategy for events whose kind or creation time does not fit the key
/// layout.
pub fn out_of_range_event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        (MAX_KIND + 1..=u32::MAX).prop_map(|kind| EventBuilder::new().kind(kind).build()),
        (MAX_CREATED_AT + 1..=u64::MAX)
            .prop_map(|created_at| EventBuilder::new().created_at(created_at).build()),
    ]
}

/// An operation against a store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Save an event
    Save(Event),
    /// Delete the event at this index of the pool
    Delete(usize),
    /// Look up the event at this index of the pool
    Get(usize),
}

/// Strategy for a pool of events and a sequence of operations over it.
///
/// Events can be saved more than once, so duplicates are exercised.
pub fn operation_sequence_strategy(
    pool_size: usize,
    max_ops: usize,
) -> impl Strategy<Value = (Vec<Event>, Vec<StoreOperation>)> {
    prop::collection::vec(event_strategy(), pool_size..=pool_size).prop_flat_map(move |pool| {
        let picks = pool.len().max(1);
        let op = prop_oneof![
            3 => prop::sample::select(pool.clone()).prop_map(StoreOperation::Save),
            1 => (0..picks).prop_map(StoreOperation::Delete),
            2 => (0..picks).prop_map(StoreOperation::Get),
        ];
        (Just(pool), prop::collection::vec(op, 1..max_ops))
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

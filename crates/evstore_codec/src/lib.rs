//! # evstore Codec
//!
//! Event record model and its durable binary encoding.
//!
//! This crate provides:
//! - [`Event`] and its fixed-width identifier types
//! - A deterministic binary form used for primary storage
//!
//! ## Usage
//!
//! ```
//! use evstore_codec::{decode_event, encode_event, Event, EventId, PublicKey, Signature};
//!
//! let event = Event {
//!     id: EventId::from_bytes([1; 32]),
//!     pubkey: PublicKey::from_bytes([2; 32]),
//!     created_at: 1_700_000_000,
//!     kind: 1,
//!     tags: vec![vec!["t".into(), "rust".into()]],
//!     content: "hello".into(),
//!     sig: Signature::from_bytes([3; 64]),
//! };
//!
//! let bytes = encode_event(&event).unwrap();
//! assert_eq!(decode_event(&bytes).unwrap(), event);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod binary;
mod error;
mod event;

pub use binary::{decode_event, encode_event};
pub use error::{CodecError, CodecResult};
pub use event::{Event, EventId, PublicKey, Signature, Tag, Timestamp};

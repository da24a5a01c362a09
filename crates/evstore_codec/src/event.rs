//! The event record model.
//!
//! Events are immutable once signed. Identifiers travel as lowercase hex in
//! text form (JSON, logs) and as raw bytes everywhere else.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Seconds since the Unix epoch.
pub type Timestamp = u64;

/// A single tag: an ordered list of strings, e.g. `["e", "<hex id>"]`.
pub type Tag = Vec<String>;

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Length in bytes.
            pub const LEN: usize = $len;

            /// Wraps raw bytes.
            #[must_use]
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Copies from a slice that must be exactly [`Self::LEN`] bytes.
            ///
            /// # Errors
            ///
            /// Returns [`CodecError::InvalidHex`] on a length mismatch.
            pub fn from_slice(bytes: &[u8]) -> CodecResult<Self> {
                let arr: [u8; $len] = bytes
                    .try_into()
                    .map_err(|_| CodecError::InvalidHex { expected: $len })?;
                Ok(Self(arr))
            }

            /// Parses a hex string.
            ///
            /// # Errors
            ///
            /// Returns [`CodecError::InvalidHex`] if the string is not valid
            /// hex of the right length.
            pub fn from_hex(s: &str) -> CodecResult<Self> {
                let mut out = [0u8; $len];
                hex::decode_to_slice(s, &mut out)
                    .map_err(|_| CodecError::InvalidHex { expected: $len })?;
                Ok(Self(out))
            }

            /// Returns the raw bytes.
            #[must_use]
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Returns the lowercase hex form.
            #[must_use]
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = CodecError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// 32-byte event identifier (hash of the serialized event).
    EventId,
    32
);

fixed_bytes!(
    /// 32-byte author public key.
    PublicKey,
    32
);

fixed_bytes!(
    /// 64-byte Schnorr signature over the event id.
    Signature,
    64
);

/// A signed, timestamped event.
///
/// `kind` and `created_at` are carried wider than the storage layer accepts
/// so that out-of-range values can be represented and rejected explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: EventId,
    /// Author public key.
    pub pubkey: PublicKey,
    /// Creation time in seconds.
    pub created_at: Timestamp,
    /// Event kind.
    pub kind: u32,
    /// Ordered tags.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Free-form content.
    #[serde(default)]
    pub content: String,
    /// Signature.
    pub sig: Signature,
}

impl Event {
    /// Returns the tags whose name (first element) equals `name`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags
            .iter()
            .filter(move |t| t.first().map(String::as_str) == Some(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_ID: &str = "5c83da77af1dec6d7289834998ad7aafbd9e2191396d75ec3cc27f5a77226f36";

    #[test]
    fn event_id_hex_roundtrip() {
        let id = EventId::from_hex(HEX_ID).unwrap();
        assert_eq!(id.to_hex(), HEX_ID);
        assert_eq!(id.to_string(), HEX_ID);
        assert_eq!(HEX_ID.parse::<EventId>().unwrap(), id);
    }

    #[test]
    fn event_id_rejects_wrong_length() {
        assert_eq!(
            EventId::from_hex("abcd"),
            Err(CodecError::InvalidHex { expected: 32 })
        );
        assert!(EventId::from_slice(&[0u8; 31]).is_err());
    }

    #[test]
    fn event_id_rejects_non_hex() {
        let bad = "zz".repeat(32);
        assert!(EventId::from_hex(&bad).is_err());
    }

    #[test]
    fn event_json_uses_hex_fields() {
        let event = Event {
            id: EventId::from_hex(HEX_ID).unwrap(),
            pubkey: PublicKey::from_bytes([7u8; 32]),
            created_at: 1_700_000_000,
            kind: 1,
            tags: vec![vec!["t".into(), "rust".into()]],
            content: "hello".into(),
            sig: Signature::from_bytes([1u8; 64]),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["id"], HEX_ID);
        assert_eq!(json["pubkey"], "07".repeat(32));
        assert_eq!(json["kind"], 1);

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn tags_named_filters_by_first_element() {
        let event = Event {
            id: EventId::from_bytes([0u8; 32]),
            pubkey: PublicKey::from_bytes([0u8; 32]),
            created_at: 0,
            kind: 1,
            tags: vec![
                vec!["e".into(), "a".into()],
                vec!["p".into(), "b".into()],
                vec!["e".into(), "c".into()],
                vec![],
            ],
            content: String::new(),
            sig: Signature::from_bytes([0u8; 64]),
        };
        assert_eq!(event.tags_named("e").count(), 2);
        assert_eq!(event.tags_named("x").count(), 0);
    }
}

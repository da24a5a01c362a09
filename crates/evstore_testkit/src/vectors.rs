//! Golden index key vectors.
//!
//! The index key layout is persisted, so it must never drift. These vectors
//! pin the exact bytes produced for a fixed event; any other engine or tool
//! reading an evstore layout can check itself against them.

use evstore_codec::{Event, EventId, PublicKey, Signature};
use evstore_core::IndexFamily;
use evstore_storage::Pointer;
use serde::{Deserialize, Serialize};

/// One expected index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Space name of the family.
    pub space: String,
    /// Expected key (hex-encoded).
    pub expected_hex: String,
}

/// The event every vector is computed from.
///
/// Kind 1, created at `0x01020304`, id `11..11`, author `22..22`, with one
/// short tag, one 32-byte tag and two tags that are never indexed.
pub fn golden_event() -> Event {
    Event {
        id: EventId::from_bytes([0x11; 32]),
        pubkey: PublicKey::from_bytes([0x22; 32]),
        created_at: 0x0102_0304,
        kind: 1,
        tags: vec![
            vec!["t".into(), "nostr".into()],
            vec!["e".into(), "33".repeat(32)],
            vec!["title".into(), "ignored".into()],
            vec!["p".into()],
        ],
        content: "golden".into(),
        sig: Signature::from_bytes([0x44; 64]),
    }
}

/// The pointer every vector is computed at.
pub fn golden_pointer() -> Pointer {
    Pointer::compact(1)
}

fn vector(id: &str, description: &str, family: IndexFamily, parts: &[&str]) -> KeyVector {
    KeyVector {
        id: id.into(),
        description: description.into(),
        space: family.space().name().into(),
        expected_hex: parts.concat(),
    }
}

/// Expected entries for [`golden_event`] at [`golden_pointer`], in the order
/// the key codec emits them.
pub fn index_key_vectors() -> Vec<KeyVector> {
    const PTR: &str = "0000000001";
    const TIME: &str = "01020304";
    const KIND: &str = "0001";
    let id = "11".repeat(32);
    let author = "22".repeat(32);
    let tag32 = "33".repeat(32);

    vec![
        vector("by_id", "id then pointer", IndexFamily::Id, &[&id, PTR]),
        vector(
            "by_created_at",
            "time then pointer",
            IndexFamily::CreatedAt,
            &[TIME, PTR],
        ),
        vector(
            "by_kind",
            "kind, time, pointer",
            IndexFamily::Kind,
            &[KIND, TIME, PTR],
        ),
        vector(
            "by_pubkey",
            "author, time, pointer",
            IndexFamily::Pubkey,
            &[&author, TIME, PTR],
        ),
        vector(
            "by_pubkey_kind",
            "author, kind, time, pointer",
            IndexFamily::PubkeyKind,
            &[&author, KIND, TIME, PTR],
        ),
        vector(
            "by_tag",
            "UTF-8 value \"nostr\", time, pointer",
            IndexFamily::Tag,
            &["6e6f737472", TIME, PTR],
        ),
        vector(
            "by_tag32",
            "hex value decoded to 32 bytes, time, pointer",
            IndexFamily::Tag32,
            &[&tag32, TIME, PTR],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use evstore_core::index_keys;

    #[test]
    fn codec_matches_vectors() {
        let keys = index_keys(&golden_event(), &golden_pointer());
        let vectors = index_key_vectors();
        assert_eq!(keys.len(), vectors.len());
        for (key, vector) in keys.iter().zip(&vectors) {
            assert_eq!(key.family.space().name(), vector.space, "{}", vector.id);
            assert_eq!(hex::encode(&key.key), vector.expected_hex, "{}", vector.id);
        }
    }

    #[test]
    fn vectors_name_their_spaces() {
        let json = serde_json::to_value(index_key_vectors()).unwrap();
        assert_eq!(json[0]["space"], "idx_id");
        assert_eq!(json[6]["space"], "idx_tag32");
    }
}

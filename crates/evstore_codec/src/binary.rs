//! Durable binary form of an event.
//!
//! An event is stored as a single CBOR array with a fixed field order:
//!
//! ```text
//! [ id: bytes(32), pubkey: bytes(32), created_at: uint, kind: uint,
//!   tags: [[text, ...], ...], content: text, sig: bytes(64) ]
//! ```
//!
//! Definite lengths and shortest integer forms make the output a pure
//! function of the event, so identical events always produce identical bytes.
//! Changing this layout requires a storage migration.

use crate::error::{CodecError, CodecResult};
use crate::event::{Event, EventId, PublicKey, Signature, Tag};
use ciborium::value::Value;

const FIELD_COUNT: usize = 7;

/// Encodes an event to its durable binary form.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if the CBOR writer fails.
pub fn encode_event(event: &Event) -> CodecResult<Vec<u8>> {
    let tags = event
        .tags
        .iter()
        .map(|tag| Value::Array(tag.iter().cloned().map(Value::Text).collect()))
        .collect();

    let value = Value::Array(vec![
        Value::Bytes(event.id.as_bytes().to_vec()),
        Value::Bytes(event.pubkey.as_bytes().to_vec()),
        Value::Integer(event.created_at.into()),
        Value::Integer(event.kind.into()),
        Value::Array(tags),
        Value::Text(event.content.clone()),
        Value::Bytes(event.sig.as_bytes().to_vec()),
    ]);

    let mut out = Vec::with_capacity(160 + event.content.len());
    ciborium::ser::into_writer(&value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes an event from its durable binary form.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or do not have the
/// event shape.
pub fn decode_event(bytes: &[u8]) -> CodecResult<Event> {
    let value: Value = ciborium::de::from_reader(bytes)
        .map_err(|e| CodecError::decoding_failed(e.to_string()))?;

    let Value::Array(fields) = value else {
        return Err(CodecError::invalid_structure("event is not an array"));
    };
    if fields.len() != FIELD_COUNT {
        return Err(CodecError::invalid_structure(format!(
            "expected {FIELD_COUNT} fields, got {}",
            fields.len()
        )));
    }

    let mut fields = fields.into_iter();
    let mut next = || fields.next().unwrap_or(Value::Null);

    let id = EventId::from_slice(&take_bytes(next(), "id")?)?;
    let pubkey = PublicKey::from_slice(&take_bytes(next(), "pubkey")?)?;
    let created_at = take_uint(next(), "created_at")?;
    let kind = u32::try_from(take_uint(next(), "kind")?)
        .map_err(|_| CodecError::IntegerOverflow { field: "kind" })?;
    let tags = take_tags(next())?;
    let content = take_text(next(), "content")?;
    let sig = Signature::from_slice(&take_bytes(next(), "sig")?)?;

    Ok(Event {
        id,
        pubkey,
        created_at,
        kind,
        tags,
        content,
        sig,
    })
}

fn take_bytes(value: Value, field: &str) -> CodecResult<Vec<u8>> {
    match value {
        Value::Bytes(b) => Ok(b),
        _ => Err(CodecError::invalid_structure(format!(
            "field {field} is not a byte string"
        ))),
    }
}

fn take_text(value: Value, field: &str) -> CodecResult<String> {
    match value {
        Value::Text(s) => Ok(s),
        _ => Err(CodecError::invalid_structure(format!(
            "field {field} is not a text string"
        ))),
    }
}

fn take_uint(value: Value, field: &'static str) -> CodecResult<u64> {
    match value {
        Value::Integer(i) => u64::try_from(i).map_err(|_| CodecError::IntegerOverflow { field }),
        _ => Err(CodecError::invalid_structure(format!(
            "field {field} is not an integer"
        ))),
    }
}

fn take_tags(value: Value) -> CodecResult<Vec<Tag>> {
    let Value::Array(tags) = value else {
        return Err(CodecError::invalid_structure("tags is not an array"));
    };
    tags.into_iter()
        .map(|tag| match tag {
            Value::Array(items) => items
                .into_iter()
                .map(|item| take_text(item, "tag item"))
                .collect(),
            _ => Err(CodecError::invalid_structure("tag is not an array")),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Event {
        Event {
            id: EventId::from_bytes([0xab; 32]),
            pubkey: PublicKey::from_bytes([0x01; 32]),
            created_at: 1_700_000_000,
            kind: 30023,
            tags: vec![
                vec!["d".into(), "article".into()],
                vec!["t".into(), "rust".into(), "extra".into()],
                vec![],
            ],
            content: "long form ✓".into(),
            sig: Signature::from_bytes([0x02; 64]),
        }
    }

    #[test]
    fn roundtrip_sample() {
        let event = sample();
        let bytes = encode_event(&event).unwrap();
        assert_eq!(decode_event(&bytes).unwrap(), event);
    }

    #[test]
    fn encoding_is_deterministic() {
        let a = encode_event(&sample()).unwrap();
        let b = encode_event(&sample()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_event(&[0xff, 0x00, 0x13]),
            Err(CodecError::DecodingFailed { .. })
        ));
    }

    #[test]
    fn decode_rejects_wrong_shape() {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&Value::Array(vec![Value::Null]), &mut bytes).unwrap();
        assert!(matches!(
            decode_event(&bytes),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn decode_rejects_short_id() {
        let mut event_bytes = Vec::new();
        let value = Value::Array(vec![
            Value::Bytes(vec![1, 2, 3]),
            Value::Bytes(vec![0; 32]),
            Value::Integer(1u64.into()),
            Value::Integer(1u64.into()),
            Value::Array(vec![]),
            Value::Text(String::new()),
            Value::Bytes(vec![0; 64]),
        ]);
        ciborium::ser::into_writer(&value, &mut event_bytes).unwrap();
        assert_eq!(
            decode_event(&event_bytes),
            Err(CodecError::InvalidHex { expected: 32 })
        );
    }

    #[test]
    fn decode_rejects_oversized_kind() {
        let mut bytes = Vec::new();
        let value = Value::Array(vec![
            Value::Bytes(vec![0; 32]),
            Value::Bytes(vec![0; 32]),
            Value::Integer(1u64.into()),
            Value::Integer(u64::MAX.into()),
            Value::Array(vec![]),
            Value::Text(String::new()),
            Value::Bytes(vec![0; 64]),
        ]);
        ciborium::ser::into_writer(&value, &mut bytes).unwrap();
        assert_eq!(
            decode_event(&bytes),
            Err(CodecError::IntegerOverflow { field: "kind" })
        );
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary(
            id in prop::array::uniform32(any::<u8>()),
            pubkey in prop::array::uniform32(any::<u8>()),
            created_at in any::<u64>(),
            kind in any::<u32>(),
            tags in prop::collection::vec(prop::collection::vec(".{0,12}", 0..4), 0..6),
            content in ".{0,64}",
        ) {
            let event = Event {
                id: EventId::from_bytes(id),
                pubkey: PublicKey::from_bytes(pubkey),
                created_at,
                kind,
                tags,
                content,
                sig: Signature::from_bytes([9u8; 64]),
            };
            let bytes = encode_event(&event).unwrap();
            prop_assert_eq!(decode_event(&bytes).unwrap(), event);
        }
    }
}

//! Wire codec for envelopes written to the outbox.
//!
//! Every attempt of a record is written to the same `<record_id>.msgpack`
//! path, so the bytes must depend only on the envelope's content. Encoding
//! goes through a JSON value with sorted keys, which makes the output
//! independent of field declaration order and of map iteration order.

use rmp_serde::{decode::Error as DecodeError, encode::Error as EncodeError};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize payload to JSON value: {0}")]
    JsonSerialize(#[source] serde_json::Error),
    #[error("failed to encode canonical messagepack: {0}")]
    MessagePackEncode(#[source] EncodeError),
    #[error("failed to decode messagepack payload: {0}")]
    MessagePackDecode(#[source] DecodeError),
    #[error("failed to deserialize decoded payload to target type: {0}")]
    JsonDeserialize(#[source] serde_json::Error),
}

/// Encodes `value` as MessagePack with map keys in sorted order, so equal
/// envelopes always produce identical bytes.
pub fn encode_canonical<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_value(value).map_err(CodecError::JsonSerialize)?;
    rmp_serde::to_vec_named(&normalize_json(json)).map_err(CodecError::MessagePackEncode)
}

pub fn decode_canonical<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    let decoded: Value = rmp_serde::from_slice(bytes).map_err(CodecError::MessagePackDecode)?;
    serde_json::from_value(decoded).map_err(CodecError::JsonDeserialize)
}

fn normalize_json(value: Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut entries: Vec<(String, Value)> = obj.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut normalized = Map::new();
            for (key, item) in entries {
                normalized.insert(key, normalize_json(item));
            }
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_json).collect()),
        primitive => primitive,
    }
}

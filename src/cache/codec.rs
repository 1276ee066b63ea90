//! JSON encoding of cache entries.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use time::OffsetDateTime;

use super::expiry::{CREATED_AT_FIELD, EXPIRES_AT_FIELD, TTL_FIELD, expiry_after, format_timestamp};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("entry must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },
}

/// Timestamps merged into every entry on write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStamp {
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub ttl_hours: u32,
}

impl EntryStamp {
    pub fn new(now: OffsetDateTime, ttl_hours: u32) -> Self {
        Self {
            created_at: now,
            expires_at: expiry_after(now, ttl_hours),
            ttl_hours,
        }
    }

    fn apply(&self, entry: &mut Map<String, Value>) {
        entry.insert(
            CREATED_AT_FIELD.to_string(),
            Value::String(format_timestamp(self.created_at)),
        );
        entry.insert(
            EXPIRES_AT_FIELD.to_string(),
            Value::String(format_timestamp(self.expires_at)),
        );
        entry.insert(TTL_FIELD.to_string(), Value::from(self.ttl_hours));
    }
}

/// Serialize `payload`, merge `stamp` and any `extra` fields, and render pretty JSON.
///
/// Stamp fields overwrite same-named payload fields.
pub fn encode_entry<T: Serialize + ?Sized>(
    payload: &T,
    stamp: &EntryStamp,
    extra: &[(&str, Value)],
) -> Result<Bytes, CodecError> {
    let mut entry = into_object(serde_json::to_value(payload)?)?;
    for (field, value) in extra {
        entry.insert((*field).to_string(), value.clone());
    }
    stamp.apply(&mut entry);
    let rendered = serde_json::to_vec_pretty(&Value::Object(entry))?;
    Ok(Bytes::from(rendered))
}

/// Parse stored bytes into a JSON object.
pub fn decode_entry(bytes: &[u8]) -> Result<Map<String, Value>, CodecError> {
    let value: Value = serde_json::from_slice(bytes)?;
    into_object(value)
}

fn into_object(value: Value) -> Result<Map<String, Value>, CodecError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(CodecError::NotAnObject {
            found: kind_of(&other),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// src/channel/codec.rs

//! Classification of [`Value`]s into slot payloads and back.

use crate::errors::{ForkpoolError, Result};
use crate::value::{Value, ValueKind};

use super::header::SlotFlags;

/// Turn `value` into payload bytes plus the flags describing them.
pub fn encode(value: &Value) -> Result<(Vec<u8>, SlotFlags)> {
    if !value.is_shareable() {
        return Err(ForkpoolError::InvalidArgument(format!(
            "unsupported result type: {}",
            value.kind()
        )));
    }

    if let Value::Array(items) = value {
        if let Some(f) = first_non_finite(items) {
            return Err(ForkpoolError::InvalidArgument(format!(
                "array holds non-finite float {f}, which cannot be serialized"
            )));
        }
    }

    let encoded = match value {
        Value::Object(obj) => (serde_json::to_vec(obj)?, SlotFlags::SERIALIZED),
        Value::Int(i) => (i.to_ne_bytes().to_vec(), SlotFlags::IS_INT | SlotFlags::PACKED),
        Value::Float(f) => (
            f.to_ne_bytes().to_vec(),
            SlotFlags::IS_FLOAT | SlotFlags::PACKED,
        ),
        Value::Array(items) => (
            serde_json::to_vec(items)?,
            SlotFlags::IS_ARRAY | SlotFlags::SERIALIZED,
        ),
        Value::Bool(b) => (vec![u8::from(*b)], SlotFlags::IS_BOOL),
        Value::Null => (vec![0], SlotFlags::IS_NULL),
        Value::Str(s) => {
            let mut bytes = Vec::with_capacity(s.len() + 1);
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
            (bytes, SlotFlags::IS_STRING)
        }
        Value::Handle(_) => unreachable!("handles are rejected above"),
    };

    Ok(encoded)
}

/// First NaN or infinite float nested anywhere in `items`.
fn first_non_finite(items: &[Value]) -> Option<f64> {
    items.iter().find_map(|item| match item {
        Value::Float(f) if !f.is_finite() => Some(*f),
        Value::Array(nested) => first_non_finite(nested),
        _ => None,
    })
}

/// Reverse [`encode`]. `id` is only used for error reporting.
pub fn decode(id: u32, payload: &[u8], flags: SlotFlags) -> Result<Value> {
    let corrupt = |reason: String| ForkpoolError::CorruptSlot { id, reason };

    let payload = if flags.contains(SlotFlags::PACKED) {
        payload
    } else {
        strip_terminator(payload)
    };

    if flags.contains(SlotFlags::IS_BOOL) {
        return Ok(Value::Bool(payload.iter().any(|b| *b != 0)));
    }

    if flags.contains(SlotFlags::IS_INT) {
        let bytes: [u8; 8] = payload
            .try_into()
            .map_err(|_| corrupt(format!("integer payload of {} bytes", payload.len())))?;
        return Ok(Value::Int(i64::from_ne_bytes(bytes)));
    }

    if flags.contains(SlotFlags::IS_FLOAT) {
        let bytes: [u8; 8] = payload
            .try_into()
            .map_err(|_| corrupt(format!("float payload of {} bytes", payload.len())))?;
        return Ok(Value::Float(f64::from_ne_bytes(bytes)));
    }

    if flags.contains(SlotFlags::IS_STRING) {
        let s = String::from_utf8(payload.to_vec())
            .map_err(|e| corrupt(format!("string payload is not utf-8: {e}")))?;
        return Ok(Value::Str(s));
    }

    if flags.contains(SlotFlags::IS_NULL) {
        return Ok(Value::Null);
    }

    if flags.contains(SlotFlags::IS_ARRAY) {
        let items: Vec<Value> = serde_json::from_slice(payload)
            .map_err(|e| corrupt(format!("array payload: {e}")))?;
        return Ok(Value::Array(items));
    }

    if flags.contains(SlotFlags::SERIALIZED) {
        let obj: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| corrupt(format!("object payload: {e}")))?;
        return Ok(Value::Object(obj));
    }

    Err(corrupt(format!(
        "no value category in flags 0x{:03x}",
        flags.bits()
    )))
}

/// Drop the single trailing NUL a writer appended to an unpacked payload.
fn strip_terminator(payload: &[u8]) -> &[u8] {
    match payload.split_last() {
        Some((0, rest)) => rest,
        _ => payload,
    }
}

/// Category a set of flags describes, if any.
pub fn kind_of(flags: SlotFlags) -> Option<ValueKind> {
    if flags.contains(SlotFlags::IS_BOOL) {
        Some(ValueKind::Bool)
    } else if flags.contains(SlotFlags::IS_INT) {
        Some(ValueKind::Int)
    } else if flags.contains(SlotFlags::IS_FLOAT) {
        Some(ValueKind::Float)
    } else if flags.contains(SlotFlags::IS_STRING) {
        Some(ValueKind::Str)
    } else if flags.contains(SlotFlags::IS_NULL) {
        Some(ValueKind::Null)
    } else if flags.contains(SlotFlags::IS_ARRAY) {
        Some(ValueKind::Array)
    } else if flags.contains(SlotFlags::SERIALIZED) {
        Some(ValueKind::Object)
    } else {
        None
    }
}

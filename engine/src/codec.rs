//! Register and set codec.
//!
//! Every scalar is stored as a register: one type tag byte followed by a
//! type-specific payload. Lists are stored as sets of independently encoded
//! registers, except boolean lists which collapse into a single register so
//! that their order survives merging.
//!
//! | tag | type         | payload                      |
//! |-----|--------------|------------------------------|
//! | 1   | integer      | decimal text                 |
//! | 2   | float        | decimal text                 |
//! | 3   | boolean      | one byte, 0 or 1             |
//! | 4   | binary       | raw bytes                    |
//! | 5   | string       | UTF-8 bytes                  |
//! | 6   | datetime     | `YYYY-MM-DDTHH:MM:SSZ`       |
//! | 7   | interval     | `Y-MM-DDTHH:MM:SSZ`          |
//! | 8   | boolean list | one byte per element, 0 or 1 |
//!
//! Decoding never fails: an unknown tag or a malformed payload yields
//! `None` and the field is dropped.

use crate::{
    error::Result, Error, FieldType, Interval, RawValue, ScalarType, Value,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::NaiveDateTime;
use std::collections::BTreeSet;

pub const TAG_INTEGER: u8 = 1;
pub const TAG_FLOAT: u8 = 2;
pub const TAG_BOOLEAN: u8 = 3;
pub const TAG_BINARY: u8 = 4;
pub const TAG_STRING: u8 = 5;
pub const TAG_DATETIME: u8 = 6;
pub const TAG_INTERVAL: u8 = 7;
pub const TAG_BOOLEAN_LIST: u8 = 8;

/// Textual datetime form, UTC with second precision.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Encode a scalar value as a register for the declared type.
///
/// `field` is only used for error reporting.
pub fn encode(field: &str, value: &Value, declared: ScalarType) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match (declared, value) {
        (ScalarType::Integer, Value::Integer(i)) => {
            out.push(TAG_INTEGER);
            out.extend_from_slice(i.to_string().as_bytes());
        }
        (ScalarType::Float, Value::Float(f)) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(f.to_string().as_bytes());
        }
        (ScalarType::Float, Value::Integer(i)) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice((*i as f64).to_string().as_bytes());
        }
        (ScalarType::Boolean, Value::Boolean(b)) => {
            out.push(TAG_BOOLEAN);
            out.push(u8::from(*b));
        }
        (ScalarType::Binary, Value::Binary(bytes)) => {
            out.push(TAG_BINARY);
            out.extend_from_slice(bytes);
        }
        (ScalarType::Binary, Value::String(s)) => {
            out.push(TAG_BINARY);
            out.extend_from_slice(s.as_bytes());
        }
        (ScalarType::String, Value::String(s)) => {
            out.push(TAG_STRING);
            out.extend_from_slice(s.as_bytes());
        }
        (ScalarType::String, Value::Binary(bytes)) => {
            let text = std::str::from_utf8(bytes).map_err(|_| Error::InvalidUtf8 {
                field: field.to_string(),
            })?;
            out.push(TAG_STRING);
            out.extend_from_slice(text.as_bytes());
        }
        (ScalarType::DateTime, Value::DateTime(dt)) => {
            out.push(TAG_DATETIME);
            out.extend_from_slice(dt.format(DATETIME_FORMAT).to_string().as_bytes());
        }
        (ScalarType::Interval, Value::Interval(interval)) => {
            out.push(TAG_INTERVAL);
            out.extend_from_slice(interval.to_string().as_bytes());
        }
        (declared, value) => return Err(mismatch(field, declared.into(), value)),
    }
    Ok(out)
}

/// Decode a register. Unknown tags and malformed payloads decode to `None`.
pub fn decode(bytes: &[u8]) -> Option<Value> {
    let (&tag, payload) = bytes.split_first()?;
    let text = || std::str::from_utf8(payload).ok();

    let value = match tag {
        TAG_INTEGER => Value::Integer(text()?.parse().ok()?),
        TAG_FLOAT => Value::Float(text()?.parse().ok()?),
        TAG_BOOLEAN => match payload {
            [0] => Value::Boolean(false),
            [1] => Value::Boolean(true),
            _ => return None,
        },
        TAG_BINARY => Value::Binary(payload.to_vec()),
        TAG_STRING => Value::String(text()?.to_string()),
        TAG_DATETIME => {
            Value::DateTime(NaiveDateTime::parse_from_str(text()?, DATETIME_FORMAT).ok()?)
        }
        TAG_INTERVAL => Value::Interval(text()?.parse::<Interval>().ok()?),
        TAG_BOOLEAN_LIST => {
            let mut flags = Vec::with_capacity(payload.len());
            for byte in payload {
                match byte {
                    0 => flags.push(Value::Boolean(false)),
                    1 => flags.push(Value::Boolean(true)),
                    _ => return None,
                }
            }
            Value::List(flags)
        }
        _ => return None,
    };
    Some(value)
}

/// Encode a list of non-boolean scalars as a set of registers.
pub fn encode_set(field: &str, values: &[Value], element: ScalarType) -> Result<BTreeSet<Vec<u8>>> {
    values
        .iter()
        .map(|value| encode(field, value, element))
        .collect()
}

/// Decode a set, dropping members that fail to decode. Order is not
/// preserved.
pub fn decode_set<'a>(members: impl IntoIterator<Item = &'a Vec<u8>>) -> Vec<Value> {
    members.into_iter().filter_map(|m| decode(m)).collect()
}

/// Encode a field value in its stored shape.
pub fn encode_field(field: &str, value: &Value, declared: FieldType) -> Result<RawValue> {
    match (declared, value) {
        (FieldType::List(ScalarType::Boolean), Value::List(items)) => {
            let mut out = Vec::with_capacity(items.len() + 1);
            out.push(TAG_BOOLEAN_LIST);
            for item in items {
                match item {
                    Value::Boolean(b) => out.push(u8::from(*b)),
                    other => return Err(mismatch(field, ScalarType::Boolean.into(), other)),
                }
            }
            Ok(RawValue::Register(out))
        }
        (FieldType::List(element), Value::List(items)) => {
            Ok(RawValue::Set(encode_set(field, items, element)?))
        }
        (FieldType::List(_), other) => Err(mismatch(field, declared, other)),
        (scalar, value) => Ok(RawValue::Register(encode(field, value, scalar.scalar())?)),
    }
}

/// Decode a stored field value. Sets always decode to lists.
pub fn decode_field(raw: &RawValue) -> Option<Value> {
    match raw {
        RawValue::Register(bytes) => decode(bytes),
        RawValue::Set(members) => Some(Value::List(decode_set(members))),
    }
}

fn mismatch(field: &str, expected: FieldType, value: &Value) -> Error {
    Error::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        got: value.type_name().to_string(),
    }
}

/// Storage-key suffix for a declared type.
///
/// The suffixes select the search index's dynamic field definitions, so the
/// index tokenizes each field according to its type.
pub fn suffix(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Integer => "_i",
        FieldType::Float => "_f",
        FieldType::Boolean => "_b",
        FieldType::String => "_s",
        FieldType::Binary => "_b64_s",
        FieldType::DateTime => "_dt",
        FieldType::Interval => "_iv_s",
        FieldType::List(ScalarType::Integer) => "_is",
        FieldType::List(ScalarType::Float) => "_fs",
        FieldType::List(ScalarType::Boolean) => "_bs",
        FieldType::List(ScalarType::String) => "_ss",
        FieldType::List(ScalarType::Binary) => "_b64_ss",
        FieldType::List(ScalarType::DateTime) => "_dts",
        FieldType::List(ScalarType::Interval) => "_iv_ss",
    }
}

/// Every suffix, longest first so that the reverse mapping prefers the most
/// specific match (`_b64_s` before `_s`).
const SUFFIXES: [(&str, FieldType); 14] = [
    ("_b64_ss", FieldType::List(ScalarType::Binary)),
    ("_b64_s", FieldType::Binary),
    ("_iv_ss", FieldType::List(ScalarType::Interval)),
    ("_iv_s", FieldType::Interval),
    ("_dts", FieldType::List(ScalarType::DateTime)),
    ("_dt", FieldType::DateTime),
    ("_is", FieldType::List(ScalarType::Integer)),
    ("_fs", FieldType::List(ScalarType::Float)),
    ("_bs", FieldType::List(ScalarType::Boolean)),
    ("_ss", FieldType::List(ScalarType::String)),
    ("_i", FieldType::Integer),
    ("_f", FieldType::Float),
    ("_b", FieldType::Boolean),
    ("_s", FieldType::String),
];

/// Map a field name to its storage key.
pub fn storage_key(field: &str, field_type: FieldType) -> String {
    format!("{}{}", field, suffix(field_type))
}

/// Map a storage key back to its field name and declared type.
pub fn parse_storage_key(key: &str) -> Option<(&str, FieldType)> {
    SUFFIXES.iter().find_map(|(suffix, field_type)| {
        key.strip_suffix(suffix)
            .filter(|name| !name.is_empty())
            .map(|name| (name, *field_type))
    })
}

/// Textual form of a scalar as the search index sees it.
pub fn search_text(value: &Value) -> String {
    match value {
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::String(s) => s.clone(),
        Value::Binary(bytes) => BASE64.encode(bytes),
        Value::DateTime(dt) => dt.format(DATETIME_FORMAT).to_string(),
        Value::Interval(interval) => interval.to_string(),
        Value::List(items) => items
            .iter()
            .map(search_text)
            .collect::<Vec<_>>()
            .join(" "),
    }
}

//! Canonical CBOR encoding for signed and hashed payloads.
//!
//! Values are first lowered to a `ciborium` [`Value`] tree through serde,
//! then written with RFC 8949 core deterministic rules:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//! - No floats
//!
//! Two replicas holding equal descriptions therefore produce identical bytes
//! and identical digests.

use ciborium::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::Digest;
use crate::error::CoreError;

/// Encode any serializable value to canonical CBOR bytes.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CoreError> {
    let value = Value::serialized(value).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    let mut buf = Vec::new();
    encode_value_to(&mut buf, &value)?;
    Ok(buf)
}

/// Decode a value from CBOR bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}

/// Domain-separated digest of a value's canonical bytes.
pub fn canonical_digest<T: Serialize + ?Sized>(context: &str, value: &T) -> Result<Digest, CoreError> {
    Ok(Digest::derive(context, &canonical_bytes(value)?))
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) -> Result<(), CoreError> {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            encode_uint(buf, 4, items.len() as u64);
            for item in items {
                encode_value_to(buf, item)?;
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries)?,
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner)?;
        }
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Null => buf.push(0xf6),
        Value::Float(_) => {
            return Err(CoreError::EncodingError(
                "floats are not allowed in canonical encoding".into(),
            ))
        }
        _ => return Err(CoreError::EncodingError("unsupported CBOR value".into())),
    }
    Ok(())
}

/// Major types 0 and 1. CBOR encodes -1 as 0, -2 as 1, etc.
///
/// Magnitudes beyond 64 bits fall back to bignum tags 2 and 3.
fn encode_integer(buf: &mut Vec<u8>, i: ciborium::value::Integer) {
    let n: i128 = i.into();
    let (major, magnitude) = if n >= 0 {
        (0, n as u128)
    } else {
        (1, (-1 - n) as u128)
    };
    match u64::try_from(magnitude) {
        Ok(small) => encode_uint(buf, major, small),
        Err(_) => {
            let bytes = magnitude.to_be_bytes();
            let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
            encode_uint(buf, 6, 2 + major as u64);
            encode_uint(buf, 2, (bytes.len() - start) as u64);
            buf.extend_from_slice(&bytes[start..]);
        }
    }
}

fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) -> Result<(), CoreError> {
    let mut pairs = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let mut key_buf = Vec::new();
        encode_value_to(&mut key_buf, key)?;
        pairs.push((key_buf, value));
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_integer_encoding() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (23, &[0x17]),
            (24, &[0x18, 0x18]),
            (255, &[0x18, 0xff]),
            (256, &[0x19, 0x01, 0x00]),
            (65536, &[0x1a, 0x00, 0x01, 0x00, 0x00]),
        ];
        for (n, expected) in cases {
            assert_eq!(canonical_bytes(n).unwrap(), *expected, "encoding {n}");
        }
    }

    #[test]
    fn test_map_key_order_independent_of_insertion() {
        let mut a = HashMap::new();
        let mut b = HashMap::new();
        for key in ["zeta", "a", "mid", "bb"] {
            a.insert(key.to_string(), key.len());
        }
        for key in ["bb", "mid", "a", "zeta"] {
            b.insert(key.to_string(), key.len());
        }
        assert_eq!(canonical_bytes(&a).unwrap(), canonical_bytes(&b).unwrap());
    }

    #[test]
    fn test_shorter_keys_sort_first() {
        let mut map = HashMap::new();
        map.insert("bb".to_string(), 1u8);
        map.insert("a".to_string(), 2u8);
        let bytes = canonical_bytes(&map).unwrap();
        // map(2), text(1) "a"
        assert_eq!(&bytes[..3], &[0xa2, 0x61, b'a']);
    }

    #[test]
    fn test_large_integers_roundtrip() {
        let value: u128 = 100 * 10u128.pow(18) + 7;
        let bytes = canonical_bytes(&value).unwrap();
        assert_eq!(decode::<u128>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_floats_rejected() {
        assert!(matches!(canonical_bytes(&1.5f64), Err(CoreError::EncodingError(_))));
    }
}

/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The self-describing codec for every value persisted in the backend key-value store.
//!
//! A single leading byte tags the value; the remaining bytes carry the payload. Integers use a
//! little-endian two's-complement form trimmed to the minimal length that preserves the logical
//! sign, with a special 9-byte payload for unsigned values beyond signed-64-bit range. Array and
//! map payloads are sequences of length-prefixed records, where lengths use a big-endian,
//! UTF-8-style continuation varint.
//!
//! Encoding is total over [TypedValue]; decoding fails on unknown tags, truncated payloads,
//! malformed varints, invalid UTF-8, and duplicate map keys. "Delete this key" is represented at
//! the store seam by the absence of a value ([encode_opt] of `None` is the empty byte string).

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_BYTES: u8 = 5;
const TAG_ARRAY: u8 = 6;
const TAG_MAP: u8 = 7;

/// A value stored at a single key in the backend.
///
/// `Uint` only ever holds values above `i64::MAX`; construct unsigned values through
/// [TypedValue::uint] so that smaller ones normalize to `Int` and codec round-trips stay exact.
/// `Float32` is the 4-byte wire form; values arriving from JSON always take the 8-byte `Float`.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float32(f32),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<TypedValue>),
    Map(HashMap<String, TypedValue>),
}

impl TypedValue {
    /// The preferred constructor for unsigned integers: values representable as `i64` become
    /// `Int`, only the remainder take the wide unsigned form.
    pub fn uint(val: u64) -> TypedValue {
        if val > i64::MAX as u64 {
            TypedValue::Uint(val)
        } else {
            TypedValue::Int(val as i64)
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            TypedValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Numeric view used by fields like `created` and `expires`. Unsigned values that do not fit
    /// in an `i64` yield `None`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TypedValue::Int(v) => Some(*v),
            TypedValue::Uint(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, TypedValue>> {
        match self {
            TypedValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_map(self) -> Option<HashMap<String, TypedValue>> {
        match self {
            TypedValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Serialize into the tagged wire form.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TypedValue::Bool(b) => vec![TAG_BOOL, u8::from(*b)],
            TypedValue::Int(v) => encode_int(*v),
            TypedValue::Uint(v) => {
                if *v > i64::MAX as u64 {
                    encode_wide_uint(*v)
                } else {
                    encode_int(*v as i64)
                }
            }
            TypedValue::Float32(f) => {
                let mut out = vec![TAG_FLOAT];
                out.extend_from_slice(&f.to_le_bytes());
                out
            }
            TypedValue::Float(f) => {
                let mut out = vec![TAG_FLOAT];
                out.extend_from_slice(&f.to_le_bytes());
                out
            }
            TypedValue::String(s) => {
                let mut out = vec![TAG_STRING];
                out.extend_from_slice(s.as_bytes());
                out
            }
            TypedValue::Bytes(b) => {
                let mut out = vec![TAG_BYTES];
                out.extend_from_slice(b);
                out
            }
            TypedValue::Array(items) => {
                let mut out = vec![TAG_ARRAY];
                for item in items {
                    let entry = item.encode();
                    out.extend_from_slice(&write_varint(entry.len() as u64));
                    out.extend_from_slice(&entry);
                }
                out
            }
            TypedValue::Map(entries) => {
                let mut out = vec![TAG_MAP];
                for (key, value) in entries {
                    let entry = value.encode();
                    out.extend_from_slice(&write_varint(key.len() as u64));
                    out.extend_from_slice(key.as_bytes());
                    out.extend_from_slice(&write_varint(entry.len() as u64));
                    out.extend_from_slice(&entry);
                }
                out
            }
        }
    }

    /// Deserialize from the tagged wire form.
    pub fn decode(bytes: &[u8]) -> Result<TypedValue, CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let tag = bytes[0];
        let payload = &bytes[1..];
        match tag {
            TAG_BOOL => {
                if payload.is_empty() {
                    return Err(CodecError::ShortInput { tag });
                }
                Ok(TypedValue::Bool(payload[0] != 0))
            }
            TAG_INT => decode_int(payload),
            TAG_FLOAT => match payload.len() {
                4 => Ok(TypedValue::Float32(f32::from_le_bytes(
                    payload.try_into().unwrap(),
                ))),
                8 => Ok(TypedValue::Float(f64::from_le_bytes(
                    payload.try_into().unwrap(),
                ))),
                len => Err(CodecError::UnexpectedLength { tag, len }),
            },
            TAG_STRING => match String::from_utf8(payload.to_vec()) {
                Ok(s) => Ok(TypedValue::String(s)),
                Err(_) => Err(CodecError::InvalidUtf8),
            },
            TAG_BYTES => Ok(TypedValue::Bytes(payload.to_vec())),
            TAG_ARRAY => {
                let mut items = Vec::new();
                let mut remain = payload;
                while !remain.is_empty() {
                    let (entry_len, len_size) = read_varint(remain)?;
                    let entry_len = entry_len as usize;
                    if remain.len() < len_size + entry_len {
                        return Err(CodecError::TruncatedElement);
                    }
                    items.push(TypedValue::decode(&remain[len_size..len_size + entry_len])?);
                    remain = &remain[len_size + entry_len..];
                }
                Ok(TypedValue::Array(items))
            }
            TAG_MAP => {
                let mut entries = HashMap::new();
                let mut remain = payload;
                while !remain.is_empty() {
                    let (key_len, len_size) = read_varint(remain)?;
                    let key_len = key_len as usize;
                    if remain.len() < len_size + key_len {
                        return Err(CodecError::TruncatedElement);
                    }
                    let key = match String::from_utf8(remain[len_size..len_size + key_len].to_vec())
                    {
                        Ok(k) => k,
                        Err(_) => return Err(CodecError::InvalidUtf8),
                    };
                    remain = &remain[len_size + key_len..];

                    let (value_len, len_size) = read_varint(remain)?;
                    let value_len = value_len as usize;
                    if remain.len() < len_size + value_len {
                        return Err(CodecError::TruncatedElement);
                    }
                    let value = TypedValue::decode(&remain[len_size..len_size + value_len])?;
                    remain = &remain[len_size + value_len..];

                    if entries.insert(key.clone(), value).is_some() {
                        return Err(CodecError::DuplicateMapKey { key });
                    }
                }
                Ok(TypedValue::Map(entries))
            }
            _ => Err(CodecError::UnknownTag { tag }),
        }
    }
}

/// Encode an optional value, where `None` is the "delete this key" tombstone: the empty byte
/// string.
pub fn encode_opt(value: Option<&TypedValue>) -> Vec<u8> {
    match value {
        Some(v) => v.encode(),
        None => Vec::new(),
    }
}

fn encode_int(val: i64) -> Vec<u8> {
    let bits = val.to_le_bytes();
    let mut len = bits.len();
    // Trim sign-extension bytes: the top remaining byte must still carry the logical sign.
    while len > 1
        && ((bits[len - 1] == 0x00 && bits[len - 2] < 0x80)
            || (bits[len - 1] == 0xFF && bits[len - 2] >= 0x80))
    {
        len -= 1;
    }
    let mut out = vec![TAG_INT];
    out.extend_from_slice(&bits[..len]);
    out
}

fn encode_wide_uint(val: u64) -> Vec<u8> {
    let mut out = vec![TAG_INT];
    out.extend_from_slice(&val.to_le_bytes());
    out.push(0x00);
    out
}

fn decode_int(payload: &[u8]) -> Result<TypedValue, CodecError> {
    match payload.len() {
        9 => {
            // The trailing 0x00 disambiguator marks an unsigned 64-bit value.
            let val = u64::from_le_bytes(payload[..8].try_into().unwrap());
            Ok(TypedValue::uint(val))
        }
        1..=8 => {
            let fill = if payload[payload.len() - 1] >= 0x80 {
                0xFF
            } else {
                0x00
            };
            let mut bits = [fill; 8];
            bits[..payload.len()].copy_from_slice(payload);
            Ok(TypedValue::Int(i64::from_le_bytes(bits)))
        }
        len => Err(CodecError::UnexpectedLength { tag: TAG_INT, len }),
    }
}

/// Read a varint from the front of `src`, returning the value and the number of bytes consumed.
///
/// The coding is UTF-8-style: the leading byte's high-bit prefix selects the total size (1 to 6
/// bytes) and contributes the high-order value bits; each continuation byte must carry the `10`
/// prefix and contributes its low 6 bits.
pub fn read_varint(src: &[u8]) -> Result<(u64, usize), CodecError> {
    if src.is_empty() {
        return Err(CodecError::MalformedVarint);
    }
    let c = src[0];
    if c < 0x80 {
        return Ok((u64::from(c), 1));
    }
    if c < 0b1100_0000 {
        // unexpected continuation byte
        return Err(CodecError::MalformedVarint);
    }
    let (size, mut result) = if c < 0b1110_0000 {
        (1, u64::from(c & 0b0001_1111))
    } else if c < 0b1111_0000 {
        (2, u64::from(c & 0b0000_1111))
    } else if c < 0b1111_1000 {
        (3, u64::from(c & 0b0000_0111))
    } else if c < 0b1111_1100 {
        (4, u64::from(c & 0b0000_0011))
    } else if c < 0b1111_1110 {
        (5, u64::from(c & 0b0000_0001))
    } else {
        (6, 0)
    };
    if src.len() < size + 1 {
        return Err(CodecError::MalformedVarint);
    }
    for idx in 0..size {
        let c = src[idx + 1];
        if c & 0b1100_0000 != 0b1000_0000 {
            // this isn't a continuation byte
            return Err(CodecError::MalformedVarint);
        }
        result = result << 6 | u64::from(c & 0b0011_1111);
    }
    Ok((result, size + 1))
}

/// Write a varint. Values must be below 2^36 (six bytes of coding space); lengths in this crate
/// never approach that bound.
pub fn write_varint(val: u64) -> Vec<u8> {
    debug_assert!(val < 1 << 36);
    if val < 0x80 {
        return vec![val as u8];
    }
    let (size, first) = if val < 0x0000_0800 {
        (1, ((val & 0x0000_07C0) >> 6) as u8 | 0b1100_0000)
    } else if val < 0x0001_0000 {
        (2, ((val & 0x0000_F000) >> 12) as u8 | 0b1110_0000)
    } else if val < 0x0020_0000 {
        (3, ((val & 0x001C_0000) >> 18) as u8 | 0b1111_0000)
    } else if val < 0x0400_0000 {
        (4, ((val & 0x0300_0000) >> 24) as u8 | 0b1111_1000)
    } else if val < 0x8000_0000 {
        (5, ((val & 0x4000_0000) >> 30) as u8 | 0b1111_1100)
    } else {
        (6, 0b1111_1110)
    };
    let mut result = vec![0u8; size + 1];
    let mut val = val;
    for idx in 0..size {
        result[size - idx] = (val & 0b0011_1111) as u8 | 0b1000_0000;
        val >>= 6;
    }
    result[0] = first;
    result
}

/// Error when translating between [TypedValue] and its wire form.
#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    EmptyInput,
    ShortInput { tag: u8 },
    UnknownTag { tag: u8 },
    UnexpectedLength { tag: u8, len: usize },
    MalformedVarint,
    TruncatedElement,
    InvalidUtf8,
    DuplicateMapKey { key: String },
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::EmptyInput => write!(f, "cannot interpret empty value"),
            CodecError::ShortInput { tag } => write!(f, "value with tag {} is too short", tag),
            CodecError::UnknownTag { tag } => write!(f, "unexpected datatype: {}", tag),
            CodecError::UnexpectedLength { tag, len } => {
                write!(f, "unexpected data length {} for tag {}", len, tag)
            }
            CodecError::MalformedVarint => write!(f, "malformed length prefix"),
            CodecError::TruncatedElement => write!(f, "element extends past end of payload"),
            CodecError::InvalidUtf8 => write!(f, "invalid UTF-8 in value"),
            CodecError::DuplicateMapKey { key } => write!(f, "duplicate map key {}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: TypedValue) {
        let encoded = value.encode();
        assert_eq!(TypedValue::decode(&encoded).unwrap(), value);
    }

    #[test]
    fn encodes_ints_minimally() {
        assert_eq!(TypedValue::Int(127).encode(), vec![0x02, 0x7F]);
        assert_eq!(TypedValue::Int(128).encode(), vec![0x02, 0x80, 0x00]);
        assert_eq!(TypedValue::Int(-1).encode(), vec![0x02, 0xFF]);
        assert_eq!(TypedValue::Int(-129).encode(), vec![0x02, 0x7F, 0xFF]);
        assert_eq!(TypedValue::Int(0).encode(), vec![0x02, 0x00]);
    }

    #[test]
    fn encodes_wide_uints_with_disambiguator() {
        let encoded = TypedValue::uint(1 << 63).encode();
        assert_eq!(encoded.len(), 10);
        assert_eq!(encoded[0], 0x02);
        assert_eq!(encoded[9], 0x00);
        assert_eq!(
            TypedValue::decode(&encoded).unwrap(),
            TypedValue::Uint(1 << 63)
        );
    }

    #[test]
    fn uint_constructor_normalizes_small_values() {
        assert_eq!(TypedValue::uint(42), TypedValue::Int(42));
        assert_eq!(TypedValue::uint(u64::MAX), TypedValue::Uint(u64::MAX));
    }

    #[test]
    fn round_trips_scalars() {
        round_trip(TypedValue::Bool(true));
        round_trip(TypedValue::Bool(false));
        round_trip(TypedValue::Int(0));
        round_trip(TypedValue::Int(i64::MIN));
        round_trip(TypedValue::Int(i64::MAX));
        round_trip(TypedValue::Uint(u64::MAX));
        round_trip(TypedValue::Float32(1.5));
        round_trip(TypedValue::Float(-2.25e10));
        round_trip(TypedValue::String("user/alice".to_owned()));
        round_trip(TypedValue::String(String::new()));
        round_trip(TypedValue::Bytes(vec![0, 1, 2, 0xFF]));
    }

    #[test]
    fn round_trips_composites() {
        round_trip(TypedValue::Array(vec![
            TypedValue::Int(1),
            TypedValue::String("two".to_owned()),
            TypedValue::Array(vec![TypedValue::Bool(false)]),
        ]));

        let mut map = HashMap::new();
        map.insert("pubKey".to_owned(), TypedValue::Bytes(vec![9; 32]));
        map.insert("created".to_owned(), TypedValue::Int(7));
        map.insert(
            "nested".to_owned(),
            TypedValue::Map(HashMap::from([(
                "x".to_owned(),
                TypedValue::Float(0.5),
            )])),
        );
        round_trip(TypedValue::Map(map));
        round_trip(TypedValue::Map(HashMap::new()));
        round_trip(TypedValue::Array(Vec::new()));
    }

    #[test]
    fn varint_round_trips_boundaries() {
        for val in [
            0u64,
            1,
            0x7F,
            1 << 7,
            (1 << 11) - 1,
            1 << 11,
            1 << 16,
            1 << 21,
            1 << 26,
            1 << 31,
            (1 << 36) - 1,
        ] {
            let encoded = write_varint(val);
            assert_eq!(read_varint(&encoded).unwrap(), (val, encoded.len()));
        }
    }

    #[test]
    fn varint_rejects_bare_continuation() {
        assert_eq!(read_varint(&[0x80]), Err(CodecError::MalformedVarint));
        assert_eq!(
            read_varint(&[0b1100_0001, 0x00]),
            Err(CodecError::MalformedVarint)
        );
        assert_eq!(read_varint(&[0b1100_0001]), Err(CodecError::MalformedVarint));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(TypedValue::decode(&[]), Err(CodecError::EmptyInput));
        assert_eq!(
            TypedValue::decode(&[TAG_BOOL]),
            Err(CodecError::ShortInput { tag: TAG_BOOL })
        );
        assert_eq!(
            TypedValue::decode(&[42, 0]),
            Err(CodecError::UnknownTag { tag: 42 })
        );
        assert_eq!(
            TypedValue::decode(&[TAG_INT]),
            Err(CodecError::UnexpectedLength { tag: TAG_INT, len: 0 })
        );
        assert_eq!(
            TypedValue::decode(&[TAG_FLOAT, 0, 0]),
            Err(CodecError::UnexpectedLength { tag: TAG_FLOAT, len: 2 })
        );
        // array element length runs past the payload
        assert_eq!(
            TypedValue::decode(&[TAG_ARRAY, 0x05, 0x02]),
            Err(CodecError::TruncatedElement)
        );
    }

    #[test]
    fn rejects_duplicate_map_keys() {
        let entry = TypedValue::Int(1).encode();
        let mut bytes = vec![TAG_MAP];
        for _ in 0..2 {
            bytes.extend_from_slice(&write_varint(1));
            bytes.push(b'a');
            bytes.extend_from_slice(&write_varint(entry.len() as u64));
            bytes.extend_from_slice(&entry);
        }
        assert_eq!(
            TypedValue::decode(&bytes),
            Err(CodecError::DuplicateMapKey {
                key: "a".to_owned()
            })
        );
    }

    #[test]
    fn narrow_int_payloads_sign_extend() {
        assert_eq!(
            TypedValue::decode(&[TAG_INT, 0xFF, 0xFF]).unwrap(),
            TypedValue::Int(-1)
        );
        assert_eq!(
            TypedValue::decode(&[TAG_INT, 0x00, 0x00, 0x00, 0x80]).unwrap(),
            TypedValue::Int(i32::MIN as i64)
        );
        // eight-byte payload, decodes as signed
        assert_eq!(
            TypedValue::decode(&[TAG_INT, 0, 0, 0, 0, 0, 0, 0, 0x80]).unwrap(),
            TypedValue::Int(i64::MIN)
        );
    }
}

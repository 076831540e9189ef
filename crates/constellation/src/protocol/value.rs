// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration value model shared by CSCP payloads and controller configs.
//!
//! A `Dictionary` is the unit of satellite configuration: string keys mapped
//! to scalar, list or nested-dictionary values. Values encode to MessagePack
//! for the wire and stringify for command-registry arguments.

use super::msgpack;
use super::DecodeError;
use std::collections::BTreeMap;
use std::fmt;

/// Dynamically typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(List),
    Map(Dictionary),
}

/// Ordered key/value dictionary (case handling is the caller's concern).
pub type Dictionary = BTreeMap<String, Value>;

/// Value list, used for command arguments.
pub type List = Vec<Value>;

impl Value {
    /// Encode this value onto a MessagePack buffer.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Bool(v) => msgpack::write_bool(buf, *v),
            Value::Int(v) => msgpack::write_int(buf, *v),
            Value::Float(v) => msgpack::write_f64(buf, *v),
            Value::Str(v) => msgpack::write_str(buf, v),
            Value::List(items) => {
                msgpack::write_array_len(buf, items.len());
                for item in items {
                    item.encode(buf);
                }
            }
            Value::Map(dict) => encode_dictionary(buf, dict),
        }
    }

    /// Decode a single value from the reader, dispatching on the marker byte.
    pub fn decode(rd: &mut msgpack::Reader<'_>) -> Result<Self, DecodeError> {
        let marker = rd.peek_marker()?;
        match marker {
            0xc2 | 0xc3 => Ok(Value::Bool(rd.read_bool()?)),
            0x00..=0x7f | 0xe0..=0xff | 0xcc..=0xcf | 0xd0..=0xd3 => Ok(Value::Int(rd.read_int()?)),
            0xca | 0xcb => Ok(Value::Float(rd.read_f64()?)),
            0xa0..=0xbf | 0xd9..=0xdb => Ok(Value::Str(rd.read_str()?)),
            0x90..=0x9f | 0xdc | 0xdd => {
                let len = rd.read_array_len()?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(Value::decode(rd)?);
                }
                Ok(Value::List(items))
            }
            0x80..=0x8f | 0xde | 0xdf => Ok(Value::Map(decode_dictionary_inner(rd)?)),
            _ => Err(DecodeError::UnexpectedMarker(marker)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{}", v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(dict) => {
                write!(f, "{{")?;
                for (i, (key, value)) in dict.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Encode a dictionary as a MessagePack map.
pub fn encode_dictionary(buf: &mut Vec<u8>, dict: &Dictionary) {
    msgpack::write_map_len(buf, dict.len());
    for (key, value) in dict {
        msgpack::write_str(buf, key);
        value.encode(buf);
    }
}

/// Decode a MessagePack map into a dictionary.
pub fn decode_dictionary(bytes: &[u8]) -> Result<Dictionary, DecodeError> {
    let mut rd = msgpack::Reader::new(bytes);
    let dict = decode_dictionary_inner(&mut rd)?;
    if rd.remaining() != 0 {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(dict)
}

fn decode_dictionary_inner(rd: &mut msgpack::Reader<'_>) -> Result<Dictionary, DecodeError> {
    let len = rd.read_map_len()?;
    let mut dict = Dictionary::new();
    for _ in 0..len {
        let key = rd.read_str()?;
        let value = Value::decode(rd)?;
        dict.insert(key, value);
    }
    Ok(dict)
}

/// Encode a list as a MessagePack array.
pub fn encode_list(buf: &mut Vec<u8>, list: &List) {
    msgpack::write_array_len(buf, list.len());
    for item in list {
        item.encode(buf);
    }
}

/// Decode a MessagePack array into a list.
pub fn decode_list(bytes: &[u8]) -> Result<List, DecodeError> {
    let mut rd = msgpack::Reader::new(bytes);
    let len = rd.read_array_len()?;
    let mut list = Vec::with_capacity(len);
    for _ in 0..len {
        list.push(Value::decode(&mut rd)?);
    }
    if rd.remaining() != 0 {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(list)
}

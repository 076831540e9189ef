// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire formats of the three control-plane protocols.
//!
//! - [`chirp`]: fixed-size UDP discovery beacons
//! - [`cscp`]: command/response messages (MessagePack multipart)
//! - [`chp`]: heartbeat publications (MessagePack multipart)
//!
//! Codecs here are pure: no sockets, no threads. Decode failures never
//! panic; callers drop bad datagrams and log at debug level.

pub mod chirp;
pub mod chp;
pub mod cscp;
pub(crate) mod msgpack;
pub mod value;

pub use chirp::{
    ChirpMessage, ChirpMessageType, Md5Hash, ServiceIdentifier, CHIRP_MESSAGE_LENGTH,
};
pub use chp::ChpMessage;
pub use cscp::{CscpKind, CscpMessage, CscpPayload, State};
pub use value::{Dictionary, List, Value};

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating at zero for pre-epoch clocks.
pub(crate) fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Errors raised while decoding received control-plane bytes.
///
/// These never propagate past the receiving loop: malformed input is dropped
/// and logged, per the control-plane error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram length does not match the fixed message size.
    Length { expected: usize, got: usize },
    /// Magic prefix mismatch.
    BadMagic,
    /// Unsupported protocol version byte.
    BadVersion(u8),
    /// Message type byte out of range.
    MessageType(u8),
    /// Service identifier byte out of range.
    ServiceId(u8),
    /// Unexpected number of frames in a multipart message.
    FrameCount(usize),
    /// Header frame malformed.
    Header(&'static str),
    /// Protocol tag does not match the expected protocol.
    ProtocolTag(String),
    /// Message kind value out of range.
    Kind(u64),
    /// State code value out of range.
    StateCode(u64),
    /// MessagePack marker not valid at this position.
    UnexpectedMarker(u8),
    /// Input ended inside a value.
    Truncated,
    /// Bytes left over after the last expected value.
    TrailingBytes,
    /// Integer does not fit the target type.
    IntegerRange,
    /// String bytes are not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Length { expected, got } => {
                write!(f, "Message length is not {} bytes (got {})", expected, got)
            }
            DecodeError::BadMagic => write!(f, "Not a CHIRP broadcast"),
            DecodeError::BadVersion(v) => write!(f, "Unsupported protocol version {}", v),
            DecodeError::MessageType(v) => write!(f, "Message type {} invalid", v),
            DecodeError::ServiceId(v) => write!(f, "Service identifier {} invalid", v),
            DecodeError::FrameCount(n) => write!(f, "Incorrect number of message frames ({})", n),
            DecodeError::Header(msg) => write!(f, "Malformed header: {}", msg),
            DecodeError::ProtocolTag(tag) => write!(f, "Unexpected protocol tag {:?}", tag),
            DecodeError::Kind(v) => write!(f, "Message kind {} invalid", v),
            DecodeError::StateCode(v) => write!(f, "State code {:#x} invalid", v),
            DecodeError::UnexpectedMarker(m) => write!(f, "Unexpected MessagePack marker {:#04x}", m),
            DecodeError::Truncated => write!(f, "Input truncated"),
            DecodeError::TrailingBytes => write!(f, "Trailing bytes after value"),
            DecodeError::IntegerRange => write!(f, "Integer out of range"),
            DecodeError::InvalidUtf8 => write!(f, "Invalid UTF-8 in string"),
        }
    }
}

impl std::error::Error for DecodeError {}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSCP command/response message type and framing.
//!
//! A CSCP message is a multipart frame sequence:
//! 1. Header frame: MessagePack array `["CSCP1", sender, timestamp_ms, tags]`
//! 2. Verb frame: MessagePack array `[kind, verb]`
//! 3. Optional payload frame: MessagePack dictionary, list or string
//!
//! Replies reuse the same framing with a response kind and a human-readable
//! message in the verb slot.

use super::msgpack;
use super::value::{self, Dictionary, List};
use super::DecodeError;
use std::fmt;

/// Protocol tag carried in the header frame.
pub const CSCP_PROTOCOL_TAG: &str = "CSCP1";

/// Satellite finite-state-machine state.
///
/// Steady states are uppercase on the wire, transient states lowercase. The
/// byte codes order steady states NEW < INIT < ORBIT < RUN < SAFE < ERROR so
/// that "lowest state" queries reduce to a `min()` on the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum State {
    New = 0x10,
    Initializing = 0x12,
    Init = 0x20,
    Launching = 0x23,
    Landing = 0x24,
    Reconfiguring = 0x25,
    Orbit = 0x30,
    Starting = 0x32,
    Run = 0x40,
    Stopping = 0x42,
    Interrupting = 0xC2,
    Safe = 0xE0,
    Error = 0xF0,
}

impl State {
    /// True for externally observable steady states.
    pub fn is_steady(self) -> bool {
        matches!(
            self,
            State::New | State::Init | State::Orbit | State::Run | State::Safe | State::Error
        )
    }

    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(State::New),
            0x12 => Some(State::Initializing),
            0x20 => Some(State::Init),
            0x23 => Some(State::Launching),
            0x24 => Some(State::Landing),
            0x25 => Some(State::Reconfiguring),
            0x30 => Some(State::Orbit),
            0x32 => Some(State::Starting),
            0x40 => Some(State::Run),
            0x42 => Some(State::Stopping),
            0xC2 => Some(State::Interrupting),
            0xE0 => Some(State::Safe),
            0xF0 => Some(State::Error),
            _ => None,
        }
    }

    /// Canonical wire label.
    pub fn label(self) -> &'static str {
        match self {
            State::New => "NEW",
            State::Initializing => "initializing",
            State::Init => "INIT",
            State::Launching => "launching",
            State::Landing => "landing",
            State::Reconfiguring => "reconfiguring",
            State::Orbit => "ORBIT",
            State::Starting => "starting",
            State::Run => "RUN",
            State::Stopping => "stopping",
            State::Interrupting => "interrupting",
            State::Safe => "SAFE",
            State::Error => "ERROR",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// CSCP message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CscpKind {
    /// Command request (controller to satellite).
    Request = 0,
    /// Command executed successfully.
    Success = 1,
    /// Command is valid but not implemented.
    NotImplemented = 2,
    /// Command is valid but mandatory payload information is missing.
    Incomplete = 3,
    /// Command is invalid in the current state.
    Invalid = 4,
    /// Command is unknown.
    Unknown = 5,
    /// Previously received message is invalid.
    Error = 6,
}

impl CscpKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CscpKind::Request),
            1 => Some(CscpKind::Success),
            2 => Some(CscpKind::NotImplemented),
            3 => Some(CscpKind::Incomplete),
            4 => Some(CscpKind::Invalid),
            5 => Some(CscpKind::Unknown),
            6 => Some(CscpKind::Error),
            _ => None,
        }
    }
}

/// Optional CSCP payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CscpPayload {
    None,
    Dictionary(Dictionary),
    List(List),
    Str(String),
}

impl CscpPayload {
    pub fn is_none(&self) -> bool {
        matches!(self, CscpPayload::None)
    }
}

/// A CSCP request or reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CscpMessage {
    pub kind: CscpKind,
    /// Command verb on requests, human-readable message on replies.
    pub verb: String,
    pub sender: String,
    /// Milliseconds since the Unix epoch.
    pub time_ms: u64,
    pub tags: Dictionary,
    pub payload: CscpPayload,
}

impl CscpMessage {
    /// Build a command request.
    pub fn request(sender: &str, verb: &str, payload: CscpPayload) -> Self {
        Self {
            kind: CscpKind::Request,
            verb: verb.to_string(),
            sender: sender.to_string(),
            time_ms: super::unix_time_ms(),
            tags: Dictionary::new(),
            payload,
        }
    }

    /// Build a reply with the given kind and message.
    pub fn reply(sender: &str, kind: CscpKind, message: &str, payload: CscpPayload) -> Self {
        Self {
            kind,
            verb: message.to_string(),
            sender: sender.to_string(),
            time_ms: super::unix_time_ms(),
            tags: Dictionary::new(),
            payload,
        }
    }

    /// Assemble the multipart frame sequence.
    pub fn assemble(&self) -> Vec<Vec<u8>> {
        let mut header = Vec::with_capacity(64);
        msgpack::write_array_len(&mut header, 4);
        msgpack::write_str(&mut header, CSCP_PROTOCOL_TAG);
        msgpack::write_str(&mut header, &self.sender);
        msgpack::write_uint(&mut header, self.time_ms);
        value::encode_dictionary(&mut header, &self.tags);

        let mut body = Vec::with_capacity(32);
        msgpack::write_array_len(&mut body, 2);
        msgpack::write_uint(&mut body, u64::from(self.kind as u8));
        msgpack::write_str(&mut body, &self.verb);

        let mut frames = vec![header, body];
        match &self.payload {
            CscpPayload::None => {}
            CscpPayload::Dictionary(dict) => {
                let mut buf = Vec::new();
                value::encode_dictionary(&mut buf, dict);
                frames.push(buf);
            }
            CscpPayload::List(list) => {
                let mut buf = Vec::new();
                value::encode_list(&mut buf, list);
                frames.push(buf);
            }
            CscpPayload::Str(text) => {
                let mut buf = Vec::new();
                msgpack::write_str(&mut buf, text);
                frames.push(buf);
            }
        }
        frames
    }

    /// Disassemble a received multipart frame sequence.
    pub fn disassemble(frames: &[Vec<u8>]) -> Result<Self, DecodeError> {
        if frames.len() < 2 || frames.len() > 3 {
            return Err(DecodeError::FrameCount(frames.len()));
        }

        let mut header = msgpack::Reader::new(&frames[0]);
        let fields = header.read_array_len()?;
        if fields < 4 {
            return Err(DecodeError::Header("header array too short"));
        }
        let tag = header.read_str()?;
        if tag != CSCP_PROTOCOL_TAG {
            return Err(DecodeError::ProtocolTag(tag));
        }
        let sender = header.read_str()?;
        let time_ms = header.read_uint()?;
        let tags = read_tags_map(&mut header)?;

        let mut body = msgpack::Reader::new(&frames[1]);
        let fields = body.read_array_len()?;
        if fields < 2 {
            return Err(DecodeError::Header("verb array too short"));
        }
        let raw_kind = body.read_uint()?;
        let kind = u8::try_from(raw_kind)
            .ok()
            .and_then(CscpKind::from_u8)
            .ok_or(DecodeError::Kind(raw_kind))?;
        let verb = body.read_str()?;

        let payload = match frames.get(2) {
            None => CscpPayload::None,
            Some(frame) => decode_payload(frame)?,
        };

        Ok(Self {
            kind,
            verb,
            sender,
            time_ms,
            tags,
            payload,
        })
    }
}

/// Decode a payload frame by its leading marker: map, array or string.
fn decode_payload(frame: &[u8]) -> Result<CscpPayload, DecodeError> {
    let mut rd = msgpack::Reader::new(frame);
    let marker = rd.peek_marker()?;
    match marker {
        0x80..=0x8f | 0xde | 0xdf => Ok(CscpPayload::Dictionary(value::decode_dictionary(frame)?)),
        0x90..=0x9f | 0xdc | 0xdd => Ok(CscpPayload::List(value::decode_list(frame)?)),
        0xa0..=0xbf | 0xd9..=0xdb => Ok(CscpPayload::Str(rd.read_str()?)),
        _ => Err(DecodeError::UnexpectedMarker(marker)),
    }
}

fn read_tags_map(rd: &mut msgpack::Reader<'_>) -> Result<Dictionary, DecodeError> {
    let len = rd.read_map_len()?;
    let mut dict = Dictionary::new();
    for _ in 0..len {
        let key = rd.read_str()?;
        let val = super::value::Value::decode(rd)?;
        dict.insert(key, val);
    }
    Ok(dict)
}

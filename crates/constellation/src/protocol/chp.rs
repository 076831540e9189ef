// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHP heartbeat message framing.
//!
//! Two frames per publication: a header frame shaped like the CSCP header
//! (tag `"CHP1"`) and a body frame `[state, interval_ms]`.

use super::cscp::State;
use super::msgpack;
use super::value::{self, Dictionary};
use super::DecodeError;

/// Protocol tag carried in the header frame.
pub const CHP_PROTOCOL_TAG: &str = "CHP1";

/// A single heartbeat publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChpMessage {
    /// Canonical name of the publishing satellite.
    pub sender: String,
    /// Milliseconds since the Unix epoch at send time.
    pub time_ms: u64,
    /// FSM state reported by the sender.
    pub state: State,
    /// Hint when the next heartbeat is due, in milliseconds.
    pub interval_ms: u32,
}

impl ChpMessage {
    pub fn new(sender: &str, state: State, interval_ms: u32) -> Self {
        Self {
            sender: sender.to_string(),
            time_ms: super::unix_time_ms(),
            state,
            interval_ms,
        }
    }

    /// Assemble header and body frames.
    pub fn assemble(&self) -> Vec<Vec<u8>> {
        let mut header = Vec::with_capacity(48);
        msgpack::write_array_len(&mut header, 4);
        msgpack::write_str(&mut header, CHP_PROTOCOL_TAG);
        msgpack::write_str(&mut header, &self.sender);
        msgpack::write_uint(&mut header, self.time_ms);
        value::encode_dictionary(&mut header, &Dictionary::new());

        let mut body = Vec::with_capacity(8);
        msgpack::write_array_len(&mut body, 2);
        msgpack::write_uint(&mut body, u64::from(self.state as u8));
        msgpack::write_uint(&mut body, u64::from(self.interval_ms));

        vec![header, body]
    }

    /// Disassemble a received frame sequence.
    pub fn disassemble(frames: &[Vec<u8>]) -> Result<Self, DecodeError> {
        if frames.len() != 2 {
            return Err(DecodeError::FrameCount(frames.len()));
        }

        let mut header = msgpack::Reader::new(&frames[0]);
        let fields = header.read_array_len()?;
        if fields < 4 {
            return Err(DecodeError::Header("header array too short"));
        }
        let tag = header.read_str()?;
        if tag != CHP_PROTOCOL_TAG {
            return Err(DecodeError::ProtocolTag(tag));
        }
        let sender = header.read_str()?;
        let time_ms = header.read_uint()?;

        let mut body = msgpack::Reader::new(&frames[1]);
        let fields = body.read_array_len()?;
        if fields < 2 {
            return Err(DecodeError::Header("heartbeat body too short"));
        }
        let raw_state = body.read_uint()?;
        let state = u8::try_from(raw_state)
            .ok()
            .and_then(State::from_u8)
            .ok_or(DecodeError::StateCode(raw_state))?;
        let interval_ms =
            u32::try_from(body.read_uint()?).map_err(|_| DecodeError::IntegerRange)?;

        Ok(Self {
            sender,
            time_ms,
            state,
            interval_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_roundtrip() {
        let msg = ChpMessage::new("cam.top", State::Orbit, 1000);
        let frames = msg.assemble();
        assert_eq!(frames.len(), 2);
        let decoded = ChpMessage::disassemble(&frames).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_transient_state_on_the_wire() {
        let msg = ChpMessage::new("cam.top", State::Launching, 500);
        let decoded = ChpMessage::disassemble(&msg.assemble()).unwrap();
        assert_eq!(decoded.state, State::Launching);
    }

    #[test]
    fn test_rejects_wrong_tag() {
        let cscp = crate::protocol::CscpMessage::request(
            "cam.top",
            "get_state",
            crate::protocol::CscpPayload::None,
        );
        let frames = cscp.assemble();
        assert!(matches!(
            ChpMessage::disassemble(&frames),
            Err(DecodeError::ProtocolTag(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_state_code() {
        let msg = ChpMessage::new("cam.top", State::Run, 1000);
        let mut frames = msg.assemble();
        let mut body = Vec::new();
        crate::protocol::msgpack::write_array_len(&mut body, 2);
        crate::protocol::msgpack::write_uint(&mut body, 0x99);
        crate::protocol::msgpack::write_uint(&mut body, 1000);
        frames[1] = body;
        assert!(matches!(
            ChpMessage::disassemble(&frames),
            Err(DecodeError::StateCode(0x99))
        ));
    }

    #[test]
    fn test_rejects_frame_count() {
        let msg = ChpMessage::new("cam.top", State::Run, 1000);
        let frames = msg.assemble();
        assert!(ChpMessage::disassemble(&frames[..1]).is_err());
    }
}

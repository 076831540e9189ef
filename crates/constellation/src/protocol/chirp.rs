// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHIRP beacon wire format.
//!
//! Fixed 42-byte UDP broadcast message:
//!
//! ```text
//! +-------+---------+----------+---------------+--------------+------------+-----------+
//! | CHIRP | version | msg_type | group_id (16) | host_id (16) | service_id | port (LE) |
//! |  5 B  |   1 B   |   1 B    |     16 B      |     16 B     |    1 B     |    2 B    |
//! +-------+---------+----------+---------------+--------------+------------+-----------+
//! ```
//!
//! Group and host identifiers are MD5 digests of their UTF-8 names.

use super::DecodeError;
use md5::{Digest, Md5};
use std::fmt;

/// Protocol magic prefix.
pub const CHIRP_MAGIC: &[u8; 5] = b"CHIRP";
/// Protocol version byte.
pub const CHIRP_VERSION: u8 = 1;
/// Fixed beacon length in bytes.
pub const CHIRP_MESSAGE_LENGTH: usize = 42;

/// 16-byte MD5 digest identifying a group or a host.
///
/// Equality and ordering are byte-lexicographic.
///
/// # Examples
/// ```
/// use constellation::protocol::Md5Hash;
///
/// let id = Md5Hash::from_name("edda");
/// assert_eq!(id.to_string().len(), 32);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Md5Hash([u8; 16]);

impl Md5Hash {
    /// Hash a UTF-8 name into an identifier.
    pub fn from_name(name: &str) -> Self {
        let digest = Md5::digest(name.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Construct from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Md5Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md5Hash({})", self)
    }
}

/// Service offered by a constellation process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ServiceIdentifier {
    /// CSCP command endpoint.
    Control = 1,
    /// CHP heartbeat publisher.
    Heartbeat = 2,
    /// Monitoring/telemetry publisher.
    Monitoring = 3,
    /// Data transmission endpoint.
    Data = 4,
}

impl ServiceIdentifier {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ServiceIdentifier::Control),
            2 => Some(ServiceIdentifier::Heartbeat),
            3 => Some(ServiceIdentifier::Monitoring),
            4 => Some(ServiceIdentifier::Data),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceIdentifier::Control => "CONTROL",
            ServiceIdentifier::Heartbeat => "HEARTBEAT",
            ServiceIdentifier::Monitoring => "MONITORING",
            ServiceIdentifier::Data => "DATA",
        };
        write!(f, "{}", name)
    }
}

/// CHIRP beacon type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChirpMessageType {
    /// Ask peers to re-offer a service.
    Request = 1,
    /// Announce a locally offered service.
    Offer = 2,
    /// Withdraw a previously offered service.
    Depart = 3,
}

impl ChirpMessageType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ChirpMessageType::Request),
            2 => Some(ChirpMessageType::Offer),
            3 => Some(ChirpMessageType::Depart),
            _ => None,
        }
    }
}

/// A decoded CHIRP beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChirpMessage {
    pub msg_type: ChirpMessageType,
    pub group_id: Md5Hash,
    pub host_id: Md5Hash,
    pub service_id: ServiceIdentifier,
    pub port: u16,
}

impl ChirpMessage {
    pub fn new(
        msg_type: ChirpMessageType,
        group_id: Md5Hash,
        host_id: Md5Hash,
        service_id: ServiceIdentifier,
        port: u16,
    ) -> Self {
        Self {
            msg_type,
            group_id,
            host_id,
            service_id,
            port,
        }
    }

    /// Assemble the fixed-size wire representation.
    pub fn encode(&self) -> [u8; CHIRP_MESSAGE_LENGTH] {
        let mut out = [0u8; CHIRP_MESSAGE_LENGTH];
        out[0..5].copy_from_slice(CHIRP_MAGIC);
        out[5] = CHIRP_VERSION;
        out[6] = self.msg_type as u8;
        out[7..23].copy_from_slice(self.group_id.as_bytes());
        out[23..39].copy_from_slice(self.host_id.as_bytes());
        out[39] = self.service_id as u8;
        out[40..42].copy_from_slice(&self.port.to_le_bytes());
        out
    }

    /// Decode a received datagram.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != CHIRP_MESSAGE_LENGTH {
            return Err(DecodeError::Length {
                expected: CHIRP_MESSAGE_LENGTH,
                got: bytes.len(),
            });
        }
        if &bytes[0..5] != CHIRP_MAGIC {
            return Err(DecodeError::BadMagic);
        }
        if bytes[5] != CHIRP_VERSION {
            return Err(DecodeError::BadVersion(bytes[5]));
        }
        let msg_type =
            ChirpMessageType::from_u8(bytes[6]).ok_or(DecodeError::MessageType(bytes[6]))?;
        let mut group = [0u8; 16];
        group.copy_from_slice(&bytes[7..23]);
        let mut host = [0u8; 16];
        host.copy_from_slice(&bytes[23..39]);
        let service_id =
            ServiceIdentifier::from_u8(bytes[39]).ok_or(DecodeError::ServiceId(bytes[39]))?;
        let port = u16::from_le_bytes([bytes[40], bytes[41]]);
        Ok(Self {
            msg_type,
            group_id: Md5Hash::from_bytes(group),
            host_id: Md5Hash::from_bytes(host),
            service_id,
            port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hash_from_name() {
        // Well-known MD5 test vector.
        let hash = Md5Hash::from_name("abc");
        assert_eq!(hash.to_string(), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_md5_hash_ordering_is_lexicographic() {
        let a = Md5Hash::from_bytes([0u8; 16]);
        let mut high = [0u8; 16];
        high[0] = 1;
        let b = Md5Hash::from_bytes(high);
        assert!(a < b);
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = ChirpMessage::new(
            ChirpMessageType::Offer,
            Md5Hash::from_name("group"),
            Md5Hash::from_name("host"),
            ServiceIdentifier::Control,
            23999,
        );
        let wire = msg.encode();
        assert_eq!(wire.len(), CHIRP_MESSAGE_LENGTH);
        let decoded = ChirpMessage::decode(&wire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_port_is_little_endian() {
        let msg = ChirpMessage::new(
            ChirpMessageType::Offer,
            Md5Hash::from_name("g"),
            Md5Hash::from_name("h"),
            ServiceIdentifier::Data,
            0x1234,
        );
        let wire = msg.encode();
        assert_eq!(wire[40], 0x34);
        assert_eq!(wire[41], 0x12);
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let msg = ChirpMessage::new(
            ChirpMessageType::Request,
            Md5Hash::from_name("g"),
            Md5Hash::from_name("h"),
            ServiceIdentifier::Control,
            1,
        );
        let mut wire = msg.encode();
        wire[0] = b'X';
        assert!(matches!(
            ChirpMessage::decode(&wire),
            Err(DecodeError::BadMagic)
        ));
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let msg = ChirpMessage::new(
            ChirpMessageType::Request,
            Md5Hash::from_name("g"),
            Md5Hash::from_name("h"),
            ServiceIdentifier::Control,
            1,
        );
        let mut wire = msg.encode();
        wire[5] = 9;
        assert!(matches!(
            ChirpMessage::decode(&wire),
            Err(DecodeError::BadVersion(9))
        ));
    }

    #[test]
    fn test_decode_rejects_out_of_range_enums() {
        let msg = ChirpMessage::new(
            ChirpMessageType::Request,
            Md5Hash::from_name("g"),
            Md5Hash::from_name("h"),
            ServiceIdentifier::Control,
            1,
        );
        let mut wire = msg.encode();
        wire[6] = 0;
        assert!(ChirpMessage::decode(&wire).is_err());

        let mut wire = msg.encode();
        wire[39] = 5;
        assert!(ChirpMessage::decode(&wire).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        assert!(matches!(
            ChirpMessage::decode(&[0u8; 10]),
            Err(DecodeError::Length { .. })
        ));
    }
}

//! SNMP message wrappers.
//!
//! Messages encapsulate PDUs with version and security information.
//!
//! - [`CommunityMessage`] - v1/v2c messages with community string auth
//! - [`V3Message`] - v3 messages with USM security

mod community;
mod v3;

pub use community::{CommunityMessage, CommunityPdu};
pub use v3::{MsgFlags, MsgGlobalData, ScopedPdu, SecurityLevel, V3Message, V3MessageData};

use crate::ber::Decoder;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::version::Version;
use bytes::Bytes;

/// Decoded SNMP message (any version).
#[derive(Debug)]
pub enum Message {
    /// SNMPv1 or SNMPv2c message with community string
    Community(CommunityMessage),
    /// SNMPv3 message with USM security
    V3(V3Message),
}

impl Message {
    /// Get the SNMP version.
    pub fn version(&self) -> Version {
        match self {
            Message::Community(m) => m.version,
            Message::V3(_) => Version::V3,
        }
    }

    /// Decode a message from bytes.
    ///
    /// Detects the SNMP version from the header and parses accordingly.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;

        let version_num = seq.read_integer()?;
        let version = Version::from_i32(version_num).ok_or_else(|| {
            Error::decode(seq.offset(), DecodeErrorKind::UnknownVersion(version_num))
        })?;

        match version {
            Version::V1 | Version::V2c => {
                let msg = CommunityMessage::decode_from_sequence(&mut seq, version)?;
                Ok(Message::Community(msg))
            }
            Version::V3 => {
                let msg = V3Message::decode_from_sequence(&mut seq)?;
                Ok(Message::V3(msg))
            }
        }
    }

    /// Peek at the version field of an encoded message without a full parse.
    pub fn peek_version(data: &[u8]) -> Result<Version> {
        let mut decoder = Decoder::from_slice(data);
        let mut seq = decoder.read_sequence()?;
        let version_num = seq.read_integer()?;
        Version::from_i32(version_num).ok_or_else(|| {
            Error::decode(seq.offset(), DecodeErrorKind::UnknownVersion(version_num))
        })
    }
}

impl From<CommunityMessage> for Message {
    fn from(msg: CommunityMessage) -> Self {
        Message::Community(msg)
    }
}

impl From<V3Message> for Message {
    fn from(msg: V3Message) -> Self {
        Message::V3(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::pdu::Pdu;

    #[test]
    fn test_version_dispatch() {
        let pdu = Pdu::get_request(1, &[oid!(1, 3, 6, 1)]);
        let encoded = CommunityMessage::v2c(b"public".as_slice(), pdu).encode();

        assert_eq!(Message::peek_version(&encoded).unwrap(), Version::V2c);
        let msg = Message::decode(encoded).unwrap();
        assert_eq!(msg.version(), Version::V2c);
    }

    #[test]
    fn test_unknown_version_rejected() {
        // SEQUENCE { INTEGER 2, ... } - party-based SNMPv2, never valid
        let data = Bytes::from_static(&[0x30, 0x03, 0x02, 0x01, 0x02]);
        assert!(Message::peek_version(&data).is_err());
    }
}

//! Community-based SNMP message format (v1/v2c).
//!
//! V1 and V2c messages share the same structure:
//! `SEQUENCE { version INTEGER, community OCTET STRING, pdu PDU }`
//!
//! The only difference is the version number (0 for v1, 1 for v2c).

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::pdu::{Pdu, PduType, TrapV1Pdu};
use crate::version::Version;
use bytes::Bytes;

/// Community-based SNMP message (v1/v2c).
#[derive(Debug, Clone)]
pub struct CommunityMessage {
    /// SNMP version (V1 or V2c)
    pub version: Version,
    /// Community string
    pub community: Bytes,
    /// Protocol data unit
    pub pdu: CommunityPdu,
}

/// PDU payload of a community message.
///
/// The SNMPv1 Trap PDU has a different body layout from every other PDU
/// type, so the payload is a two-armed choice rather than a bare [`Pdu`].
#[derive(Debug, Clone)]
pub enum CommunityPdu {
    /// Standard request/response PDU layout.
    Standard(Pdu),
    /// RFC 1157 Trap-PDU (tag 0xA4, v1 only).
    TrapV1(TrapV1Pdu),
}

impl CommunityPdu {
    /// Get the standard PDU, if this is one.
    pub fn as_standard(&self) -> Option<&Pdu> {
        match self {
            CommunityPdu::Standard(pdu) => Some(pdu),
            CommunityPdu::TrapV1(_) => None,
        }
    }

    /// Get the v1 trap PDU, if this is one.
    pub fn as_trap_v1(&self) -> Option<&TrapV1Pdu> {
        match self {
            CommunityPdu::Standard(_) => None,
            CommunityPdu::TrapV1(trap) => Some(trap),
        }
    }
}

impl CommunityMessage {
    /// Create a new community message with a standard PDU.
    ///
    /// # Panics
    /// Panics if version is V3 (use V3Message instead).
    pub fn new(version: Version, community: impl Into<Bytes>, pdu: Pdu) -> Self {
        assert!(
            matches!(version, Version::V1 | Version::V2c),
            "CommunityMessage only supports V1/V2c, not {:?}",
            version
        );
        Self {
            version,
            community: community.into(),
            pdu: CommunityPdu::Standard(pdu),
        }
    }

    /// Create a V1 message (convenience constructor).
    pub fn v1(community: impl Into<Bytes>, pdu: Pdu) -> Self {
        Self::new(Version::V1, community, pdu)
    }

    /// Create a V2c message (convenience constructor).
    pub fn v2c(community: impl Into<Bytes>, pdu: Pdu) -> Self {
        Self::new(Version::V2c, community, pdu)
    }

    /// Create a V1 trap message.
    pub fn v1_trap(community: impl Into<Bytes>, trap: TrapV1Pdu) -> Self {
        Self {
            version: Version::V1,
            community: community.into(),
            pdu: CommunityPdu::TrapV1(trap),
        }
    }

    /// Encode to BER.
    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();

        buf.push_sequence(|buf| {
            match &self.pdu {
                CommunityPdu::Standard(pdu) => pdu.encode(buf),
                CommunityPdu::TrapV1(trap) => trap.encode(buf),
            }
            buf.push_octet_string(&self.community);
            buf.push_integer(self.version.as_i32());
        });

        buf.finish()
    }

    /// Decode from BER.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut decoder = Decoder::new(data);
        let mut seq = decoder.read_sequence()?;

        let version_num = seq.read_integer()?;
        let version = Version::from_i32(version_num).ok_or_else(|| {
            Error::decode(seq.offset(), DecodeErrorKind::UnknownVersion(version_num))
        })?;

        Self::decode_from_sequence(&mut seq, version)
    }

    /// Decode from a sequence decoder where version has already been read.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder, version: Version) -> Result<Self> {
        if version == Version::V3 {
            return Err(Error::decode(
                seq.offset(),
                DecodeErrorKind::UnknownVersion(3),
            ));
        }

        let community = seq.read_octet_string()?;

        let pdu = if seq.peek_tag() == Some(tag::pdu::TRAP_V1) {
            CommunityPdu::TrapV1(TrapV1Pdu::decode(seq)?)
        } else {
            CommunityPdu::Standard(Pdu::decode(seq)?)
        };

        Ok(CommunityMessage {
            version,
            community,
            pdu,
        })
    }

    /// PDU type of the payload.
    pub fn pdu_type(&self) -> PduType {
        match &self.pdu {
            CommunityPdu::Standard(pdu) => pdu.pdu_type,
            CommunityPdu::TrapV1(_) => PduType::TrapV1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::pdu::GenericTrap;

    #[test]
    fn test_v1_roundtrip() {
        let pdu = Pdu::get_request(42, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]);
        let msg = CommunityMessage::v1(b"public".as_slice(), pdu);

        let encoded = msg.encode();
        let decoded = CommunityMessage::decode(encoded).unwrap();

        assert_eq!(decoded.version, Version::V1);
        assert_eq!(decoded.community.as_ref(), b"public");
        assert_eq!(decoded.pdu.as_standard().unwrap().request_id, 42);
    }

    #[test]
    fn test_v2c_roundtrip() {
        let pdu = Pdu::get_request(123, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]);
        let msg = CommunityMessage::v2c(b"private".as_slice(), pdu);

        let encoded = msg.encode();
        let decoded = CommunityMessage::decode(encoded).unwrap();

        assert_eq!(decoded.version, Version::V2c);
        assert_eq!(decoded.community.as_ref(), b"private");
        assert_eq!(decoded.pdu.as_standard().unwrap().request_id, 123);
    }

    #[test]
    fn test_zero_length_community() {
        let pdu = Pdu::get_request(1, &[oid!(1, 3, 6, 1)]);
        let msg = CommunityMessage::v2c(Bytes::new(), pdu);

        let decoded = CommunityMessage::decode(msg.encode()).unwrap();
        assert!(decoded.community.is_empty());
    }

    #[test]
    fn test_v1_trap_roundtrip() {
        let trap = TrapV1Pdu::new(
            oid!(1, 3, 6, 1, 4, 1, 9999),
            [10, 0, 0, 1],
            GenericTrap::ColdStart,
            0,
            100,
            vec![],
        );
        let msg = CommunityMessage::v1_trap(b"public".as_slice(), trap);

        assert_eq!(msg.pdu_type(), PduType::TrapV1);
        let decoded = CommunityMessage::decode(msg.encode()).unwrap();
        let trap = decoded.pdu.as_trap_v1().unwrap();
        assert_eq!(trap.generic_trap, GenericTrap::ColdStart as i32);
        assert_eq!(trap.agent_addr, [10, 0, 0, 1]);
    }

    #[test]
    fn test_version_preserved() {
        for version in [Version::V1, Version::V2c] {
            let pdu = Pdu::get_request(1, &[oid!(1, 3, 6, 1)]);
            let msg = CommunityMessage::new(version, b"test".as_slice(), pdu);
            let decoded = CommunityMessage::decode(msg.encode()).unwrap();
            assert_eq!(decoded.version, version);
        }
    }
}

//! SNMP protocol version.

/// SNMP protocol version as carried in the message header.
///
/// The wire values are 0 for v1, 1 for v2c, and 3 for v3. Value 2 was
/// consumed by the party-based SNMPv2 variants and is never valid here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(i32)]
pub enum Version {
    /// SNMPv1 (RFC 1157)
    V1 = 0,
    /// SNMPv2c (RFC 1901)
    V2c = 1,
    /// SNMPv3 (RFC 3411)
    V3 = 3,
}

impl Version {
    /// Create from the wire value.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::V1),
            1 => Some(Self::V2c),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    /// Get the wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => write!(f, "v1"),
            Self::V2c => write!(f, "v2c"),
            Self::V3 => write!(f, "v3"),
        }
    }
}

//! Object Identifier (OID) type.
//!
//! OIDs are stored as decoded arcs in a `SmallVec<[u32; 16]>`, avoiding heap
//! allocation for the common case. Ordering is lexicographic on the decoded
//! arc sequence (shorter OID sorts first on an equal prefix), which is the
//! MIB traversal order. Note this differs from byte-wise ordering of the
//! packed BER form.

use crate::error::{DecodeErrorKind, Error, OidErrorKind, Result};
use smallvec::SmallVec;
use std::fmt;

/// Maximum number of arcs (subidentifiers) allowed in an OID.
///
/// Per RFC 2578 Section 3.5: "there are at most 128 sub-identifiers in a
/// value". Enforced during BER decoding; OIDs from other sources can be
/// checked with [`Oid::validate_length()`].
pub const MAX_OID_LEN: usize = 128;

/// Object Identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Oid {
    arcs: SmallVec<[u32; 16]>,
}

impl Oid {
    /// Create an empty OID.
    pub fn empty() -> Self {
        Self {
            arcs: SmallVec::new(),
        }
    }

    /// Create an OID from arc values.
    ///
    /// ```
    /// use simple_snmpd::oid::Oid;
    ///
    /// let oid = Oid::new(vec![1, 3, 6, 1, 2, 1]);
    /// assert_eq!(oid.arcs(), &[1, 3, 6, 1, 2, 1]);
    /// ```
    pub fn new(arcs: impl IntoIterator<Item = u32>) -> Self {
        Self {
            arcs: arcs.into_iter().collect(),
        }
    }

    /// Create an OID from a slice of arcs.
    pub fn from_slice(arcs: &[u32]) -> Self {
        Self {
            arcs: SmallVec::from_slice(arcs),
        }
    }

    /// Parse an OID from dotted string notation (e.g. "1.3.6.1.2.1.1.1.0").
    ///
    /// String parsing does not enforce the X.690 arc constraints; call
    /// [`validate()`](Self::validate) afterwards when the input is untrusted.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::empty());
        }

        let mut arcs = SmallVec::new();

        for part in s.split('.') {
            if part.is_empty() {
                continue;
            }

            let arc: u32 = part.parse().map_err(|_| {
                Error::invalid_oid_with_input(OidErrorKind::InvalidArc, s.to_string())
            })?;

            arcs.push(arc);
        }

        Ok(Self { arcs })
    }

    /// Get the arc values.
    pub fn arcs(&self) -> &[u32] {
        &self.arcs
    }

    /// Get the number of arcs.
    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    /// Check if the OID is empty.
    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    /// Check if this OID starts with another OID.
    ///
    /// An OID always starts with itself, and any OID starts with the empty OID.
    pub fn starts_with(&self, other: &Oid) -> bool {
        self.arcs.len() >= other.arcs.len() && self.arcs[..other.arcs.len()] == other.arcs[..]
    }

    /// Get the parent OID (all arcs except the last), or `None` when empty.
    pub fn parent(&self) -> Option<Oid> {
        if self.arcs.is_empty() {
            None
        } else {
            Some(Oid {
                arcs: SmallVec::from_slice(&self.arcs[..self.arcs.len() - 1]),
            })
        }
    }

    /// Create a child OID by appending an arc.
    ///
    /// ```
    /// use simple_snmpd::oid::Oid;
    ///
    /// let sys_descr = Oid::parse("1.3.6.1.2.1.1.1").unwrap();
    /// assert_eq!(sys_descr.child(0).to_string(), "1.3.6.1.2.1.1.1.0");
    /// ```
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.arcs.clone();
        arcs.push(arc);
        Oid { arcs }
    }

    /// Validate OID arcs per X.690 Section 8.19.4.
    ///
    /// - arc1 must be 0, 1, or 2
    /// - arc2 must be <= 39 when arc1 is 0 or 1
    pub fn validate(&self) -> Result<()> {
        if self.arcs.is_empty() {
            return Ok(());
        }

        let arc1 = self.arcs[0];

        if arc1 > 2 {
            return Err(Error::invalid_oid(OidErrorKind::InvalidFirstArc(arc1)));
        }

        if self.arcs.len() >= 2 {
            let arc2 = self.arcs[1];
            if arc1 < 2 && arc2 >= 40 {
                return Err(Error::invalid_oid(OidErrorKind::InvalidSecondArc {
                    first: arc1,
                    second: arc2,
                }));
            }
        }

        Ok(())
    }

    /// Validate that the OID doesn't exceed [`MAX_OID_LEN`] arcs.
    pub fn validate_length(&self) -> Result<()> {
        if self.arcs.len() > MAX_OID_LEN {
            return Err(Error::invalid_oid(OidErrorKind::TooManyArcs {
                count: self.arcs.len(),
                max: MAX_OID_LEN,
            }));
        }
        Ok(())
    }

    /// Validate both arc constraints and length.
    pub fn validate_all(&self) -> Result<()> {
        self.validate()?;
        self.validate_length()
    }

    /// Encode the OID content octets (X.690 Section 8.19).
    ///
    /// First two arcs are merged as `arc1 * 40 + arc2` and encoded base-128;
    /// remaining arcs follow in base-128 with the high continuation bit.
    /// Empty OIDs encode to zero content octets.
    pub fn to_ber(&self) -> SmallVec<[u8; 64]> {
        let mut bytes = SmallVec::new();

        if self.arcs.is_empty() {
            return bytes;
        }

        // First subidentifier merges the first two arcs; base-128 because
        // arc2 can exceed 127 when arc1 is 2.
        if self.arcs.len() >= 2 {
            encode_subidentifier(&mut bytes, self.arcs[0] * 40 + self.arcs[1]);
        } else {
            encode_subidentifier(&mut bytes, self.arcs[0] * 40);
        }

        for &arc in self.arcs.iter().skip(2) {
            encode_subidentifier(&mut bytes, arc);
        }

        bytes
    }

    /// Total BER-encoded length of this OID (tag + length + content).
    pub(crate) fn ber_encoded_len(&self) -> usize {
        let content = self.to_ber().len();
        1 + crate::ber::length_encoded_len(content) + content
    }

    /// Decode OID content octets.
    ///
    /// Enforces the [`MAX_OID_LEN`] limit and rejects dangling continuation
    /// bits and subidentifier overflow.
    pub fn from_ber(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Ok(Self::empty());
        }

        let mut arcs = SmallVec::new();

        // The first subidentifier packs arcs 1 and 2 as 40a+b
        let (first_subid, consumed) = decode_subidentifier(data)?;

        if first_subid < 40 {
            arcs.push(0);
            arcs.push(first_subid);
        } else if first_subid < 80 {
            arcs.push(1);
            arcs.push(first_subid - 40);
        } else {
            arcs.push(2);
            arcs.push(first_subid - 80);
        }

        let mut i = consumed;
        while i < data.len() {
            let (arc, bytes_consumed) = decode_subidentifier(&data[i..])?;
            arcs.push(arc);
            i += bytes_consumed;

            if arcs.len() > MAX_OID_LEN {
                return Err(Error::decode(
                    i,
                    DecodeErrorKind::OidTooLong {
                        count: arcs.len(),
                        max: MAX_OID_LEN,
                    },
                ));
            }
        }

        Ok(Self { arcs })
    }
}

/// Encode a subidentifier in base-128 with continuation bits.
#[inline]
fn encode_subidentifier(bytes: &mut SmallVec<[u8; 64]>, value: u32) {
    if value == 0 {
        bytes.push(0);
        return;
    }

    let mut temp = value;
    let mut count = 0;
    while temp > 0 {
        count += 1;
        temp >>= 7;
    }

    for i in (0..count).rev() {
        let mut byte = ((value >> (i * 7)) & 0x7F) as u8;
        if i > 0 {
            byte |= 0x80;
        }
        bytes.push(byte);
    }
}

/// Decode a subidentifier, returning (value, bytes_consumed).
///
/// A buffer ending mid-subidentifier (continuation bit set on the final
/// byte) is a dangling continuation and fails with `TruncatedData`.
fn decode_subidentifier(data: &[u8]) -> Result<(u32, usize)> {
    let mut value: u32 = 0;
    let mut i = 0;

    loop {
        if i >= data.len() {
            return Err(Error::decode(i, DecodeErrorKind::TruncatedData));
        }

        let byte = data[i];
        i += 1;

        if value > (u32::MAX >> 7) {
            return Err(Error::decode(i, DecodeErrorKind::IntegerOverflow));
        }

        value = (value << 7) | ((byte & 0x7F) as u32);

        if byte & 0x80 == 0 {
            break;
        }
    }

    Ok((value, i))
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.arcs {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", arc)?;
            first = false;
        }
        Ok(())
    }
}

impl std::str::FromStr for Oid {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Self::from_slice(arcs)
    }
}

impl<const N: usize> From<[u32; N]> for Oid {
    fn from(arcs: [u32; N]) -> Self {
        Self::new(arcs)
    }
}

impl PartialOrd for Oid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Oid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.arcs.cmp(&other.arcs)
    }
}

/// Macro to create an OID from literal arcs.
///
/// ```
/// use simple_snmpd::oid;
///
/// let sys_descr = oid!(1, 3, 6, 1, 2, 1, 1, 1, 0);
/// assert_eq!(sys_descr.to_string(), "1.3.6.1.2.1.1.1.0");
/// ```
#[macro_export]
macro_rules! oid {
    ($($arc:expr),* $(,)?) => {
        $crate::oid::Oid::from_slice(&[$($arc),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let oid = Oid::parse("1.3.6.1.2.1.1.1.0").unwrap();
        assert_eq!(oid.arcs(), &[1, 3, 6, 1, 2, 1, 1, 1, 0]);
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn test_starts_with() {
        let oid = Oid::parse("1.3.6.1.2.1.1.1.0").unwrap();
        let prefix = Oid::parse("1.3.6.1").unwrap();
        assert!(oid.starts_with(&prefix));
        assert!(!prefix.starts_with(&oid));
        assert!(oid.starts_with(&oid));
        assert!(oid.starts_with(&Oid::empty()));
    }

    #[test]
    fn test_ber_encoding() {
        // 1.3.6.1 encodes as: (1*40+3)=43, 6, 1 = [0x2B, 0x06, 0x01]
        let oid = Oid::parse("1.3.6.1").unwrap();
        assert_eq!(&oid.to_ber()[..], &[0x2B, 0x06, 0x01]);
    }

    #[test]
    fn test_ber_roundtrip() {
        for s in ["1.3.6.1.2.1.1.1.0", "2.999.3", "0.39", "1.3.6.1.4.1.99999.1.2.3"] {
            let oid = Oid::parse(s).unwrap();
            let ber = oid.to_ber();
            assert_eq!(Oid::from_ber(&ber).unwrap(), oid, "roundtrip failed for {}", s);
        }
    }

    #[test]
    fn test_ber_encoding_large_arc2() {
        // X.690 Section 8.19 example: 2.999.3 has first subid 1079 = 0x88 0x37
        let oid = Oid::from_slice(&[2, 999, 3]);
        assert_eq!(&oid.to_ber()[..], &[0x88, 0x37, 0x03]);
    }

    #[test]
    fn test_ber_first_subid_boundaries() {
        assert_eq!(&Oid::from_slice(&[2, 0]).to_ber()[..], &[80]);
        assert_eq!(&Oid::from_slice(&[2, 47]).to_ber()[..], &[127]);
        // 2.48 -> 128, needs 2 base-128 bytes
        assert_eq!(&Oid::from_slice(&[2, 48]).to_ber()[..], &[0x81, 0x00]);
    }

    #[test]
    fn test_validate_arc_constraints() {
        assert!(Oid::from_slice(&[3, 0]).validate().is_err());
        assert!(Oid::from_slice(&[0, 40]).validate().is_err());
        assert!(Oid::from_slice(&[0, 39]).validate().is_ok());
        assert!(Oid::from_slice(&[1, 40]).validate().is_err());
        assert!(Oid::from_slice(&[2, 999]).validate().is_ok());
    }

    #[test]
    fn test_dangling_continuation_rejected() {
        // Final byte with continuation bit set means the subidentifier never ended
        let result = Oid::from_ber(&[0x2B, 0x86]);
        assert!(result.is_err());
    }

    #[test]
    fn test_subidentifier_overflow_rejected() {
        // Six continuation bytes push past u32 range
        let result = Oid::from_ber(&[0x2B, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert!(result.is_err());
    }

    #[test]
    fn test_non_minimal_subidentifier_accepted() {
        // Leading 0x80 bytes are non-minimal but decode fine (permissive input)
        let oid = Oid::from_ber(&[0x2B, 0x80, 0x01]).unwrap();
        assert_eq!(oid.arcs(), &[1, 3, 1]);
    }

    #[test]
    fn test_from_ber_enforces_max_oid_len() {
        let mut at_limit = vec![0x2B]; // decodes as arcs [1, 3]
        at_limit.extend(std::iter::repeat_n(0x01, MAX_OID_LEN - 2));
        assert_eq!(Oid::from_ber(&at_limit).unwrap().len(), MAX_OID_LEN);

        let mut over_limit = vec![0x2B];
        over_limit.extend(std::iter::repeat_n(0x01, MAX_OID_LEN - 1));
        assert!(Oid::from_ber(&over_limit).is_err());
    }

    #[test]
    fn test_ordering_is_arcwise_lexicographic() {
        let a = oid!(1, 3, 6, 1, 2);
        let b = oid!(1, 3, 6, 1, 2, 0);
        let c = oid!(1, 3, 6, 1, 3);
        // Shorter sorts first on equal prefix
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
        // Arc-wise, not byte-wise: 1.3.6.1.200 > 1.3.6.1.3 even though the
        // packed form of 200 starts with a 0x81 byte
        assert!(oid!(1, 3, 6, 1, 200) > oid!(1, 3, 6, 1, 3));
    }

    #[test]
    fn test_child_and_parent() {
        let base = oid!(1, 3, 6, 1, 2, 1, 1, 1);
        let inst = base.child(0);
        assert_eq!(inst.to_string(), "1.3.6.1.2.1.1.1.0");
        assert_eq!(inst.parent().unwrap(), base);
        assert!(Oid::empty().parent().is_none());
    }

    #[test]
    fn test_macro() {
        let oid = oid!(1, 3, 6, 1);
        assert_eq!(oid.arcs(), &[1, 3, 6, 1]);
    }
}

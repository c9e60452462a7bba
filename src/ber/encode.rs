//! BER encoding.
//!
//! [`EncodeBuf`] builds messages back-to-front: callers push the innermost
//! fields first and wrap them with `push_sequence`/`push_constructed`, which
//! prepend the length and tag once the content size is known. This produces
//! canonical minimal-length encodings in a single pass without length
//! pre-computation. `finish()` reverses the buffer into wire order.

use super::length::encode_length;
use super::tag;
use crate::oid::Oid;
use bytes::Bytes;

/// Reverse-building BER encoder.
///
/// All `push_*` methods logically *prepend* to the message; fields of a
/// constructed type must therefore be pushed in reverse field order.
pub struct EncodeBuf {
    // Bytes stored in reverse wire order
    buf: Vec<u8>,
}

impl EncodeBuf {
    /// Create an empty encode buffer.
    pub fn new() -> Self {
        Self { buf: Vec::with_capacity(128) }
    }

    /// Number of bytes pushed so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Check whether nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finalize into wire-order bytes.
    pub fn finish(mut self) -> Bytes {
        self.buf.reverse();
        Bytes::from(self.buf)
    }

    /// Push a raw tag byte.
    pub fn push_tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    /// Push a length field.
    pub fn push_length(&mut self, len: usize) {
        let (bytes, n) = encode_length(len);
        // encode_length already returns the octets in reverse order
        self.buf.extend_from_slice(&bytes[..n]);
    }

    /// Push raw content bytes.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buf.extend(data.iter().rev());
    }

    /// Push a SEQUENCE wrapping whatever the closure pushes.
    pub fn push_sequence(&mut self, f: impl FnOnce(&mut Self)) {
        self.push_constructed(tag::universal::SEQUENCE, f);
    }

    /// Push a constructed TLV with the given tag wrapping the closure output.
    pub fn push_constructed(&mut self, tag: u8, f: impl FnOnce(&mut Self)) {
        let mark = self.buf.len();
        f(self);
        let content_len = self.buf.len() - mark;
        self.push_length(content_len);
        self.push_tag(tag);
    }

    /// Push an INTEGER in minimal two's-complement form.
    pub fn push_integer(&mut self, value: i32) {
        let bytes = value.to_be_bytes();
        let content_len = super::integer_content_len(value);
        let content = &bytes[4 - content_len..];
        self.push_bytes(content);
        self.push_length(content_len);
        self.push_tag(tag::universal::INTEGER);
    }

    /// Push an unsigned 32-bit value with an application tag
    /// (Counter32, Gauge32, TimeTicks).
    pub fn push_unsigned32(&mut self, tag: u8, value: u32) {
        let content_len = super::unsigned32_content_len(value);
        let bytes = value.to_be_bytes();
        if content_len == 5 {
            // Leading zero keeps the value positive
            self.push_bytes(&bytes);
            self.push_bytes(&[0x00]);
        } else {
            self.push_bytes(&bytes[4 - content_len..]);
        }
        self.push_length(content_len);
        self.push_tag(tag);
    }

    /// Push a Counter64 value.
    pub fn push_integer64(&mut self, value: u64) {
        let content_len = super::unsigned64_content_len(value);
        let bytes = value.to_be_bytes();
        if content_len == 9 {
            self.push_bytes(&bytes);
            self.push_bytes(&[0x00]);
        } else {
            self.push_bytes(&bytes[8 - content_len..]);
        }
        self.push_length(content_len);
        self.push_tag(tag::application::COUNTER64);
    }

    /// Push an OCTET STRING.
    pub fn push_octet_string(&mut self, data: &[u8]) {
        self.push_bytes(data);
        self.push_length(data.len());
        self.push_tag(tag::universal::OCTET_STRING);
    }

    /// Push a NULL.
    pub fn push_null(&mut self) {
        self.push_length(0);
        self.push_tag(tag::universal::NULL);
    }

    /// Push an OBJECT IDENTIFIER.
    pub fn push_oid(&mut self, oid: &Oid) {
        let content = oid.to_ber();
        self.push_bytes(&content);
        self.push_length(content.len());
        self.push_tag(tag::universal::OBJECT_IDENTIFIER);
    }

    /// Push an IpAddress (APPLICATION 0, 4 octets).
    pub fn push_ip_address(&mut self, addr: [u8; 4]) {
        self.push_bytes(&addr);
        self.push_length(4);
        self.push_tag(tag::application::IP_ADDRESS);
    }
}

impl Default for EncodeBuf {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    #[test]
    fn test_encode_integer() {
        let mut buf = EncodeBuf::new();
        buf.push_integer(0);
        assert_eq!(&buf.finish()[..], &[0x02, 0x01, 0x00]);

        let mut buf = EncodeBuf::new();
        buf.push_integer(127);
        assert_eq!(&buf.finish()[..], &[0x02, 0x01, 0x7F]);

        // 128 needs a leading zero to stay positive
        let mut buf = EncodeBuf::new();
        buf.push_integer(128);
        assert_eq!(&buf.finish()[..], &[0x02, 0x02, 0x00, 0x80]);

        let mut buf = EncodeBuf::new();
        buf.push_integer(-1);
        assert_eq!(&buf.finish()[..], &[0x02, 0x01, 0xFF]);

        let mut buf = EncodeBuf::new();
        buf.push_integer(-128);
        assert_eq!(&buf.finish()[..], &[0x02, 0x01, 0x80]);

        let mut buf = EncodeBuf::new();
        buf.push_integer(i32::MIN);
        assert_eq!(&buf.finish()[..], &[0x02, 0x04, 0x80, 0x00, 0x00, 0x00]);

        let mut buf = EncodeBuf::new();
        buf.push_integer(i32::MAX);
        assert_eq!(&buf.finish()[..], &[0x02, 0x04, 0x7F, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_encode_unsigned32() {
        let mut buf = EncodeBuf::new();
        buf.push_unsigned32(tag::application::COUNTER32, 0);
        assert_eq!(&buf.finish()[..], &[0x41, 0x01, 0x00]);

        // Top bit set: leading zero required
        let mut buf = EncodeBuf::new();
        buf.push_unsigned32(tag::application::GAUGE32, 0x80);
        assert_eq!(&buf.finish()[..], &[0x42, 0x02, 0x00, 0x80]);

        let mut buf = EncodeBuf::new();
        buf.push_unsigned32(tag::application::TIMETICKS, 0xFFFF_FFFF);
        assert_eq!(
            &buf.finish()[..],
            &[0x43, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_encode_counter64() {
        let mut buf = EncodeBuf::new();
        buf.push_integer64(1);
        assert_eq!(&buf.finish()[..], &[0x46, 0x01, 0x01]);

        let mut buf = EncodeBuf::new();
        buf.push_integer64(u64::MAX);
        let bytes = buf.finish();
        assert_eq!(bytes[0], 0x46);
        assert_eq!(bytes[1], 9);
        assert_eq!(bytes[2], 0x00);
        assert!(bytes[3..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_encode_octet_string_and_null() {
        let mut buf = EncodeBuf::new();
        buf.push_octet_string(b"hello");
        assert_eq!(&buf.finish()[..], &[0x04, 0x05, b'h', b'e', b'l', b'l', b'o']);

        // Empty OCTET STRING is valid
        let mut buf = EncodeBuf::new();
        buf.push_octet_string(b"");
        assert_eq!(&buf.finish()[..], &[0x04, 0x00]);

        let mut buf = EncodeBuf::new();
        buf.push_null();
        assert_eq!(&buf.finish()[..], &[0x05, 0x00]);
    }

    #[test]
    fn test_encode_oid() {
        let mut buf = EncodeBuf::new();
        buf.push_oid(&oid!(1, 3, 6, 1));
        assert_eq!(&buf.finish()[..], &[0x06, 0x03, 0x2B, 0x06, 0x01]);
    }

    #[test]
    fn test_encode_sequence() {
        // SEQUENCE { INTEGER 1, INTEGER 2 } - pushed in reverse
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_integer(2);
            buf.push_integer(1);
        });
        assert_eq!(
            &buf.finish()[..],
            &[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]
        );
    }

    #[test]
    fn test_encode_nested_long_form() {
        // A sequence over 127 content bytes uses the long length form
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            buf.push_octet_string(&[0xAA; 130]);
        });
        let bytes = buf.finish();
        assert_eq!(bytes[0], 0x30);
        assert_eq!(bytes[1], 0x81);
        assert_eq!(bytes[2], 133); // inner tag + 2 length octets + 130 content
        assert_eq!(bytes[3], 0x04);
    }
}

//! Authentication key derivation and HMAC operations (RFC 3414).
//!
//! - Password-to-key derivation (1MB expansion + hash)
//! - Key localization (binding the key to an engine ID)
//! - HMAC authentication for message integrity

use digest::{Digest, KeyInit, Mac, OutputSizeUser};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::AuthProtocol;

/// Minimum password length recommended by net-snmp.
///
/// Net-snmp rejects passwords shorter than 8 characters with
/// `USM_PASSWORDTOOSHORT`. This agent accepts shorter passwords but logs a
/// warning.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Localized authentication key.
///
/// A key derived from a password and bound to a specific engine ID, usable
/// for HMAC operations on messages to/from that engine.
///
/// Key material is zeroed from memory on drop via the `zeroize` crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl LocalizedKey {
    /// Derive a localized key from a password and engine ID.
    ///
    /// Implements RFC 3414 Section A.2:
    /// 1. Expand the password to 1MB by repetition and hash it (master key)
    /// 2. Hash (master_key || engine_id || master_key) for the localized key
    pub fn from_password(protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Self {
        if password.len() < MIN_PASSWORD_LENGTH {
            tracing::warn!(
                target: "simple_snmpd::usm",
                password_len = password.len(),
                min_len = MIN_PASSWORD_LENGTH,
                "SNMPv3 password is shorter than the recommended minimum"
            );
        }
        let master_key = password_to_key(protocol, password);
        let localized = localize_key(protocol, &master_key, engine_id);
        Self {
            key: localized,
            protocol,
        }
    }

    /// Create a localized key from raw bytes (e.g. pre-localized config).
    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// Get the protocol this key is for.
    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    /// Get the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Get the MAC length for this key's protocol.
    pub fn mac_len(&self) -> usize {
        self.protocol.mac_len()
    }

    /// Compute HMAC over a message, truncated per the protocol.
    pub fn compute_hmac(&self, data: &[u8]) -> Vec<u8> {
        compute_hmac(self.protocol, &self.key, data)
    }

    /// Verify an HMAC in constant time.
    pub fn verify_hmac(&self, data: &[u8], expected: &[u8]) -> bool {
        let computed = self.compute_hmac(data);
        if computed.len() != expected.len() {
            return false;
        }
        bool::from(computed.as_slice().ct_eq(expected))
    }
}

impl std::fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalizedKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Password to key transformation (RFC 3414 Section A.2.1).
pub(crate) fn password_to_key(protocol: AuthProtocol, password: &[u8]) -> Vec<u8> {
    const EXPANSION_SIZE: usize = 1_048_576; // 1MB

    match protocol {
        AuthProtocol::Md5 => password_to_key_impl::<md5::Md5>(password, EXPANSION_SIZE),
        AuthProtocol::Sha1 => password_to_key_impl::<sha1::Sha1>(password, EXPANSION_SIZE),
        AuthProtocol::Sha224 => password_to_key_impl::<sha2::Sha224>(password, EXPANSION_SIZE),
        AuthProtocol::Sha256 => password_to_key_impl::<sha2::Sha256>(password, EXPANSION_SIZE),
        AuthProtocol::Sha384 => password_to_key_impl::<sha2::Sha384>(password, EXPANSION_SIZE),
        AuthProtocol::Sha512 => password_to_key_impl::<sha2::Sha512>(password, EXPANSION_SIZE),
    }
}

fn password_to_key_impl<D>(password: &[u8], expansion_size: usize) -> Vec<u8>
where
    D: Digest + Default,
{
    if password.is_empty() {
        // Empty password results in an all-zero key
        return vec![0u8; <D as OutputSizeUser>::output_size()];
    }

    let mut hasher = D::new();

    // RFC 3414 A.2.1: form a 1MB string by repeating the password, hashed
    // in 64-byte chunks (matching net-snmp)
    let mut buf = [0u8; 64];
    let password_len = password.len();
    let mut password_index = 0;
    let mut count = 0;

    while count < expansion_size {
        for byte in &mut buf {
            *byte = password[password_index];
            password_index = (password_index + 1) % password_len;
        }
        hasher.update(buf);
        count += 64;
    }

    hasher.finalize().to_vec()
}

/// Key localization (RFC 3414 Section A.2.2).
///
/// localized_key = H(master_key || engine_id || master_key)
pub(crate) fn localize_key(
    protocol: AuthProtocol,
    master_key: &[u8],
    engine_id: &[u8],
) -> Vec<u8> {
    match protocol {
        AuthProtocol::Md5 => localize_key_impl::<md5::Md5>(master_key, engine_id),
        AuthProtocol::Sha1 => localize_key_impl::<sha1::Sha1>(master_key, engine_id),
        AuthProtocol::Sha224 => localize_key_impl::<sha2::Sha224>(master_key, engine_id),
        AuthProtocol::Sha256 => localize_key_impl::<sha2::Sha256>(master_key, engine_id),
        AuthProtocol::Sha384 => localize_key_impl::<sha2::Sha384>(master_key, engine_id),
        AuthProtocol::Sha512 => localize_key_impl::<sha2::Sha512>(master_key, engine_id),
    }
}

fn localize_key_impl<D>(master_key: &[u8], engine_id: &[u8]) -> Vec<u8>
where
    D: Digest + Default,
{
    let mut hasher = D::new();
    hasher.update(master_key);
    hasher.update(engine_id);
    hasher.update(master_key);
    hasher.finalize().to_vec()
}

/// Compute HMAC with the appropriate algorithm and truncation.
fn compute_hmac(protocol: AuthProtocol, key: &[u8], data: &[u8]) -> Vec<u8> {
    let truncate_len = protocol.mac_len();
    match protocol {
        AuthProtocol::Md5 => compute_hmac_md5(key, data, truncate_len),
        AuthProtocol::Sha1 => compute_hmac_sha1(key, data, truncate_len),
        AuthProtocol::Sha224 => compute_hmac_sha224(key, data, truncate_len),
        AuthProtocol::Sha256 => compute_hmac_sha256(key, data, truncate_len),
        AuthProtocol::Sha384 => compute_hmac_sha384(key, data, truncate_len),
        AuthProtocol::Sha512 => compute_hmac_sha512(key, data, truncate_len),
    }
}

fn compute_hmac_md5(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacMd5 = hmac::Hmac<md5::Md5>;

    let mut mac = <HmacMd5 as KeyInit>::new_from_slice(key).expect("HMAC can take key of any size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

fn compute_hmac_sha1(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacSha1 = hmac::Hmac<sha1::Sha1>;

    let mut mac =
        <HmacSha1 as KeyInit>::new_from_slice(key).expect("HMAC can take key of any size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

fn compute_hmac_sha224(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacSha224 = hmac::Hmac<sha2::Sha224>;

    let mut mac =
        <HmacSha224 as KeyInit>::new_from_slice(key).expect("HMAC can take key of any size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

fn compute_hmac_sha256(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacSha256 = hmac::Hmac<sha2::Sha256>;

    let mut mac =
        <HmacSha256 as KeyInit>::new_from_slice(key).expect("HMAC can take key of any size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

fn compute_hmac_sha384(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacSha384 = hmac::Hmac<sha2::Sha384>;

    let mut mac =
        <HmacSha384 as KeyInit>::new_from_slice(key).expect("HMAC can take key of any size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

fn compute_hmac_sha512(key: &[u8], data: &[u8], truncate_len: usize) -> Vec<u8> {
    type HmacSha512 = hmac::Hmac<sha2::Sha512>;

    let mut mac =
        <HmacSha512 as KeyInit>::new_from_slice(key).expect("HMAC can take key of any size");
    Mac::update(&mut mac, data);
    let result = mac.finalize().into_bytes();
    result[..truncate_len].to_vec()
}

/// Authenticate an outgoing message by computing and inserting the HMAC.
///
/// The message must already have placeholder zeros in the auth params
/// field. The HMAC is computed over the entire message (zeros in place)
/// and then patched in.
pub fn authenticate_message(
    key: &LocalizedKey,
    message: &mut [u8],
    auth_offset: usize,
    auth_len: usize,
) {
    let mac = key.compute_hmac(message);
    message[auth_offset..auth_offset + auth_len].copy_from_slice(&mac);
}

/// Verify the authentication of an incoming message.
///
/// Returns `true` if the MAC is valid.
pub fn verify_message(
    key: &LocalizedKey,
    message: &[u8],
    auth_offset: usize,
    auth_len: usize,
) -> bool {
    let received_mac = &message[auth_offset..auth_offset + auth_len];

    // Recompute with zeros in the auth position
    let mut msg_copy = message.to_vec();
    msg_copy[auth_offset..auth_offset + auth_len].fill(0);

    key.verify_hmac(&msg_copy, received_mac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::encode_hex;

    fn engine_id_02() -> Vec<u8> {
        vec![0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]
    }

    #[test]
    fn test_password_to_key_md5() {
        // RFC 3414 Appendix A.3.1
        let key = password_to_key(AuthProtocol::Md5, b"maplesyrup");
        assert_eq!(key.len(), 16);
        assert_eq!(encode_hex(&key), "9faf3283884e92834ebc9847d8edd963");
    }

    #[test]
    fn test_password_to_key_sha1() {
        // RFC 3414 Appendix A.3.2
        let key = password_to_key(AuthProtocol::Sha1, b"maplesyrup");
        assert_eq!(key.len(), 20);
        assert_eq!(encode_hex(&key), "9fb5cc0381497b3793528939ff788d5d79145211");
    }

    #[test]
    fn test_localize_key_md5() {
        // RFC 3414 Appendix A.3.1
        let key = LocalizedKey::from_password(AuthProtocol::Md5, b"maplesyrup", &engine_id_02());
        assert_eq!(
            encode_hex(key.as_bytes()),
            "526f5eed9fcce26f8964c2930787d82b"
        );
    }

    #[test]
    fn test_localize_key_sha1() {
        // RFC 3414 Appendix A.3.2
        let key = LocalizedKey::from_password(AuthProtocol::Sha1, b"maplesyrup", &engine_id_02());
        assert_eq!(
            encode_hex(key.as_bytes()),
            "6695febc9288e36282235fc7151f128497b38f3f"
        );
    }

    #[test]
    fn test_hmac_compute_and_verify() {
        let key = LocalizedKey::from_bytes(
            AuthProtocol::Md5,
            vec![
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
                0x0e, 0x0f, 0x10,
            ],
        );

        let data = b"test message";
        let mac = key.compute_hmac(data);
        assert_eq!(mac.len(), 12); // HMAC-MD5-96

        assert!(key.verify_hmac(data, &mac));

        let mut wrong_mac = mac.clone();
        wrong_mac[0] ^= 0xFF;
        assert!(!key.verify_hmac(data, &wrong_mac));
    }

    #[test]
    fn test_mac_lengths_per_protocol() {
        for (protocol, expected) in [
            (AuthProtocol::Md5, 12),
            (AuthProtocol::Sha1, 12),
            (AuthProtocol::Sha224, 16),
            (AuthProtocol::Sha256, 24),
            (AuthProtocol::Sha384, 32),
            (AuthProtocol::Sha512, 48),
        ] {
            let key = LocalizedKey::from_password(protocol, b"maplesyrup", &engine_id_02());
            assert_eq!(key.compute_hmac(b"x").len(), expected, "{:?}", protocol);
        }
    }

    #[test]
    fn test_empty_password_gives_zero_key() {
        let key = password_to_key(AuthProtocol::Md5, b"");
        assert_eq!(key.len(), 16);
        assert!(key.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_authenticate_then_verify_message() {
        let key = LocalizedKey::from_password(AuthProtocol::Sha1, b"maplesyrup", &engine_id_02());

        // A fake message with a 12-byte zeroed auth-params region at offset 5
        let mut message = vec![0xAB; 40];
        message[5..17].fill(0);

        authenticate_message(&key, &mut message, 5, 12);
        assert!(verify_message(&key, &message, 5, 12));

        // Any flipped byte outside the MAC breaks verification
        message[20] ^= 0x01;
        assert!(!verify_message(&key, &message, 5, 12));
    }
}

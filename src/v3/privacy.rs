//! Privacy (encryption) protocols for SNMPv3 (RFC 3414, RFC 3826).
//!
//! - DES-CBC privacy (RFC 3414 Section 8)
//! - AES-128/192/256-CFB privacy (RFC 3826)
//!
//! # Salt/IV construction
//!
//! ## DES-CBC
//! - Salt (privParameters): engineBoots (4 bytes) || counter (4 bytes)
//! - IV: pre-IV XOR salt (pre-IV is the last 8 bytes of the 16-byte privKey)
//!
//! ## AES-CFB
//! - Salt (privParameters): 64-bit counter = 8 bytes
//! - IV: engineBoots (4) || engineTime (4) || salt (8) = 16 bytes
//!   (concatenation, NOT XOR)

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{AuthProtocol, PrivProtocol};
use crate::error::{CryptoErrorKind, Error, Result};

/// Generate a random non-zero u64 for salt initialization.
fn random_nonzero_u64() -> u64 {
    let mut buf = [0u8; 8];
    loop {
        getrandom::fill(&mut buf).expect("getrandom failed");
        let val = u64::from_ne_bytes(buf);
        if val != 0 {
            return val;
        }
        // 1 in 2^64, but loop anyway
    }
}

/// Thread-safe salt counter shared across encryptions.
///
/// Each encrypted message needs a unique salt; a monotonically increasing
/// counter seeded from cryptographic randomness satisfies RFC 3826
/// Section 3.1.2.1.
pub struct SaltCounter(AtomicU64);

impl SaltCounter {
    /// Create a new salt counter initialized from cryptographic randomness.
    pub fn new() -> Self {
        Self(AtomicU64::new(random_nonzero_u64()))
    }

    /// Create a salt counter initialized to a specific value (tests).
    pub fn from_value(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Get the next salt value and increment the counter.
    ///
    /// Never returns zero: per net-snmp behavior, zero is skipped on
    /// wraparound to avoid IV reuse.
    pub fn next(&self) -> u64 {
        let val = self.0.fetch_add(1, Ordering::SeqCst);
        if val == 0 {
            self.0.fetch_add(1, Ordering::SeqCst)
        } else {
            val
        }
    }
}

impl Default for SaltCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Privacy key for encryption/decryption operations.
///
/// Derived from a password and engine ID with the same algorithm as
/// authentication keys; the relevant prefix is used per protocol
/// (DES: 8 key + 8 pre-IV, AES: 16/24/32 key bytes).
///
/// Key material is zeroed from memory on drop via the `zeroize` crate.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: PrivProtocol,
}

impl PrivKey {
    /// Derive a privacy key from a password and engine ID.
    ///
    /// The authentication protocol must produce at least
    /// [`PrivProtocol::key_len`] bytes; see
    /// [`AuthProtocol::is_compatible_with`]. An incompatible combination is
    /// logged and will fail encryption with `InvalidKeyLength`.
    pub fn from_password(
        auth_protocol: AuthProtocol,
        priv_protocol: PrivProtocol,
        password: &[u8],
        engine_id: &[u8],
    ) -> Self {
        if !auth_protocol.is_compatible_with(priv_protocol) {
            tracing::warn!(
                target: "simple_snmpd::usm",
                auth_protocol = %auth_protocol,
                priv_protocol = %priv_protocol,
                auth_key_len = auth_protocol.digest_len(),
                required_key_len = priv_protocol.key_len(),
                "authentication protocol produces insufficient key material for privacy protocol"
            );
        }

        let master_key = super::auth::password_to_key(auth_protocol, password);
        let key = super::auth::localize_key(auth_protocol, &master_key, engine_id);

        Self {
            key,
            protocol: priv_protocol,
        }
    }

    /// Create a privacy key from raw localized key bytes.
    pub fn from_bytes(protocol: PrivProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    /// Get the privacy protocol.
    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    /// Encrypt data and return (ciphertext, privParameters).
    ///
    /// `engine_boots`/`engine_time` are the authoritative engine's values;
    /// the salt comes from the shared counter.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt_counter: &SaltCounter,
    ) -> Result<(Bytes, Bytes)> {
        let salt = salt_counter.next();

        match self.protocol {
            PrivProtocol::Des => self.encrypt_des(plaintext, engine_boots, salt),
            PrivProtocol::Aes128 => self.encrypt_aes(plaintext, engine_boots, engine_time, salt, 16),
            PrivProtocol::Aes192 => self.encrypt_aes(plaintext, engine_boots, engine_time, salt, 24),
            PrivProtocol::Aes256 => self.encrypt_aes(plaintext, engine_boots, engine_time, salt, 32),
        }
    }

    /// Decrypt data using the privParameters from the message.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Bytes> {
        if priv_params.len() != 8 {
            return Err(Error::decrypt(CryptoErrorKind::InvalidPrivParamsLength {
                expected: 8,
                actual: priv_params.len(),
            }));
        }

        match self.protocol {
            PrivProtocol::Des => self.decrypt_des(ciphertext, priv_params),
            PrivProtocol::Aes128 | PrivProtocol::Aes192 | PrivProtocol::Aes256 => {
                self.decrypt_aes(ciphertext, engine_boots, engine_time, priv_params)
            }
        }
    }

    fn check_key_len(&self, needed: usize, encrypting: bool) -> Result<()> {
        if self.key.len() < needed {
            let kind = CryptoErrorKind::InvalidKeyLength;
            return Err(if encrypting {
                Error::encrypt(kind)
            } else {
                Error::decrypt(kind)
            });
        }
        Ok(())
    }

    /// DES-CBC encryption (RFC 3414 Section 8.1.1.1).
    fn encrypt_des(&self, plaintext: &[u8], engine_boots: u32, salt_int: u64) -> Result<(Bytes, Bytes)> {
        use cbc::cipher::{BlockEncryptMut, KeyIvInit};
        type DesCbc = cbc::Encryptor<des::Des>;

        self.check_key_len(16, true)?;

        // DES key is the first 8 bytes; pre-IV the last 8 of the 16-byte key
        let key = &self.key[..8];
        let pre_iv = &self.key[8..16];

        // Salt = engineBoots (4 bytes MSB) || counter low 32 bits (4 bytes MSB)
        let mut salt = [0u8; 8];
        salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
        salt[4..].copy_from_slice(&(salt_int as u32).to_be_bytes());

        // IV = pre-IV XOR salt
        let mut iv = [0u8; 8];
        for i in 0..8 {
            iv[i] = pre_iv[i] ^ salt[i];
        }

        // Zero-pad the plaintext to a multiple of the 8-byte block size
        let padded_len = plaintext.len().div_ceil(8) * 8;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);

        let cipher = DesCbc::new_from_slices(key, &iv)
            .map_err(|_| Error::encrypt(CryptoErrorKind::InvalidKeyLength))?;

        let ciphertext = cipher
            .encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buffer, padded_len)
            .map_err(|_| Error::encrypt(CryptoErrorKind::CipherError))?;

        Ok((
            Bytes::copy_from_slice(ciphertext),
            Bytes::copy_from_slice(&salt),
        ))
    }

    /// DES-CBC decryption (RFC 3414 Section 8.1.1.3).
    fn decrypt_des(&self, ciphertext: &[u8], priv_params: &[u8]) -> Result<Bytes> {
        use cbc::cipher::{BlockDecryptMut, KeyIvInit};
        type DesCbc = cbc::Decryptor<des::Des>;

        self.check_key_len(16, false)?;

        if !ciphertext.len().is_multiple_of(8) || ciphertext.is_empty() {
            return Err(Error::decrypt(CryptoErrorKind::InvalidCiphertextLength {
                length: ciphertext.len(),
                block_size: 8,
            }));
        }

        let key = &self.key[..8];
        let pre_iv = &self.key[8..16];

        // IV = pre-IV XOR salt (salt is the privParameters)
        let mut iv = [0u8; 8];
        for i in 0..8 {
            iv[i] = pre_iv[i] ^ priv_params[i];
        }

        let cipher = DesCbc::new_from_slices(key, &iv)
            .map_err(|_| Error::decrypt(CryptoErrorKind::InvalidKeyLength))?;

        let mut buffer = ciphertext.to_vec();
        let plaintext = cipher
            .decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(&mut buffer)
            .map_err(|_| Error::decrypt(CryptoErrorKind::CipherError))?;

        Ok(Bytes::copy_from_slice(plaintext))
    }

    /// AES-CFB encryption (RFC 3826 Section 3.1.3).
    fn encrypt_aes(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: u64,
        key_len: usize,
    ) -> Result<(Bytes, Bytes)> {
        use aes::{Aes128, Aes192, Aes256};
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};

        self.check_key_len(key_len, true)?;
        let key = &self.key[..key_len];

        let salt_bytes = salt.to_be_bytes();

        // IV = engineBoots (4) || engineTime (4) || salt (8); concatenation,
        // not XOR, unlike DES
        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
        iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
        iv[8..].copy_from_slice(&salt_bytes);

        let mut buffer = plaintext.to_vec();

        match key_len {
            16 => {
                type Aes128Cfb = cfb_mode::Encryptor<Aes128>;
                let cipher = Aes128Cfb::new_from_slices(key, &iv)
                    .map_err(|_| Error::encrypt(CryptoErrorKind::InvalidKeyLength))?;
                cipher.encrypt(&mut buffer);
            }
            24 => {
                type Aes192Cfb = cfb_mode::Encryptor<Aes192>;
                let cipher = Aes192Cfb::new_from_slices(key, &iv)
                    .map_err(|_| Error::encrypt(CryptoErrorKind::InvalidKeyLength))?;
                cipher.encrypt(&mut buffer);
            }
            32 => {
                type Aes256Cfb = cfb_mode::Encryptor<Aes256>;
                let cipher = Aes256Cfb::new_from_slices(key, &iv)
                    .map_err(|_| Error::encrypt(CryptoErrorKind::InvalidKeyLength))?;
                cipher.encrypt(&mut buffer);
            }
            _ => {
                return Err(Error::encrypt(CryptoErrorKind::UnsupportedProtocol));
            }
        }

        Ok((Bytes::from(buffer), Bytes::copy_from_slice(&salt_bytes)))
    }

    /// AES-CFB decryption (RFC 3826 Section 3.1.4).
    fn decrypt_aes(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Bytes> {
        use aes::{Aes128, Aes192, Aes256};
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};

        let key_len = self.protocol.key_len();
        self.check_key_len(key_len, false)?;
        let key = &self.key[..key_len];

        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
        iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
        iv[8..].copy_from_slice(priv_params);

        let mut buffer = ciphertext.to_vec();

        match key_len {
            16 => {
                type Aes128Cfb = cfb_mode::Decryptor<Aes128>;
                let cipher = Aes128Cfb::new_from_slices(key, &iv)
                    .map_err(|_| Error::decrypt(CryptoErrorKind::InvalidKeyLength))?;
                cipher.decrypt(&mut buffer);
            }
            24 => {
                type Aes192Cfb = cfb_mode::Decryptor<Aes192>;
                let cipher = Aes192Cfb::new_from_slices(key, &iv)
                    .map_err(|_| Error::decrypt(CryptoErrorKind::InvalidKeyLength))?;
                cipher.decrypt(&mut buffer);
            }
            32 => {
                type Aes256Cfb = cfb_mode::Decryptor<Aes256>;
                let cipher = Aes256Cfb::new_from_slices(key, &iv)
                    .map_err(|_| Error::decrypt(CryptoErrorKind::InvalidKeyLength))?;
                cipher.decrypt(&mut buffer);
            }
            _ => {
                return Err(Error::decrypt(CryptoErrorKind::UnsupportedProtocol));
            }
        }

        Ok(Bytes::from(buffer))
    }
}

impl std::fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

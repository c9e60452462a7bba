//! The agent's USM user table.
//!
//! Users are defined in configuration and localized against the agent's
//! own engine ID at table construction, so per-request processing only
//! does HMAC/cipher work, never key derivation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use super::auth::LocalizedKey;
use super::privacy::PrivKey;
use super::{AuthProtocol, PrivProtocol};
use crate::error::{Error, Result};
use crate::message::SecurityLevel;

/// A configured USM user with localized key material.
pub struct UsmUser {
    /// Username (the msgUserName field on the wire).
    pub name: Bytes,
    /// Maximum security level this user may operate at.
    pub security_level: SecurityLevel,
    /// Authentication protocol and localized key.
    pub auth: Option<(AuthProtocol, LocalizedKey)>,
    /// Privacy protocol and localized key.
    pub privacy: Option<(PrivProtocol, PrivKey)>,
    /// Disabled users fail lookup as if unknown.
    pub enabled: bool,
    /// Seconds since the epoch when the user was created.
    pub created_at: u64,
    /// Seconds since the epoch of the last request, 0 = never.
    last_used: AtomicU64,
}

impl UsmUser {
    /// Build a user, deriving localized keys against `engine_id`.
    ///
    /// Enforces the level invariants: authPriv needs both protocols,
    /// authNoPriv needs auth and forbids priv, noAuthNoPriv forbids both.
    pub fn new(
        name: impl Into<Bytes>,
        security_level: SecurityLevel,
        auth: Option<(AuthProtocol, &[u8])>,
        privacy: Option<(PrivProtocol, &[u8])>,
        engine_id: &[u8],
    ) -> Result<Self> {
        let name = name.into();
        let display_name = String::from_utf8_lossy(&name).into_owned();

        match security_level {
            SecurityLevel::NoAuthNoPriv => {
                if auth.is_some() || privacy.is_some() {
                    return Err(Error::Config(format!(
                        "user '{}': noAuthNoPriv forbids auth and privacy protocols",
                        display_name
                    )));
                }
            }
            SecurityLevel::AuthNoPriv => {
                if auth.is_none() {
                    return Err(Error::Config(format!(
                        "user '{}': authNoPriv requires an authentication protocol",
                        display_name
                    )));
                }
                if privacy.is_some() {
                    return Err(Error::Config(format!(
                        "user '{}': authNoPriv forbids a privacy protocol",
                        display_name
                    )));
                }
            }
            SecurityLevel::AuthPriv => {
                if auth.is_none() || privacy.is_none() {
                    return Err(Error::Config(format!(
                        "user '{}': authPriv requires both authentication and privacy protocols",
                        display_name
                    )));
                }
            }
        }

        if let (Some((auth_protocol, _)), Some((priv_protocol, _))) = (&auth, &privacy)
            && !auth_protocol.is_compatible_with(*priv_protocol)
        {
            return Err(Error::Config(format!(
                "user '{}': {} does not produce enough key material for {}",
                display_name, auth_protocol, priv_protocol
            )));
        }

        let auth_protocol = auth.as_ref().map(|(p, _)| *p);
        let auth = auth.map(|(protocol, password)| {
            (
                protocol,
                LocalizedKey::from_password(protocol, password, engine_id),
            )
        });
        let privacy = privacy.map(|(protocol, password)| {
            (
                protocol,
                PrivKey::from_password(
                    auth_protocol.expect("authPriv implies auth"),
                    protocol,
                    password,
                    engine_id,
                ),
            )
        });

        Ok(Self {
            name,
            security_level,
            auth,
            privacy,
            enabled: true,
            created_at: unix_now(),
            last_used: AtomicU64::new(0),
        })
    }

    /// Localized authentication key, if any.
    pub fn auth_key(&self) -> Option<&LocalizedKey> {
        self.auth.as_ref().map(|(_, key)| key)
    }

    /// Localized privacy key, if any.
    pub fn priv_key(&self) -> Option<&PrivKey> {
        self.privacy.as_ref().map(|(_, key)| key)
    }

    /// Record a successful request from this user.
    pub fn touch(&self) {
        self.last_used.store(unix_now(), Ordering::Relaxed);
    }

    /// Seconds since the epoch of the last request, or `None` if never used.
    pub fn last_used(&self) -> Option<u64> {
        match self.last_used.load(Ordering::Relaxed) {
            0 => None,
            t => Some(t),
        }
    }
}

impl std::fmt::Debug for UsmUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsmUser")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("security_level", &self.security_level)
            .field("auth", &self.auth.as_ref().map(|(p, _)| p))
            .field("privacy", &self.privacy.as_ref().map(|(p, _)| p))
            .field("enabled", &self.enabled)
            .finish()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The agent's table of USM users, keyed by username.
#[derive(Debug, Default)]
pub struct UsmUserTable {
    users: HashMap<Bytes, UsmUser>,
}

impl UsmUserTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user.
    pub fn insert(&mut self, user: UsmUser) {
        self.users.insert(user.name.clone(), user);
    }

    /// Remove a user by name.
    pub fn remove(&mut self, name: &[u8]) -> Option<UsmUser> {
        self.users.remove(name)
    }

    /// Look up an enabled user by name.
    pub fn get(&self, name: &[u8]) -> Option<&UsmUser> {
        self.users.get(name).filter(|u| u.enabled)
    }

    /// Number of configured users (including disabled).
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if the table has no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

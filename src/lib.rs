//! # simple-snmpd
//!
//! An SNMP agent (daemon) core: listens on UDP for SNMP v1, v2c, and v3
//! requests, evaluates them against an extensible MIB registry, applies
//! USM security and VACM access control, and returns responses. Received
//! traps are logged and handed to a sink callback.
//!
//! ## Subsystems
//!
//! - BER/OID codec with canonical minimal-length emit and permissive parse
//! - MIB registry with lexicographic traversal over scalars and tables
//! - SNMPv3 User-based Security Model (RFC 3414/7860/3826): key
//!   localization, HMAC authentication, DES/AES privacy, engine identity
//!   with persisted boot counter
//! - View-based Access Control Model (RFC 3415) plus a community
//!   front-end with IP filtering and per-source rate limiting
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use simple_snmpd::{Agent, AgentConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), simple_snmpd::Error> {
//!     let config = AgentConfig {
//!         port: 1161, // non-privileged port
//!         community: "public".to_string(),
//!         ..Default::default()
//!     };
//!
//!     let agent = Agent::builder(config).build().await?;
//!     agent.run().await
//! }
//! ```
//!
//! ## SNMPv3 users
//!
//! ```rust,no_run
//! use simple_snmpd::config::{AgentConfig, UsmUserSpec};
//! use simple_snmpd::message::SecurityLevel;
//! use simple_snmpd::v3::{AuthProtocol, PrivProtocol};
//!
//! let mut config = AgentConfig::default();
//! config.usm_users.push(UsmUserSpec {
//!     username: "admin".to_string(),
//!     security_level: SecurityLevel::AuthPriv,
//!     auth_protocol: Some(AuthProtocol::Sha256),
//!     auth_password: Some("authpass123".to_string()),
//!     priv_protocol: Some(PrivProtocol::Aes128),
//!     priv_password: Some("privpass123".to_string()),
//! });
//! ```

pub mod agent;
pub mod ber;
pub mod config;
pub mod error;
pub mod message;
pub mod mib;
pub mod oid;
pub mod pdu;
pub mod security;
pub mod v3;
pub mod vacm;
pub mod value;
pub mod varbind;
pub mod version;

pub(crate) mod util;

// Re-exports for convenience
pub use agent::{Agent, AgentBuilder, RequestContext, TrapEvent, TrapSink};
pub use config::{AgentConfig, LogLevel};
pub use error::{
    AuthErrorKind, CryptoErrorKind, DecodeErrorKind, Error, ErrorStatus, OidErrorKind, Result,
};
pub use message::{CommunityMessage, Message, ScopedPdu, SecurityLevel, V3Message};
pub use mib::standard::{InterfaceInfo, SnmpStats, SystemInfo};
pub use mib::{GetOutcome, MibRegistry, ScalarEntry, TableColumn, ValueKind};
pub use oid::Oid;
pub use pdu::{GenericTrap, Pdu, PduType, TrapV1Pdu};
pub use security::{IpNet, RateLimiter, SecurityFrontend};
pub use v3::{AuthProtocol, LocalEngine, LocalizedKey, PrivKey, PrivProtocol, UsmUser};
pub use vacm::{SecurityModel, VacmBuilder, VacmConfig, View};
pub use value::Value;
pub use varbind::VarBind;
pub use version::Version;

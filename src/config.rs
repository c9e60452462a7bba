//! Agent configuration record.
//!
//! An external reader (file parser, environment, tests) populates
//! [`AgentConfig`]; the agent builder turns it into live tables. With the
//! `serde` feature the records derive `Deserialize`, so any serde format
//! can produce them directly.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::message::SecurityLevel;
use crate::security::IpNet;
use crate::v3::{AuthProtocol, PrivProtocol};

/// Log verbosity for the daemon wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// The equivalent tracing filter directive.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(Error::Config(format!("unknown log level '{}'", s))),
        }
    }
}

/// A USM user definition.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsmUserSpec {
    pub username: String,
    pub security_level: SecurityLevel,
    #[cfg_attr(feature = "serde", serde(default))]
    pub auth_protocol: Option<AuthProtocol>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub auth_password: Option<String>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub priv_protocol: Option<PrivProtocol>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub priv_password: Option<String>,
}

/// A community definition.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommunitySpec {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub read_only: bool,
    /// Optional CIDR source bindings for this community.
    #[cfg_attr(feature = "serde", serde(default))]
    pub sources: Vec<String>,
}

/// A VACM group mapping.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VacmGroupSpec {
    pub security_name: String,
    pub security_model: String,
    pub group: String,
}

/// A VACM access entry.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VacmAccessSpec {
    pub group: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub context_prefix: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub prefix_match: bool,
    #[cfg_attr(feature = "serde", serde(default = "default_level"))]
    pub security_level: SecurityLevel,
    #[cfg_attr(feature = "serde", serde(default))]
    pub read_view: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub write_view: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub notify_view: String,
}

/// One subtree of a VACM view.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ViewSubtreeSpec {
    pub oid: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub mask: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(default = "default_true"))]
    pub included: bool,
}

/// A named VACM view.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VacmViewSpec {
    pub name: String,
    pub subtrees: Vec<ViewSubtreeSpec>,
}

/// Rate limiter policy.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitSpec {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_seconds: 60,
        }
    }
}

/// The agent configuration record.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AgentConfig {
    /// UDP port for requests.
    pub port: u16,
    /// Default read-only community (ignored when `communities` is set).
    pub community: String,
    /// Concurrent in-flight request limit.
    pub max_connections: u32,
    /// Per-request processing deadline in seconds.
    pub timeout_seconds: u32,
    /// Log verbosity.
    pub log_level: LogLevel,
    /// Bind `[::]` instead of `0.0.0.0`.
    pub enable_ipv6: bool,
    /// Also listen for traps on `trap_port`.
    pub enable_trap: bool,
    /// Trap listener port.
    pub trap_port: u16,
    /// Override the bind address entirely.
    pub bind_address: Option<IpAddr>,
    /// Cap on encoded response size (v3 additionally honors msgMaxSize).
    pub max_message_size: usize,
    /// Engine state file (boots counter + engine ID).
    pub engine_state_path: Option<PathBuf>,

    /// Explicit community table; when empty, `community` is used read-only.
    pub communities: Vec<CommunitySpec>,
    /// USM users.
    pub usm_users: Vec<UsmUserSpec>,

    /// VACM tables; all empty means access control is disabled.
    pub vacm_groups: Vec<VacmGroupSpec>,
    pub vacm_accesses: Vec<VacmAccessSpec>,
    pub vacm_views: Vec<VacmViewSpec>,

    /// Source filtering.
    pub allowed_ips: Vec<String>,
    pub denied_ips: Vec<String>,
    pub allowed_subnets: Vec<String>,
    pub denied_subnets: Vec<String>,
    /// Rate limiter policy.
    pub rate_limit: RateLimitSpec,

    /// sysDescr value.
    pub sys_descr: String,
    /// sysContact value.
    pub sys_contact: String,
    /// sysName value (defaults to the host name at build time when empty).
    pub sys_name: String,
    /// sysLocation value.
    pub sys_location: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 161,
            community: "public".to_string(),
            max_connections: 100,
            timeout_seconds: 30,
            log_level: LogLevel::Info,
            enable_ipv6: true,
            enable_trap: false,
            trap_port: 162,
            bind_address: None,
            max_message_size: 1472,
            engine_state_path: None,
            communities: Vec::new(),
            usm_users: Vec::new(),
            vacm_groups: Vec::new(),
            vacm_accesses: Vec::new(),
            vacm_views: Vec::new(),
            allowed_ips: Vec::new(),
            denied_ips: Vec::new(),
            allowed_subnets: Vec::new(),
            denied_subnets: Vec::new(),
            rate_limit: RateLimitSpec::default(),
            sys_descr: "Simple SNMP Daemon".to_string(),
            sys_contact: String::new(),
            sys_name: String::new(),
            sys_location: String::new(),
        }
    }
}

impl AgentConfig {
    /// Validate the record without building anything (`--test-config`).
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("port must be nonzero".to_string()));
        }
        if self.enable_trap && self.trap_port == 0 {
            return Err(Error::Config("trap_port must be nonzero".to_string()));
        }
        if self.enable_trap && self.trap_port == self.port {
            return Err(Error::Config(
                "trap_port must differ from the request port".to_string(),
            ));
        }
        // RFC 3412 floor for any SNMP entity
        if self.max_message_size < 484 {
            return Err(Error::Config(format!(
                "max_message_size {} below the RFC 3412 minimum 484",
                self.max_message_size
            )));
        }
        if self.rate_limit.window_seconds == 0 {
            return Err(Error::Config(
                "rate_limit.window_seconds must be nonzero".to_string(),
            ));
        }

        for user in &self.usm_users {
            self.validate_user(user)?;
        }

        for address in self.allowed_ips.iter().chain(&self.denied_ips) {
            address
                .parse::<IpAddr>()
                .map_err(|_| Error::Config(format!("invalid IP address '{}'", address)))?;
        }
        for subnet in self.allowed_subnets.iter().chain(&self.denied_subnets) {
            IpNet::parse(subnet)?;
        }
        for community in &self.communities {
            for source in &community.sources {
                IpNet::parse(source)?;
            }
        }

        for view in &self.vacm_views {
            for subtree in &view.subtrees {
                crate::oid::Oid::parse(&subtree.oid)?;
            }
        }
        for group in &self.vacm_groups {
            group.security_model.parse::<crate::vacm::SecurityModel>()?;
        }

        Ok(())
    }

    fn validate_user(&self, user: &UsmUserSpec) -> Result<()> {
        let name = &user.username;
        if name.is_empty() {
            return Err(Error::Config("USM username must not be empty".to_string()));
        }

        match user.security_level {
            SecurityLevel::NoAuthNoPriv => {
                if user.auth_protocol.is_some() || user.priv_protocol.is_some() {
                    return Err(Error::Config(format!(
                        "user '{}': noAuthNoPriv forbids auth/priv protocols",
                        name
                    )));
                }
            }
            SecurityLevel::AuthNoPriv => {
                if user.auth_protocol.is_none() || user.auth_password.is_none() {
                    return Err(Error::Config(format!(
                        "user '{}': authNoPriv requires auth protocol and password",
                        name
                    )));
                }
                if user.priv_protocol.is_some() {
                    return Err(Error::Config(format!(
                        "user '{}': authNoPriv forbids a privacy protocol",
                        name
                    )));
                }
            }
            SecurityLevel::AuthPriv => {
                if user.auth_protocol.is_none()
                    || user.auth_password.is_none()
                    || user.priv_protocol.is_none()
                    || user.priv_password.is_none()
                {
                    return Err(Error::Config(format!(
                        "user '{}': authPriv requires auth and priv protocols and passwords",
                        name
                    )));
                }
                let auth = user.auth_protocol.expect("checked above");
                let privacy = user.priv_protocol.expect("checked above");
                if !auth.is_compatible_with(privacy) {
                    return Err(Error::Config(format!(
                        "user '{}': {} does not produce enough key material for {}",
                        name, auth, privacy
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(feature = "serde")]
fn default_true() -> bool {
    true
}

#[cfg(feature = "serde")]
fn default_level() -> SecurityLevel {
    SecurityLevel::NoAuthNoPriv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.port, 161);
        assert_eq!(config.community, "public");
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.timeout_seconds, 30);
        assert!(config.enable_ipv6);
        assert!(!config.enable_trap);
        assert_eq!(config.trap_port, 162);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.rate_limit.window_seconds, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ports() {
        let mut config = AgentConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.port = 161;
        config.enable_trap = true;
        config.trap_port = 161;
        assert!(config.validate().is_err());

        config.trap_port = 162;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_user_levels() {
        let mut config = AgentConfig::default();

        // authPriv missing priv password
        config.usm_users.push(UsmUserSpec {
            username: "admin".to_string(),
            security_level: SecurityLevel::AuthPriv,
            auth_protocol: Some(AuthProtocol::Sha256),
            auth_password: Some("authpass123".to_string()),
            priv_protocol: Some(PrivProtocol::Aes128),
            priv_password: None,
        });
        assert!(config.validate().is_err());

        config.usm_users[0].priv_password = Some("privpass123".to_string());
        assert!(config.validate().is_ok());

        // Incompatible auth/priv combination
        config.usm_users[0].auth_protocol = Some(AuthProtocol::Sha1);
        config.usm_users[0].priv_protocol = Some(PrivProtocol::Aes256);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_networks() {
        let mut config = AgentConfig::default();
        config.allowed_subnets.push("10.0.0.0/8".to_string());
        assert!(config.validate().is_ok());

        config.denied_subnets.push("10.0.0.0/99".to_string());
        assert!(config.validate().is_err());

        config.denied_subnets.clear();
        config.denied_ips.push("not-an-ip".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_vacm_oids() {
        let mut config = AgentConfig::default();
        config.vacm_views.push(VacmViewSpec {
            name: "all".to_string(),
            subtrees: vec![ViewSubtreeSpec {
                oid: "1.3.6.1".to_string(),
                mask: vec![],
                included: true,
            }],
        });
        assert!(config.validate().is_ok());

        config.vacm_views[0].subtrees[0].oid = "1.3.junk".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_message_size_floor() {
        let config = AgentConfig {
            max_message_size: 400,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("chatty".parse::<LogLevel>().is_err());
    }
}

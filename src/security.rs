//! Security front-end for community-based requests.
//!
//! Checks run in order per datagram: source-IP allow/deny (exact addresses
//! and CIDR subnets), the per-IP rate limiter, then community validation.
//! Community comparison is constant-time to keep timing from leaking which
//! strings are configured.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

/// An IP network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNet {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNet {
    /// Create from an address and prefix length.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(Error::Config(format!(
                "prefix length /{} too long for {}",
                prefix_len, addr
            )));
        }
        Ok(Self { addr, prefix_len })
    }

    /// Parse "10.0.0.0/8" or a bare address (full-length prefix).
    pub fn parse(s: &str) -> Result<Self> {
        match s.split_once('/') {
            Some((addr, prefix)) => {
                let addr: IpAddr = addr
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid network address '{}'", s)))?;
                let prefix_len: u8 = prefix
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid prefix length '{}'", s)))?;
                Self::new(addr, prefix_len)
            }
            None => {
                let addr: IpAddr = s
                    .parse()
                    .map_err(|_| Error::Config(format!("invalid address '{}'", s)))?;
                let prefix_len = match addr {
                    IpAddr::V4(_) => 32,
                    IpAddr::V6(_) => 128,
                };
                Ok(Self { addr, prefix_len })
            }
        }
    }

    /// Check if an address falls inside this network.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let net = u32::from(net);
                let ip = u32::from(ip);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len)
                };
                (net & mask) == (ip & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let net = u128::from(net);
                let ip = u128::from(ip);
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len)
                };
                (net & mask) == (ip & mask)
            }
            // Address family mismatch never matches
            _ => false,
        }
    }
}

impl std::str::FromStr for IpNet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Access granted by a community string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommunityAccess {
    /// Read-only communities reject SET before dispatch.
    pub read_only: bool,
}

/// A configured community.
#[derive(Debug, Clone)]
pub struct CommunityEntry {
    /// The community string.
    pub name: Vec<u8>,
    /// Whether SET is refused for this community.
    pub read_only: bool,
    /// Optional source binding: when non-empty, requests using this
    /// community must come from one of these networks.
    pub sources: Vec<IpNet>,
}

impl CommunityEntry {
    /// A read-only community with no source binding.
    pub fn read_only(name: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            read_only: true,
            sources: Vec::new(),
        }
    }

    /// A read-write community with no source binding.
    pub fn read_write(name: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            read_only: false,
            sources: Vec::new(),
        }
    }

    /// Restrict this community to the given source networks.
    pub fn with_sources(mut self, sources: Vec<IpNet>) -> Self {
        self.sources = sources;
        self
    }
}

/// Sliding-window state for one source address.
#[derive(Debug)]
struct RateBucket {
    window_start: Instant,
    request_count: u32,
}

/// Per-source-IP rate limiter.
///
/// Counts requests in fixed windows: when `window` has elapsed since the
/// bucket's window start, the bucket resets; within the window at most
/// `max_requests` packets are admitted.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    buckets: Mutex<HashMap<IpAddr, RateBucket>>,
}

impl RateLimiter {
    /// Default window: 100 requests per 60 seconds.
    pub fn default_policy() -> Self {
        Self::new(100, Duration::from_secs(60))
    }

    /// Create with an explicit policy.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or drop one packet from `ip`.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let bucket = buckets.entry(ip).or_insert(RateBucket {
            window_start: now,
            request_count: 0,
        });

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.request_count = 0;
        }

        if bucket.request_count >= self.max_requests {
            return false;
        }

        bucket.request_count += 1;
        true
    }

    /// Drop buckets idle for longer than `max_idle`.
    pub fn sweep(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets.retain(|_, bucket| now.duration_since(bucket.window_start) < max_idle);
    }

    /// Number of live buckets.
    pub fn tracked_sources(&self) -> usize {
        self.buckets.lock().map(|b| b.len()).unwrap_or(0)
    }
}

/// The assembled v1/v2c front-end.
#[derive(Debug)]
pub struct SecurityFrontend {
    communities: Vec<CommunityEntry>,
    allowed_ips: HashSet<IpAddr>,
    denied_ips: HashSet<IpAddr>,
    allowed_subnets: Vec<IpNet>,
    denied_subnets: Vec<IpNet>,
    rate_limiter: RateLimiter,
}

impl SecurityFrontend {
    /// Create a front-end with no communities and default rate limits.
    pub fn new() -> Self {
        Self {
            communities: Vec::new(),
            allowed_ips: HashSet::new(),
            denied_ips: HashSet::new(),
            allowed_subnets: Vec::new(),
            denied_subnets: Vec::new(),
            rate_limiter: RateLimiter::default_policy(),
        }
    }

    /// Replace the rate limiter policy.
    pub fn with_rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.rate_limiter = RateLimiter::new(max_requests, window);
        self
    }

    /// Add a community.
    pub fn add_community(&mut self, entry: CommunityEntry) {
        self.communities.push(entry);
    }

    /// Add an explicitly allowed source address.
    pub fn add_allowed_ip(&mut self, ip: IpAddr) {
        self.allowed_ips.insert(ip);
    }

    /// Add an explicitly denied source address.
    pub fn add_denied_ip(&mut self, ip: IpAddr) {
        self.denied_ips.insert(ip);
    }

    /// Add an allowed source network.
    pub fn add_allowed_subnet(&mut self, net: IpNet) {
        self.allowed_subnets.push(net);
    }

    /// Add a denied source network.
    pub fn add_denied_subnet(&mut self, net: IpNet) {
        self.denied_subnets.push(net);
    }

    /// Check the source-IP allow/deny lists.
    ///
    /// Deny entries win. When any allow entry exists the allow lists are
    /// exhaustive; with no allow entries every non-denied source passes.
    pub fn is_ip_allowed(&self, ip: IpAddr) -> bool {
        if self.denied_ips.contains(&ip) {
            return false;
        }
        if self.denied_subnets.iter().any(|net| net.contains(ip)) {
            return false;
        }

        if self.allowed_ips.is_empty() && self.allowed_subnets.is_empty() {
            return true;
        }

        self.allowed_ips.contains(&ip) || self.allowed_subnets.iter().any(|net| net.contains(ip))
    }

    /// Admit or drop one packet from `ip` under the rate policy.
    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        self.rate_limiter.check(ip)
    }

    /// Evict idle rate-limit buckets.
    pub fn sweep_rate_buckets(&self, max_idle: Duration) {
        self.rate_limiter.sweep(max_idle)
    }

    /// Validate a community string from `source`.
    ///
    /// Compares against every configured community regardless of early
    /// matches, in constant time per candidate. A matching community with a
    /// source binding also requires the source to be inside one of its
    /// networks ("bad community use" as opposed to "bad community name").
    pub fn validate_community(&self, community: &[u8], source: IpAddr) -> CommunityLookup {
        let mut matched: Option<&CommunityEntry> = None;

        for entry in &self.communities {
            if entry.name.len() == community.len()
                && bool::from(entry.name.as_slice().ct_eq(community))
            {
                matched = Some(entry);
            }
        }

        let Some(entry) = matched else {
            return CommunityLookup::UnknownName;
        };

        if !entry.sources.is_empty() && !entry.sources.iter().any(|net| net.contains(source)) {
            return CommunityLookup::SourceMismatch;
        }

        CommunityLookup::Valid(CommunityAccess {
            read_only: entry.read_only,
        })
    }

    /// Whether any community is configured.
    pub fn has_communities(&self) -> bool {
        !self.communities.is_empty()
    }
}

impl Default for SecurityFrontend {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a community validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityLookup {
    /// Known community from an acceptable source.
    Valid(CommunityAccess),
    /// No configured community matched (snmpInBadCommunityNames).
    UnknownName,
    /// Community matched but the source violates its binding
    /// (snmpInBadCommunityUses).
    SourceMismatch,
}

//! Local SNMP engine identity (RFC 3411) and USM statistics.
//!
//! The authoritative engine carries three values used for v3 replay
//! protection: `engineID` (opaque identity), `engineBoots` (count of
//! restarts, persisted across them), and `engineTime` (seconds since the
//! current boot, derived from a monotonic clock).
//!
//! `engineBoots` is written to a small state file before the agent starts
//! accepting requests, so a restart observed by peers always carries a
//! higher boot count.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use crate::oid::Oid;

/// Time window in seconds (RFC 3414 Section 2.2.3).
pub const TIME_WINDOW: u32 = 150;

/// Maximum valid snmpEngineTime value (RFC 3414 Section 2.2.1).
///
/// snmpEngineTime is a 31-bit value; on reaching the maximum the engine
/// should reset it to zero and increment snmpEngineBoots.
pub const MAX_ENGINE_TIME: u32 = 2147483647;

/// usmStats OIDs placed in Report PDUs (RFC 3414 Section 5).
pub mod report_oids {
    use crate::Oid;
    use crate::oid;

    /// 1.3.6.1.6.3.15.1.1.1.0 - usmStatsUnsupportedSecLevels
    pub fn unsupported_sec_levels() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 1, 0)
    }

    /// 1.3.6.1.6.3.15.1.1.2.0 - usmStatsNotInTimeWindows
    pub fn not_in_time_windows() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0)
    }

    /// 1.3.6.1.6.3.15.1.1.3.0 - usmStatsUnknownUserNames
    pub fn unknown_user_names() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 3, 0)
    }

    /// 1.3.6.1.6.3.15.1.1.4.0 - usmStatsUnknownEngineIDs
    pub fn unknown_engine_ids() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0)
    }

    /// 1.3.6.1.6.3.15.1.1.5.0 - usmStatsWrongDigests
    pub fn wrong_digests() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0)
    }

    /// 1.3.6.1.6.3.15.1.1.6.0 - usmStatsDecryptionErrors
    pub fn decryption_errors() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 6, 0)
    }
}

/// usmStats failure counters (RFC 3414 Section 5).
///
/// Every v3 security failure increments exactly one of these; the Report
/// PDU signalling the failure carries the live counter value.
#[derive(Debug, Default)]
pub struct UsmStats {
    pub unsupported_sec_levels: AtomicU32,
    pub not_in_time_windows: AtomicU32,
    pub unknown_user_names: AtomicU32,
    pub unknown_engine_ids: AtomicU32,
    pub wrong_digests: AtomicU32,
    pub decryption_errors: AtomicU32,
}

impl UsmStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter behind a report OID and return the new value.
    pub fn increment_for(&self, report_oid: &Oid) -> u32 {
        self.counter_for(report_oid)
            .map(|c| c.fetch_add(1, Ordering::Relaxed) + 1)
            .unwrap_or(0)
    }

    /// Read the counter behind a report OID.
    pub fn value_for(&self, report_oid: &Oid) -> u32 {
        self.counter_for(report_oid)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn counter_for(&self, report_oid: &Oid) -> Option<&AtomicU32> {
        // usmStats scalars share the prefix 1.3.6.1.6.3.15.1.1.<n>.0
        let arcs = report_oid.arcs();
        if arcs.len() != 11 || !report_oid.starts_with(&crate::oid!(1, 3, 6, 1, 6, 3, 15, 1, 1)) {
            return None;
        }
        match arcs[9] {
            1 => Some(&self.unsupported_sec_levels),
            2 => Some(&self.not_in_time_windows),
            3 => Some(&self.unknown_user_names),
            4 => Some(&self.unknown_engine_ids),
            5 => Some(&self.wrong_digests),
            6 => Some(&self.decryption_errors),
            _ => None,
        }
    }
}

/// The agent's authoritative engine identity.
#[derive(Debug)]
pub struct LocalEngine {
    engine_id: Vec<u8>,
    boots: u32,
    started: Instant,
    state_path: Option<PathBuf>,
}

impl LocalEngine {
    /// Open the engine identity, persisting the incremented boot counter.
    ///
    /// Loads `{boots, engineID}` from `state_path` when present, increments
    /// boots, and rewrites the file before returning. A missing or invalid
    /// file produces a fresh engine ID and boots = 1.
    pub fn open(state_path: impl Into<PathBuf>) -> io::Result<Self> {
        let state_path = state_path.into();
        let (prev_boots, engine_id) = match read_state_file(&state_path) {
            Some(state) => state,
            None => (0, generate_engine_id()),
        };

        let boots = prev_boots.saturating_add(1).min(MAX_ENGINE_TIME);
        write_state_file(&state_path, boots, &engine_id)?;

        Ok(Self {
            engine_id,
            boots,
            started: Instant::now(),
            state_path: Some(state_path),
        })
    }

    /// Create an ephemeral engine (no persistence), mainly for tests.
    pub fn ephemeral() -> Self {
        Self {
            engine_id: generate_engine_id(),
            boots: 1,
            started: Instant::now(),
            state_path: None,
        }
    }

    /// Create an engine with a fixed ID and no persistence.
    pub fn with_engine_id(engine_id: impl Into<Vec<u8>>) -> Self {
        Self {
            engine_id: engine_id.into(),
            boots: 1,
            started: Instant::now(),
            state_path: None,
        }
    }

    /// The engine ID (RFC 3411 SnmpEngineID format).
    pub fn engine_id(&self) -> &[u8] {
        &self.engine_id
    }

    /// The boot counter for this process lifetime.
    pub fn boots(&self) -> u32 {
        self.boots
    }

    /// Seconds since this engine instance started, capped per RFC 3414.
    pub fn time(&self) -> u32 {
        (self.started.elapsed().as_secs() as u32).min(MAX_ENGINE_TIME)
    }

    /// Path of the persistence file, if any.
    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    /// Check an incoming message against the local time window
    /// (RFC 3414 Section 3.2 Step 7a).
    ///
    /// Fails closed when local boots is latched at the maximum; otherwise
    /// boots must match and the time difference must be within 150 seconds.
    pub fn in_time_window(&self, msg_boots: u32, msg_time: u32) -> bool {
        if self.boots == MAX_ENGINE_TIME {
            return false;
        }

        if msg_boots != self.boots {
            return false;
        }

        msg_time.abs_diff(self.time()) <= TIME_WINDOW
    }
}

/// Generate an engine ID in RFC 3411 enterprise format.
///
/// Layout: 4 bytes of enterprise number with the high bit set (format
/// indicator), 1 format octet (4 = administratively assigned text), then
/// the host name (falling back to random bytes when unavailable).
fn generate_engine_id() -> Vec<u8> {
    // net-snmp's enterprise number, the conventional default
    const ENTERPRISE: u32 = 8072;

    let mut id = (0x8000_0000u32 | ENTERPRISE).to_be_bytes().to_vec();
    id.push(0x04); // administratively assigned text

    let host = std::env::var("HOSTNAME").unwrap_or_default();
    if host.is_empty() {
        let mut random = [0u8; 8];
        getrandom::fill(&mut random).expect("getrandom failed");
        id.extend_from_slice(&random);
    } else {
        // SnmpEngineID is capped at 32 octets
        id.extend_from_slice(&host.as_bytes()[..host.len().min(27)]);
    }

    id
}

fn read_state_file(path: &Path) -> Option<(u32, Vec<u8>)> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut lines = content.lines();

    let boots: u32 = lines.next()?.trim().parse().ok()?;
    let id_hex = lines.next()?.trim();
    let engine_id = decode_hex(id_hex)?;
    if engine_id.is_empty() {
        return None;
    }

    Some((boots, engine_id))
}

fn write_state_file(path: &Path, boots: u32, engine_id: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let content = format!("{}\n{}\n", boots, crate::util::encode_hex(engine_id));
    std::fs::write(path, content)
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if !s.len().is_multiple_of(2) {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

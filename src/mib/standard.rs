//! Standard MIB population: system, interfaces, and snmp groups plus the
//! usmStats scalars.
//!
//! All values come from the agent's own state: identity strings from
//! configuration, sysUpTime from the process monotonic clock, counters from
//! the shared statistics structs. sysContact, sysName, and sysLocation are
//! the classic writable scalars; everything else is read-only.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use bytes::Bytes;

use super::{MibRegistry, ScalarEntry, TableColumn, ValueKind};
use crate::error::ErrorStatus;
use crate::oid;
use crate::oid::Oid;
use crate::v3::UsmStats;
use crate::value::Value;

/// snmp group counters (RFC 3418 Section 4).
#[derive(Debug, Default)]
pub struct SnmpStats {
    pub in_pkts: AtomicU32,
    pub out_pkts: AtomicU32,
    pub in_bad_versions: AtomicU32,
    pub in_bad_community_names: AtomicU32,
    pub in_bad_community_uses: AtomicU32,
    pub in_asn_parse_errs: AtomicU32,
}

impl SnmpStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_in_pkts(&self) {
        self.in_pkts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_out_pkts(&self) {
        self.out_pkts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_in_bad_versions(&self) {
        self.in_bad_versions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_in_bad_community_names(&self) {
        self.in_bad_community_names.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_in_bad_community_uses(&self) {
        self.in_bad_community_uses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_in_asn_parse_errs(&self) {
        self.in_asn_parse_errs.fetch_add(1, Ordering::Relaxed);
    }
}

/// System group identity (RFC 3418 Section 2).
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub sys_descr: String,
    pub sys_object_id: Oid,
    pub sys_contact: String,
    pub sys_name: String,
    pub sys_location: String,
    pub sys_services: i32,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            sys_descr: "Simple SNMP Daemon".to_string(),
            // net-snmp enterprise arc as a neutral default identity
            sys_object_id: oid!(1, 3, 6, 1, 4, 1, 8072, 3, 2, 10),
            sys_contact: String::new(),
            sys_name: String::new(),
            sys_location: String::new(),
            // application(7) + end-to-end(4) + internet(3)
            sys_services: 72,
        }
    }
}

/// One row of the interfaces table.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub descr: String,
    /// IANAifType; 6 = ethernetCsmacd, 24 = softwareLoopback.
    pub if_type: i32,
    pub mtu: i32,
    /// Bits per second.
    pub speed: u32,
    pub phys_address: Vec<u8>,
    /// 1 = up, 2 = down.
    pub oper_status: i32,
    pub in_octets: Arc<AtomicU32>,
    pub out_octets: Arc<AtomicU32>,
}

impl InterfaceInfo {
    /// A software loopback row.
    pub fn loopback() -> Self {
        Self {
            descr: "lo".to_string(),
            if_type: 24,
            mtu: 65536,
            speed: 10_000_000,
            phys_address: Vec::new(),
            oper_status: 1,
            in_octets: Arc::new(AtomicU32::new(0)),
            out_octets: Arc::new(AtomicU32::new(0)),
        }
    }

    /// An ethernet row with the given description and MAC address.
    pub fn ethernet(descr: impl Into<String>, phys_address: [u8; 6]) -> Self {
        Self {
            descr: descr.into(),
            if_type: 6,
            mtu: 1500,
            speed: 1_000_000_000,
            phys_address: phys_address.to_vec(),
            oper_status: 1,
            in_octets: Arc::new(AtomicU32::new(0)),
            out_octets: Arc::new(AtomicU32::new(0)),
        }
    }
}

/// Register the system group (1.3.6.1.2.1.1).
///
/// `started` anchors sysUpTime; sysContact/sysName/sysLocation are
/// read-write, the rest read-only.
pub fn register_system_group(registry: &mut MibRegistry, info: &SystemInfo, started: Instant) {
    let system = oid!(1, 3, 6, 1, 2, 1, 1);

    let sys_descr = info.sys_descr.clone();
    registry.register_scalar(ScalarEntry {
        oid: system.child(1),
        kind: ValueKind::OctetString,
        read_only: true,
        getter: Box::new(move || Value::from(sys_descr.clone())),
        setter: None,
    });

    let sys_object_id = info.sys_object_id.clone();
    registry.register_scalar(ScalarEntry {
        oid: system.child(2),
        kind: ValueKind::ObjectIdentifier,
        read_only: true,
        getter: Box::new(move || Value::ObjectIdentifier(sys_object_id.clone())),
        setter: None,
    });

    registry.register_scalar(ScalarEntry {
        oid: system.child(3),
        kind: ValueKind::TimeTicks,
        read_only: true,
        // TimeTicks are hundredths of seconds since start
        getter: Box::new(move || {
            Value::TimeTicks((started.elapsed().as_millis() / 10) as u32)
        }),
        setter: None,
    });

    register_writable_string(registry, system.child(4), &info.sys_contact);
    register_writable_string(registry, system.child(5), &info.sys_name);
    register_writable_string(registry, system.child(6), &info.sys_location);

    let sys_services = info.sys_services;
    registry.register_scalar(ScalarEntry {
        oid: system.child(7),
        kind: ValueKind::Integer,
        read_only: true,
        getter: Box::new(move || Value::Integer(sys_services)),
        setter: None,
    });
}

fn register_writable_string(registry: &mut MibRegistry, oid: Oid, initial: &str) {
    let stored = Arc::new(RwLock::new(initial.to_string()));
    let stored_get = Arc::clone(&stored);
    let stored_set = Arc::clone(&stored);

    registry.register_scalar(ScalarEntry {
        oid,
        kind: ValueKind::OctetString,
        read_only: false,
        getter: Box::new(move || {
            Value::from(stored_get.read().map(|s| s.clone()).unwrap_or_default())
        }),
        setter: Some(Box::new(move |value| {
            // RFC 3418 DisplayString is capped at 255 octets
            let bytes = value.as_bytes().ok_or(ErrorStatus::WrongType)?;
            if bytes.len() > 255 {
                return Err(ErrorStatus::WrongLength);
            }
            let text = String::from_utf8(bytes.to_vec()).map_err(|_| ErrorStatus::WrongValue)?;
            *stored_set.write().map_err(|_| ErrorStatus::GenErr)? = text;
            Ok(())
        })),
    });
}

/// Register the interfaces group (1.3.6.1.2.1.2): ifNumber plus the
/// minimum ifTable columns.
pub fn register_interfaces_group(registry: &mut MibRegistry, interfaces: Vec<InterfaceInfo>) {
    let interfaces = Arc::new(interfaces);
    let if_entry = oid!(1, 3, 6, 1, 2, 1, 2, 2, 1);
    let count = interfaces.len() as i32;
    let max_index = interfaces.len() as u32;

    registry.register_scalar(ScalarEntry {
        oid: oid!(1, 3, 6, 1, 2, 1, 2, 1),
        kind: ValueKind::Integer,
        read_only: true,
        getter: Box::new(move || Value::Integer(count)),
        setter: None,
    });

    if max_index == 0 {
        return;
    }

    // ifIndex
    registry.register_column(TableColumn {
        oid: if_entry.child(1),
        max_index,
        kind: ValueKind::Integer,
        read_only: true,
        getter: Box::new(move |index| Some(Value::Integer(index as i32))),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(2),
        max_index,
        kind: ValueKind::OctetString,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::from(iface.descr.clone()))
        }),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(3),
        max_index,
        kind: ValueKind::Integer,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::Integer(iface.if_type))
        }),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(4),
        max_index,
        kind: ValueKind::Integer,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::Integer(iface.mtu))
        }),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(5),
        max_index,
        kind: ValueKind::Gauge32,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::Gauge32(iface.speed))
        }),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(6),
        max_index,
        kind: ValueKind::OctetString,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::OctetString(Bytes::copy_from_slice(&iface.phys_address)))
        }),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(8),
        max_index,
        kind: ValueKind::Integer,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::Integer(iface.oper_status))
        }),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(10),
        max_index,
        kind: ValueKind::Counter32,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::Counter32(iface.in_octets.load(Ordering::Relaxed)))
        }),
        setter: None,
    });

    let table = Arc::clone(&interfaces);
    registry.register_column(TableColumn {
        oid: if_entry.child(16),
        max_index,
        kind: ValueKind::Counter32,
        read_only: true,
        getter: Box::new(move |index| {
            table
                .get(index as usize - 1)
                .map(|iface| Value::Counter32(iface.out_octets.load(Ordering::Relaxed)))
        }),
        setter: None,
    });
}

/// Register the snmp group counters (1.3.6.1.2.1.11).
pub fn register_snmp_group(registry: &mut MibRegistry, stats: Arc<SnmpStats>) {
    let snmp = oid!(1, 3, 6, 1, 2, 1, 11);

    register_counter(registry, snmp.child(1), {
        let stats = Arc::clone(&stats);
        move || stats.in_pkts.load(Ordering::Relaxed)
    });
    register_counter(registry, snmp.child(2), {
        let stats = Arc::clone(&stats);
        move || stats.out_pkts.load(Ordering::Relaxed)
    });
    register_counter(registry, snmp.child(3), {
        let stats = Arc::clone(&stats);
        move || stats.in_bad_versions.load(Ordering::Relaxed)
    });
    register_counter(registry, snmp.child(4), {
        let stats = Arc::clone(&stats);
        move || stats.in_bad_community_names.load(Ordering::Relaxed)
    });
    register_counter(registry, snmp.child(5), {
        let stats = Arc::clone(&stats);
        move || stats.in_bad_community_uses.load(Ordering::Relaxed)
    });
    register_counter(registry, snmp.child(6), {
        let stats = Arc::clone(&stats);
        move || stats.in_asn_parse_errs.load(Ordering::Relaxed)
    });
}

/// Register the usmStats scalars (1.3.6.1.6.3.15.1.1) so the security
/// counters are readable over SNMP.
pub fn register_usm_stats(registry: &mut MibRegistry, stats: Arc<UsmStats>) {
    let usm_stats = oid!(1, 3, 6, 1, 6, 3, 15, 1, 1);

    register_counter(registry, usm_stats.child(1), {
        let stats = Arc::clone(&stats);
        move || stats.unsupported_sec_levels.load(Ordering::Relaxed)
    });
    register_counter(registry, usm_stats.child(2), {
        let stats = Arc::clone(&stats);
        move || stats.not_in_time_windows.load(Ordering::Relaxed)
    });
    register_counter(registry, usm_stats.child(3), {
        let stats = Arc::clone(&stats);
        move || stats.unknown_user_names.load(Ordering::Relaxed)
    });
    register_counter(registry, usm_stats.child(4), {
        let stats = Arc::clone(&stats);
        move || stats.unknown_engine_ids.load(Ordering::Relaxed)
    });
    register_counter(registry, usm_stats.child(5), {
        let stats = Arc::clone(&stats);
        move || stats.wrong_digests.load(Ordering::Relaxed)
    });
    register_counter(registry, usm_stats.child(6), {
        let stats = Arc::clone(&stats);
        move || stats.decryption_errors.load(Ordering::Relaxed)
    });
}

fn register_counter(
    registry: &mut MibRegistry,
    oid: Oid,
    read: impl Fn() -> u32 + Send + Sync + 'static,
) {
    registry.register_scalar(ScalarEntry {
        oid,
        kind: ValueKind::Counter32,
        read_only: true,
        getter: Box::new(move || Value::Counter32(read())),
        setter: None,
    });
}

/// Uptime in TimeTicks for trap payloads.
pub fn uptime_ticks(started: Instant) -> u32 {
    (started.elapsed().as_millis() / 10) as u32
}

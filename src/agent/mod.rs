//! The SNMP agent: socket loop, per-version request paths, and the PDU
//! dispatcher.
//!
//! One reader loop blocks on the request socket (plus an optional trap
//! socket) and hands each datagram to a worker task. Admission is bounded
//! by a semaphore sized from `max_connections`; the tokio blocking pool
//! executes the synchronous request pipeline so a slow MIB getter cannot
//! stall the reader. Responses go back through the shared socket, which is
//! safe to use from any number of tasks.
//!
//! Processing per packet is stateless: decode, security, dispatch against
//! the MIB registry under its reader lock, encode. Only the SET apply
//! phase takes the registry writer lock.

mod request;
mod response;
mod set_handler;

use std::net::SocketAddr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::error::{Error, ErrorStatus, Result};
use crate::mib::standard::{
    self, InterfaceInfo, SnmpStats, SystemInfo, register_interfaces_group, register_snmp_group,
    register_system_group, register_usm_stats,
};
use crate::mib::{GetOutcome, MibRegistry};
use crate::message::SecurityLevel;
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::security::{CommunityEntry, IpNet, SecurityFrontend};
use crate::util::bind_udp_socket;
use crate::v3::users::{UsmUser, UsmUserTable};
use crate::v3::{LocalEngine, SaltCounter, UsmStats};
use crate::vacm::{
    AccessEntryBuilder, Operation, SecurityModel, VacmConfig, View, ViewSubtree,
};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

/// Maximum UDP payload (65535 - 20 IPv4 - 8 UDP).
pub(crate) const UDP_MAX_PAYLOAD: usize = 65507;

/// Conservative estimate of message framing around the varbind list
/// (version, community/USM header, PDU header).
pub(crate) const RESPONSE_OVERHEAD: usize = 100;

/// How often the rate-limit map is swept.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Rate-limit buckets idle longer than this are evicted.
const SWEEP_MAX_IDLE: Duration = Duration::from_secs(600);

/// Request context threaded through dispatch.
///
/// Carries the security identity resolved by the per-version front-ends
/// and the VACM views selected for it, so per-varbind checks need no
/// further table lookups.
#[derive(Clone)]
pub struct RequestContext {
    /// Source address of the request.
    pub source: SocketAddr,
    /// SNMP version.
    pub version: Version,
    /// Security model (V1, V2c, or Usm).
    pub security_model: SecurityModel,
    /// Community string or USM username.
    pub security_name: Bytes,
    /// Security level (NoAuthNoPriv for v1/v2c).
    pub security_level: SecurityLevel,
    /// Context name (v3 only, empty otherwise).
    pub context_name: Bytes,
    /// Request ID from the PDU.
    pub request_id: i32,
    /// PDU type being dispatched.
    pub pdu_type: PduType,
    /// Community grants write access (v1/v2c; true for v3).
    pub community_writable: bool,
    /// Response size budget for this request.
    pub max_response_size: usize,
    /// VACM tables in effect, when access control is enabled.
    vacm: Option<Arc<VacmConfig>>,
    /// Read view selected for this principal.
    read_view: Option<Bytes>,
    /// Write view selected for this principal.
    write_view: Option<Bytes>,
}

impl RequestContext {
    /// Per-varbind read permission.
    pub fn can_read(&self, oid: &Oid) -> bool {
        match &self.vacm {
            Some(vacm) => vacm.check_access(self.read_view.as_ref(), oid),
            None => true,
        }
    }

    /// Per-varbind write permission.
    pub fn can_write(&self, oid: &Oid) -> bool {
        match &self.vacm {
            Some(vacm) => vacm.check_access(self.write_view.as_ref(), oid),
            None => true,
        }
    }
}

/// A received trap or inform, as handed to the trap sink.
#[derive(Debug, Clone)]
pub struct TrapEvent {
    /// Sender address.
    pub source: SocketAddr,
    /// Message version.
    pub version: Version,
    /// Community (v1/v2c) or username (v3).
    pub security_name: Bytes,
    /// snmpTrapOID for v2 traps, the RFC 3584 translation for v1 traps.
    pub trap_oid: Option<Oid>,
    /// Varbind payload.
    pub varbinds: Vec<VarBind>,
}

/// Callback invoked for every received trap.
pub type TrapSink = Arc<dyn Fn(TrapEvent) + Send + Sync>;

/// Builder for [`Agent`].
pub struct AgentBuilder {
    config: AgentConfig,
    interfaces: Vec<InterfaceInfo>,
    trap_sink: Option<TrapSink>,
    cancel: Option<CancellationToken>,
    configure_mib: Option<Box<dyn FnOnce(&mut MibRegistry) + Send>>,
    bind_override: Option<SocketAddr>,
    trap_bind_override: Option<SocketAddr>,
}

impl AgentBuilder {
    /// Create a builder from a configuration record.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            interfaces: vec![InterfaceInfo::loopback()],
            trap_sink: None,
            cancel: None,
            configure_mib: None,
            bind_override: None,
            trap_bind_override: None,
        }
    }

    /// Replace the interface table rows.
    pub fn interfaces(mut self, interfaces: Vec<InterfaceInfo>) -> Self {
        self.interfaces = interfaces;
        self
    }

    /// Install a callback for received traps and informs.
    pub fn trap_sink(mut self, sink: impl Fn(TrapEvent) + Send + Sync + 'static) -> Self {
        self.trap_sink = Some(Arc::new(sink));
        self
    }

    /// Use an external cancellation token for shutdown.
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Register additional MIB objects after the standard groups.
    pub fn configure_mib(mut self, f: impl FnOnce(&mut MibRegistry) + Send + 'static) -> Self {
        self.configure_mib = Some(Box::new(f));
        self
    }

    /// Bind exactly this address instead of deriving one from the config.
    /// Port 0 picks an ephemeral port; used by tests.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_override = Some(addr);
        self
    }

    /// Bind exactly this address for the trap listener.
    pub fn trap_bind(mut self, addr: SocketAddr) -> Self {
        self.trap_bind_override = Some(addr);
        self
    }

    /// Validate the configuration, bind sockets, build all tables.
    pub async fn build(self) -> Result<Agent> {
        let config = self.config;
        config.validate()?;

        let bind_addr = self.bind_override.unwrap_or_else(|| {
            let ip = config.bind_address.unwrap_or(if config.enable_ipv6 {
                std::net::IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
            } else {
                std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
            });
            SocketAddr::new(ip, config.port)
        });

        let socket =
            bind_udp_socket(bind_addr, Some(4 * 1024 * 1024)).map_err(|e| Error::io_at(bind_addr, e))?;
        let local_addr = socket.local_addr().map_err(|e| Error::io_at(bind_addr, e))?;

        let trap_socket = if config.enable_trap {
            let trap_addr = self
                .trap_bind_override
                .unwrap_or_else(|| SocketAddr::new(bind_addr.ip(), config.trap_port));
            let socket =
                bind_udp_socket(trap_addr, None).map_err(|e| Error::io_at(trap_addr, e))?;
            Some(Arc::new(socket))
        } else {
            None
        };

        let engine = match &config.engine_state_path {
            Some(path) => LocalEngine::open(path).map_err(Error::io)?,
            None => LocalEngine::ephemeral(),
        };

        let started = Instant::now();
        let stats = Arc::new(SnmpStats::new());
        let usm_stats = Arc::new(UsmStats::new());

        let users = build_user_table(&config, engine.engine_id())?;
        let frontend = build_frontend(&config)?;
        let vacm = build_vacm(&config)?;

        let mut registry = build_registry(
            &config,
            &self.interfaces,
            Arc::clone(&stats),
            Arc::clone(&usm_stats),
            started,
        );
        if let Some(configure) = self.configure_mib {
            configure(&mut registry);
        }

        let agent = Agent {
            inner: Arc::new(AgentInner {
                socket: Arc::new(socket),
                trap_socket,
                local_addr,
                registry: RwLock::new(registry),
                users: RwLock::new(users),
                frontend: RwLock::new(frontend),
                vacm: RwLock::new(vacm.map(Arc::new)),
                engine,
                salt_counter: SaltCounter::new(),
                stats,
                usm_stats,
                started,
                interfaces: self.interfaces,
                max_message_size: config.max_message_size,
                request_budget: Duration::from_secs(config.timeout_seconds.max(1) as u64),
                admission: Arc::new(Semaphore::new(config.max_connections.max(1) as usize)),
                trap_sink: self.trap_sink,
                cancel: self.cancel.unwrap_or_default(),
            }),
        };

        tracing::info!(
            target: "simple_snmpd::agent",
            local_addr = %local_addr,
            engine_boots = agent.inner.engine.boots(),
            trap_listener = agent.inner.trap_socket.is_some(),
            "agent ready"
        );

        Ok(agent)
    }
}

pub(crate) struct AgentInner {
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) trap_socket: Option<Arc<UdpSocket>>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) registry: RwLock<MibRegistry>,
    pub(crate) users: RwLock<UsmUserTable>,
    pub(crate) frontend: RwLock<SecurityFrontend>,
    pub(crate) vacm: RwLock<Option<Arc<VacmConfig>>>,
    pub(crate) engine: LocalEngine,
    pub(crate) salt_counter: SaltCounter,
    pub(crate) stats: Arc<SnmpStats>,
    pub(crate) usm_stats: Arc<UsmStats>,
    pub(crate) started: Instant,
    interfaces: Vec<InterfaceInfo>,
    pub(crate) max_message_size: usize,
    request_budget: Duration,
    admission: Arc<Semaphore>,
    pub(crate) trap_sink: Option<TrapSink>,
    pub(crate) cancel: CancellationToken,
}

/// SNMP agent.
///
/// Cloning is cheap and shares all state.
pub struct Agent {
    pub(crate) inner: Arc<AgentInner>,
}

impl Clone for Agent {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Agent {
    /// Create a builder from a configuration record.
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// The bound request socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// The bound trap listener address, when enabled.
    pub fn trap_addr(&self) -> Option<SocketAddr> {
        self.inner
            .trap_socket
            .as_ref()
            .and_then(|s| s.local_addr().ok())
    }

    /// The engine ID.
    pub fn engine_id(&self) -> &[u8] {
        self.inner.engine.engine_id()
    }

    /// The cancellation token; cancel it for graceful shutdown.
    pub fn cancel(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Shared snmp group counters.
    pub fn stats(&self) -> &SnmpStats {
        &self.inner.stats
    }

    /// Shared usmStats counters.
    pub fn usm_stats(&self) -> &UsmStats {
        &self.inner.usm_stats
    }

    /// Run until cancelled.
    ///
    /// The trap listener (when configured) runs as a sibling task feeding
    /// the same pipeline; the main loop owns the request socket, the
    /// rate-limit sweep timer, and shutdown.
    pub async fn run(&self) -> Result<()> {
        if let Some(trap_socket) = self.inner.trap_socket.clone() {
            let agent = self.clone();
            tokio::spawn(async move {
                agent.recv_loop(trap_socket, true).await;
            });
        }

        let socket = Arc::clone(&self.inner.socket);
        let mut buf = vec![0u8; 65535];
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    let (len, source) = match result {
                        Ok(received) => received,
                        // Linux surfaces ICMP port-unreachable from earlier
                        // replies as a recv error; the socket stays usable
                        Err(e) => {
                            tracing::debug!(target: "simple_snmpd::agent", error = %e, "receive failed");
                            continue;
                        }
                    };
                    let data = Bytes::copy_from_slice(&buf[..len.min(UDP_MAX_PAYLOAD)]);
                    self.spawn_worker(data, source, false).await;
                }
                _ = sweep.tick() => {
                    self.read_frontend().sweep_rate_buckets(SWEEP_MAX_IDLE);
                }
                _ = self.inner.cancel.cancelled() => {
                    tracing::info!(target: "simple_snmpd::agent", "shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// Receive loop for the trap socket.
    async fn recv_loop(&self, socket: Arc<UdpSocket>, via_trap_socket: bool) {
        let mut buf = vec![0u8; 65535];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, source)) => {
                            let data = Bytes::copy_from_slice(&buf[..len.min(UDP_MAX_PAYLOAD)]);
                            self.spawn_worker(data, source, via_trap_socket).await;
                        }
                        Err(e) => {
                            tracing::debug!(target: "simple_snmpd::agent", error = %e, "trap socket receive failed");
                            continue;
                        }
                    }
                }
                _ = self.inner.cancel.cancelled() => return,
            }
        }
    }

    /// Admit a datagram and process it on the blocking pool.
    async fn spawn_worker(&self, data: Bytes, source: SocketAddr, via_trap_socket: bool) {
        let permit = match Arc::clone(&self.inner.admission).acquire_owned().await {
            Ok(permit) => permit,
            // Semaphore closes only at teardown
            Err(_) => return,
        };

        let agent = self.clone();
        let budget = self.inner.request_budget;

        tokio::spawn(async move {
            let worker = {
                let agent = agent.clone();
                tokio::task::spawn_blocking(move || {
                    agent.process_datagram(data, source, via_trap_socket)
                })
            };

            let outcome = tokio::time::timeout(budget, worker).await;
            match outcome {
                Ok(Ok(Some(response))) => {
                    agent.inner.stats.inc_out_pkts();
                    if let Err(e) = agent.inner.socket.send_to(&response, source).await {
                        tracing::warn!(target: "simple_snmpd::agent", source = %source, error = %e, "failed to send response");
                    }
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(target: "simple_snmpd::agent", source = %source, error = %e, "request worker panicked");
                }
                Err(_) => {
                    tracing::warn!(target: "simple_snmpd::agent", source = %source, budget = ?budget, "request exceeded processing budget, no reply sent");
                }
            }

            drop(permit);
        });
    }

    pub(crate) fn read_registry(&self) -> RwLockReadGuard<'_, MibRegistry> {
        match self.inner.registry.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn write_registry(&self) -> RwLockWriteGuard<'_, MibRegistry> {
        match self.inner.registry.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn read_frontend(&self) -> RwLockReadGuard<'_, SecurityFrontend> {
        match self.inner.frontend.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn read_users(&self) -> RwLockReadGuard<'_, UsmUserTable> {
        match self.inner.users.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn current_vacm(&self) -> Option<Arc<VacmConfig>> {
        match self.inner.vacm.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Resolve VACM group and views for a principal into the context.
    pub(crate) fn resolve_views(&self, ctx: &mut RequestContext) {
        let Some(vacm) = self.current_vacm() else {
            return;
        };

        if let Some(group) = vacm.get_group(ctx.security_model, &ctx.security_name)
            && let Some(access) = vacm.get_access(
                group,
                &ctx.context_name,
                ctx.security_model,
                ctx.security_level,
            )
        {
            ctx.read_view = Some(access.view_for(Operation::Read).clone());
            ctx.write_view = Some(access.view_for(Operation::Write).clone());
        }
        ctx.vacm = Some(vacm);
    }

    /// Rebuild the security, user, VACM, and MIB tables from a new
    /// configuration, swapping each under its lock (SIGHUP path).
    pub fn reload(&self, config: &AgentConfig) -> Result<()> {
        config.validate()?;

        let users = build_user_table(config, self.inner.engine.engine_id())?;
        let frontend = build_frontend(config)?;
        let vacm = build_vacm(config)?;
        let registry = build_registry(
            config,
            &self.inner.interfaces,
            Arc::clone(&self.inner.stats),
            Arc::clone(&self.inner.usm_stats),
            self.inner.started,
        );

        *write_or_recover(&self.inner.users) = users;
        *write_or_recover(&self.inner.frontend) = frontend;
        *write_or_recover(&self.inner.vacm) = vacm.map(Arc::new);
        *write_or_recover(&self.inner.registry) = registry;

        tracing::info!(target: "simple_snmpd::agent", "configuration reloaded");
        Ok(())
    }

    /// Dispatch a request PDU to its handler. Runs synchronously on the
    /// worker; MIB access happens under the registry locks.
    pub(crate) fn dispatch_request(&self, ctx: &RequestContext, pdu: &Pdu) -> Pdu {
        match pdu.pdu_type {
            PduType::GetRequest => self.handle_get(ctx, pdu),
            PduType::GetNextRequest => self.handle_get_next(ctx, pdu),
            PduType::GetBulkRequest => self.handle_get_bulk(ctx, pdu),
            PduType::SetRequest => self.handle_set(ctx, pdu),
            PduType::InformRequest => self.handle_inform(ctx, pdu),
            // Filtered before dispatch
            _ => pdu.to_error_response(ErrorStatus::GenErr, 0),
        }
    }

    /// GET: one registry lookup per varbind.
    ///
    /// v1 reports the lowest failing index via noSuchName; v2c/v3 tag each
    /// failing varbind with its exception marker and keep going.
    fn handle_get(&self, ctx: &RequestContext, pdu: &Pdu) -> Pdu {
        let registry = self.read_registry();
        let mut response_varbinds = Vec::with_capacity(pdu.varbinds.len());

        for (index, vb) in pdu.varbinds.iter().enumerate() {
            // RFC 3415: inaccessible objects read as noSuchObject
            let outcome = if ctx.can_read(&vb.oid) {
                registry.get(&vb.oid)
            } else {
                GetOutcome::NoSuchObject
            };

            let value = match outcome {
                GetOutcome::Value(value) => value,
                GetOutcome::NoSuchObject => {
                    if ctx.version == Version::V1 {
                        return pdu.to_error_response(ErrorStatus::NoSuchName, (index + 1) as i32);
                    }
                    Value::NoSuchObject
                }
                GetOutcome::NoSuchInstance => {
                    if ctx.version == Version::V1 {
                        return pdu.to_error_response(ErrorStatus::NoSuchName, (index + 1) as i32);
                    }
                    Value::NoSuchInstance
                }
            };

            response_varbinds.push(VarBind::new(vb.oid.clone(), value));
        }

        Pdu::response(pdu.request_id, response_varbinds)
    }

    /// GETNEXT: lexicographic successor per varbind, skipping instances
    /// outside the read view.
    fn handle_get_next(&self, ctx: &RequestContext, pdu: &Pdu) -> Pdu {
        let registry = self.read_registry();
        let mut response_varbinds = Vec::with_capacity(pdu.varbinds.len());

        for (index, vb) in pdu.varbinds.iter().enumerate() {
            match next_visible(&registry, ctx, &vb.oid) {
                Some((oid, value)) => {
                    response_varbinds.push(VarBind::new(oid, value));
                }
                None => {
                    if ctx.version == Version::V1 {
                        return pdu.to_error_response(ErrorStatus::NoSuchName, (index + 1) as i32);
                    }
                    response_varbinds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView));
                }
            }
        }

        Pdu::response(pdu.request_id, response_varbinds)
    }

    /// GETBULK (RFC 3416 Section 4.2.3).
    ///
    /// The first `non_repeaters` varbinds take one step each; the rest are
    /// stepped up to `max_repetitions` times, row by row. Output stops
    /// early when the next varbind would push the response past the size
    /// budget; an empty response that cannot fit anything yields tooBig.
    fn handle_get_bulk(&self, ctx: &RequestContext, pdu: &Pdu) -> Pdu {
        let registry = self.read_registry();

        let non_repeaters = pdu.error_status.max(0) as usize;
        let max_repetitions = pdu.error_index.max(0) as usize;

        let max_size = ctx.max_response_size;
        let mut current_size = RESPONSE_OVERHEAD;
        let mut response_varbinds = Vec::new();

        let fits = |vb: &VarBind, current_size: usize| current_size + vb.encoded_size() <= max_size;

        // Non-repeaters: one GETNEXT each
        for vb in pdu.varbinds.iter().take(non_repeaters) {
            let next_vb = match next_visible(&registry, ctx, &vb.oid) {
                Some((oid, value)) => VarBind::new(oid, value),
                None => VarBind::new(vb.oid.clone(), Value::EndOfMibView),
            };

            if !fits(&next_vb, current_size) {
                if response_varbinds.is_empty() {
                    return pdu.to_error_response(ErrorStatus::TooBig, 0);
                }
                return Pdu::response(pdu.request_id, response_varbinds);
            }

            current_size += next_vb.encoded_size();
            response_varbinds.push(next_vb);
        }

        // Repeaters: interleaved row by row
        if non_repeaters < pdu.varbinds.len() {
            let repeaters = &pdu.varbinds[non_repeaters..];
            let mut cursors: Vec<Oid> = repeaters.iter().map(|vb| vb.oid.clone()).collect();
            let mut exhausted = vec![false; repeaters.len()];

            'rows: for _ in 0..max_repetitions {
                let mut row_all_done = true;

                for (i, cursor) in cursors.iter_mut().enumerate() {
                    let next_vb = if exhausted[i] {
                        VarBind::new(cursor.clone(), Value::EndOfMibView)
                    } else {
                        match next_visible(&registry, ctx, cursor) {
                            Some((oid, value)) => {
                                *cursor = oid.clone();
                                row_all_done = false;
                                VarBind::new(oid, value)
                            }
                            None => {
                                exhausted[i] = true;
                                VarBind::new(cursor.clone(), Value::EndOfMibView)
                            }
                        }
                    };

                    if !fits(&next_vb, current_size) {
                        if response_varbinds.is_empty() {
                            return pdu.to_error_response(ErrorStatus::TooBig, 0);
                        }
                        break 'rows;
                    }

                    current_size += next_vb.encoded_size();
                    response_varbinds.push(next_vb);
                }

                if row_all_done {
                    break;
                }
            }
        }

        Pdu::response(pdu.request_id, response_varbinds)
    }

    /// INFORM: acknowledge by echoing request-id and varbinds
    /// (RFC 3416 Section 4.2.7), then hand the payload to the trap sink.
    fn handle_inform(&self, ctx: &RequestContext, pdu: &Pdu) -> Pdu {
        self.deliver_trap(TrapEvent {
            source: ctx.source,
            version: ctx.version,
            security_name: ctx.security_name.clone(),
            trap_oid: extract_trap_oid(&pdu.varbinds),
            varbinds: pdu.varbinds.clone(),
        });

        pdu.to_response()
    }

    /// Log a trap and invoke the sink.
    pub(crate) fn deliver_trap(&self, event: TrapEvent) {
        tracing::info!(
            target: "simple_snmpd::trap",
            source = %event.source,
            version = %event.version,
            trap_oid = event.trap_oid.as_ref().map(|o| o.to_string()).unwrap_or_default(),
            varbinds = event.varbinds.len(),
            "trap received"
        );

        if let Some(sink) = &self.inner.trap_sink {
            sink(event);
        }
    }

    /// Current sysUpTime in TimeTicks, as carried in trap payloads.
    pub fn uptime_ticks(&self) -> u32 {
        standard::uptime_ticks(self.inner.started)
    }
}

/// GETNEXT step skipping instances outside the read view.
fn next_visible(
    registry: &MibRegistry,
    ctx: &RequestContext,
    oid: &Oid,
) -> Option<(Oid, Value)> {
    let mut cursor = oid.clone();
    loop {
        let (next, value) = registry.get_next(&cursor)?;
        if ctx.can_read(&next) {
            return Some((next, value));
        }
        cursor = next;
    }
}

/// snmpTrapOID.0 value from a v2 notification varbind list.
fn extract_trap_oid(varbinds: &[VarBind]) -> Option<Oid> {
    let snmp_trap_oid = crate::oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0);
    varbinds
        .iter()
        .find(|vb| vb.oid == snmp_trap_oid)
        .and_then(|vb| vb.value.as_oid().cloned())
}

fn write_or_recover<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn build_user_table(config: &AgentConfig, engine_id: &[u8]) -> Result<UsmUserTable> {
    let mut table = UsmUserTable::new();

    for spec in &config.usm_users {
        let auth = match (&spec.auth_protocol, &spec.auth_password) {
            (Some(protocol), Some(password)) => Some((*protocol, password.as_bytes())),
            _ => None,
        };
        let privacy = match (&spec.priv_protocol, &spec.priv_password) {
            (Some(protocol), Some(password)) => Some((*protocol, password.as_bytes())),
            _ => None,
        };

        table.insert(UsmUser::new(
            spec.username.as_bytes().to_vec(),
            spec.security_level,
            auth,
            privacy,
            engine_id,
        )?);
    }

    Ok(table)
}

fn build_frontend(config: &AgentConfig) -> Result<SecurityFrontend> {
    let mut frontend = SecurityFrontend::new().with_rate_limit(
        config.rate_limit.max_requests,
        Duration::from_secs(config.rate_limit.window_seconds),
    );

    if config.communities.is_empty() {
        if !config.community.is_empty() {
            frontend.add_community(CommunityEntry::read_only(config.community.as_bytes()));
        }
    } else {
        for spec in &config.communities {
            let mut sources = Vec::with_capacity(spec.sources.len());
            for source in &spec.sources {
                sources.push(IpNet::parse(source)?);
            }
            let entry = CommunityEntry {
                name: spec.name.as_bytes().to_vec(),
                read_only: spec.read_only,
                sources,
            };
            frontend.add_community(entry);
        }
    }

    for address in &config.allowed_ips {
        frontend.add_allowed_ip(
            address
                .parse()
                .map_err(|_| Error::Config(format!("invalid IP address '{}'", address)))?,
        );
    }
    for address in &config.denied_ips {
        frontend.add_denied_ip(
            address
                .parse()
                .map_err(|_| Error::Config(format!("invalid IP address '{}'", address)))?,
        );
    }
    for subnet in &config.allowed_subnets {
        frontend.add_allowed_subnet(IpNet::parse(subnet)?);
    }
    for subnet in &config.denied_subnets {
        frontend.add_denied_subnet(IpNet::parse(subnet)?);
    }

    Ok(frontend)
}

fn build_vacm(config: &AgentConfig) -> Result<Option<VacmConfig>> {
    if config.vacm_groups.is_empty()
        && config.vacm_accesses.is_empty()
        && config.vacm_views.is_empty()
    {
        return Ok(None);
    }

    let mut vacm = VacmConfig::new();

    for group in &config.vacm_groups {
        let model: SecurityModel = group.security_model.parse()?;
        vacm.add_group(
            group.security_name.as_bytes().to_vec(),
            model,
            group.group.as_bytes().to_vec(),
        );
    }

    for access in &config.vacm_accesses {
        let mut builder = AccessEntryBuilder::new(access.group.as_bytes().to_vec())
            .context_prefix(access.context_prefix.as_bytes().to_vec())
            .security_level(access.security_level)
            .read_view(access.read_view.as_bytes().to_vec())
            .write_view(access.write_view.as_bytes().to_vec())
            .notify_view(access.notify_view.as_bytes().to_vec());
        if access.prefix_match {
            builder = builder.context_match_prefix();
        }
        vacm.add_access(builder.build());
    }

    for view_spec in &config.vacm_views {
        let mut view = View::new();
        for subtree in &view_spec.subtrees {
            view.push(ViewSubtree {
                oid: Oid::parse(&subtree.oid)?,
                mask: subtree.mask.clone(),
                included: subtree.included,
            });
        }
        vacm.add_view(view_spec.name.as_bytes().to_vec(), view);
    }

    Ok(Some(vacm))
}

fn build_registry(
    config: &AgentConfig,
    interfaces: &[InterfaceInfo],
    stats: Arc<SnmpStats>,
    usm_stats: Arc<UsmStats>,
    started: Instant,
) -> MibRegistry {
    let system = SystemInfo {
        sys_descr: config.sys_descr.clone(),
        sys_contact: config.sys_contact.clone(),
        sys_name: config.sys_name.clone(),
        sys_location: config.sys_location.clone(),
        ..SystemInfo::default()
    };

    let mut registry = MibRegistry::new();
    register_system_group(&mut registry, &system, started);
    register_interfaces_group(&mut registry, interfaces.to_vec());
    register_snmp_group(&mut registry, stats);
    register_usm_stats(&mut registry, usm_stats);
    registry
}

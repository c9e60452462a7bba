//! End-to-end tests driving a live agent over loopback UDP.
//!
//! Each test binds an agent on an ephemeral port, runs it in a background
//! task, and speaks raw SNMP to it through a plain UDP socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use simple_snmpd::config::{AgentConfig, UsmUserSpec};
use simple_snmpd::message::{
    CommunityMessage, MsgFlags, MsgGlobalData, ScopedPdu, SecurityLevel, V3Message, V3MessageData,
};
use simple_snmpd::v3::auth::{authenticate_message, verify_message};
use simple_snmpd::v3::usm::UsmSecurityParams;
use simple_snmpd::v3::{AuthProtocol, LocalizedKey, PrivKey, PrivProtocol, SaltCounter};
use simple_snmpd::{
    Agent, ErrorStatus, InterfaceInfo, Oid, Pdu, PduType, TrapEvent, Value, VarBind, oid,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct TestAgent {
    agent: Agent,
    cancel: CancellationToken,
}

impl TestAgent {
    async fn start(config: AgentConfig) -> Self {
        Self::start_with(config, |builder| builder).await
    }

    async fn start_with(
        config: AgentConfig,
        customize: impl FnOnce(simple_snmpd::AgentBuilder) -> simple_snmpd::AgentBuilder,
    ) -> Self {
        let cancel = CancellationToken::new();
        let builder = Agent::builder(config)
            .bind("127.0.0.1:0".parse().unwrap())
            .cancel(cancel.clone());
        let agent = customize(builder).build().await.unwrap();

        let runner = agent.clone();
        tokio::spawn(async move {
            let _ = runner.run().await;
        });

        Self { agent, cancel }
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.agent.local_addr()
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn exchange(socket: &UdpSocket, target: std::net::SocketAddr, request: &[u8]) -> Bytes {
    socket.send_to(request, target).await.unwrap();
    let mut buf = vec![0u8; 65535];
    let (len, _) = tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .expect("timed out waiting for agent response")
        .unwrap();
    Bytes::copy_from_slice(&buf[..len])
}

async fn expect_silence(socket: &UdpSocket, target: std::net::SocketAddr, request: &[u8]) {
    socket.send_to(request, target).await.unwrap();
    let mut buf = vec![0u8; 65535];
    let result =
        tokio::time::timeout(Duration::from_millis(300), socket.recv_from(&mut buf)).await;
    assert!(result.is_err(), "expected no response, got one");
}

/// Byte-exact GET sysDescr.0 over v2c.
///
/// The request is the reference encoding of
/// `GET 1.3.6.1.2.1.1.1.0, community "public", request-id 1`
/// (with a non-minimal 4-byte request-id, which the decoder accepts).
#[tokio::test]
async fn test_get_sys_descr_wire_vector() {
    let server = TestAgent::start(AgentConfig::default()).await;
    let socket = client_socket().await;

    let request: &[u8] = &[
        0x30, 0x29, 0x02, 0x01, 0x01, 0x04, 0x06, 0x70, 0x75, 0x62, 0x6C, 0x69, 0x63, 0xA0, 0x1C,
        0x02, 0x04, 0x00, 0x00, 0x00, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x00, 0x30, 0x0E, 0x30,
        0x0C, 0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00, 0x05, 0x00,
    ];

    let response = exchange(&socket, server.addr(), request).await;
    let decoded = CommunityMessage::decode(response).unwrap();

    assert_eq!(decoded.community.as_ref(), b"public");
    let pdu = decoded.pdu.as_standard().unwrap();
    assert_eq!(pdu.pdu_type, PduType::Response);
    assert_eq!(pdu.request_id, 1);
    assert_eq!(pdu.error_status, 0);
    assert_eq!(pdu.error_index, 0);
    assert_eq!(pdu.varbinds.len(), 1);
    assert_eq!(pdu.varbinds[0].oid, oid!(1, 3, 6, 1, 2, 1, 1, 1, 0));
    assert_eq!(pdu.varbinds[0].value, Value::from("Simple SNMP Daemon"));
}

/// GETNEXT on an unregistered OID returns the next registered subtree.
#[tokio::test]
async fn test_get_next_unregistered_oid() {
    let server = TestAgent::start(AgentConfig::default()).await;
    let socket = client_socket().await;

    let request = CommunityMessage::v2c(
        b"public".as_slice(),
        Pdu::get_next_request(2, &[oid!(1, 3, 6, 1, 2, 1, 99)]),
    );

    let response = exchange(&socket, server.addr(), &request.encode()).await;
    let decoded = CommunityMessage::decode(response).unwrap();
    let pdu = decoded.pdu.as_standard().unwrap();

    assert_eq!(pdu.error_status, 0);
    // The next registered subtree after the snmp group is usmStats
    assert_eq!(pdu.varbinds[0].oid, oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 1, 0));
    assert!(!pdu.varbinds[0].value.is_exception());
}

/// GETBULK with non_repeaters=0, max_repetitions=3 walks three ifTable rows.
#[tokio::test]
async fn test_get_bulk_if_table() {
    let config = AgentConfig::default();
    let server = TestAgent::start_with(config, |builder| {
        builder.interfaces(vec![
            InterfaceInfo::loopback(),
            InterfaceInfo::ethernet("eth0", [0, 1, 2, 3, 4, 5]),
            InterfaceInfo::ethernet("eth1", [0, 1, 2, 3, 4, 6]),
        ])
    })
    .await;
    let socket = client_socket().await;

    let request = CommunityMessage::v2c(
        b"public".as_slice(),
        Pdu::get_bulk(3, 0, 3, &[oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1)]),
    );

    let response = exchange(&socket, server.addr(), &request.encode()).await;
    let decoded = CommunityMessage::decode(response).unwrap();
    let pdu = decoded.pdu.as_standard().unwrap();

    assert_eq!(pdu.error_status, 0);
    assert_eq!(pdu.varbinds.len(), 3);
    for (i, vb) in pdu.varbinds.iter().enumerate() {
        assert_eq!(vb.oid, oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1).child(i as u32 + 1));
        assert_eq!(vb.value, Value::Integer(i as i32 + 1));
    }
}

/// GETBULK past the table end truncates with endOfMibView markers.
#[tokio::test]
async fn test_get_bulk_truncates_at_end_of_mib() {
    let server = TestAgent::start(AgentConfig::default()).await;
    let socket = client_socket().await;

    // usmStats is the final subtree; ask for more rows than remain
    let request = CommunityMessage::v2c(
        b"public".as_slice(),
        Pdu::get_bulk(4, 0, 10, &[oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 5)]),
    );

    let response = exchange(&socket, server.addr(), &request.encode()).await;
    let decoded = CommunityMessage::decode(response).unwrap();
    let pdu = decoded.pdu.as_standard().unwrap();

    assert_eq!(pdu.error_status, 0);
    assert!(
        pdu.varbinds
            .iter()
            .any(|vb| vb.value == Value::EndOfMibView),
        "expected endOfMibView markers after the last subtree"
    );
}

/// SET on a read-only scalar: notWritable, nothing mutated. The default
/// community is read-only, so a writable community is configured.
#[tokio::test]
async fn test_set_read_only_scalar() {
    let mut config = AgentConfig::default();
    config.communities.push(simple_snmpd::config::CommunitySpec {
        name: "private".to_string(),
        read_only: false,
        sources: vec![],
    });
    let server = TestAgent::start(config).await;
    let socket = client_socket().await;

    let request = CommunityMessage::v2c(
        b"private".as_slice(),
        Pdu::set_request(
            5,
            vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
                Value::from("hacked"),
            )],
        ),
    );

    let response = exchange(&socket, server.addr(), &request.encode()).await;
    let decoded = CommunityMessage::decode(response).unwrap();
    let pdu = decoded.pdu.as_standard().unwrap();

    assert_eq!(pdu.error_status, ErrorStatus::NotWritable.as_i32());
    assert_eq!(pdu.error_index, 1);

    // Confirm sysDescr is untouched
    let verify = CommunityMessage::v2c(
        b"private".as_slice(),
        Pdu::get_request(6, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]),
    );
    let response = exchange(&socket, server.addr(), &verify.encode()).await;
    let decoded = CommunityMessage::decode(response).unwrap();
    assert_eq!(
        decoded.pdu.as_standard().unwrap().varbinds[0].value,
        Value::from("Simple SNMP Daemon")
    );
}

/// Rate limiting: with a 3/60s policy the fourth request goes unanswered.
#[tokio::test]
async fn test_rate_limit_drops_fourth_request() {
    let mut config = AgentConfig::default();
    config.rate_limit.max_requests = 3;
    config.rate_limit.window_seconds = 60;
    let server = TestAgent::start(config).await;
    let socket = client_socket().await;

    let request = CommunityMessage::v2c(
        b"public".as_slice(),
        Pdu::get_request(7, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]),
    )
    .encode();

    for _ in 0..3 {
        let _ = exchange(&socket, server.addr(), &request).await;
    }
    expect_silence(&socket, server.addr(), &request).await;
}

fn admin_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.usm_users.push(UsmUserSpec {
        username: "admin".to_string(),
        security_level: SecurityLevel::AuthPriv,
        auth_protocol: Some(AuthProtocol::Sha256),
        auth_password: Some("authpass123".to_string()),
        priv_protocol: Some(PrivProtocol::Aes128),
        priv_password: Some("privpass123".to_string()),
    });
    config
}

/// Engine discovery: an empty engine ID draws a Report carrying ours.
async fn discover_engine(
    socket: &UdpSocket,
    target: std::net::SocketAddr,
) -> (Bytes, u32, u32) {
    let discovery = V3Message::new(
        MsgGlobalData::new(1, 65507, MsgFlags::new(SecurityLevel::NoAuthNoPriv, true)),
        UsmSecurityParams::empty().encode(),
        ScopedPdu::with_empty_context(Pdu::get_request(0, &[])),
    );

    let response = exchange(socket, target, &discovery.encode()).await;
    let decoded = V3Message::decode(response).unwrap();
    let usm = UsmSecurityParams::decode(decoded.security_params.clone()).unwrap();

    let scoped = decoded.scoped_pdu().unwrap();
    assert_eq!(scoped.pdu.pdu_type, PduType::Report);

    (usm.engine_id, usm.engine_boots, usm.engine_time)
}

fn build_auth_priv_get(
    msg_id: i32,
    request_id: i32,
    oid: &Oid,
    engine_id: &Bytes,
    boots: u32,
    time: u32,
    auth_key: &LocalizedKey,
    priv_key: &PrivKey,
    salt: &SaltCounter,
) -> Vec<u8> {
    let pdu = Pdu::get_request(request_id, std::slice::from_ref(oid));
    let scoped = ScopedPdu::new(engine_id.clone(), Bytes::new(), pdu);

    let (ciphertext, priv_params) = priv_key
        .encrypt(&scoped.encode_to_bytes(), boots, time, salt)
        .unwrap();

    let usm = UsmSecurityParams::new(engine_id.clone(), boots, time, b"admin".as_slice())
        .with_auth_placeholder(auth_key.mac_len())
        .with_priv_params(priv_params);

    let message = V3Message::new_encrypted(
        MsgGlobalData::new(msg_id, 65507, MsgFlags::new(SecurityLevel::AuthPriv, true)),
        usm.encode(),
        ciphertext,
    );

    let mut bytes = message.encode().to_vec();
    let (offset, len) = UsmSecurityParams::find_auth_params_offset(&bytes).unwrap();
    authenticate_message(auth_key, &mut bytes, offset, len);
    bytes
}

/// Full v3 authPriv round trip: SHA-256 auth, AES-128 privacy.
///
/// The client discovers the engine, sends an encrypted + authenticated
/// GET, verifies the response digest, and decrypts the response PDU.
#[tokio::test]
async fn test_v3_auth_priv_round_trip() {
    let server = TestAgent::start(admin_config()).await;
    let socket = client_socket().await;

    let (engine_id, boots, time) = discover_engine(&socket, server.addr()).await;
    assert!(!engine_id.is_empty());
    assert_eq!(boots, 1);

    let auth_key = LocalizedKey::from_password(AuthProtocol::Sha256, b"authpass123", &engine_id);
    let priv_key = PrivKey::from_password(
        AuthProtocol::Sha256,
        PrivProtocol::Aes128,
        b"privpass123",
        &engine_id,
    );
    let salt = SaltCounter::new();

    let request = build_auth_priv_get(
        2,
        42,
        &oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
        &engine_id,
        boots,
        time,
        &auth_key,
        &priv_key,
        &salt,
    );

    let response_bytes = exchange(&socket, server.addr(), &request).await;

    // Verify the response HMAC before trusting anything in it
    let (offset, len) = UsmSecurityParams::find_auth_params_offset(&response_bytes).unwrap();
    assert!(
        verify_message(&auth_key, &response_bytes, offset, len),
        "response digest verification failed"
    );

    let response = V3Message::decode(response_bytes).unwrap();
    assert_eq!(response.security_level(), SecurityLevel::AuthPriv);
    let response_usm = UsmSecurityParams::decode(response.security_params.clone()).unwrap();

    let ciphertext = match &response.data {
        V3MessageData::Encrypted(data) => data.clone(),
        V3MessageData::Plaintext(_) => panic!("response was not encrypted"),
    };

    let plaintext = priv_key
        .decrypt(
            &ciphertext,
            response_usm.engine_boots,
            response_usm.engine_time,
            &response_usm.priv_params,
        )
        .unwrap();

    let mut decoder = simple_snmpd::ber::Decoder::new(plaintext);
    let scoped = ScopedPdu::decode(&mut decoder).unwrap();

    assert_eq!(scoped.pdu.pdu_type, PduType::Response);
    assert_eq!(scoped.pdu.request_id, 42);
    assert_eq!(scoped.pdu.error_status, 0);
    assert_eq!(scoped.pdu.varbinds[0].value, Value::from("Simple SNMP Daemon"));
}

/// Flipping one ciphertext byte after authentication draws a
/// usmStatsWrongDigests Report (the digest covers the ciphertext).
#[tokio::test]
async fn test_v3_tampered_ciphertext_reported() {
    let server = TestAgent::start(admin_config()).await;
    let socket = client_socket().await;

    let (engine_id, boots, time) = discover_engine(&socket, server.addr()).await;

    let auth_key = LocalizedKey::from_password(AuthProtocol::Sha256, b"authpass123", &engine_id);
    let priv_key = PrivKey::from_password(
        AuthProtocol::Sha256,
        PrivProtocol::Aes128,
        b"privpass123",
        &engine_id,
    );
    let salt = SaltCounter::new();

    let mut request = build_auth_priv_get(
        3,
        43,
        &oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
        &engine_id,
        boots,
        time,
        &auth_key,
        &priv_key,
        &salt,
    );

    // Corrupt the final byte: part of the encrypted scoped PDU
    let last = request.len() - 1;
    request[last] ^= 0xFF;

    let response = exchange(&socket, server.addr(), &request).await;
    let decoded = V3Message::decode(response).unwrap();
    let scoped = decoded.scoped_pdu().expect("reports travel unencrypted");

    assert_eq!(scoped.pdu.pdu_type, PduType::Report);
    assert_eq!(
        scoped.pdu.varbinds[0].oid,
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0),
        "expected usmStatsWrongDigests"
    );
}

/// A wrong authentication password draws a wrongDigests Report.
#[tokio::test]
async fn test_v3_wrong_password_reported() {
    let server = TestAgent::start(admin_config()).await;
    let socket = client_socket().await;

    let (engine_id, boots, time) = discover_engine(&socket, server.addr()).await;

    let wrong_auth = LocalizedKey::from_password(AuthProtocol::Sha256, b"wrongpass999", &engine_id);
    let priv_key = PrivKey::from_password(
        AuthProtocol::Sha256,
        PrivProtocol::Aes128,
        b"privpass123",
        &engine_id,
    );
    let salt = SaltCounter::new();

    let request = build_auth_priv_get(
        4,
        44,
        &oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
        &engine_id,
        boots,
        time,
        &wrong_auth,
        &priv_key,
        &salt,
    );

    let response = exchange(&socket, server.addr(), &request).await;
    let decoded = V3Message::decode(response).unwrap();
    let scoped = decoded.scoped_pdu().unwrap();

    assert_eq!(scoped.pdu.pdu_type, PduType::Report);
    assert_eq!(scoped.pdu.varbinds[0].oid, oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0));
}

/// An authenticated message outside the 150 s window draws a
/// notInTimeWindows Report.
#[tokio::test]
async fn test_v3_stale_time_reported() {
    let server = TestAgent::start(admin_config()).await;
    let socket = client_socket().await;

    let (engine_id, boots, time) = discover_engine(&socket, server.addr()).await;

    let auth_key = LocalizedKey::from_password(AuthProtocol::Sha256, b"authpass123", &engine_id);
    let priv_key = PrivKey::from_password(
        AuthProtocol::Sha256,
        PrivProtocol::Aes128,
        b"privpass123",
        &engine_id,
    );
    let salt = SaltCounter::new();

    let request = build_auth_priv_get(
        5,
        45,
        &oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
        &engine_id,
        boots,
        time + 500, // far outside the window
        &auth_key,
        &priv_key,
        &salt,
    );

    let response = exchange(&socket, server.addr(), &request).await;
    let decoded = V3Message::decode(response).unwrap();
    let scoped = decoded.scoped_pdu().unwrap();

    assert_eq!(scoped.pdu.pdu_type, PduType::Report);
    assert_eq!(
        scoped.pdu.varbinds[0].oid,
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0),
        "expected usmStatsNotInTimeWindows"
    );
}

/// Traps sent to the trap listener port are delivered to the sink and
/// produce no response.
#[tokio::test]
async fn test_trap_listener_delivers_to_sink() {
    let received: Arc<Mutex<Vec<TrapEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_store = Arc::clone(&received);

    let mut config = AgentConfig::default();
    config.enable_trap = true;

    let cancel = CancellationToken::new();
    let agent = Agent::builder(config)
        .bind("127.0.0.1:0".parse().unwrap())
        .trap_bind("127.0.0.1:0".parse().unwrap())
        .cancel(cancel.clone())
        .trap_sink(move |event| sink_store.lock().unwrap().push(event))
        .build()
        .await
        .unwrap();
    let trap_addr = agent.trap_addr().unwrap();

    let runner = agent.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    let socket = client_socket().await;
    let trap = Pdu {
        pdu_type: PduType::TrapV2,
        request_id: 9,
        error_status: 0,
        error_index: 0,
        varbinds: vec![
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0), Value::TimeTicks(55)),
            VarBind::new(
                oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0),
                Value::ObjectIdentifier(oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 2)),
            ),
        ],
    };
    let message = CommunityMessage::v2c(b"public".as_slice(), trap);

    expect_silence(&socket, trap_addr, &message.encode()).await;

    let events = received.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].trap_oid, Some(oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 2)));

    cancel.cancel();
}

//! SET request handling: two-phase commit (RFC 3416 Section 4.2.5).
//!
//! Phase one validates every varbind without touching anything: community
//! write permission, per-OID VACM write view, then the registry's own
//! checks (instance exists, writable, type matches). The first failure
//! aborts the whole request with its status and 1-based index. Phase two
//! applies all assignments under the registry writer lock; a setter
//! failure there surfaces as commitFailed. Either every varbind commits or
//! none does.

use crate::error::ErrorStatus;
use crate::pdu::Pdu;
use crate::version::Version;

use super::{Agent, RequestContext};

impl Agent {
    pub(super) fn handle_set(&self, ctx: &RequestContext, pdu: &Pdu) -> Pdu {
        // Read-only communities cannot SET at all: a known community used
        // for an operation it does not permit (snmpInBadCommunityUses)
        if !ctx.community_writable {
            self.inner.stats.inc_in_bad_community_uses();
            let status = if ctx.version == Version::V1 {
                ErrorStatus::ReadOnly
            } else {
                ErrorStatus::AuthorizationError
            };
            let index = if pdu.varbinds.is_empty() { 0 } else { 1 };
            return pdu.to_error_response(status, index);
        }

        // Phase one: validate everything, mutate nothing
        {
            let registry = self.read_registry();

            for (index, vb) in pdu.varbinds.iter().enumerate() {
                let error_index = (index + 1) as i32;

                if !ctx.can_write(&vb.oid) {
                    return self.set_error(ctx, pdu, ErrorStatus::NoAccess, error_index);
                }

                if let Err(status) = registry.validate_set(&vb.oid, &vb.value) {
                    return self.set_error(ctx, pdu, status, error_index);
                }
            }
        }

        // Phase two: apply under the writer lock. Validation can go stale
        // between the phases (concurrent reload), so apply failures still
        // map to a proper status instead of panicking.
        {
            let registry = self.write_registry();

            for (index, vb) in pdu.varbinds.iter().enumerate() {
                if let Err(status) = registry.apply_set(&vb.oid, &vb.value) {
                    tracing::warn!(
                        target: "simple_snmpd::agent",
                        oid = %vb.oid,
                        status = %status,
                        "SET commit failed after validation"
                    );
                    return self.set_error(ctx, pdu, ErrorStatus::CommitFailed, (index + 1) as i32);
                }
            }
        }

        pdu.to_response()
    }

    /// SET failure response with the v1 status downgrade applied.
    fn set_error(
        &self,
        ctx: &RequestContext,
        pdu: &Pdu,
        status: ErrorStatus,
        error_index: i32,
    ) -> Pdu {
        let status = if ctx.version == Version::V1 {
            status.to_v1()
        } else {
            status
        };
        pdu.to_error_response(status, error_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::message::SecurityLevel;
    use crate::mib::GetOutcome;
    use crate::oid;
    use crate::pdu::PduType;
    use crate::vacm::SecurityModel;
    use crate::value::Value;
    use crate::varbind::VarBind;
    use bytes::Bytes;

    async fn test_agent() -> Agent {
        Agent::builder(AgentConfig::default())
            .bind("127.0.0.1:0".parse().unwrap())
            .build()
            .await
            .unwrap()
    }

    fn write_ctx(version: Version) -> RequestContext {
        RequestContext {
            source: "127.0.0.1:12345".parse().unwrap(),
            version,
            security_model: if version == Version::V1 {
                SecurityModel::V1
            } else {
                SecurityModel::V2c
            },
            security_name: Bytes::from_static(b"private"),
            security_level: SecurityLevel::NoAuthNoPriv,
            context_name: Bytes::new(),
            request_id: 1,
            pdu_type: PduType::SetRequest,
            community_writable: true,
            max_response_size: 1472,
            vacm: None,
            read_view: None,
            write_view: None,
        }
    }

    #[tokio::test]
    async fn test_set_read_only_scalar_rejected() {
        let agent = test_agent().await;
        let ctx = write_ctx(Version::V2c);

        let pdu = Pdu::set_request(
            1,
            vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
                Value::from("new descr"),
            )],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        assert_eq!(response.error_status, ErrorStatus::NotWritable.as_i32());
        assert_eq!(response.error_index, 1);

        // Nothing changed
        match agent.read_registry().get(&oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)) {
            GetOutcome::Value(value) => assert_eq!(value, Value::from("Simple SNMP Daemon")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_set_read_only_scalar_v1_status() {
        let agent = test_agent().await;
        let ctx = write_ctx(Version::V1);

        let pdu = Pdu::set_request(
            2,
            vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
                Value::from("x"),
            )],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        // v1 downgrades notWritable to noSuchName per RFC 3584
        assert_eq!(response.error_status, ErrorStatus::NoSuchName.as_i32());
        assert_eq!(response.error_index, 1);
    }

    #[tokio::test]
    async fn test_set_writable_scalar_commits() {
        let agent = test_agent().await;
        let ctx = write_ctx(Version::V2c);

        let sys_name = oid!(1, 3, 6, 1, 2, 1, 1, 5, 0);
        let pdu = Pdu::set_request(
            3,
            vec![VarBind::new(sys_name.clone(), Value::from("router-7"))],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        assert_eq!(response.error_status, 0);
        assert_eq!(
            agent.read_registry().get(&sys_name),
            GetOutcome::Value(Value::from("router-7"))
        );
    }

    #[tokio::test]
    async fn test_set_atomicity_on_late_failure() {
        let agent = test_agent().await;
        let ctx = write_ctx(Version::V2c);

        let sys_name = oid!(1, 3, 6, 1, 2, 1, 1, 5, 0);
        let original = match agent.read_registry().get(&sys_name) {
            GetOutcome::Value(value) => value,
            other => panic!("unexpected outcome: {:?}", other),
        };

        // First varbind is valid, second fails validation (read-only)
        let pdu = Pdu::set_request(
            4,
            vec![
                VarBind::new(sys_name.clone(), Value::from("should-not-stick")),
                VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::from("nope")),
            ],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        assert_eq!(response.error_status, ErrorStatus::NotWritable.as_i32());
        assert_eq!(response.error_index, 2);

        // The valid varbind must not have been applied
        assert_eq!(agent.read_registry().get(&sys_name), GetOutcome::Value(original));
    }

    #[tokio::test]
    async fn test_set_wrong_type() {
        let agent = test_agent().await;
        let ctx = write_ctx(Version::V2c);

        let pdu = Pdu::set_request(
            5,
            vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 5, 0),
                Value::Integer(42),
            )],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        assert_eq!(response.error_status, ErrorStatus::WrongType.as_i32());
        assert_eq!(response.error_index, 1);
    }

    #[tokio::test]
    async fn test_set_unknown_oid() {
        let agent = test_agent().await;
        let ctx = write_ctx(Version::V2c);

        let pdu = Pdu::set_request(
            6,
            vec![VarBind::new(oid!(1, 3, 6, 1, 99, 1, 0), Value::Integer(1))],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        assert_eq!(response.error_status, ErrorStatus::NoSuchName.as_i32());
        assert_eq!(response.error_index, 1);
    }

    #[tokio::test]
    async fn test_set_read_only_community_rejected() {
        let agent = test_agent().await;
        let mut ctx = write_ctx(Version::V2c);
        ctx.community_writable = false;

        let pdu = Pdu::set_request(
            7,
            vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 5, 0),
                Value::from("x"),
            )],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        assert_eq!(
            response.error_status,
            ErrorStatus::AuthorizationError.as_i32()
        );
    }

    #[tokio::test]
    async fn test_set_earliest_failure_reported() {
        let agent = test_agent().await;
        let ctx = write_ctx(Version::V2c);

        // Both varbinds fail; the lowest index wins
        let pdu = Pdu::set_request(
            8,
            vec![
                VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::from("a")),
                VarBind::new(oid!(1, 3, 6, 1, 99), Value::from("b")),
            ],
        );
        let response = agent.dispatch_request(&ctx, &pdu);

        assert_eq!(response.error_status, ErrorStatus::NotWritable.as_i32());
        assert_eq!(response.error_index, 1);
    }
}

//! Inbound request processing for each SNMP version.
//!
//! `process_datagram` is the synchronous per-packet pipeline: front-end
//! checks, version dispatch, security processing, dispatch, response
//! encoding. It runs on the blocking pool so MIB getters may take their
//! time without stalling the socket reader.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::ber::Decoder;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::message::{
    CommunityMessage, CommunityPdu, Message, ScopedPdu, SecurityLevel, V3Message, V3MessageData,
};
use crate::pdu::{Pdu, PduType};
use crate::security::CommunityLookup;
use crate::v3::auth::verify_message;
use crate::v3::report_oids;
use crate::v3::usm::UsmSecurityParams;
use crate::vacm::SecurityModel;
use crate::version::Version;

use super::{Agent, RequestContext, TrapEvent};

impl Agent {
    /// Process one datagram, returning the response bytes, if any.
    pub(crate) fn process_datagram(
        &self,
        data: Bytes,
        source: SocketAddr,
        via_trap_socket: bool,
    ) -> Option<Bytes> {
        self.inner.stats.inc_in_pkts();

        // Front-end checks apply to every datagram before any parsing
        {
            let frontend = self.read_frontend();
            if !frontend.is_ip_allowed(source.ip()) {
                tracing::debug!(target: "simple_snmpd::agent", source = %source, "source address denied");
                return None;
            }
            if !frontend.check_rate_limit(source.ip()) {
                tracing::debug!(target: "simple_snmpd::agent", source = %source, "rate limit exceeded");
                return None;
            }
        }

        let version = match Message::peek_version(&data) {
            Ok(version) => version,
            Err(error) => {
                self.count_decode_failure(&error, source);
                return None;
            }
        };

        let result = match version {
            Version::V1 | Version::V2c => self.handle_community(data, source, version, via_trap_socket),
            Version::V3 => self.handle_v3(data, source, via_trap_socket),
        };

        match result {
            Ok(response) => response,
            Err(error) => {
                self.count_decode_failure(&error, source);
                None
            }
        }
    }

    /// Attribute a failed decode to the right statistics counter.
    fn count_decode_failure(&self, error: &Error, source: SocketAddr) {
        match error {
            Error::Decode {
                kind: DecodeErrorKind::UnknownVersion(_),
                ..
            } => {
                tracing::debug!(target: "simple_snmpd::agent", source = %source, error = %error, "unsupported version");
                self.inner.stats.inc_in_bad_versions();
            }
            _ => {
                tracing::debug!(target: "simple_snmpd::agent", source = %source, error = %error, "malformed packet");
                self.inner.stats.inc_in_asn_parse_errs();
            }
        }
    }

    /// Handle a v1/v2c message.
    fn handle_community(
        &self,
        data: Bytes,
        source: SocketAddr,
        version: Version,
        via_trap_socket: bool,
    ) -> Result<Option<Bytes>> {
        let msg = CommunityMessage::decode(data)?;

        let access = {
            let frontend = self.read_frontend();
            match frontend.validate_community(&msg.community, source.ip()) {
                CommunityLookup::Valid(access) => access,
                CommunityLookup::UnknownName => {
                    tracing::debug!(target: "simple_snmpd::agent", source = %source, "unknown community");
                    self.inner.stats.inc_in_bad_community_names();
                    return Ok(None);
                }
                CommunityLookup::SourceMismatch => {
                    tracing::debug!(target: "simple_snmpd::agent", source = %source, "community used from unauthorized source");
                    self.inner.stats.inc_in_bad_community_uses();
                    return Ok(None);
                }
            }
        };

        // Traps carry no response and detour before dispatch
        match &msg.pdu {
            CommunityPdu::TrapV1(trap) => {
                self.deliver_trap(TrapEvent {
                    source,
                    version,
                    security_name: msg.community.clone(),
                    trap_oid: Some(trap.v2_trap_oid()),
                    varbinds: trap.varbinds.clone(),
                });
                return Ok(None);
            }
            CommunityPdu::Standard(pdu) if pdu.pdu_type == PduType::TrapV2 => {
                self.deliver_trap(TrapEvent {
                    source,
                    version,
                    security_name: msg.community.clone(),
                    trap_oid: super::extract_trap_oid(&pdu.varbinds),
                    varbinds: pdu.varbinds.clone(),
                });
                return Ok(None);
            }
            _ => {}
        }

        let pdu = match msg.pdu.as_standard() {
            Some(pdu) if is_request_pdu(pdu.pdu_type) => pdu,
            // Responses, reports, and anything unsolicited are dropped
            _ => return Ok(None),
        };

        // GETBULK does not exist in SNMPv1
        if version == Version::V1 && pdu.pdu_type == PduType::GetBulkRequest {
            return Ok(None);
        }

        // The trap socket only accepts notifications
        if via_trap_socket && !pdu.is_notification() {
            return Ok(None);
        }

        let security_model = match version {
            Version::V1 => SecurityModel::V1,
            _ => SecurityModel::V2c,
        };

        let mut ctx = RequestContext {
            source,
            version,
            security_model,
            security_name: msg.community.clone(),
            security_level: SecurityLevel::NoAuthNoPriv,
            context_name: Bytes::new(),
            request_id: pdu.request_id,
            pdu_type: pdu.pdu_type,
            community_writable: !access.read_only,
            max_response_size: self.inner.max_message_size,
            vacm: None,
            read_view: None,
            write_view: None,
        };
        self.resolve_views(&mut ctx);

        let response_pdu = self.dispatch_request(&ctx, pdu);
        let response = CommunityMessage::new(version, msg.community, response_pdu);

        Ok(Some(response.encode()))
    }

    /// Handle a v3 message: USM inbound processing per RFC 3414
    /// Section 3.2, then dispatch.
    fn handle_v3(
        &self,
        data: Bytes,
        source: SocketAddr,
        via_trap_socket: bool,
    ) -> Result<Option<Bytes>> {
        let msg = V3Message::decode(data.clone())?;
        let security_level = msg.security_level();

        let usm_params = UsmSecurityParams::decode(msg.security_params.clone())?;

        // Engine discovery: empty engine ID asks for our identity
        if usm_params.engine_id.is_empty() {
            return Ok(self.send_v3_report(&msg, &usm_params, report_oids::unknown_engine_ids()));
        }

        // Step 3: the engine ID must be ours
        if usm_params.engine_id.as_ref() != self.inner.engine.engine_id() {
            tracing::debug!(target: "simple_snmpd::usm", source = %source, "engine ID mismatch");
            return Ok(self.send_v3_report(&msg, &usm_params, report_oids::unknown_engine_ids()));
        }

        let users = self.read_users();

        // Step 4: the user must exist
        let Some(user) = users.get(&usm_params.username) else {
            tracing::debug!(
                target: "simple_snmpd::usm",
                source = %source,
                username = %String::from_utf8_lossy(&usm_params.username),
                "unknown user"
            );
            return Ok(self.send_v3_report(&msg, &usm_params, report_oids::unknown_user_names()));
        };

        // Step 5: the message level must be within the user's capability
        if security_level > user.security_level
            || (security_level.requires_auth() && user.auth_key().is_none())
            || (security_level.requires_priv() && user.priv_key().is_none())
        {
            tracing::debug!(target: "simple_snmpd::usm", source = %source, level = %security_level, "unsupported security level");
            return Ok(self.send_v3_report(
                &msg,
                &usm_params,
                report_oids::unsupported_sec_levels(),
            ));
        }

        // Step 6: verify the digest over the whole message
        if security_level.requires_auth() {
            let auth_key = user.auth_key().expect("checked above");

            let Some((auth_offset, auth_len)) = UsmSecurityParams::find_auth_params_offset(&data)
            else {
                tracing::debug!(target: "simple_snmpd::usm", source = %source, "auth params not locatable");
                return Ok(self.send_v3_report(&msg, &usm_params, report_oids::wrong_digests()));
            };

            if auth_len != auth_key.mac_len()
                || !verify_message(auth_key, &data, auth_offset, auth_len)
            {
                tracing::debug!(target: "simple_snmpd::usm", source = %source, "digest verification failed");
                return Ok(self.send_v3_report(&msg, &usm_params, report_oids::wrong_digests()));
            }

            // Step 7: authenticated messages must be inside the time window
            if !self
                .inner
                .engine
                .in_time_window(usm_params.engine_boots, usm_params.engine_time)
            {
                tracing::debug!(target: "simple_snmpd::usm", source = %source, "message outside time window");
                return Ok(self.send_v3_report(
                    &msg,
                    &usm_params,
                    report_oids::not_in_time_windows(),
                ));
            }
        }

        // Step 8: decrypt the scoped PDU when privacy is in effect
        let scoped_pdu = if security_level.requires_priv() {
            let priv_key = user.priv_key().expect("checked above");
            let ciphertext = match &msg.data {
                V3MessageData::Encrypted(data) => data,
                V3MessageData::Plaintext(_) => {
                    return Err(Error::decode(0, DecodeErrorKind::ExpectedEncryption));
                }
            };

            let plaintext = match priv_key.decrypt(
                ciphertext,
                usm_params.engine_boots,
                usm_params.engine_time,
                &usm_params.priv_params,
            ) {
                Ok(plaintext) => plaintext,
                Err(error) => {
                    tracing::debug!(target: "simple_snmpd::usm", source = %source, error = %error, "decryption failed");
                    return Ok(self.send_v3_report(
                        &msg,
                        &usm_params,
                        report_oids::decryption_errors(),
                    ));
                }
            };

            let mut decoder = Decoder::new(plaintext);
            match ScopedPdu::decode(&mut decoder) {
                Ok(scoped) => scoped,
                Err(error) => {
                    // Wrong key decrypts to garbage, not a scoped PDU
                    tracing::debug!(target: "simple_snmpd::usm", source = %source, error = %error, "decrypted data is not a scoped PDU");
                    return Ok(self.send_v3_report(
                        &msg,
                        &usm_params,
                        report_oids::decryption_errors(),
                    ));
                }
            }
        } else {
            match msg.scoped_pdu() {
                Some(scoped) => scoped.clone(),
                None => {
                    return Err(Error::decode(0, DecodeErrorKind::UnexpectedEncryption));
                }
            }
        };

        user.touch();

        let pdu = &scoped_pdu.pdu;

        match pdu.pdu_type {
            PduType::TrapV2 => {
                self.deliver_trap(TrapEvent {
                    source,
                    version: Version::V3,
                    security_name: usm_params.username.clone(),
                    trap_oid: super::extract_trap_oid(&pdu.varbinds),
                    varbinds: pdu.varbinds.clone(),
                });
                return Ok(None);
            }
            t if !is_request_pdu(t) => return Ok(None),
            _ => {}
        }

        if via_trap_socket && !pdu.is_notification() {
            return Ok(None);
        }

        // Response size honors the smaller of our cap and the sender's
        // msgMaxSize
        let max_response_size = self
            .inner
            .max_message_size
            .min(msg.global_data.msg_max_size.max(484) as usize);

        let mut ctx = RequestContext {
            source,
            version: Version::V3,
            security_model: SecurityModel::Usm,
            security_name: usm_params.username.clone(),
            security_level,
            context_name: scoped_pdu.context_name.clone(),
            request_id: pdu.request_id,
            pdu_type: pdu.pdu_type,
            community_writable: true,
            max_response_size,
            vacm: None,
            read_view: None,
            write_view: None,
        };
        self.resolve_views(&mut ctx);

        let response_pdu = self.dispatch_request(&ctx, pdu);

        let response = self.build_v3_response(
            &msg,
            &usm_params,
            user,
            response_pdu,
            scoped_pdu.context_engine_id.clone(),
            scoped_pdu.context_name.clone(),
        )?;

        Ok(Some(response))
    }
}

/// Confirmed-class PDU types the agent answers.
pub(super) fn is_request_pdu(pdu_type: PduType) -> bool {
    matches!(
        pdu_type,
        PduType::GetRequest
            | PduType::GetNextRequest
            | PduType::GetBulkRequest
            | PduType::SetRequest
            | PduType::InformRequest
    )
}

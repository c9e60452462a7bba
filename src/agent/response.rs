//! Outbound v3 security: Report generation and response authentication /
//! encryption.

use bytes::Bytes;

use crate::error::{AuthErrorKind, CryptoErrorKind, Error, Result};
use crate::message::{MsgFlags, MsgGlobalData, ScopedPdu, SecurityLevel, V3Message};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::v3::auth::authenticate_message;
use crate::v3::usm::UsmSecurityParams;
use crate::v3::users::UsmUser;
use crate::value::Value;
use crate::varbind::VarBind;

use super::Agent;

impl Agent {
    /// Build a Report PDU signalling a v3 security failure.
    ///
    /// Per RFC 3412 Section 7.1 Step 3, a report may only go out when the
    /// incoming reportableFlag was set (the PDU itself could not be
    /// examined at this point). The report increments and carries the
    /// usmStats counter named by `report_oid`, travels unauthenticated at
    /// noAuthNoPriv, and has its own reportable flag clear.
    pub(super) fn send_v3_report(
        &self,
        incoming: &V3Message,
        incoming_usm: &UsmSecurityParams,
        report_oid: Oid,
    ) -> Option<Bytes> {
        let counter_value = self.inner.usm_stats.increment_for(&report_oid);

        if !incoming.global_data.msg_flags.reportable {
            tracing::debug!(target: "simple_snmpd::usm", "reportable flag clear, suppressing report");
            return None;
        }

        let report_pdu = Pdu {
            pdu_type: PduType::Report,
            request_id: incoming.global_data.msg_id,
            error_status: 0,
            error_index: 0,
            varbinds: vec![VarBind::new(report_oid, Value::Counter32(counter_value))],
        };

        let response_global = MsgGlobalData::new(
            incoming.global_data.msg_id,
            incoming.global_data.msg_max_size,
            MsgFlags::new(SecurityLevel::NoAuthNoPriv, false),
        );

        let response_usm = UsmSecurityParams::new(
            Bytes::copy_from_slice(self.inner.engine.engine_id()),
            self.inner.engine.boots(),
            self.inner.engine.time(),
            incoming_usm.username.clone(),
        );

        let response_scoped = ScopedPdu::new(
            Bytes::copy_from_slice(self.inner.engine.engine_id()),
            Bytes::new(),
            report_pdu,
        );

        let response = V3Message::new(response_global, response_usm.encode(), response_scoped);

        Some(response.encode())
    }

    /// Build the response message at the request's security level:
    /// encrypt the scoped PDU for authPriv, authenticate for authNoPriv
    /// and above.
    pub(super) fn build_v3_response(
        &self,
        incoming: &V3Message,
        incoming_usm: &UsmSecurityParams,
        user: &UsmUser,
        response_pdu: Pdu,
        context_engine_id: Bytes,
        context_name: Bytes,
    ) -> Result<Bytes> {
        let security_level = incoming.security_level();
        let engine_boots = self.inner.engine.boots();
        let engine_time = self.inner.engine.time();

        let response_global = MsgGlobalData::new(
            incoming.global_data.msg_id,
            incoming.global_data.msg_max_size,
            MsgFlags::new(security_level, false),
        );

        let response_scoped = ScopedPdu::new(context_engine_id, context_name, response_pdu);

        match security_level {
            SecurityLevel::NoAuthNoPriv => {
                let response_usm = UsmSecurityParams::new(
                    Bytes::copy_from_slice(self.inner.engine.engine_id()),
                    engine_boots,
                    engine_time,
                    incoming_usm.username.clone(),
                );
                let response =
                    V3Message::new(response_global, response_usm.encode(), response_scoped);
                Ok(response.encode())
            }
            SecurityLevel::AuthNoPriv => {
                let auth_key = user.auth_key().ok_or(Error::auth(AuthErrorKind::NoAuthKey))?;

                let response_usm = UsmSecurityParams::new(
                    Bytes::copy_from_slice(self.inner.engine.engine_id()),
                    engine_boots,
                    engine_time,
                    incoming_usm.username.clone(),
                )
                .with_auth_placeholder(auth_key.mac_len());

                let response =
                    V3Message::new(response_global, response_usm.encode(), response_scoped);

                let mut response_bytes = response.encode().to_vec();
                let (auth_offset, auth_len) =
                    UsmSecurityParams::find_auth_params_offset(&response_bytes)
                        .ok_or(Error::auth(AuthErrorKind::AuthParamsNotFound))?;

                authenticate_message(auth_key, &mut response_bytes, auth_offset, auth_len);

                Ok(Bytes::from(response_bytes))
            }
            SecurityLevel::AuthPriv => {
                let auth_key = user.auth_key().ok_or(Error::auth(AuthErrorKind::NoAuthKey))?;
                let priv_key = user
                    .priv_key()
                    .ok_or(Error::encrypt(CryptoErrorKind::NoPrivKey))?;

                let scoped_pdu_bytes = response_scoped.encode_to_bytes();
                let (encrypted, priv_params) = priv_key.encrypt(
                    &scoped_pdu_bytes,
                    engine_boots,
                    engine_time,
                    &self.inner.salt_counter,
                )?;

                let response_usm = UsmSecurityParams::new(
                    Bytes::copy_from_slice(self.inner.engine.engine_id()),
                    engine_boots,
                    engine_time,
                    incoming_usm.username.clone(),
                )
                .with_auth_placeholder(auth_key.mac_len())
                .with_priv_params(priv_params);

                let response =
                    V3Message::new_encrypted(response_global, response_usm.encode(), encrypted);

                let mut response_bytes = response.encode().to_vec();
                let (auth_offset, auth_len) =
                    UsmSecurityParams::find_auth_params_offset(&response_bytes)
                        .ok_or(Error::auth(AuthErrorKind::AuthParamsNotFound))?;

                authenticate_message(auth_key, &mut response_bytes, auth_offset, auth_len);

                Ok(Bytes::from(response_bytes))
            }
        }
    }
}

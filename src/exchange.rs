//! Sending one request and receiving one verified response
//!
//! `send_receive_check` performs the generic part of every exchange:
//! deadline adjustment, transport invocation, delegation to the message
//! verification hook, and the body-type acceptance decision, including
//! the policy exception for unprotected negative responses.

use std::time::Duration;
use tracing::{info, warn};

use crate::context::CmpContext;
use crate::error::{CmpError, Result};
use crate::msg::{PkiBody, PkiMessage, REV_REQ_ID};
use crate::traits::VerifyEnv;
use crate::types::{BodyType, PkiStatus};

impl CmpContext {
    /// Send `request`, receive the response, and verify that it is an
    /// acceptable answer of type `expected`
    ///
    /// As an answer to polling, ip/cp/kup are acceptable where a pollRep
    /// was expected. A received error body is decomposed into the context
    /// status fields and the diagnostic trail before the call fails.
    pub(crate) fn send_receive_check(
        &mut self,
        request: &PkiMessage,
        expected: BodyType,
    ) -> Result<PkiMessage> {
        let req_type = request.body_type();

        let mut timeout =
            (self.config.msg_timeout > 0).then(|| Duration::from_secs(self.config.msg_timeout));
        if expected.is_cert_rep() || expected == BodyType::PollRep {
            if let Some(end) = self.end_time {
                let time_left = (end - self.now()).num_seconds();
                if time_left <= 0 {
                    return Err(CmpError::TotalTimeout);
                }
                let time_left = Duration::from_secs(time_left as u64);
                timeout = Some(match timeout {
                    Some(t) if t < time_left => t,
                    _ => time_left,
                });
            }
        }

        // the transport may clear whatever error channel the application
        // uses, so the trail is drained to the log first
        self.flush_diagnostics();

        info!("sending {req_type}");
        let response = self
            .transport
            .transfer(request, timeout)
            .ok_or(CmpError::Transfer {
                request: req_type,
                expected,
            })?;

        // preliminary value, logged before verification may fail
        info!("received {}", response.body_type());

        self.note_peer_nonce(response.header.sender_nonce);

        let allow_unprotected = match self.unprotected_exception(&response) {
            Some(msg_type) => {
                warn!("ignoring missing or invalid protection of {msg_type}");
                true
            }
            None => false,
        };
        let env = VerifyEnv {
            expected_type: expected,
            allow_unprotected,
            trusted: self.trusted(),
            untrusted: self.untrusted(),
            expected_sender: self.expected_sender(),
        };
        let received = self.verifier.check_received(&response, &env)?;

        if received == expected || (received.is_cert_rep() && expected == BodyType::PollRep) {
            return Ok(response);
        }

        if received == BodyType::Error {
            return Err(self.decompose_error_body(&response));
        }
        Err(CmpError::UnexpectedBody { received, expected })
    }

    /// Extract status information, errorCode, and errorDetails from a
    /// received error body into the context and the diagnostic trail
    fn decompose_error_body(&mut self, response: &PkiMessage) -> CmpError {
        let Some(emc) = response.error_content() else {
            return CmpError::Malformed("error body without content".into());
        };

        let mut detail = String::new();
        match self.save_status_info(&emc.status) {
            Ok(()) => {
                if let Some(rendered) = self.render_status() {
                    detail.push_str(&rendered);
                }
            }
            Err(e) => detail.push_str(&format!("unusable PKIStatusInfo in error body: {e}")),
        }
        if let Some(code) = emc.error_code {
            detail.push_str(&format!("; errorCode: {code}"));
        }
        if !emc.error_details.is_empty() {
            detail.push_str("; errorDetails: ");
            detail.push_str(&emc.error_details.join(", "));
        }

        if self.status() != Some(PkiStatus::Rejection) {
            self.add_diagnostic(format!(
                "unexpected PKIStatus '{}' in error body",
                self.status().map(|s| s.name()).unwrap_or("<unset>")
            ));
            if self.status() == Some(PkiStatus::Waiting) {
                self.status = Some(PkiStatus::Rejection);
            }
        }
        self.add_diagnostic(detail.clone());
        CmpError::ReceivedError(detail)
    }

    /// Evaluate whether the configured exception for negative responses
    /// without (valid) protection applies to this message
    ///
    /// Returns the message description when the exception applies. A
    /// CertRepMessage with more than one CertResponse is never accepted.
    fn unprotected_exception(&self, response: &PkiMessage) -> Option<&'static str> {
        if !self.config.unprotected_errors {
            return None;
        }
        match &response.body {
            PkiBody::Error(_) => Some("error response"),
            PkiBody::Rp(rrep) => {
                let si = rrep.status.get(REV_REQ_ID)?;
                (si.status().ok()? == PkiStatus::Rejection)
                    .then_some("revocation response message with rejection status")
            }
            PkiBody::PkiConf => Some("PKI Confirmation message"),
            PkiBody::Ip(rep) | PkiBody::Cp(rep) | PkiBody::Kup(rep) => {
                if rep.responses.len() > 1 {
                    return None;
                }
                let crep = rep.responses.first()?;
                (crep.status.status().ok()? == PkiStatus::Rejection)
                    .then_some("CertRepMessage with rejection status")
            }
            _ => None,
        }
    }
}

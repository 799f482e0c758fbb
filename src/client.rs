//! Public transaction entry points
//!
//! Each operation drives one full CMP exchange: certificate enrollment
//! (ir/cr/kur/p10cr with polling and confirmation), revocation (rr),
//! and general messages (genm). `try_certreq` is the non-blocking
//! enrollment variant that hands poll delays back to the caller.

use tracing::{info, warn};

use crate::certresp::CertRespOutcome;
use crate::context::CmpContext;
use crate::error::{CmpError, Result};
use crate::msg::{PkiBody, PkiMessage, CERT_REQ_ID, REV_REQ_ID};
use crate::poll::{PollMode, PollOutcome};
use crate::types::{BodyType, Certificate, FailInfo, InfoTypeAndValue, PkiStatus, RequestKind};

/// Outcome of a non-blocking enrollment step
#[derive(Debug)]
pub enum CertReqOutcome {
    /// The transaction finished; the certificate is also stored in the
    /// context
    Enrolled(Certificate),
    /// The server is still processing; poll again after `check_after`
    /// seconds
    Waiting {
        /// Server-requested delay before the next poll, in seconds
        check_after: i64,
    },
    /// Polling was aborted at the application's request and the server
    /// was notified
    Aborted,
}

impl CmpContext {
    /// The request id used for this kind; p10cr requests carry none and
    /// learn it from the response
    fn request_id(kind: RequestKind) -> i64 {
        if kind == RequestKind::P10Cr {
            -1
        } else {
            CERT_REQ_ID
        }
    }

    /// Run the full blocking enrollment sequence for `kind`:
    /// request, response, polling as needed, certConf/PKIconf
    fn do_certreq_seq(&mut self, kind: RequestKind) -> Result<Certificate> {
        self.begin_transaction();

        let req = self.build_cert_req(kind)?;
        let resp = self.send_receive_check(&req, kind.response_body_type())?;

        match self.cert_response(PollMode::Sleep, Self::request_id(kind), resp, kind)? {
            CertRespOutcome::Cert(cert) => Ok(cert),
            // the sleeping poll loop never hands a delay back
            CertRespOutcome::Waiting(_) => Err(CmpError::EncounteredWaiting),
        }
    }

    /// Execute an initialization request sequence (ir/ip)
    pub fn exec_ir(&mut self) -> Result<Certificate> {
        self.do_certreq_seq(RequestKind::Ir)
    }

    /// Execute a certification request sequence (cr/cp)
    pub fn exec_cr(&mut self) -> Result<Certificate> {
        self.do_certreq_seq(RequestKind::Cr)
    }

    /// Execute a key update request sequence (kur/kup)
    pub fn exec_kur(&mut self) -> Result<Certificate> {
        self.do_certreq_seq(RequestKind::Kur)
    }

    /// Execute a PKCS#10 certification request sequence (p10cr/cp)
    pub fn exec_p10cr(&mut self) -> Result<Certificate> {
        self.do_certreq_seq(RequestKind::P10Cr)
    }

    /// One non-blocking enrollment step
    ///
    /// Starting state: pass the request kind to send the certificate
    /// request. While the context status is `waiting`, each call resumes
    /// polling; passing `None` instead aborts the poll by sending an
    /// error message to the server.
    pub fn try_certreq(&mut self, kind: Option<RequestKind>) -> Result<CertReqOutcome> {
        if self.status() != Some(PkiStatus::Waiting) {
            // not polling already: start a fresh transaction
            let kind = kind.ok_or(CmpError::MissingInput(
                "request kind required to start an enrollment",
            ))?;
            self.begin_transaction();
            let req = self.build_cert_req(kind)?;
            let resp = self.send_receive_check(&req, kind.response_body_type())?;
            return self.finish_try_step(kind, resp);
        }

        let Some(kind) = kind else {
            self.exchange_error(
                PkiStatus::Rejection,
                FailInfo::empty(),
                Some("polling aborted"),
                0,
                Some("by application"),
            )?;
            return Ok(CertReqOutcome::Aborted);
        };
        match self.poll_for_response(PollMode::NoWait, Self::request_id(kind))? {
            PollOutcome::Waiting(check_after) => Ok(CertReqOutcome::Waiting { check_after }),
            PollOutcome::Done(resp) => self.finish_try_step(kind, resp),
        }
    }

    fn finish_try_step(&mut self, kind: RequestKind, resp: PkiMessage) -> Result<CertReqOutcome> {
        match self.cert_response(PollMode::NoWait, Self::request_id(kind), resp, kind)? {
            CertRespOutcome::Cert(cert) => Ok(CertReqOutcome::Enrolled(cert)),
            CertRespOutcome::Waiting(check_after) => Ok(CertReqOutcome::Waiting { check_after }),
        }
    }

    /// Execute a revocation request sequence (rr/rp) for the reference
    /// certificate, returning it on success
    pub fn exec_rr(&mut self) -> Result<Certificate> {
        let old_cert = self
            .old_cert()
            .cloned()
            .ok_or(CmpError::MissingInput("reference certificate required for rr"))?;
        self.status = None;

        let rr = self.build_rr()?;
        let rp = self.send_receive_check(&rr, BodyType::Rp)?;

        let result = self.evaluate_rev_rep(&rr, &rp, old_cert);
        if result.is_err() {
            if let Some(rendered) = self.render_status() {
                self.add_diagnostic(rendered);
            }
        }
        result
    }

    fn evaluate_rev_rep(
        &mut self,
        rr: &PkiMessage,
        rp: &PkiMessage,
        old_cert: Certificate,
    ) -> Result<Certificate> {
        const NUM_REV_DETAILS: usize = 1;
        let rrep = rp
            .rev_rep()
            .ok_or_else(|| CmpError::Malformed("revocation response without content".into()))?
            .clone();

        let status_count = rrep.status.len();
        if self.config.tolerate_rp_mismatch {
            if status_count < 1 {
                return Err(CmpError::WrongRpComponentCount(status_count));
            }
        } else if status_count != NUM_REV_DETAILS {
            return Err(CmpError::WrongRpComponentCount(status_count));
        }

        let si = &rrep.status[REV_REQ_ID];
        self.save_status_info(si)?;
        match si.status()? {
            PkiStatus::Accepted => info!("revocation accepted (PKIStatus=accepted)"),
            PkiStatus::GrantedWithMods => {
                info!("revocation accepted (PKIStatus=grantedWithMods)")
            }
            PkiStatus::Rejection => return Err(CmpError::RequestRejectedByServer),
            PkiStatus::RevocationWarning => {
                info!("revocation accepted (PKIStatus=revocationWarning)")
            }
            PkiStatus::RevocationNotification => {
                // interpretation as warning or error depends on the CA
                warn!("revocation accepted (PKIStatus=revocationNotification)")
            }
            status @ (PkiStatus::Waiting | PkiStatus::KeyUpdateWarning) => {
                return Err(CmpError::UnexpectedPkiStatus(status.name().into()))
            }
        }

        // check any present CertId in the optional revCerts field
        if let Some(rev_certs) = &rrep.rev_certs {
            if rev_certs.len() != NUM_REV_DETAILS {
                return Err(CmpError::WrongRpComponentCount(rev_certs.len()));
            }
            let cid = &rev_certs[REV_REQ_ID];
            let PkiBody::Rr(req_content) = &rr.body else {
                return Err(CmpError::Malformed("revocation request body vanished".into()));
            };
            let template = &req_content.details[REV_REQ_ID].cert_details;

            if template.issuer.as_deref() != Some(cid.issuer.as_str()) {
                if self.config.tolerate_rp_mismatch {
                    warn!("ignoring wrong CertId issuer in revocation response");
                } else {
                    return Err(CmpError::WrongCertIdInRp);
                }
            }
            if template.serial.as_deref() != Some(cid.serial.as_slice()) {
                if self.config.tolerate_rp_mismatch {
                    warn!("ignoring wrong serial number in revocation response");
                } else {
                    return Err(CmpError::WrongSerialInRp);
                }
            }
        }

        // check the count of any optionally present CRLs
        if let Some(crls) = &rrep.crls {
            if crls.len() != NUM_REV_DETAILS {
                return Err(CmpError::WrongRpComponentCount(crls.len()));
            }
        }

        Ok(old_cert)
    }

    /// Execute a general message sequence (genm/genp), transferring the
    /// received InfoTypeAndValue list to the caller
    pub fn exec_genm(&mut self) -> Result<Vec<InfoTypeAndValue>> {
        let genm = self.build_genm()?;
        let genp = self.send_receive_check(&genm, BodyType::Genp)?;
        match genp.body {
            PkiBody::Genp(itavs) => Ok(itavs),
            _ => Err(CmpError::Malformed("genp body without content".into())),
        }
    }
}

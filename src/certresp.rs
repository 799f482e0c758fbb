//! Handling of certificate responses for IR/CR/KUR/P10CR
//!
//! Extracts the issued certificate according to the PKIStatus, checks it
//! against the enrollment key, lets the application's confirmation
//! callback accept or reject it, and performs the certConf/PKIconf
//! handshake when implicit confirmation was not granted.

use tracing::{error, warn};

use crate::context::CmpContext;
use crate::error::{CmpError, Result};
use crate::msg::{CertOrEncCert, CertResponse, PkiMessage};
use crate::poll::{PollMode, PollOutcome};
use crate::status::PkiStatusInfo;
use crate::traits::{CertConfirm, Confirmation, ConfirmRequest};
use crate::types::{BodyType, Certificate, FailInfo, FailureInfo, PkiStatus, RequestKind};

/// Outcome of handling one certificate response
#[derive(Debug)]
pub(crate) enum CertRespOutcome {
    /// The enrollment finished with this certificate
    Cert(Certificate),
    /// Still waiting; poll again after the given number of seconds
    Waiting(i64),
}

/// The provided certificate-confirmation callback
///
/// Accepts any failure already flagged by the core. Otherwise, when an
/// out-trusted store is configured, the new certificate must validate
/// against it; a missing or failing path validation flags
/// `incorrectData`. Note that CMP does not require an end entity to be
/// able to validate its own new certificate, so installing this callback
/// is the application's choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCertConfirm;

impl CertConfirm for DefaultCertConfirm {
    fn confirm(&self, request: &ConfirmRequest<'_>) -> Confirmation {
        if !request.fail_info.is_empty() {
            return Confirmation {
                fail_info: request.fail_info,
                text: request.text.map(str::to_string),
            };
        }
        let mut fail_info = FailInfo::empty();
        if let Some(trusted) = request.out_trusted {
            let validated = request
                .path_validator
                .map(|v| v.validate(request.cert, trusted, request.untrusted))
                .unwrap_or(false);
            if !validated {
                fail_info.set(FailureInfo::IncorrectData);
            }
        }
        Confirmation {
            fail_info,
            text: None,
        }
    }
}

impl CmpContext {
    /// Handle the certificate response `resp` for the request with id
    /// `rid`, polling as long as the server reports 'waiting'
    pub(crate) fn cert_response(
        &mut self,
        mode: PollMode,
        mut rid: i64,
        mut resp: PkiMessage,
        kind: RequestKind,
    ) -> Result<CertRespOutcome> {
        let (crep, implicit_confirm) = loop {
            let implicit_confirm = resp.header.implicit_confirm;
            let crep = {
                let crepmsg = resp.cert_rep().ok_or_else(|| {
                    CmpError::Malformed("certificate response without CertRepMessage".into())
                })?;
                if crepmsg.responses.len() > 1 {
                    return Err(CmpError::MultipleResponsesNotSupported);
                }
                crepmsg
                    .response_for(rid)
                    .ok_or(CmpError::BadRequestId)?
                    .clone()
            };
            self.save_status_info(&crep.status)?;
            if rid == -1 {
                // for p10cr, learn the certReqId from the response
                rid = crep.cert_req_id;
                if rid == -1 {
                    return Err(CmpError::Malformed(
                        "certResponse missing certReqId for p10cr request".into(),
                    ));
                }
            }

            if self.status() != Some(PkiStatus::Waiting) {
                break (crep, implicit_confirm);
            }
            drop(resp);
            match self.poll_for_response(mode, rid) {
                Ok(PollOutcome::Waiting(check_after)) => {
                    return Ok(CertRespOutcome::Waiting(check_after))
                }
                // the ip/cp/kup received while polling may still say 'waiting'
                Ok(PollOutcome::Done(next)) => resp = next,
                Err(e) => return Err(CmpError::PollingFailed(Box::new(e))),
            }
        };

        // the certConf for this transaction must echo the resolved id
        self.note_cert_req_id(rid);

        let cert = match self.cert_from_response(kind, &crep) {
            Ok(cert) => cert,
            Err(e) => {
                if let Some(rendered) = self.render_status() {
                    self.add_diagnostic(rendered);
                }
                self.add_diagnostic("cannot extract certificate from response".into());
                return Err(e);
            }
        };
        self.store_new_cert(cert.clone());

        let ca_pubs = resp
            .cert_rep()
            .map(|rep| rep.ca_pubs.clone())
            .unwrap_or_default();
        if !ca_pubs.is_empty() {
            self.store_ca_pubs(ca_pubs);
        }
        self.store_extra_certs_in(std::mem::take(&mut resp.extra_certs));

        let (fail_info, text) = self.judge_new_cert(&cert)?;

        let subject = cert.subject().unwrap_or_else(|_| "<unparsable>".into());
        if !fail_info.is_empty() {
            // keep the local verdict inspectable on the context
            self.fail_info |= fail_info;
            // log before any certConf exchange can clear the trail
            error!("rejecting newly enrolled cert with subject: {subject}");
        }

        let conf_result = if !self.config.disable_confirm && !implicit_confirm {
            self.exchange_certconf(fail_info, text.as_deref())
        } else {
            Ok(())
        };

        if !fail_info.is_empty() {
            let reason = text.map(|t| format!("; {t}")).unwrap_or_default();
            return Err(CmpError::CertificateNotAccepted { subject, reason });
        }
        conf_result?;
        Ok(CertRespOutcome::Cert(cert))
    }

    /// Retrieve the certificate from the CertResponse according to its
    /// PKIStatus, decrypting it with the enrollment key if necessary
    fn cert_from_response(&self, kind: RequestKind, crep: &CertResponse) -> Result<Certificate> {
        match crep.status.status()? {
            PkiStatus::Waiting => {
                error!(
                    "received \"waiting\" status for cert when actually aiming to extract cert"
                );
                Err(CmpError::EncounteredWaiting)
            }
            PkiStatus::GrantedWithMods => {
                warn!("received \"grantedWithMods\" for certificate");
                self.extract_cert(crep)
            }
            PkiStatus::Accepted => self.extract_cert(crep),
            PkiStatus::Rejection => {
                error!("received \"rejection\" status rather than cert");
                Err(CmpError::RequestRejectedByServer)
            }
            PkiStatus::RevocationWarning => {
                warn!("received \"revocationWarning\" - a revocation of the cert is imminent");
                self.extract_cert(crep)
            }
            PkiStatus::RevocationNotification => {
                warn!("received \"revocationNotification\" - a revocation of the cert has occurred");
                self.extract_cert(crep)
            }
            PkiStatus::KeyUpdateWarning => {
                if kind != RequestKind::Kur {
                    return Err(CmpError::EncounteredKeyUpdateWarning);
                }
                self.extract_cert(crep)
            }
        }
    }

    fn extract_cert(&self, crep: &CertResponse) -> Result<Certificate> {
        match &crep.cert {
            // according to the PKIStatus, a certificate can be expected
            None => Err(CmpError::CertificateNotFound),
            Some(CertOrEncCert::Certificate(cert)) => Ok(cert.clone()),
            Some(CertOrEncCert::Encrypted(enc)) => {
                let key = self.new_key().ok_or(CmpError::MissingInput(
                    "enrollment key required to decrypt issued certificate",
                ))?;
                let decrypter = self.cert_decrypter.as_ref().ok_or(CmpError::MissingInput(
                    "certificate decrypter required for encrypted issuance",
                ))?;
                decrypter.decrypt(enc, key)
            }
        }
    }

    /// Run the key-match check and the confirmation callback over the
    /// newly enrolled certificate
    fn judge_new_cert(&mut self, cert: &Certificate) -> Result<(FailInfo, Option<String>)> {
        let mut fail_info = FailInfo::empty();
        let mut text: Option<String> = None;

        if let Some(key) = self.new_key() {
            if cert.public_key_der()? != key.public_key_der() {
                // not aborting here: the confirmation callback decides
                fail_info.set(FailureInfo::IncorrectData);
                text = Some(
                    "public key in new certificate does not match our enrollment key".into(),
                );
            }
        }

        if let Some(cb) = &self.cert_confirm {
            let pool: Vec<Certificate> = self
                .untrusted()
                .iter()
                .chain(self.extra_certs_in().iter())
                .cloned()
                .collect();
            let verdict = cb.confirm(&ConfirmRequest {
                cert,
                fail_info,
                text: text.as_deref(),
                out_trusted: self.out_trusted(),
                untrusted: &pool,
                path_validator: self.path_validator.as_deref(),
            });
            fail_info = verdict.fail_info;
            if let Some(t) = verdict.text {
                text = Some(t);
            }
            if !fail_info.is_empty() && text.is_none() {
                text = Some("CMP client application did not accept it".into());
            }
        }
        Ok((fail_info, text))
    }

    /// Send a certConf carrying the acceptance verdict and expect PKIconf
    pub fn exchange_certconf(&mut self, fail_info: FailInfo, text: Option<&str>) -> Result<()> {
        let cert_conf = self.build_cert_conf(fail_info, text)?;
        self.send_receive_check(&cert_conf, BodyType::PkiConf)?;
        Ok(())
    }

    /// Send an error message with the given status and expect PKIconf
    pub fn exchange_error(
        &mut self,
        status: PkiStatus,
        fail_info: FailInfo,
        text: Option<&str>,
        error_code: i64,
        details: Option<&str>,
    ) -> Result<()> {
        let si = PkiStatusInfo::new(status, fail_info, text);
        let error = self.build_error(si, error_code, details)?;
        self.send_receive_check(&error, BodyType::PkiConf)?;
        Ok(())
    }
}

//! Parsed PKIMessage model and request construction
//!
//! The client operates on fully parsed message values; DER encoding and
//! decoding happen outside the crate. Each body variant carries the
//! content structure the protocol defines for it, and the request
//! constructors assemble outgoing messages from the transaction context.

use sha2::{Digest, Sha256};

use crate::context::CmpContext;
use crate::error::{CmpError, Result};
use crate::status::PkiStatusInfo;
use crate::types::{
    BodyType, Certificate, CertId, Crl, FailInfo, InfoTypeAndValue, Nonce, PkiStatus,
    RequestKind, RevocationReason, TransactionId,
};
use crate::utctime::UtcTime;

/// PKIHeader fields the client reads or writes
#[derive(Debug, Clone)]
pub struct PkiHeader {
    /// Sender name, if present
    pub sender: Option<String>,
    /// Recipient name, if present
    pub recipient: Option<String>,
    /// Transaction identifier tying the exchange together
    pub transaction_id: TransactionId,
    /// Fresh nonce of the sending side
    pub sender_nonce: Option<Nonce>,
    /// Echo of the peer's last sender nonce
    pub recip_nonce: Option<Nonce>,
    /// Time of production of this message
    pub message_time: Option<UtcTime>,
    /// Whether the implicitConfirm generalInfo flag is set
    pub implicit_confirm: bool,
}

/// Certificate template carried in certReq and rr bodies
#[derive(Debug, Clone, Default)]
pub struct CertTemplate {
    /// Requested or referenced subject name
    pub subject: Option<String>,
    /// Issuer name (revocation and key-update references)
    pub issuer: Option<String>,
    /// Serial number (revocation references)
    pub serial: Option<Vec<u8>>,
    /// SubjectPublicKeyInfo of the key to be certified
    pub public_key: Option<Vec<u8>>,
}

/// One CertRequest of an ir/cr/kur body
#[derive(Debug, Clone)]
pub struct CertRequest {
    /// Request identifier, echoed by the server
    pub cert_req_id: i64,
    /// The requested certificate contents
    pub template: CertTemplate,
}

/// PKCS#10 request wrapped in a p10cr body
#[derive(Debug, Clone)]
pub struct Pkcs10Request {
    /// DER-encoded CertificationRequest
    pub csr_der: Vec<u8>,
}

/// A certificate, possibly encrypted to the enrollment key
#[derive(Debug, Clone)]
pub enum CertOrEncCert {
    /// Certificate in the clear
    Certificate(Certificate),
    /// Certificate encrypted to the new key (indirect POP)
    Encrypted(EncryptedCert),
}

/// An encrypted certificate blob awaiting decryption
#[derive(Debug, Clone)]
pub struct EncryptedCert {
    /// Opaque EncryptedValue encoding
    pub blob: Vec<u8>,
}

/// One CertResponse of an ip/cp/kup body
#[derive(Debug, Clone)]
pub struct CertResponse {
    /// The certReqId this response answers; -1 when the server refers to
    /// a p10cr request
    pub cert_req_id: i64,
    /// Outcome for this request
    pub status: PkiStatusInfo,
    /// The issued certificate, when the status grants one
    pub cert: Option<CertOrEncCert>,
}

/// Content of an ip/cp/kup body
#[derive(Debug, Clone)]
pub struct CertRepMessage {
    /// CA certificates the server wants the client to know
    pub ca_pubs: Vec<Certificate>,
    /// The individual certificate responses
    pub responses: Vec<CertResponse>,
}

impl CertRepMessage {
    /// Find the CertResponse matching the given request id; any single
    /// response matches the wildcard id -1
    pub fn response_for(&self, cert_req_id: i64) -> Option<&CertResponse> {
        if cert_req_id == -1 {
            return self.responses.first();
        }
        self.responses
            .iter()
            .find(|r| r.cert_req_id == cert_req_id)
    }
}

/// One RevDetails of an rr body
#[derive(Debug, Clone)]
pub struct RevDetails {
    /// Certificate to be revoked
    pub cert_details: CertTemplate,
    /// Requested revocation reason
    pub reason: Option<RevocationReason>,
}

/// Content of an rr body
#[derive(Debug, Clone)]
pub struct RevReqContent {
    /// The revocation requests (the client sends exactly one)
    pub details: Vec<RevDetails>,
}

/// Content of an rp body
#[derive(Debug, Clone)]
pub struct RevRepContent {
    /// Per-request outcomes, in request order
    pub status: Vec<PkiStatusInfo>,
    /// Ids of the revoked certificates, when the server echoes them
    pub rev_certs: Option<Vec<CertId>>,
    /// Resulting CRLs, when the server publishes them
    pub crls: Option<Vec<Crl>>,
}

/// One entry of a pollRep body
#[derive(Debug, Clone)]
pub struct PollRep {
    /// The certReqId being polled
    pub cert_req_id: i64,
    /// Seconds the client should wait before the next poll
    pub check_after: i64,
    /// Optional free-text reason for the delay
    pub reason: Vec<String>,
}

/// Content of a pollRep body
#[derive(Debug, Clone)]
pub struct PollRepContent {
    /// The poll responses (the client accepts exactly one)
    pub entries: Vec<PollRep>,
}

impl PollRepContent {
    /// Find the pollRep matching the given request id; any single entry
    /// matches the wildcard id -1
    pub fn entry_for(&self, cert_req_id: i64) -> Option<&PollRep> {
        if cert_req_id == -1 {
            return self.entries.first();
        }
        self.entries.iter().find(|p| p.cert_req_id == cert_req_id)
    }
}

/// Content of a certConf body (the client sends one CertStatus)
#[derive(Debug, Clone)]
pub struct CertConfirmContent {
    /// Hash of the certificate being confirmed
    pub cert_hash: Vec<u8>,
    /// The certReqId the confirmation refers to
    pub cert_req_id: i64,
    /// Acceptance or rejection of the certificate
    pub status: PkiStatusInfo,
}

/// Content of an error body
#[derive(Debug, Clone)]
pub struct ErrorMsgContent {
    /// Status information describing the error
    pub status: PkiStatusInfo,
    /// Implementation-specific error code
    pub error_code: Option<i64>,
    /// Free-text error details
    pub error_details: Vec<String>,
}

/// The PKIBody variants the client consumes or produces
#[derive(Debug, Clone)]
pub enum PkiBody {
    /// Initialization request
    Ir(Vec<CertRequest>),
    /// Initialization response
    Ip(CertRepMessage),
    /// Certification request
    Cr(Vec<CertRequest>),
    /// Certification response
    Cp(CertRepMessage),
    /// PKCS#10 certification request
    P10cr(Pkcs10Request),
    /// Key update request
    Kur(Vec<CertRequest>),
    /// Key update response
    Kup(CertRepMessage),
    /// Revocation request
    Rr(RevReqContent),
    /// Revocation response
    Rp(RevRepContent),
    /// Certificate confirmation
    CertConf(CertConfirmContent),
    /// PKI confirmation
    PkiConf,
    /// Polling request, carrying the polled certReqIds
    PollReq(Vec<i64>),
    /// Polling response
    PollRep(PollRepContent),
    /// General message
    Genm(Vec<InfoTypeAndValue>),
    /// General response
    Genp(Vec<InfoTypeAndValue>),
    /// Error message
    Error(ErrorMsgContent),
}

/// A fully parsed PKIMessage
#[derive(Debug, Clone)]
pub struct PkiMessage {
    /// The message header
    pub header: PkiHeader,
    /// The message body
    pub body: PkiBody,
    /// Certificates accompanying the message
    pub extra_certs: Vec<Certificate>,
}

impl PkiMessage {
    /// The body type tag of this message
    pub fn body_type(&self) -> BodyType {
        match &self.body {
            PkiBody::Ir(_) => BodyType::Ir,
            PkiBody::Ip(_) => BodyType::Ip,
            PkiBody::Cr(_) => BodyType::Cr,
            PkiBody::Cp(_) => BodyType::Cp,
            PkiBody::P10cr(_) => BodyType::P10cr,
            PkiBody::Kur(_) => BodyType::Kur,
            PkiBody::Kup(_) => BodyType::Kup,
            PkiBody::Rr(_) => BodyType::Rr,
            PkiBody::Rp(_) => BodyType::Rp,
            PkiBody::CertConf(_) => BodyType::CertConf,
            PkiBody::PkiConf => BodyType::PkiConf,
            PkiBody::PollReq(_) => BodyType::PollReq,
            PkiBody::PollRep(_) => BodyType::PollRep,
            PkiBody::Genm(_) => BodyType::Genm,
            PkiBody::Genp(_) => BodyType::Genp,
            PkiBody::Error(_) => BodyType::Error,
        }
    }

    /// The CertRepMessage of an ip/cp/kup body
    pub fn cert_rep(&self) -> Option<&CertRepMessage> {
        match &self.body {
            PkiBody::Ip(rep) | PkiBody::Cp(rep) | PkiBody::Kup(rep) => Some(rep),
            _ => None,
        }
    }

    /// The RevRepContent of an rp body
    pub fn rev_rep(&self) -> Option<&RevRepContent> {
        match &self.body {
            PkiBody::Rp(rep) => Some(rep),
            _ => None,
        }
    }

    /// The PollRepContent of a pollRep body
    pub fn poll_rep(&self) -> Option<&PollRepContent> {
        match &self.body {
            PkiBody::PollRep(rep) => Some(rep),
            _ => None,
        }
    }

    /// The ErrorMsgContent of an error body
    pub fn error_content(&self) -> Option<&ErrorMsgContent> {
        match &self.body {
            PkiBody::Error(emc) => Some(emc),
            _ => None,
        }
    }
}

/// The fixed request id the client uses for non-p10cr certificate requests
pub const CERT_REQ_ID: i64 = 0;

/// Index of the single RevDetails entry in a revocation request
pub const REV_REQ_ID: usize = 0;

impl CmpContext {
    /// Assemble a fresh header for an outgoing request
    fn new_header(&self) -> PkiHeader {
        PkiHeader {
            sender: self.config.sender.clone(),
            recipient: self.config.recipient.clone(),
            transaction_id: self.transaction_id(),
            sender_nonce: Some(Nonce::random()),
            recip_nonce: self.last_recip_nonce(),
            message_time: UtcTime::from_timestamp(self.now().timestamp()).ok(),
            implicit_confirm: false,
        }
    }

    /// Build an ir/cr/kur/p10cr request
    ///
    /// Also checks that the context carries the material the request kind
    /// needs: a CSR for p10cr, the enrollment key otherwise, plus the
    /// reference certificate for kur.
    pub(crate) fn build_cert_req(&self, kind: RequestKind) -> Result<PkiMessage> {
        let mut header = self.new_header();
        header.implicit_confirm = self.config.implicit_confirm;

        let body = match kind {
            RequestKind::P10Cr => {
                let csr = self.csr().ok_or(CmpError::MissingInput(
                    "PKCS#10 CSR required for p10cr",
                ))?;
                PkiBody::P10cr(Pkcs10Request {
                    csr_der: csr.to_vec(),
                })
            }
            _ => {
                let key = self.new_key().ok_or(CmpError::MissingInput(
                    "enrollment key required for certificate request",
                ))?;
                let mut template = CertTemplate {
                    subject: self.config.subject.clone(),
                    public_key: Some(key.public_key_der().to_vec()),
                    ..CertTemplate::default()
                };
                if kind == RequestKind::Kur {
                    let old = self.old_cert().ok_or(CmpError::MissingInput(
                        "reference certificate required for kur",
                    ))?;
                    template.issuer = Some(old.issuer()?);
                    if template.subject.is_none() {
                        template.subject = Some(old.subject()?);
                    }
                }
                let request = CertRequest {
                    cert_req_id: CERT_REQ_ID,
                    template,
                };
                match kind {
                    RequestKind::Ir => PkiBody::Ir(vec![request]),
                    RequestKind::Cr => PkiBody::Cr(vec![request]),
                    RequestKind::Kur => PkiBody::Kur(vec![request]),
                    RequestKind::P10Cr => unreachable!("handled above"),
                }
            }
        };

        Ok(PkiMessage {
            header,
            body,
            extra_certs: Vec::new(),
        })
    }

    /// Build a revocation request for the context's reference certificate
    pub(crate) fn build_rr(&self) -> Result<PkiMessage> {
        let old = self
            .old_cert()
            .ok_or(CmpError::MissingInput("reference certificate required for rr"))?;
        let details = RevDetails {
            cert_details: CertTemplate {
                subject: Some(old.subject()?),
                issuer: Some(old.issuer()?),
                serial: Some(old.serial()?),
                public_key: None,
            },
            reason: self.revocation_reason(),
        };
        Ok(PkiMessage {
            header: self.new_header(),
            body: PkiBody::Rr(RevReqContent {
                details: vec![details],
            }),
            extra_certs: Vec::new(),
        })
    }

    /// Build a pollReq for the given request id
    pub(crate) fn build_poll_req(&self, cert_req_id: i64) -> Result<PkiMessage> {
        Ok(PkiMessage {
            header: self.new_header(),
            body: PkiBody::PollReq(vec![cert_req_id]),
            extra_certs: Vec::new(),
        })
    }

    /// Build a certConf carrying the acceptance verdict for the newly
    /// enrolled certificate
    pub(crate) fn build_cert_conf(
        &self,
        fail_info: FailInfo,
        text: Option<&str>,
    ) -> Result<PkiMessage> {
        let cert = self
            .new_cert()
            .ok_or(CmpError::MissingInput("no newly enrolled certificate to confirm"))?;
        let mut hasher = Sha256::new();
        hasher.update(cert.der());
        let status = if fail_info.is_empty() {
            PkiStatusInfo::new(PkiStatus::Accepted, fail_info, text)
        } else {
            PkiStatusInfo::new(PkiStatus::Rejection, fail_info, text)
        };
        Ok(PkiMessage {
            header: self.new_header(),
            body: PkiBody::CertConf(CertConfirmContent {
                cert_hash: hasher.finalize().to_vec(),
                cert_req_id: self.cert_req_id(),
                status,
            }),
            extra_certs: Vec::new(),
        })
    }

    /// Build an error message reporting the given status to the server
    pub(crate) fn build_error(
        &self,
        si: PkiStatusInfo,
        error_code: i64,
        details: Option<&str>,
    ) -> Result<PkiMessage> {
        Ok(PkiMessage {
            header: self.new_header(),
            body: PkiBody::Error(ErrorMsgContent {
                status: si,
                error_code: Some(error_code),
                error_details: details.map(|d| vec![d.to_string()]).unwrap_or_default(),
            }),
            extra_certs: Vec::new(),
        })
    }

    /// Build a general message from the context's queued ITAVs
    pub(crate) fn build_genm(&self) -> Result<PkiMessage> {
        Ok(PkiMessage {
            header: self.new_header(),
            body: PkiBody::Genm(self.genm_itavs().to_vec()),
            extra_certs: Vec::new(),
        })
    }
}

//! Common test utilities and fixtures for cmp-client tests
//!
//! A scripted transport plays canned server responses, a permissive
//! verifier confirms whatever arrives, and a mock clock records sleeps
//! instead of performing them. No real network, no real waiting.

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use cmp_client::msg::{
    CertOrEncCert, CertRepMessage, CertResponse, ErrorMsgContent, PkiBody, PkiHeader, PkiMessage,
    PollRep, PollRepContent, RevRepContent, CERT_REQ_ID,
};
use cmp_client::prelude::*;

/// Record of every request body type the scripted transport saw
pub type SentLog = Arc<Mutex<Vec<BodyType>>>;

/// Transport playing a fixed sequence of responses
pub struct ScriptedTransport {
    responses: VecDeque<PkiMessage>,
    sent: SentLog,
    /// Request messages, kept for content assertions
    captured: Arc<Mutex<Vec<PkiMessage>>>,
}

impl ScriptedTransport {
    /// Build a transport that answers with `responses` in order and
    /// fails once the script is exhausted
    pub fn new(responses: Vec<PkiMessage>) -> (Self, SentLog, Arc<Mutex<Vec<PkiMessage>>>) {
        let sent: SentLog = Arc::default();
        let captured: Arc<Mutex<Vec<PkiMessage>>> = Arc::default();
        (
            Self {
                responses: responses.into(),
                sent: sent.clone(),
                captured: captured.clone(),
            },
            sent,
            captured,
        )
    }
}

impl Transport for ScriptedTransport {
    fn transfer(&mut self, request: &PkiMessage, _timeout: Option<Duration>) -> Option<PkiMessage> {
        self.sent.lock().unwrap().push(request.body_type());
        self.captured.lock().unwrap().push(request.clone());
        self.responses.pop_front()
    }
}

/// Verifier that confirms whatever body type arrived
pub struct AcceptAllVerifier;

impl MessageVerifier for AcceptAllVerifier {
    fn check_received(&self, response: &PkiMessage, _env: &VerifyEnv<'_>) -> Result<BodyType> {
        Ok(response.body_type())
    }
}

/// Clock that starts at a fixed instant, records every sleep, and lets
/// sleeping advance the reported time
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
    sleeps: Arc<Mutex<Vec<u64>>>,
}

impl TestClock {
    /// Create a clock plus a handle to its sleep log
    pub fn new() -> (Self, Arc<Mutex<Vec<u64>>>) {
        let now = Arc::new(Mutex::new(Utc.timestamp_opt(1_700_000_000, 0).unwrap()));
        let sleeps: Arc<Mutex<Vec<u64>>> = Arc::default();
        (
            Self {
                now,
                sleeps: sleeps.clone(),
            },
            sleeps,
        )
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration.as_secs());
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).expect("sleep duration fits");
    }
}

/// Handles to the moving parts of a scripted context
pub struct Harness {
    pub ctx: CmpContext,
    pub sent: SentLog,
    pub captured: Arc<Mutex<Vec<PkiMessage>>>,
    pub sleeps: Arc<Mutex<Vec<u64>>>,
}

/// Wire a context to a scripted transport, the permissive verifier, and
/// the test clock
pub fn harness(responses: Vec<PkiMessage>) -> Harness {
    let (transport, sent, captured) = ScriptedTransport::new(responses);
    let mut ctx = CmpContext::new(Box::new(transport), Box::new(AcceptAllVerifier));
    let (clock, sleeps) = TestClock::new();
    ctx.set_clock(Box::new(clock));
    Harness {
        ctx,
        sent,
        captured,
        sleeps,
    }
}

/// Mint a fresh self-signed certificate plus its enrollment key
pub fn make_cert(cn: &str) -> (Certificate, EnrollmentKey) {
    let key_pair = rcgen::KeyPair::generate().expect("key generation");
    let mut params = rcgen::CertificateParams::new(Vec::new()).expect("cert params");
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, cn);
    let not_before = time::OffsetDateTime::now_utc() - time::Duration::days(1);
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(90);
    let cert = params.self_signed(&key_pair).expect("self signing");
    (
        Certificate::from_der(cert.der().to_vec()).expect("generated cert parses"),
        EnrollmentKey::from_spki_der(rcgen::PublicKeyData::subject_public_key_info(&key_pair)),
    )
}

/// A certificate/key pair shared by tests that do not care about identity
pub fn shared_cert() -> &'static (Certificate, EnrollmentKey) {
    static CERT: OnceLock<(Certificate, EnrollmentKey)> = OnceLock::new();
    CERT.get_or_init(|| make_cert("shared.test"))
}

/// A default response header
pub fn header(implicit_confirm: bool) -> PkiHeader {
    PkiHeader {
        sender: Some("CN=mock-ca".into()),
        recipient: None,
        transaction_id: TransactionId::new(),
        sender_nonce: Some(Nonce::random()),
        recip_nonce: None,
        message_time: None,
        implicit_confirm,
    }
}

/// Wrap a body into a response message
pub fn message(body: PkiBody) -> PkiMessage {
    PkiMessage {
        header: header(false),
        body,
        extra_certs: Vec::new(),
    }
}

/// An ip response with one CertResponse
pub fn ip(status: PkiStatus, cert: Option<&Certificate>, implicit_confirm: bool) -> PkiMessage {
    cert_rep_message(BodyType::Ip, status, cert, implicit_confirm)
}

/// A cp response with one CertResponse
pub fn cp(status: PkiStatus, cert: Option<&Certificate>, implicit_confirm: bool) -> PkiMessage {
    cert_rep_message(BodyType::Cp, status, cert, implicit_confirm)
}

/// A kup response with one CertResponse
pub fn kup(status: PkiStatus, cert: Option<&Certificate>, implicit_confirm: bool) -> PkiMessage {
    cert_rep_message(BodyType::Kup, status, cert, implicit_confirm)
}

fn cert_rep_message(
    body_type: BodyType,
    status: PkiStatus,
    cert: Option<&Certificate>,
    implicit_confirm: bool,
) -> PkiMessage {
    let rep = CertRepMessage {
        ca_pubs: Vec::new(),
        responses: vec![CertResponse {
            cert_req_id: CERT_REQ_ID,
            status: PkiStatusInfo::new(status, FailInfo::empty(), None),
            cert: cert.map(|c| CertOrEncCert::Certificate(c.clone())),
        }],
    };
    let body = match body_type {
        BodyType::Ip => PkiBody::Ip(rep),
        BodyType::Cp => PkiBody::Cp(rep),
        BodyType::Kup => PkiBody::Kup(rep),
        other => panic!("not a cert rep body: {other}"),
    };
    PkiMessage {
        header: header(implicit_confirm),
        body,
        extra_certs: Vec::new(),
    }
}

/// A pollRep asking to check again after `check_after` seconds
pub fn poll_rep(check_after: i64) -> PkiMessage {
    message(PkiBody::PollRep(PollRepContent {
        entries: vec![PollRep {
            cert_req_id: CERT_REQ_ID,
            check_after,
            reason: Vec::new(),
        }],
    }))
}

/// A PKI confirmation message
pub fn pki_conf() -> PkiMessage {
    message(PkiBody::PkiConf)
}

/// An error response
pub fn error_body(
    status: PkiStatus,
    fail_info: FailInfo,
    status_text: Option<&str>,
    error_code: Option<i64>,
    details: Vec<String>,
) -> PkiMessage {
    message(PkiBody::Error(ErrorMsgContent {
        status: PkiStatusInfo::new(status, fail_info, status_text),
        error_code,
        error_details: details,
    }))
}

/// A revocation response
pub fn rp(
    status: PkiStatus,
    rev_certs: Option<Vec<CertId>>,
    crls: Option<Vec<Crl>>,
) -> PkiMessage {
    message(PkiBody::Rp(RevRepContent {
        status: vec![PkiStatusInfo::new(status, FailInfo::empty(), None)],
        rev_certs,
        crls,
    }))
}

/// Initialize log capture once per test binary
pub fn init_logging() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

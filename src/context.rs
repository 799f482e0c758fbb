//! The per-transaction CMP context
//!
//! One context drives at most one logical transaction at a time. It owns
//! the injected capabilities, the timeout and policy configuration, the
//! input material (keys, reference certificate, trust stores), and the
//! outputs of the last exchange (status information, new certificate,
//! caPubs, extraCerts). It is not safe for concurrent use.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::msg::CERT_REQ_ID;
use crate::traits::{
    CertConfirm, CertDecrypter, CertPathValidator, Clock, MessageVerifier, SystemClock, Transport,
};
use crate::types::{
    Certificate, EnrollmentKey, FailInfo, InfoTypeAndValue, Nonce, PkiStatus, RevocationReason,
    TransactionId, TrustStore,
};

/// Timeout and policy configuration for a CMP client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout per message round trip in seconds (0 = wait forever)
    pub msg_timeout: u64,

    /// Timeout for the whole transaction in seconds (0 = no limit)
    pub total_timeout: u64,

    /// Tolerate missing or invalid protection on negative responses
    pub unprotected_errors: bool,

    /// Suppress the certConf/PKIconf exchange entirely
    pub disable_confirm: bool,

    /// Ask the server for implicit confirmation of new certificates
    pub implicit_confirm: bool,

    /// Downgrade revocation-response CertId mismatches to warnings and
    /// accept more than one status entry
    pub tolerate_rp_mismatch: bool,

    /// Sender name placed in request headers
    pub sender: Option<String>,

    /// Recipient name placed in request headers
    pub recipient: Option<String>,

    /// Subject name requested in certificate templates
    pub subject: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            msg_timeout: 120,
            total_timeout: 0,
            unprotected_errors: false,
            disable_confirm: false,
            implicit_confirm: false,
            tolerate_rp_mismatch: false,
            sender: None,
            recipient: None,
            subject: None,
        }
    }
}

impl ClientConfig {
    /// Load a configuration from a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

/// Mutable state shared by all components of one CMP transaction
pub struct CmpContext {
    // injected capabilities
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) verifier: Box<dyn MessageVerifier>,
    pub(crate) cert_confirm: Option<Box<dyn CertConfirm>>,
    pub(crate) path_validator: Option<Box<dyn CertPathValidator>>,
    pub(crate) cert_decrypter: Option<Box<dyn CertDecrypter>>,
    pub(crate) clock: Box<dyn Clock>,

    /// Timeout and policy settings
    pub config: ClientConfig,

    // input material
    old_cert: Option<Certificate>,
    new_key: Option<EnrollmentKey>,
    csr: Option<Vec<u8>>,
    trusted: Option<TrustStore>,
    out_trusted: Option<TrustStore>,
    untrusted: Vec<Certificate>,
    expected_sender: Option<String>,
    revocation_reason: Option<RevocationReason>,
    genm_itavs: Vec<InfoTypeAndValue>,

    // transaction state
    pub(crate) status: Option<PkiStatus>,
    pub(crate) fail_info: FailInfo,
    pub(crate) status_strings: Vec<String>,
    pub(crate) end_time: Option<DateTime<Utc>>,
    transaction_id: TransactionId,
    cert_req_id: i64,
    last_recip_nonce: Option<Nonce>,

    // outputs
    new_cert: Option<Certificate>,
    ca_pubs: Vec<Certificate>,
    extra_certs_in: Vec<Certificate>,
    pub(crate) diagnostics: Vec<String>,
}

impl CmpContext {
    /// Create a context with the two mandatory capabilities and default
    /// configuration
    pub fn new(transport: Box<dyn Transport>, verifier: Box<dyn MessageVerifier>) -> Self {
        Self {
            transport,
            verifier,
            cert_confirm: None,
            path_validator: None,
            cert_decrypter: None,
            clock: Box::new(SystemClock),
            config: ClientConfig::default(),
            old_cert: None,
            new_key: None,
            csr: None,
            trusted: None,
            out_trusted: None,
            untrusted: Vec::new(),
            expected_sender: None,
            revocation_reason: None,
            genm_itavs: Vec::new(),
            status: None,
            fail_info: FailInfo::empty(),
            status_strings: Vec::new(),
            end_time: None,
            transaction_id: TransactionId::new(),
            cert_req_id: CERT_REQ_ID,
            last_recip_nonce: None,
            new_cert: None,
            ca_pubs: Vec::new(),
            extra_certs_in: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    // ------------------------------------------------------------------
    // Capability setters
    // ------------------------------------------------------------------

    /// Install a certificate-confirmation callback
    pub fn set_cert_confirm(&mut self, cb: Box<dyn CertConfirm>) {
        self.cert_confirm = Some(cb);
    }

    /// Install a certificate path validator
    pub fn set_path_validator(&mut self, validator: Box<dyn CertPathValidator>) {
        self.path_validator = Some(validator);
    }

    /// Install a decrypter for certificates issued in encrypted form
    pub fn set_cert_decrypter(&mut self, decrypter: Box<dyn CertDecrypter>) {
        self.cert_decrypter = Some(decrypter);
    }

    /// Replace the wall-clock source (tests inject a mock here)
    pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
        self.clock = clock;
    }

    // ------------------------------------------------------------------
    // Input material
    // ------------------------------------------------------------------

    /// Set the reference certificate for revocation and key update
    pub fn set_old_cert(&mut self, cert: Certificate) {
        self.old_cert = Some(cert);
    }

    /// The reference certificate, if set
    pub fn old_cert(&self) -> Option<&Certificate> {
        self.old_cert.as_ref()
    }

    /// Set the public half of the enrollment key pair
    pub fn set_new_key(&mut self, key: EnrollmentKey) {
        self.new_key = Some(key);
    }

    /// The enrollment key, if set
    pub fn new_key(&self) -> Option<&EnrollmentKey> {
        self.new_key.as_ref()
    }

    /// Set the DER-encoded PKCS#10 request used for p10cr
    pub fn set_csr(&mut self, csr_der: Vec<u8>) {
        self.csr = Some(csr_der);
    }

    /// The PKCS#10 request, if set
    pub fn csr(&self) -> Option<&[u8]> {
        self.csr.as_deref()
    }

    /// Set the trust anchors for message protection verification
    pub fn set_trusted(&mut self, store: TrustStore) {
        self.trusted = Some(store);
    }

    /// The protection trust anchors, if set
    pub fn trusted(&self) -> Option<&TrustStore> {
        self.trusted.as_ref()
    }

    /// Set the trust anchors for validating newly enrolled certificates
    pub fn set_out_trusted(&mut self, store: TrustStore) {
        self.out_trusted = Some(store);
    }

    /// The enrollment trust anchors, if set
    pub fn out_trusted(&self) -> Option<&TrustStore> {
        self.out_trusted.as_ref()
    }

    /// Add an untrusted certificate usable for chain building
    pub fn add_untrusted(&mut self, cert: Certificate) {
        self.untrusted.push(cert);
    }

    /// The untrusted certificate pool
    pub fn untrusted(&self) -> &[Certificate] {
        &self.untrusted
    }

    /// Set the name the response sender is expected to present
    pub fn set_expected_sender(&mut self, name: String) {
        self.expected_sender = Some(name);
    }

    /// The expected sender name, if set
    pub fn expected_sender(&self) -> Option<&str> {
        self.expected_sender.as_deref()
    }

    /// Set the reason reported in revocation requests
    pub fn set_revocation_reason(&mut self, reason: RevocationReason) {
        self.revocation_reason = Some(reason);
    }

    /// The configured revocation reason, if any
    pub fn revocation_reason(&self) -> Option<RevocationReason> {
        self.revocation_reason
    }

    /// Queue an InfoTypeAndValue for the next general message
    pub fn push_genm_itav(&mut self, itav: InfoTypeAndValue) {
        self.genm_itavs.push(itav);
    }

    /// The queued general-message ITAVs
    pub fn genm_itavs(&self) -> &[InfoTypeAndValue] {
        &self.genm_itavs
    }

    // ------------------------------------------------------------------
    // Transaction state
    // ------------------------------------------------------------------

    /// Reset the per-transaction state and arm the total-timeout deadline
    ///
    /// Re-entering while the status is `waiting` is a polling
    /// continuation, not a new transaction; callers check that before
    /// invoking this.
    pub(crate) fn begin_transaction(&mut self) {
        self.status = None;
        self.new_cert = None;
        self.transaction_id = TransactionId::new();
        self.cert_req_id = CERT_REQ_ID;
        self.last_recip_nonce = None;
        self.end_time = (self.config.total_timeout > 0).then(|| {
            self.clock.now() + ChronoDuration::seconds(self.config.total_timeout as i64)
        });
    }

    /// Current wall-clock time from the injected clock
    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The transaction identifier used in request headers
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// The certReqId in effect for this transaction; for p10cr it is the
    /// server-assigned id learned from the certificate response
    pub(crate) fn cert_req_id(&self) -> i64 {
        self.cert_req_id
    }

    /// Record the certReqId resolved from the certificate response
    pub(crate) fn note_cert_req_id(&mut self, cert_req_id: i64) {
        self.cert_req_id = cert_req_id;
    }

    /// Last sender nonce received from the peer, echoed in the next
    /// request header
    pub(crate) fn last_recip_nonce(&self) -> Option<Nonce> {
        self.last_recip_nonce
    }

    /// Remember the peer's sender nonce for the next request
    pub(crate) fn note_peer_nonce(&mut self, nonce: Option<Nonce>) {
        if nonce.is_some() {
            self.last_recip_nonce = nonce;
        }
    }

    // ------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------

    /// PKIStatus of the last relevant response, if any was saved
    pub fn status(&self) -> Option<PkiStatus> {
        self.status
    }

    /// Failure-info bits of the last relevant response
    pub fn fail_info(&self) -> FailInfo {
        self.fail_info
    }

    /// Free-text status strings of the last relevant response
    pub fn status_strings(&self) -> &[String] {
        &self.status_strings
    }

    /// Record the newly enrolled certificate
    pub(crate) fn store_new_cert(&mut self, cert: Certificate) {
        self.new_cert = Some(cert);
    }

    /// The newly enrolled certificate, if the last transaction produced one
    pub fn new_cert(&self) -> Option<&Certificate> {
        self.new_cert.as_ref()
    }

    /// Record the caPubs received in a certificate response
    pub(crate) fn store_ca_pubs(&mut self, certs: Vec<Certificate>) {
        self.ca_pubs = certs;
    }

    /// CA certificates received in the last certificate response
    pub fn ca_pubs(&self) -> &[Certificate] {
        &self.ca_pubs
    }

    /// Record the extraCerts received with the last response
    pub(crate) fn store_extra_certs_in(&mut self, certs: Vec<Certificate>) {
        self.extra_certs_in = certs;
    }

    /// extraCerts received with the last response
    pub fn extra_certs_in(&self) -> &[Certificate] {
        &self.extra_certs_in
    }

    // ------------------------------------------------------------------
    // Diagnostics sink
    // ------------------------------------------------------------------

    /// Append one line to the diagnostic trail
    pub(crate) fn add_diagnostic(&mut self, line: String) {
        self.diagnostics.push(line);
    }

    /// Drain the diagnostic trail to the log
    ///
    /// Called before each send; the transport may reset whatever error
    /// reporting channel the application uses.
    pub(crate) fn flush_diagnostics(&mut self) {
        for line in self.diagnostics.drain(..) {
            debug!("{line}");
        }
    }

    /// The diagnostic trail accumulated since the last send
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

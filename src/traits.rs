//! Capability traits injected into the transaction context
//!
//! The client core never talks to the network, verifies protection, or
//! validates certificate chains itself. Each of those concerns is a
//! narrow trait the application provides when building the context.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::Result;
use crate::msg::{EncryptedCert, PkiMessage};
use crate::types::{BodyType, Certificate, EnrollmentKey, FailInfo, TrustStore};

/// The pluggable message transport (typically HTTP)
///
/// The callback must honor the effective per-message timeout it is given
/// (`None` means wait forever) and returns `None` on any transport
/// failure. Ownership of the returned response transfers to the caller.
#[cfg_attr(test, mockall::automock)]
pub trait Transport {
    /// Send one request and receive one response
    fn transfer(&mut self, request: &PkiMessage, timeout: Option<Duration>) -> Option<PkiMessage>;
}

/// Everything a verification hook may consult about the exchange
pub struct VerifyEnv<'a> {
    /// Body type the exchange expects
    pub expected_type: BodyType,
    /// Whether missing or invalid protection must be tolerated for this
    /// message (the unprotected-errors exception applies)
    pub allow_unprotected: bool,
    /// Trust anchors for protection verification
    pub trusted: Option<&'a TrustStore>,
    /// Additional untrusted certificates usable for chain building
    pub untrusted: &'a [Certificate],
    /// Name the response sender is expected to present
    pub expected_sender: Option<&'a str>,
}

/// Hook verifying a received message (protection, sender, transaction id)
///
/// Returns the confirmed body type on success. Any error rejects the
/// message and aborts the exchange.
pub trait MessageVerifier {
    /// Check the received message against the exchange environment
    fn check_received(&self, response: &PkiMessage, env: &VerifyEnv<'_>) -> Result<BodyType>;
}

/// Verdict of a certificate-confirmation callback
#[derive(Debug, Clone, Default)]
pub struct Confirmation {
    /// Failure bits to report in certConf; empty means acceptance
    pub fail_info: FailInfo,
    /// Free text accompanying a rejection
    pub text: Option<String>,
}

/// What a certificate-confirmation callback gets to look at
pub struct ConfirmRequest<'a> {
    /// The newly enrolled certificate
    pub cert: &'a Certificate,
    /// Failure bits the core has already flagged (e.g. key mismatch)
    pub fail_info: FailInfo,
    /// Diagnostic text the core has already attached
    pub text: Option<&'a str>,
    /// Trust anchors configured for validating the new certificate
    pub out_trusted: Option<&'a TrustStore>,
    /// Untrusted certificates, including the response's extraCerts
    pub untrusted: &'a [Certificate],
    /// Chain validator, when one is configured
    pub path_validator: Option<&'a dyn CertPathValidator>,
}

/// Application callback deciding whether to accept a newly enrolled
/// certificate
///
/// The callback may clear or add failure bits; an empty `fail_info` in
/// the returned [`Confirmation`] accepts the certificate.
pub trait CertConfirm {
    /// Judge the offered certificate
    fn confirm(&self, request: &ConfirmRequest<'_>) -> Confirmation;
}

/// Certificate chain validation against a trust store
pub trait CertPathValidator {
    /// True when a chain from `cert` to one of the anchors in `trusted`
    /// can be built using the `untrusted` pool
    fn validate(&self, cert: &Certificate, trusted: &TrustStore, untrusted: &[Certificate])
        -> bool;
}

/// Decryption of certificates issued in encrypted form (indirect POP)
pub trait CertDecrypter {
    /// Recover the certificate using the enrollment key
    fn decrypt(&self, enc: &EncryptedCert, key: &EnrollmentKey) -> Result<Certificate>;
}

/// Wall-clock and sleep source, injectable for tests
#[cfg_attr(test, mockall::automock)]
pub trait Clock {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
    /// Block the calling thread for the given duration
    fn sleep(&self, duration: Duration);
}

/// The real wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

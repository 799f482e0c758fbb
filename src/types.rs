//! Common types used throughout the cmp-client crate
//!
//! The closed RFC 4210 enumerations (PKIStatus, PKIFailureInfo, body types)
//! are modeled as tagged variants. Raw integer codes exist only at the
//! boundary of the parsed-message model.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::error::{CmpError, Result};

/// Unique identifier for one CMP transaction (the header transactionID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Create a new random transaction ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A sender or recipient nonce from a PKIHeader
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce(pub [u8; 16]);

impl Nonce {
    /// Create a fresh random nonce
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

/// PKIStatus values as defined in RFC 4210 section 5.2.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PkiStatus {
    /// Request granted as asked
    Accepted,
    /// Request granted with modifications
    GrantedWithMods,
    /// Request rejected
    Rejection,
    /// Request not yet processed, poll later
    Waiting,
    /// Revocation of the certificate is imminent
    RevocationWarning,
    /// Revocation of the certificate has occurred
    RevocationNotification,
    /// Key update already done for the certificate
    KeyUpdateWarning,
}

impl PkiStatus {
    /// Wire code of this status value
    pub fn code(self) -> i32 {
        match self {
            PkiStatus::Accepted => 0,
            PkiStatus::GrantedWithMods => 1,
            PkiStatus::Rejection => 2,
            PkiStatus::Waiting => 3,
            PkiStatus::RevocationWarning => 4,
            PkiStatus::RevocationNotification => 5,
            PkiStatus::KeyUpdateWarning => 6,
        }
    }

    /// Convert a wire code into the closed enumeration
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            0 => Ok(PkiStatus::Accepted),
            1 => Ok(PkiStatus::GrantedWithMods),
            2 => Ok(PkiStatus::Rejection),
            3 => Ok(PkiStatus::Waiting),
            4 => Ok(PkiStatus::RevocationWarning),
            5 => Ok(PkiStatus::RevocationNotification),
            6 => Ok(PkiStatus::KeyUpdateWarning),
            other => Err(CmpError::UnknownPkiStatus(other)),
        }
    }

    /// Declared identifier of the status value (RFC 4210 Appendix F)
    pub fn name(self) -> &'static str {
        match self {
            PkiStatus::Accepted => "accepted",
            PkiStatus::GrantedWithMods => "grantedWithMods",
            PkiStatus::Rejection => "rejection",
            PkiStatus::Waiting => "waiting",
            PkiStatus::RevocationWarning => "revocationWarning",
            PkiStatus::RevocationNotification => "revocationNotification",
            PkiStatus::KeyUpdateWarning => "keyUpdateWarning",
        }
    }
}

impl fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Highest PKIFailureInfo bit index
pub const MAX_FAILURE_BIT: u8 = 26;

/// PKIFailureInfo bit positions as defined in RFC 4210 section 5.2.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
#[repr(u8)]
pub enum FailureInfo {
    BadAlg = 0,
    BadMessageCheck = 1,
    BadRequest = 2,
    BadTime = 3,
    BadCertId = 4,
    BadDataFormat = 5,
    WrongAuthority = 6,
    IncorrectData = 7,
    MissingTimeStamp = 8,
    BadPop = 9,
    CertRevoked = 10,
    CertConfirmed = 11,
    WrongIntegrity = 12,
    BadRecipientNonce = 13,
    TimeNotAvailable = 14,
    UnacceptedPolicy = 15,
    UnacceptedExtension = 16,
    AddInfoNotAvailable = 17,
    BadSenderNonce = 18,
    BadCertTemplate = 19,
    SignerNotTrusted = 20,
    TransactionIdInUse = 21,
    UnsupportedVersion = 22,
    NotAuthorized = 23,
    SystemUnavail = 24,
    SystemFailure = 25,
    DuplicateCertReq = 26,
}

impl FailureInfo {
    /// All failure bits in ascending bit-index order
    pub const ALL: [FailureInfo; 27] = [
        FailureInfo::BadAlg,
        FailureInfo::BadMessageCheck,
        FailureInfo::BadRequest,
        FailureInfo::BadTime,
        FailureInfo::BadCertId,
        FailureInfo::BadDataFormat,
        FailureInfo::WrongAuthority,
        FailureInfo::IncorrectData,
        FailureInfo::MissingTimeStamp,
        FailureInfo::BadPop,
        FailureInfo::CertRevoked,
        FailureInfo::CertConfirmed,
        FailureInfo::WrongIntegrity,
        FailureInfo::BadRecipientNonce,
        FailureInfo::TimeNotAvailable,
        FailureInfo::UnacceptedPolicy,
        FailureInfo::UnacceptedExtension,
        FailureInfo::AddInfoNotAvailable,
        FailureInfo::BadSenderNonce,
        FailureInfo::BadCertTemplate,
        FailureInfo::SignerNotTrusted,
        FailureInfo::TransactionIdInUse,
        FailureInfo::UnsupportedVersion,
        FailureInfo::NotAuthorized,
        FailureInfo::SystemUnavail,
        FailureInfo::SystemFailure,
        FailureInfo::DuplicateCertReq,
    ];

    /// Bit index of this failure within the PKIFailureInfo bit string
    pub fn bit(self) -> u8 {
        self as u8
    }

    /// Declared identifier of the failure bit
    pub fn name(self) -> &'static str {
        match self {
            FailureInfo::BadAlg => "badAlg",
            FailureInfo::BadMessageCheck => "badMessageCheck",
            FailureInfo::BadRequest => "badRequest",
            FailureInfo::BadTime => "badTime",
            FailureInfo::BadCertId => "badCertId",
            FailureInfo::BadDataFormat => "badDataFormat",
            FailureInfo::WrongAuthority => "wrongAuthority",
            FailureInfo::IncorrectData => "incorrectData",
            FailureInfo::MissingTimeStamp => "missingTimeStamp",
            FailureInfo::BadPop => "badPOP",
            FailureInfo::CertRevoked => "certRevoked",
            FailureInfo::CertConfirmed => "certConfirmed",
            FailureInfo::WrongIntegrity => "wrongIntegrity",
            FailureInfo::BadRecipientNonce => "badRecipientNonce",
            FailureInfo::TimeNotAvailable => "timeNotAvailable",
            FailureInfo::UnacceptedPolicy => "unacceptedPolicy",
            FailureInfo::UnacceptedExtension => "unacceptedExtension",
            FailureInfo::AddInfoNotAvailable => "addInfoNotAvailable",
            FailureInfo::BadSenderNonce => "badSenderNonce",
            FailureInfo::BadCertTemplate => "badCertTemplate",
            FailureInfo::SignerNotTrusted => "signerNotTrusted",
            FailureInfo::TransactionIdInUse => "transactionIdInUse",
            FailureInfo::UnsupportedVersion => "unsupportedVersion",
            FailureInfo::NotAuthorized => "notAuthorized",
            FailureInfo::SystemUnavail => "systemUnavail",
            FailureInfo::SystemFailure => "systemFailure",
            FailureInfo::DuplicateCertReq => "duplicateCertReq",
        }
    }
}

/// Bit mask over the 27 PKIFailureInfo bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FailInfo(u32);

impl FailInfo {
    /// Mask covering every legal failure bit
    const LEGAL_MASK: u32 = (1 << (MAX_FAILURE_BIT as u32 + 1)) - 1;

    /// The empty mask (no failure bits set)
    pub fn empty() -> Self {
        Self(0)
    }

    /// Construct from a raw mask; bits above `MAX_FAILURE_BIT` are dropped
    pub fn from_bits(bits: u32) -> Self {
        Self(bits & Self::LEGAL_MASK)
    }

    /// A mask with exactly one failure bit set
    pub fn single(failure: FailureInfo) -> Self {
        Self(1 << failure.bit())
    }

    /// Raw 32-bit mask
    pub fn bits(self) -> u32 {
        self.0
    }

    /// True when no failure bit is set
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set a failure bit
    pub fn set(&mut self, failure: FailureInfo) {
        self.0 |= 1 << failure.bit();
    }

    /// True iff the given failure bit is set
    pub fn contains(self, failure: FailureInfo) -> bool {
        self.0 & (1 << failure.bit()) != 0
    }

    /// Names of the set bits in ascending bit-index order
    pub fn names(self) -> Vec<&'static str> {
        FailureInfo::ALL
            .iter()
            .filter(|f| self.contains(**f))
            .map(|f| f.name())
            .collect()
    }
}

impl std::ops::BitOr for FailInfo {
    type Output = FailInfo;

    fn bitor(self, rhs: FailInfo) -> FailInfo {
        FailInfo(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FailInfo {
    fn bitor_assign(&mut self, rhs: FailInfo) {
        self.0 |= rhs.0;
    }
}

/// PKIBody types consumed or produced by the client (RFC 4210 section 5.1.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyType {
    /// Initialization request
    Ir,
    /// Initialization response
    Ip,
    /// Certification request
    Cr,
    /// Certification response
    Cp,
    /// PKCS#10 certification request
    P10cr,
    /// Key update request
    Kur,
    /// Key update response
    Kup,
    /// Revocation request
    Rr,
    /// Revocation response
    Rp,
    /// Certificate confirmation
    CertConf,
    /// PKI confirmation
    PkiConf,
    /// Polling request
    PollReq,
    /// Polling response
    PollRep,
    /// General message
    Genm,
    /// General response
    Genp,
    /// Error message
    Error,
}

impl BodyType {
    /// Declared short name of the body type
    pub fn name(self) -> &'static str {
        match self {
            BodyType::Ir => "ir",
            BodyType::Ip => "ip",
            BodyType::Cr => "cr",
            BodyType::Cp => "cp",
            BodyType::P10cr => "p10cr",
            BodyType::Kur => "kur",
            BodyType::Kup => "kup",
            BodyType::Rr => "rr",
            BodyType::Rp => "rp",
            BodyType::CertConf => "certConf",
            BodyType::PkiConf => "pkiconf",
            BodyType::PollReq => "pollReq",
            BodyType::PollRep => "pollRep",
            BodyType::Genm => "genm",
            BodyType::Genp => "genp",
            BodyType::Error => "error",
        }
    }

    /// True for the certificate-response bodies ip/cp/kup
    pub fn is_cert_rep(self) -> bool {
        matches!(self, BodyType::Ip | BodyType::Cp | BodyType::Kup)
    }
}

impl fmt::Display for BodyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The certificate-request variants the driver can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Initialization request (first certificate from this CA)
    Ir,
    /// Certification request
    Cr,
    /// Key update request for an existing certificate
    Kur,
    /// PKCS#10 wrapped certification request
    P10Cr,
}

impl RequestKind {
    /// Body type of the request message
    pub fn request_body_type(self) -> BodyType {
        match self {
            RequestKind::Ir => BodyType::Ir,
            RequestKind::Cr => BodyType::Cr,
            RequestKind::Kur => BodyType::Kur,
            RequestKind::P10Cr => BodyType::P10cr,
        }
    }

    /// Body type of the matching response message
    pub fn response_body_type(self) -> BodyType {
        match self {
            RequestKind::Ir => BodyType::Ip,
            RequestKind::Cr => BodyType::Cp,
            RequestKind::Kur => BodyType::Kup,
            RequestKind::P10Cr => BodyType::Cp,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request_body_type().name())
    }
}

/// Reason for certificate revocation (RFC 5280)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    /// Unspecified reason
    Unspecified,
    /// Private key compromised
    KeyCompromise,
    /// CA key compromised
    CaCompromise,
    /// Certificate subject affiliation changed
    AffiliationChanged,
    /// Certificate superseded by newer one
    Superseded,
    /// No longer needed
    CessationOfOperation,
    /// Certificate on hold (temporary)
    CertificateHold,
    /// Privilege withdrawn
    PrivilegeWithdrawn,
}

impl RevocationReason {
    /// CRLReason code of this revocation reason
    pub fn code(self) -> u8 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            RevocationReason::PrivilegeWithdrawn => 9,
        }
    }
}

/// A DER-encoded X.509 certificate
///
/// Parsing is done on demand with x509-parser; equality is byte equality
/// of the DER encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
}

impl Certificate {
    /// Wrap a DER encoding, verifying that it parses as an X.509 certificate
    pub fn from_der(der: Vec<u8>) -> Result<Self> {
        x509_parser::parse_x509_certificate(&der)
            .map_err(|e| CmpError::CertificateParse(e.to_string()))?;
        Ok(Self { der })
    }

    /// The DER encoding
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Subject distinguished name, rendered as a string
    pub fn subject(&self) -> Result<String> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| CmpError::CertificateParse(e.to_string()))?;
        Ok(cert.subject().to_string())
    }

    /// Issuer distinguished name, rendered as a string
    pub fn issuer(&self) -> Result<String> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| CmpError::CertificateParse(e.to_string()))?;
        Ok(cert.issuer().to_string())
    }

    /// Raw serial number bytes
    pub fn serial(&self) -> Result<Vec<u8>> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| CmpError::CertificateParse(e.to_string()))?;
        Ok(cert.raw_serial().to_vec())
    }

    /// DER encoding of the SubjectPublicKeyInfo
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let (_, cert) = x509_parser::parse_x509_certificate(&self.der)
            .map_err(|e| CmpError::CertificateParse(e.to_string()))?;
        Ok(cert.public_key().raw.to_vec())
    }

    /// SHA-256 fingerprint of the DER encoding, hex encoded
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.der);
        hex::encode(hasher.finalize())
    }

    /// CertId (issuer + serial) identifying this certificate
    pub fn cert_id(&self) -> Result<CertId> {
        Ok(CertId {
            issuer: self.issuer()?,
            serial: self.serial()?,
        })
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject().unwrap_or_else(|_| "<unparsable>".into()))
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// The public half of the enrollment key pair
///
/// Only the SubjectPublicKeyInfo is needed by the core: it is compared
/// against the public key of a newly issued certificate. Private key
/// operations stay behind the injected capability traits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentKey {
    spki_der: Vec<u8>,
}

impl EnrollmentKey {
    /// Wrap a DER-encoded SubjectPublicKeyInfo
    pub fn from_spki_der(spki_der: Vec<u8>) -> Self {
        Self { spki_der }
    }

    /// DER encoding of the SubjectPublicKeyInfo
    pub fn public_key_der(&self) -> &[u8] {
        &self.spki_der
    }
}

/// A set of trusted certificates (trust anchors)
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    certs: Vec<Certificate>,
}

impl TrustStore {
    /// Create an empty trust store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trust anchor
    pub fn add(&mut self, cert: Certificate) {
        self.certs.push(cert);
    }

    /// The trust anchors
    pub fn certs(&self) -> &[Certificate] {
        &self.certs
    }

    /// True when the store holds no anchors
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// Issuer and serial number identifying one certificate (CRMF CertId)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertId {
    /// Issuer distinguished name
    pub issuer: String,
    /// Raw serial number bytes
    pub serial: Vec<u8>,
}

/// An opaque DER-encoded certificate revocation list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crl(pub Vec<u8>);

/// One InfoTypeAndValue entry of a general message or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoTypeAndValue {
    /// Dotted-decimal object identifier of the info type
    pub oid: String,
    /// DER-encoded value, if present
    pub value: Option<Vec<u8>>,
}

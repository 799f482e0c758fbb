//! Error types for CMP transaction processing

use thiserror::Error;

use crate::types::BodyType;

/// Result type alias for CMP operations
pub type Result<T> = std::result::Result<T, CmpError>;

/// Main error type for CMP client operations
#[derive(Error, Debug)]
pub enum CmpError {
    /// The transfer callback failed to deliver a response
    #[error("transfer error: request '{request}', expected response: '{expected}'")]
    Transfer {
        /// Body type of the request that was being sent
        request: BodyType,
        /// Body type that was expected in response
        expected: BodyType,
    },

    /// The total transaction timeout elapsed
    #[error("total timeout reached")]
    TotalTimeout,

    /// The received body type is not acceptable in this exchange
    #[error("unexpected PKI body: received '{received}', expected '{expected}'")]
    UnexpectedBody {
        /// Body type actually received
        received: BodyType,
        /// Body type that was expected
        expected: BodyType,
    },

    /// The server answered with an error body
    #[error("received error from server: {0}")]
    ReceivedError(String),

    /// The message verification hook rejected the response
    #[error("message verification failed: {0}")]
    VerificationFailed(String),

    /// A PKIStatus value that is not legal in this context
    #[error("unexpected PKIStatus '{0}'")]
    UnexpectedPkiStatus(String),

    /// A PKIStatus value outside the closed RFC 4210 enumeration
    #[error("unknown PKIStatus code {0}")]
    UnknownPkiStatus(i32),

    /// More than one CertResponse or pollRep entry in a single message
    #[error("multiple responses not supported")]
    MultipleResponsesNotSupported,

    /// The pollRep checkAfter value is absent, negative, or out of range
    #[error("bad checkAfter in pollRep: value = {0}")]
    BadCheckAfter(i64),

    /// The poll loop terminated without a terminal response
    #[error("polling failed")]
    PollingFailed(#[source] Box<CmpError>),

    /// A 'waiting' status where a terminal status was required
    #[error("encountered 'waiting' PKIStatus when aiming to extract certificate")]
    EncounteredWaiting,

    /// A 'keyUpdateWarning' status on a request that was not a KUR
    #[error("encountered 'keyUpdateWarning' PKIStatus on a non key-update request")]
    EncounteredKeyUpdateWarning,

    /// The server rejected the request
    #[error("request rejected by server")]
    RequestRejectedByServer,

    /// The status implied a certificate but none was present
    #[error("certificate not found in response")]
    CertificateNotFound,

    /// The newly enrolled certificate was not accepted
    #[error("rejecting newly enrolled cert with subject: {subject}{reason}")]
    CertificateNotAccepted {
        /// Subject of the offered certificate
        subject: String,
        /// Rejection reason, prefixed with "; " when present
        reason: String,
    },

    /// The certReqId in the response could not be used
    #[error("bad request id in response")]
    BadRequestId,

    /// Revocation response carried the wrong number of components
    #[error("wrong component count in revocation response: {0}")]
    WrongRpComponentCount(usize),

    /// CertId issuer in the revocation response does not match the request
    #[error("wrong CertId issuer in revocation response")]
    WrongCertIdInRp,

    /// CertId serial number in the revocation response does not match the request
    #[error("wrong serial number in revocation response")]
    WrongSerialInRp,

    /// A mandatory field is absent or unusable
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A context option required by the operation is not set
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    /// X.509 certificate parsing failed
    #[error("certificate parse error: {0}")]
    CertificateParse(String),

    /// ASN.1 UTCTime value could not be parsed or represented
    #[error("bad UTCTime value: {0}")]
    BadTime(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Configuration(#[from] toml::de::Error),
}

//! Error types for the signing and validation engine.
//!
//! Signing-side failures are reported through [`Error`]. Validation findings
//! (digest mismatch, untrusted chain, missing revocation data) are never errors:
//! they are collected into the per-signature result instead.

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while parsing, signing or validating a PDF.
#[derive(Debug, thiserror::Error)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-', found '{0}'")]
    InvalidHeader(String),

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    ParseError {
        /// Byte offset where error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Invalid cross-reference table
    #[error("Invalid cross-reference table")]
    InvalidXref,

    /// Referenced object not found in cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: String,
        /// Actual object type found
        found: String,
    },

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// The document structure cannot be trusted (broken trailer, xref or catalog).
    /// Fatal: no output is produced.
    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    /// Key store could not be opened (bad password, unknown format, missing entry)
    #[error("Key store error: {0}")]
    StoreError(String),

    /// The signature container does not fit in the reserved placeholder
    #[error("Signature container needs {needed} bytes but only {reserved} were reserved")]
    ReservationTooSmall {
        /// Size of the encoded container
        needed: usize,
        /// Size of the reserved window (in bytes, before hex encoding)
        reserved: usize,
    },

    /// The certificate's public key does not belong to the private key
    #[error("Certificate public key does not match the private key")]
    KeyCertMismatch,

    /// An OCSP, CRL or TSA endpoint could not be reached or answered with an error
    #[error("Network unavailable: {0}")]
    NetworkUnavailable(String),

    /// The time-stamp authority did not produce a usable token
    #[error("Timestamp unavailable: {0}")]
    TimestampUnavailable(String),

    /// The document already carries a certification signature
    #[error("Document is already certified (P={existing}); cannot certify with P={requested}")]
    CertificationLocked {
        /// MDP permission of the existing certification
        existing: u8,
        /// MDP permission that was requested
        requested: u8,
    },

    /// Malformed DER structure
    #[error("ASN.1 error: {0}")]
    Asn1(String),

    /// Certificate could not be parsed or is unusable
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unsupported feature
    #[error("Unsupported feature: {0}")]
    Unsupported(String),

    /// Recursion depth limit exceeded
    #[error("Recursion depth limit exceeded (max: {0})")]
    RecursionLimitExceeded(u32),
}

#[cfg(feature = "signatures")]
impl From<der::Error> for Error {
    fn from(err: der::Error) -> Self {
        Error::Asn1(err.to_string())
    }
}

impl Error {
    /// Whether a signing run may be retried with a larger reservation.
    pub fn is_reservation_too_small(&self) -> bool {
        matches!(self, Error::ReservationTooSmall { .. })
    }
}

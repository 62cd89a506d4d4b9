//! Digital signature types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Digest algorithm used for signing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-1 (deprecated, but still common in legacy PDFs)
    Sha1,
    /// SHA-256 (recommended)
    #[default]
    Sha256,
    /// SHA-384
    Sha384,
    /// SHA-512
    Sha512,
}

impl DigestAlgorithm {
    /// All supported algorithms, strongest last.
    pub const ALL: [DigestAlgorithm; 4] = [
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha384,
        DigestAlgorithm::Sha512,
    ];

    /// Dotted OID of the digest algorithm.
    pub fn oid(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "1.3.14.3.2.26",
            DigestAlgorithm::Sha256 => "2.16.840.1.101.3.4.2.1",
            DigestAlgorithm::Sha384 => "2.16.840.1.101.3.4.2.2",
            DigestAlgorithm::Sha512 => "2.16.840.1.101.3.4.2.3",
        }
    }

    /// Dotted OID of RSA PKCS#1 v1.5 with this digest.
    pub fn rsa_signature_oid(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "1.2.840.113549.1.1.5",
            DigestAlgorithm::Sha256 => "1.2.840.113549.1.1.11",
            DigestAlgorithm::Sha384 => "1.2.840.113549.1.1.12",
            DigestAlgorithm::Sha512 => "1.2.840.113549.1.1.13",
        }
    }

    /// Look up an algorithm by digest OID or RSA-with-digest OID.
    pub fn from_oid(oid: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.oid() == oid || alg.rsa_signature_oid() == oid)
    }

    /// Get the name of this algorithm.
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha384 => "SHA-384",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => 20,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }
}

/// Signature sub-filter type (signature format).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SignatureSubFilter {
    /// adbe.pkcs7.detached - PKCS#7 detached signature
    #[default]
    #[serde(rename = "adbe.pkcs7.detached")]
    Pkcs7Detached,
    /// adbe.pkcs7.sha1 - PKCS#7 over a SHA-1 digest of the byte range (verify only)
    #[serde(rename = "adbe.pkcs7.sha1")]
    Pkcs7Sha1,
    /// ETSI.CAdES.detached - PAdES CAdES signature
    #[serde(rename = "ETSI.CAdES.detached")]
    CadesDetached,
    /// adbe.x509.rsa_sha1 - bare PKCS#1 signature with the certificate in /Cert
    #[serde(rename = "adbe.x509.rsa_sha1")]
    X509RsaSha1,
    /// ETSI.RFC3161 - Document timestamp token
    #[serde(rename = "ETSI.RFC3161")]
    Rfc3161,
}

impl SignatureSubFilter {
    /// Get the PDF name for this sub-filter.
    pub fn as_pdf_name(&self) -> &'static str {
        match self {
            SignatureSubFilter::Pkcs7Detached => "adbe.pkcs7.detached",
            SignatureSubFilter::Pkcs7Sha1 => "adbe.pkcs7.sha1",
            SignatureSubFilter::CadesDetached => "ETSI.CAdES.detached",
            SignatureSubFilter::X509RsaSha1 => "adbe.x509.rsa_sha1",
            SignatureSubFilter::Rfc3161 => "ETSI.RFC3161",
        }
    }

    /// Parse a PDF name into a sub-filter type.
    pub fn from_pdf_name(name: &str) -> Option<Self> {
        match name {
            "adbe.pkcs7.detached" => Some(SignatureSubFilter::Pkcs7Detached),
            "adbe.pkcs7.sha1" => Some(SignatureSubFilter::Pkcs7Sha1),
            "ETSI.CAdES.detached" => Some(SignatureSubFilter::CadesDetached),
            "adbe.x509.rsa_sha1" => Some(SignatureSubFilter::X509RsaSha1),
            "ETSI.RFC3161" => Some(SignatureSubFilter::Rfc3161),
            _ => None,
        }
    }

    /// Whether the signer can produce this format for an approval or certification signature.
    pub fn can_sign(&self) -> bool {
        matches!(
            self,
            SignatureSubFilter::Pkcs7Detached | SignatureSubFilter::CadesDetached | SignatureSubFilter::X509RsaSha1
        )
    }

    /// Whether the container is a CMS SignedData.
    pub fn is_cms(&self) -> bool {
        !matches!(self, SignatureSubFilter::X509RsaSha1)
    }
}

/// MDP permission asserted by a certification signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationLevel {
    /// Approval signature, no lock
    #[default]
    NotCertified,
    /// P=1: no changes allowed
    NoChangesAllowed,
    /// P=2: form filling and signing
    FormFilling,
    /// P=3: form filling, signing and annotations
    FormFillingAndAnnotations,
}

impl CertificationLevel {
    /// DocMDP `/P` value, `None` for approval signatures.
    pub fn permission(&self) -> Option<u8> {
        match self {
            CertificationLevel::NotCertified => None,
            CertificationLevel::NoChangesAllowed => Some(1),
            CertificationLevel::FormFilling => Some(2),
            CertificationLevel::FormFillingAndAnnotations => Some(3),
        }
    }

    /// Level for a DocMDP `/P` value. Out-of-range values default to 2.
    pub fn from_permission(p: i64) -> Self {
        match p {
            1 => CertificationLevel::NoChangesAllowed,
            3 => CertificationLevel::FormFillingAndAnnotations,
            _ => CertificationLevel::FormFilling,
        }
    }
}

/// Where revocation evidence gathered at signing time is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationPlacement {
    /// Inside the CMS container (adbe-revocationInfoArchival attribute)
    #[default]
    InSignature,
    /// In a Document Security Store added by a follow-up incremental update
    Dss,
}

/// Visible signature appearance configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureAppearance {
    /// Page number (0-indexed)
    pub page: usize,
    /// Widget rectangle `[llx lly urx ury]`
    pub rect: [f64; 4],
    /// Whether to show signer name
    pub show_name: bool,
    /// Whether to show signing date
    pub show_date: bool,
    /// Whether to show signing reason
    pub show_reason: bool,
    /// Whether to show signing location
    pub show_location: bool,
    /// Font size
    pub font_size: f64,
}

impl Default for SignatureAppearance {
    fn default() -> Self {
        Self {
            page: 0,
            rect: [72.0, 72.0, 272.0, 122.0],
            show_name: true,
            show_date: true,
            show_reason: true,
            show_location: true,
            font_size: 8.0,
        }
    }
}

impl SignatureAppearance {
    /// Appearance on `page` at `rect`.
    pub fn new(page: usize, rect: [f64; 4]) -> Self {
        Self {
            page,
            rect,
            ..Self::default()
        }
    }
}

/// Information about an existing signature in a PDF.
#[derive(Debug, Clone, Default)]
pub struct SignatureInfo {
    /// Fully qualified name of the signature field
    pub field_name: String,
    /// Name of the signer (`/Name`, else the certificate common name)
    pub signer_name: Option<String>,
    /// Signing time claimed in `/M`
    pub claimed_time: Option<DateTime<Utc>>,
    /// Reason for signing
    pub reason: Option<String>,
    /// Signing location
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Signature sub-filter type
    pub sub_filter: Option<SignatureSubFilter>,
    /// Raw `/SubFilter` name
    pub sub_filter_name: Option<String>,
    /// Byte range of the signed data
    pub byte_range: Vec<i64>,
    /// Whether the signature covers the whole file
    pub covers_whole_document: bool,
    /// Revision (0-based) whose bytes the signature covers
    pub revision: Option<usize>,
    /// DocMDP permission, for certification signatures
    pub certification: Option<u8>,
    /// Whether this is a document timestamp
    pub is_document_timestamp: bool,
}

/// Tri-state outcome of a single validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    /// Verified
    Pass,
    /// Verified to be wrong
    Fail,
    /// No data to decide
    #[default]
    Undetermined,
}

impl Check {
    /// `Pass` for true, `Fail` for false.
    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Check::Pass
        } else {
            Check::Fail
        }
    }

    /// Check passed.
    pub fn is_pass(&self) -> bool {
        *self == Check::Pass
    }

    /// Combine two checks: any failure fails, then any undetermined.
    pub fn and(self, other: Check) -> Check {
        match (self, other) {
            (Check::Fail, _) | (_, Check::Fail) => Check::Fail,
            (Check::Undetermined, _) | (_, Check::Undetermined) => Check::Undetermined,
            _ => Check::Pass,
        }
    }
}

/// A non-fatal problem found during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// The ByteRange does not describe two spans around the /Contents window
    ByteRangeInvalid(String),
    /// The recomputed digest differs from the one in the container
    DigestMismatch,
    /// The container's signature value does not verify against the signer key
    SignatureInvalid(String),
    /// The container could not be decoded
    MalformedContainer(String),
    /// The sub-filter is not supported
    UnsupportedSubFilter(String),
    /// No chain from the signer to a self-signed certificate could be built
    ChainIncomplete,
    /// The chain does not end in a supplied trust anchor
    ChainUntrusted,
    /// A certificate was outside its validity period at signing time
    CertificateExpired(String),
    /// No usable OCSP or CRL evidence for a certificate
    RevocationUnknown(String),
    /// A certificate was revoked before the signing time
    Revoked {
        /// Subject of the revoked certificate
        subject: String,
        /// Revocation time
        at: DateTime<Utc>,
    },
    /// The timestamp token did not verify
    TimestampInvalid(String),
    /// A later revision made changes the certification forbids
    CertificationViolated {
        /// Offending revision (0-based)
        revision: usize,
        /// What changed
        reason: String,
    },
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Finding::ByteRangeInvalid(why) => write!(f, "invalid ByteRange: {}", why),
            Finding::DigestMismatch => write!(f, "document digest does not match the signature"),
            Finding::SignatureInvalid(why) => write!(f, "signature value invalid: {}", why),
            Finding::MalformedContainer(why) => write!(f, "malformed signature container: {}", why),
            Finding::UnsupportedSubFilter(name) => write!(f, "unsupported sub-filter {}", name),
            Finding::ChainIncomplete => write!(f, "certificate chain is incomplete"),
            Finding::ChainUntrusted => write!(f, "certificate chain does not reach a trust anchor"),
            Finding::CertificateExpired(subject) => write!(f, "certificate {} not valid at signing time", subject),
            Finding::RevocationUnknown(subject) => write!(f, "no revocation data for {}", subject),
            Finding::Revoked { subject, at } => write!(f, "certificate {} revoked at {}", subject, at),
            Finding::TimestampInvalid(why) => write!(f, "timestamp invalid: {}", why),
            Finding::CertificationViolated { revision, reason } => {
                write!(f, "revision {} violates certification: {}", revision, reason)
            },
        }
    }
}

/// Validator state for one signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationState {
    /// Signature dictionary and ByteRange located
    Discovered,
    /// Digest recomputed and compared
    DigestChecked,
    /// Certificate chain reconstructed
    ChainBuilt,
    /// Revocation evidence evaluated
    RevocationChecked,
    /// Timestamp token evaluated
    TimestampChecked,
    /// Result assembled
    Done,
}

/// Overall verdict for a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Every check passed
    Valid,
    /// Some check failed
    Invalid,
    /// Cryptographically intact but something could not be determined
    Unknown,
}

impl VerificationStatus {
    /// Check if the status indicates a valid signature.
    pub fn is_valid(&self) -> bool {
        matches!(self, VerificationStatus::Valid)
    }
}

/// Per-signature validation outcome.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Signature dictionary information
    pub info: SignatureInfo,
    /// Last state reached
    pub state: ValidationState,
    /// Digest over the ByteRange matches the container
    pub digest: Check,
    /// Signature value verifies against the signer key
    pub signature: Check,
    /// A chain to a self-signed certificate was built
    pub chain_built: Check,
    /// The chain ends in a supplied trust anchor
    pub chain_trusted: Check,
    /// Revocation evidence was found for every certificate in scope
    pub revocation_checked: Check,
    /// No certificate in scope was revoked at signing time
    pub revocation_status: Check,
    /// Embedded timestamp token verified
    pub timestamp: Check,
    /// Later revisions respect the certification lock
    pub modifications: Check,
    /// Signing time used for validation
    pub signing_time: Option<DateTime<Utc>>,
    /// Subject of the signing certificate
    pub signer_subject: Option<String>,
    /// Everything that went wrong, in the order it was found
    pub findings: Vec<Finding>,
}

impl ValidationResult {
    /// Fresh result for a discovered signature.
    pub fn new(info: SignatureInfo) -> Self {
        Self {
            info,
            state: ValidationState::Discovered,
            digest: Check::Undetermined,
            signature: Check::Undetermined,
            chain_built: Check::Undetermined,
            chain_trusted: Check::Undetermined,
            revocation_checked: Check::Undetermined,
            revocation_status: Check::Undetermined,
            timestamp: Check::Undetermined,
            modifications: Check::Undetermined,
            signing_time: None,
            signer_subject: None,
            findings: Vec::new(),
        }
    }

    /// Record a finding.
    pub fn push(&mut self, finding: Finding) {
        log::debug!("{}: {}", self.info.field_name, finding);
        self.findings.push(finding);
    }

    /// Overall verdict.
    pub fn status(&self) -> VerificationStatus {
        let crypto = self.digest.and(self.signature);
        let checks = [
            crypto,
            self.chain_built,
            self.chain_trusted,
            self.revocation_status,
            self.modifications,
        ];
        if checks.contains(&Check::Fail) || self.timestamp == Check::Fail {
            VerificationStatus::Invalid
        } else if checks.iter().all(Check::is_pass) && self.revocation_checked.is_pass() {
            VerificationStatus::Valid
        } else {
            VerificationStatus::Unknown
        }
    }
}

//! Signing and validation configuration.
//!
//! Both configs are plain serde structs so they can be loaded from JSON:
//!
//! ```
//! use pdf_ltv::signatures::SignConfig;
//!
//! let config = SignConfig::from_json(r#"{
//!     "digest_algorithm": "sha256",
//!     "certification": "no_changes_allowed",
//!     "include_timestamp": true
//! }"#)?;
//! assert_eq!(config.certification.permission(), Some(1));
//! # Ok::<(), pdf_ltv::error::Error>(())
//! ```

use super::types::{
    CertificationLevel, DigestAlgorithm, RevocationPlacement, SignatureAppearance, SignatureSubFilter,
};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded retry with exponential backoff for network calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay
    pub max_backoff_ms: u64,
    /// Per-request timeout handed to the transport
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A single attempt with no backoff.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 2).unwrap_or(u64::MAX);
        let ms = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Options for signing a PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignConfig {
    /// Digest algorithm to use
    pub digest_algorithm: DigestAlgorithm,
    /// Signature sub-filter (format)
    pub sub_filter: SignatureSubFilter,
    /// Certification level (DocMDP); `NotCertified` for approval signatures
    pub certification: CertificationLevel,
    /// Fetch OCSP responses for the chain at signing time
    pub include_ocsp: bool,
    /// Fetch CRLs for the chain at signing time
    pub include_crl: bool,
    /// Where fetched revocation evidence goes
    pub revocation_placement: RevocationPlacement,
    /// Leave the root out of revocation collection
    pub skip_root_revocation: bool,
    /// Request a signature timestamp from the TSA
    pub include_timestamp: bool,
    /// Fail when the TSA does not deliver; otherwise sign without a timestamp
    pub timestamp_required: bool,
    /// Initial size of the /Contents reservation in bytes
    pub estimated_size: usize,
    /// Extra bytes added when retrying after `ReservationTooSmall`
    pub reservation_margin: usize,
    /// Signing passes before giving up on the reservation size
    pub max_reservation_attempts: u32,
    /// Reason for signing
    pub reason: Option<String>,
    /// Location where the document was signed
    pub location: Option<String>,
    /// Contact information
    pub contact_info: Option<String>,
    /// Name of the signer (if different from certificate CN)
    pub name: Option<String>,
    /// Signature field name; defaults to the first free `SignatureN`
    pub field_name: Option<String>,
    /// Visible signature appearance; invisible when absent
    pub appearance: Option<SignatureAppearance>,
    /// Retry policy for OCSP, CRL and TSA calls
    pub network_retry: RetryPolicy,
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            digest_algorithm: DigestAlgorithm::Sha256,
            sub_filter: SignatureSubFilter::Pkcs7Detached,
            certification: CertificationLevel::NotCertified,
            include_ocsp: false,
            include_crl: false,
            revocation_placement: RevocationPlacement::InSignature,
            skip_root_revocation: true,
            include_timestamp: false,
            timestamp_required: true,
            estimated_size: 8192,
            reservation_margin: 1024,
            max_reservation_attempts: 3,
            reason: None,
            location: None,
            contact_info: None,
            name: None,
            field_name: None,
            appearance: None,
            network_retry: RetryPolicy::default(),
        }
    }
}

impl SignConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the digest algorithm.
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest_algorithm = digest;
        self
    }

    /// Set the sub-filter.
    pub fn with_sub_filter(mut self, sub_filter: SignatureSubFilter) -> Self {
        self.sub_filter = sub_filter;
        self
    }

    /// Certify the document at `level`.
    pub fn with_certification(mut self, level: CertificationLevel) -> Self {
        self.certification = level;
        self
    }

    /// Fetch OCSP responses while signing.
    pub fn with_ocsp(mut self) -> Self {
        self.include_ocsp = true;
        self
    }

    /// Fetch CRLs while signing.
    pub fn with_crl(mut self) -> Self {
        self.include_crl = true;
        self
    }

    /// Choose where revocation evidence is embedded.
    pub fn with_revocation_placement(mut self, placement: RevocationPlacement) -> Self {
        self.revocation_placement = placement;
        self
    }

    /// Request a signature timestamp; `required` makes TSA failure fatal.
    pub fn with_timestamp(mut self, required: bool) -> Self {
        self.include_timestamp = true;
        self.timestamp_required = required;
        self
    }

    /// Set the initial reservation size.
    pub fn with_estimated_size(mut self, bytes: usize) -> Self {
        self.estimated_size = bytes;
        self
    }

    /// Set the reason for signing.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Set the signing location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Set the contact information.
    pub fn with_contact_info(mut self, contact: impl Into<String>) -> Self {
        self.contact_info = Some(contact.into());
        self
    }

    /// Set the signature field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Make the signature visible.
    pub fn with_appearance(mut self, appearance: SignatureAppearance) -> Self {
        self.appearance = Some(appearance);
        self
    }

    /// Set the network retry policy.
    pub fn with_network_retry(mut self, retry: RetryPolicy) -> Self {
        self.network_retry = retry;
        self
    }
}

/// Which certificates need revocation evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateScope {
    /// Only the signer's certificate
    SigningCertificate,
    /// Every certificate in the chain
    #[default]
    WholeChain,
}

/// Options for validating signatures and extending LTV data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LtvConfig {
    /// Certificates that need revocation evidence
    pub scope: CertificateScope,
    /// Also require evidence for the root
    pub check_root_revocation: bool,
    /// Tolerance for clock differences between signer, responders and TSA
    pub clock_skew_secs: i64,
    /// Whether `extend` fetches OCSP responses
    pub use_ocsp: bool,
    /// Whether `extend` fetches CRLs
    pub use_crl: bool,
    /// Whether `extend` adds a document timestamp after the DSS
    pub add_document_timestamp: bool,
    /// Digest used for the document timestamp
    pub timestamp_digest: DigestAlgorithm,
    /// Reservation for the document timestamp token
    pub timestamp_estimated_size: usize,
    /// Retry policy for OCSP, CRL and TSA calls
    pub network_retry: RetryPolicy,
}

impl Default for LtvConfig {
    fn default() -> Self {
        Self {
            scope: CertificateScope::WholeChain,
            check_root_revocation: false,
            clock_skew_secs: 300,
            use_ocsp: true,
            use_crl: true,
            add_document_timestamp: true,
            timestamp_digest: DigestAlgorithm::Sha256,
            timestamp_estimated_size: 8192,
            network_retry: RetryPolicy::default(),
        }
    }
}

impl LtvConfig {
    /// Parse a JSON configuration; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the certificate scope.
    pub fn with_scope(mut self, scope: CertificateScope) -> Self {
        self.scope = scope;
        self
    }

    /// Require evidence for the root as well.
    pub fn with_root_revocation(mut self, check: bool) -> Self {
        self.check_root_revocation = check;
        self
    }

    /// Whether to add a document timestamp when extending.
    pub fn with_document_timestamp(mut self, add: bool) -> Self {
        self.add_document_timestamp = add;
        self
    }

    /// Set the network retry policy.
    pub fn with_network_retry(mut self, retry: RetryPolicy) -> Self {
        self.network_retry = retry;
        self
    }

    /// Clock skew tolerance.
    pub fn clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.clock_skew_secs.max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_config_default() {
        let config = SignConfig::default();
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha256);
        assert_eq!(config.sub_filter, SignatureSubFilter::Pkcs7Detached);
        assert!(!config.include_timestamp);
        assert!(config.appearance.is_none());
    }

    #[test]
    fn test_sign_config_builder() {
        let config = SignConfig::default()
            .with_reason("Approval")
            .with_location("Ghent")
            .with_certification(CertificationLevel::FormFilling)
            .with_timestamp(false);
        assert_eq!(config.reason.as_deref(), Some("Approval"));
        assert_eq!(config.location.as_deref(), Some("Ghent"));
        assert_eq!(config.certification.permission(), Some(2));
        assert!(config.include_timestamp);
        assert!(!config.timestamp_required);
    }

    #[test]
    fn test_sign_config_json() {
        let config = SignConfig::from_json(
            r#"{"sub_filter": "ETSI.CAdES.detached", "include_ocsp": true, "appearance": {"page": 0, "rect": [10, 10, 110, 60]}}"#,
        )
        .unwrap();
        assert_eq!(config.sub_filter, SignatureSubFilter::CadesDetached);
        assert!(config.include_ocsp);
        assert_eq!(config.appearance.unwrap().rect, [10.0, 10.0, 110.0, 60.0]);
        assert_eq!(config.estimated_size, 8192);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            SignConfig::from_json("{\"digest_algorithm\": \"md5\"}"),
            Err(crate::error::Error::Config(_))
        ));
    }

    #[test]
    fn test_retry_backoff_is_bounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(60), Duration::from_millis(2_000));
    }

    #[test]
    fn test_ltv_config_json() {
        let config = LtvConfig::from_json(r#"{"scope": "signing_certificate", "add_document_timestamp": false}"#).unwrap();
        assert_eq!(config.scope, CertificateScope::SigningCertificate);
        assert!(!config.add_document_timestamp);
        assert_eq!(config.clock_skew(), chrono::Duration::seconds(300));
    }
}

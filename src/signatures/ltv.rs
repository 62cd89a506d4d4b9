//! Long-term validation.
//!
//! [`LtvValidator`] walks every signature of a document, oldest first,
//! through a fixed sequence of states:
//!
//! ```text
//! Discovered -> DigestChecked -> ChainBuilt -> RevocationChecked -> TimestampChecked -> Done
//! ```
//!
//! Only a broken digest (or an unreadable container) stops a signature
//! early. Everything else is recorded as a [`Finding`] and the machine keeps
//! going, so the result always says as much as could be established.
//!
//! [`LtvExtender`] is the write side: it gathers the evidence a validator
//! will need later, stores it in a DSS revision and optionally seals the
//! file with a document timestamp.

use super::certificate::{Certificate, CertificateChain};
use super::config::{CertificateScope, LtvConfig};
use super::dss::{DssBuilder, DssData};
use super::mdp::{self, Certification};
use super::network::Transport;
use super::revocation::{EvidenceStatus, RevocationCollector, RevocationEvidence};
use super::signer::DocumentTimestamper;
use super::timestamp::TsaClient;
use super::types::{Check, Finding, ValidationResult, ValidationState, VerificationStatus};
use super::verifier::{extract_signatures, verify_integrity, EmbeddedSignature, IntegrityReport};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::ObjectRef;
use crate::writer::IncrementalUpdate;
use chrono::{DateTime, Utc};

/// Validation outcome for a whole document.
#[derive(Debug, Clone)]
pub struct DocumentValidation {
    /// One result per signature, oldest revision first
    pub signatures: Vec<ValidationResult>,
    /// The certifying signature, if any
    pub certification: Option<Certification>,
    /// Whether the document carries a DSS
    pub has_dss: bool,
}

impl DocumentValidation {
    /// Whether every signature is valid.
    pub fn is_valid(&self) -> bool {
        !self.signatures.is_empty() && self.signatures.iter().all(|r| r.status().is_valid())
    }

    /// Worst status over all signatures.
    pub fn status(&self) -> VerificationStatus {
        let statuses: Vec<VerificationStatus> = self.signatures.iter().map(|r| r.status()).collect();
        if statuses.contains(&VerificationStatus::Invalid) {
            VerificationStatus::Invalid
        } else if !statuses.is_empty() && statuses.iter().all(|s| s.is_valid()) {
            VerificationStatus::Valid
        } else {
            VerificationStatus::Unknown
        }
    }

    /// Result for the field called `name`.
    pub fn get(&self, name: &str) -> Option<&ValidationResult> {
        self.signatures.iter().find(|r| r.info.field_name == name)
    }
}

/// Evidence shared by every signature of one document.
struct DocumentEvidence {
    certificates: Vec<Certificate>,
    revocation: RevocationEvidence,
    certification: Option<Certification>,
    violations: Vec<Finding>,
    /// Earliest signature with a DocMDP reference; any later one is a second certification
    first_certifier: Option<ObjectRef>,
}

/// Validates signatures against trust anchors and embedded evidence.
///
/// Validation is offline: it only uses what the file carries (the
/// containers and the DSS) plus the trust anchors.
pub struct LtvValidator {
    trust_anchors: Vec<Certificate>,
    config: LtvConfig,
}

impl LtvValidator {
    /// Validator with no trust anchors.
    ///
    /// Without anchors `chain_trusted` stays undetermined, so no
    /// signature can come out as [`VerificationStatus::Valid`].
    pub fn new(config: LtvConfig) -> Self {
        Self {
            trust_anchors: Vec::new(),
            config,
        }
    }

    /// Trust `anchor`.
    pub fn with_trust_anchor(mut self, anchor: Certificate) -> Self {
        self.trust_anchors.push(anchor);
        self
    }

    /// Trust every certificate in `anchors`.
    pub fn with_trust_anchors(mut self, anchors: impl IntoIterator<Item = Certificate>) -> Self {
        self.trust_anchors.extend(anchors);
        self
    }

    /// Validate the PDF in `bytes`.
    pub fn validate_bytes(&self, bytes: &[u8]) -> Result<DocumentValidation> {
        let doc = PdfDocument::from_bytes(bytes.to_vec())?;
        self.validate(&doc)
    }

    /// Validate every signature of `doc`.
    pub fn validate(&self, doc: &PdfDocument) -> Result<DocumentValidation> {
        let signatures = extract_signatures(doc)?;
        let dss = DssData::read(doc)?;
        let has_dss = dss.is_some();
        let (certificates, revocation) = match dss {
            Some(dss) => {
                let evidence = dss.evidence();
                (dss.certificates, evidence)
            },
            None => (Vec::new(), RevocationEvidence::default()),
        };

        let certification = mdp::find_certification(doc)?;
        let violations = match &certification {
            Some(c) => mdp::check_modifications(doc, c)?,
            None => Vec::new(),
        };
        let first_certifier = signatures
            .iter()
            .filter(|s| s.info.certification.is_some())
            .min_by_key(|s| s.info.revision.unwrap_or(usize::MAX))
            .and_then(|s| s.reference);
        let shared = DocumentEvidence {
            certificates,
            revocation,
            certification,
            violations,
            first_certifier,
        };

        log::info!(
            "Validating {} signature(s) over {} revision(s)",
            signatures.len(),
            doc.revision_count()
        );
        let results: Vec<ValidationResult> = signatures
            .iter()
            .map(|sig| self.validate_signature(doc, sig, &shared))
            .collect();
        for result in &results {
            log::info!("{}: {:?}", result.info.field_name, result.status());
        }

        Ok(DocumentValidation {
            signatures: results,
            certification: shared.certification,
            has_dss,
        })
    }

    fn validate_signature(&self, doc: &PdfDocument, sig: &EmbeddedSignature, shared: &DocumentEvidence) -> ValidationResult {
        let mut result = ValidationResult::new(sig.info.clone());
        log::debug!("{}: discovered at revision {:?}", sig.info.field_name, sig.info.revision);

        let integrity = verify_integrity(doc, sig);
        result.digest = integrity.digest;
        result.signature = integrity.signature;
        for finding in &integrity.findings {
            result.push(finding.clone());
        }
        advance(&mut result, ValidationState::DigestChecked);
        let signer = match (&integrity.signer, result.digest) {
            (_, Check::Fail) | (None, _) => return result,
            (Some(signer), _) => signer.clone(),
        };
        result.signer_subject = Some(signer.subject().to_string());

        let signing_time = signing_time(sig, &integrity);
        result.signing_time = Some(signing_time);

        let mut pool = integrity.certificates.clone();
        pool.extend(shared.certificates.iter().cloned());
        pool.extend(self.trust_anchors.iter().cloned());
        let chain = CertificateChain::build(&signer, &pool);
        self.check_chain(&mut result, &chain, signing_time);
        advance(&mut result, ValidationState::ChainBuilt);

        let mut evidence = integrity.revocation.clone();
        evidence.merge(shared.revocation.clone());
        self.check_revocation(&mut result, &chain, &evidence, signing_time);
        advance(&mut result, ValidationState::RevocationChecked);

        result.timestamp = integrity.timestamp;
        if let Some(token) = &integrity.timestamp_token {
            let gen_time = token.gen_time();
            let tsa_ok = token
                .verify_signature(&pool)
                .map(|tsa| tsa.is_valid_at(gen_time))
                .unwrap_or(false);
            let chain_ok = chain.certificates().iter().all(|c| c.is_valid_at(gen_time));
            if !tsa_ok {
                result.timestamp = Check::Fail;
                result.push(Finding::TimestampInvalid(format!("TSA certificate not valid at {}", gen_time)));
            } else if !chain_ok {
                result.timestamp = Check::Fail;
                result.push(Finding::TimestampInvalid(format!("signer chain not valid at {}", gen_time)));
            }
        }
        advance(&mut result, ValidationState::TimestampChecked);

        result.modifications = match &shared.certification {
            _ if sig.info.certification.is_some() && sig.reference != shared.first_certifier => {
                result.push(Finding::CertificationViolated {
                    revision: sig.info.revision.unwrap_or_default(),
                    reason: "document was already certified".to_string(),
                });
                Check::Fail
            },
            Some(c) if sig.reference == Some(c.signature) => {
                for violation in &shared.violations {
                    result.push(violation.clone());
                }
                Check::from_bool(shared.violations.is_empty())
            },
            _ => Check::Pass,
        };
        advance(&mut result, ValidationState::Done);
        result
    }

    fn check_chain(&self, result: &mut ValidationResult, chain: &CertificateChain, at: DateTime<Utc>) {
        let anchored = chain.is_anchored_in(&self.trust_anchors);
        result.chain_built = Check::from_bool(chain.is_complete() || anchored);
        if !result.chain_built.is_pass() {
            result.push(Finding::ChainIncomplete);
        }

        result.chain_trusted = if self.trust_anchors.is_empty() {
            Check::Undetermined
        } else if anchored {
            Check::Pass
        } else {
            result.push(Finding::ChainUntrusted);
            Check::Fail
        };

        for cert in chain.certificates() {
            if !cert.is_valid_at(at) {
                result.chain_built = Check::Fail;
                result.push(Finding::CertificateExpired(cert.subject().to_string()));
            }
        }
    }

    fn check_revocation(
        &self,
        result: &mut ValidationResult,
        chain: &CertificateChain,
        evidence: &RevocationEvidence,
        at: DateTime<Utc>,
    ) {
        let skew = self.config.clock_skew();
        let mut revoked = false;
        let mut unknown = false;

        for (index, cert) in chain.certificates().iter().enumerate() {
            if self.config.scope == CertificateScope::SigningCertificate && index > 0 {
                break;
            }
            if cert.is_self_issued() && !self.config.check_root_revocation {
                continue;
            }
            let status = match chain.issuer_of(index) {
                Some(issuer) => evidence.status(cert, issuer, at, skew),
                None => EvidenceStatus::NoData,
            };
            match status {
                EvidenceStatus::Good => {},
                EvidenceStatus::Revoked(when) => {
                    revoked = true;
                    result.push(Finding::Revoked {
                        subject: cert.subject().to_string(),
                        at: when,
                    });
                },
                EvidenceStatus::NoData => {
                    unknown = true;
                    result.push(Finding::RevocationUnknown(cert.subject().to_string()));
                },
            }
        }

        result.revocation_checked = if unknown { Check::Undetermined } else { Check::Pass };
        result.revocation_status = if revoked {
            Check::Fail
        } else if unknown {
            Check::Undetermined
        } else {
            Check::Pass
        };
    }
}

fn advance(result: &mut ValidationResult, state: ValidationState) {
    log::debug!("{}: {:?} -> {:?}", result.info.field_name, result.state, state);
    result.state = state;
}

/// Time the signature is judged at: a verified timestamp, then the CMS
/// signing-time attribute, then the claimed `/M`, then now.
fn signing_time(sig: &EmbeddedSignature, integrity: &IntegrityReport) -> DateTime<Utc> {
    if let (Check::Pass, Some(token)) = (integrity.timestamp, &integrity.timestamp_token) {
        return token.gen_time();
    }
    integrity
        .cms_signing_time
        .or(sig.info.claimed_time)
        .unwrap_or_else(Utc::now)
}

/// Result of [`LtvExtender::extend`].
#[derive(Debug, Clone)]
pub struct LtvExtension {
    /// The extended file
    pub bytes: Vec<u8>,
    /// Signatures that got a VRI entry
    pub signatures: usize,
    /// Certificates for which no evidence could be gathered
    pub undetermined: Vec<String>,
    /// Whether a document timestamp was appended
    pub timestamped: bool,
}

/// Adds revocation evidence for existing signatures.
///
/// Produces one DSS revision and, when configured, a document timestamp
/// revision on top of it. Earlier revisions are never touched.
pub struct LtvExtender<'a> {
    transport: &'a dyn Transport,
    config: LtvConfig,
    tsa: Option<TsaClient<'a>>,
    trust_anchors: Vec<Certificate>,
}

impl<'a> LtvExtender<'a> {
    /// Extender fetching evidence over `transport`.
    pub fn new(transport: &'a dyn Transport, config: LtvConfig) -> Self {
        Self {
            transport,
            config,
            tsa: None,
            trust_anchors: Vec::new(),
        }
    }

    /// TSA used for the closing document timestamp.
    pub fn with_tsa(mut self, tsa: TsaClient<'a>) -> Self {
        self.tsa = Some(tsa);
        self
    }

    /// Extra certificates available for chain building.
    pub fn with_trust_anchors(mut self, anchors: impl IntoIterator<Item = Certificate>) -> Self {
        self.trust_anchors.extend(anchors);
        self
    }

    /// Extend `input` with a DSS (and document timestamp).
    pub fn extend(&self, input: &[u8]) -> Result<LtvExtension> {
        let doc = PdfDocument::from_bytes(input.to_vec())?;
        let signatures = extract_signatures(&doc)?;
        if signatures.is_empty() {
            return Err(Error::Unsupported("document has no signatures to extend".to_string()));
        }
        if self.config.add_document_timestamp && self.tsa.is_none() {
            return Err(Error::TimestampUnavailable("no time-stamp authority configured".to_string()));
        }
        let dss_certs = DssData::read(&doc)?.map(|d| d.certificates).unwrap_or_default();

        let collector = RevocationCollector::with_transport(
            self.transport,
            &self.config.network_retry,
            self.config.use_ocsp,
            self.config.use_crl,
        )
        .include_root(self.config.check_root_revocation)
        .signer_only(self.config.scope == CertificateScope::SigningCertificate);

        let mut builder = DssBuilder::new();
        let mut undetermined = Vec::new();
        let mut count = 0;
        for sig in &signatures {
            let integrity = verify_integrity(&doc, sig);
            let signer = match &integrity.signer {
                Some(signer) => signer,
                None => {
                    log::warn!("Skipping {}: signer certificate unavailable", sig.info.field_name);
                    continue;
                },
            };
            let mut pool = integrity.certificates.clone();
            pool.extend(dss_certs.iter().cloned());
            pool.extend(self.trust_anchors.iter().cloned());
            let chain = CertificateChain::build(signer, &pool);

            let report = collector.collect(&chain);
            let mut evidence = integrity.revocation.clone();
            evidence.merge(report.evidence);
            for subject in report.undetermined {
                if !undetermined.contains(&subject) {
                    undetermined.push(subject);
                }
            }
            builder.add_signature(&sig.contents, chain.certificates(), &evidence);
            count += 1;
            log::debug!("Collected evidence for {}", sig.info.field_name);
        }
        if !undetermined.is_empty() {
            log::warn!("Revocation undetermined for: {}", undetermined.join(", "));
        }

        let mut update = IncrementalUpdate::new(&doc);
        builder.write(&mut update)?;
        let mut bytes = update.write()?.bytes;
        log::info!("Appended DSS for {} signature(s)", count);

        let mut timestamped = false;
        if let (true, Some(tsa)) = (self.config.add_document_timestamp, &self.tsa) {
            let tsa = tsa
                .clone()
                .with_digest(self.config.timestamp_digest)
                .with_retry(self.config.network_retry.clone());
            let stamped = DocumentTimestamper::new(tsa)
                .with_estimated_size(self.config.timestamp_estimated_size)
                .timestamp(&bytes)?;
            bytes = stamped.bytes;
            timestamped = true;
        }

        Ok(LtvExtension {
            bytes,
            signatures: count,
            undetermined,
            timestamped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::config::SignConfig;
    use crate::signatures::signer::PdfSigner;
    use crate::signatures::types::CertificationLevel;
    use crate::testing::{fast_retry, hello_pdf, MockResponder, TestPki, TSA_URL};
    use crate::writer::{add_text_annotation, TextAnnotation};

    fn validator() -> LtvValidator {
        LtvValidator::new(LtvConfig::default()).with_trust_anchor(TestPki::get().root_cert.clone())
    }

    fn sign_with(responder: &MockResponder, config: SignConfig) -> Vec<u8> {
        PdfSigner::new(TestPki::get().signer_identity(), config.with_network_retry(fast_retry()))
            .with_transport(responder)
            .sign(&hello_pdf())
            .unwrap()
            .bytes
    }

    fn no_timestamp() -> LtvConfig {
        LtvConfig::default()
            .with_document_timestamp(false)
            .with_network_retry(fast_retry())
    }

    #[test]
    fn test_signature_with_embedded_ocsp_is_valid() {
        let responder = MockResponder::new();
        let bytes = sign_with(&responder, SignConfig::default().with_ocsp());
        let validation = validator().validate_bytes(&bytes).unwrap();
        let result = &validation.signatures[0];
        assert_eq!(result.status(), VerificationStatus::Valid, "{:?}", result.findings);
        assert_eq!(result.state, ValidationState::Done);
        assert_eq!(result.revocation_checked, Check::Pass);
        assert!(validation.is_valid());
    }

    #[test]
    fn test_without_anchors_trust_is_undetermined() {
        let responder = MockResponder::new();
        let bytes = sign_with(&responder, SignConfig::default().with_ocsp());
        let validation = LtvValidator::new(LtvConfig::default()).validate_bytes(&bytes).unwrap();
        let result = &validation.signatures[0];
        assert_eq!(result.chain_built, Check::Pass);
        assert_eq!(result.chain_trusted, Check::Undetermined);
        assert_eq!(result.status(), VerificationStatus::Unknown);
    }

    #[test]
    fn test_foreign_anchor_is_untrusted() {
        let pki = TestPki::get();
        let responder = MockResponder::new();
        let bytes = sign_with(&responder, SignConfig::default().with_ocsp());
        let validation = LtvValidator::new(LtvConfig::default())
            .with_trust_anchor(pki.tsa_cert.clone())
            .validate_bytes(&bytes)
            .unwrap();
        let result = &validation.signatures[0];
        assert_eq!(result.chain_trusted, Check::Fail);
        assert!(result.findings.contains(&Finding::ChainUntrusted));
        assert_eq!(result.status(), VerificationStatus::Invalid);
    }

    #[test]
    fn test_missing_revocation_is_unknown() {
        let bytes = PdfSigner::new(TestPki::get().signer_identity(), SignConfig::default())
            .sign(&hello_pdf())
            .unwrap()
            .bytes;
        let result = &validator().validate_bytes(&bytes).unwrap().signatures[0];
        assert_eq!(result.revocation_checked, Check::Undetermined);
        assert!(matches!(result.findings[0], Finding::RevocationUnknown(_)));
        assert_eq!(result.status(), VerificationStatus::Unknown);
    }

    #[test]
    fn test_revoked_signer_is_invalid() {
        let pki = TestPki::get();
        let responder = MockResponder::new().revoke(pki.signer_cert.serial().to_vec(), Utc::now() - chrono::Duration::hours(1));
        let bytes = sign_with(&responder, SignConfig::default().with_ocsp());
        let result = &validator().validate_bytes(&bytes).unwrap().signatures[0];
        assert_eq!(result.revocation_status, Check::Fail);
        assert!(result.findings.iter().any(|f| matches!(f, Finding::Revoked { .. })));
        assert_eq!(result.status(), VerificationStatus::Invalid);
    }

    #[test]
    fn test_tampered_signature_stops_at_digest() {
        let responder = MockResponder::new();
        let mut bytes = sign_with(&responder, SignConfig::default().with_ocsp());
        let pos = bytes.windows(5).position(|w| w == b"Hello").unwrap();
        bytes[pos] = b'J';
        let result = &validator().validate_bytes(&bytes).unwrap().signatures[0];
        assert_eq!(result.state, ValidationState::DigestChecked);
        assert_eq!(result.digest, Check::Fail);
        assert_eq!(result.status(), VerificationStatus::Invalid);
    }

    #[test]
    fn test_timestamp_sets_signing_time() {
        let responder = MockResponder::new();
        let tsa = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let bytes = PdfSigner::new(
            TestPki::get().signer_identity(),
            SignConfig::default().with_ocsp().with_timestamp(true).with_network_retry(fast_retry()),
        )
        .with_transport(&responder)
        .with_tsa(tsa)
        .sign(&hello_pdf())
        .unwrap()
        .bytes;
        let result = &validator().validate_bytes(&bytes).unwrap().signatures[0];
        assert_eq!(result.timestamp, Check::Pass, "{:?}", result.findings);
        assert_eq!(result.status(), VerificationStatus::Valid);
    }

    #[test]
    fn test_extend_adds_dss_and_makes_signature_valid() {
        let responder = MockResponder::new();
        let signed = PdfSigner::new(TestPki::get().signer_identity(), SignConfig::default())
            .sign(&hello_pdf())
            .unwrap()
            .bytes;
        let extended = LtvExtender::new(&responder, no_timestamp()).extend(&signed).unwrap();
        assert!(extended.bytes.starts_with(&signed));
        assert_eq!(extended.signatures, 1);
        assert!(extended.undetermined.is_empty());
        assert!(!extended.timestamped);

        let doc = PdfDocument::from_bytes(extended.bytes).unwrap();
        assert_eq!(doc.revision_count(), 3);
        let validation = validator().validate(&doc).unwrap();
        assert!(validation.has_dss);
        let result = &validation.signatures[0];
        assert_eq!(result.status(), VerificationStatus::Valid, "{:?}", result.findings);
    }

    #[test]
    fn test_extend_with_document_timestamp() {
        let responder = MockResponder::new();
        let signed = sign_with(&responder, SignConfig::default());
        let tsa = TsaClient::new(&responder, TSA_URL);
        let config = LtvConfig::default().with_network_retry(fast_retry());
        let extended = LtvExtender::new(&responder, config).with_tsa(tsa).extend(&signed).unwrap();
        assert!(extended.timestamped);

        let validation = validator().validate_bytes(&extended.bytes).unwrap();
        assert_eq!(validation.signatures.len(), 2);
        assert!(validation.signatures[0].status().is_valid(), "{:?}", validation.signatures[0].findings);
        let stamp = &validation.signatures[1];
        assert!(stamp.info.is_document_timestamp);
        assert!(stamp.digest.and(stamp.signature).is_pass(), "{:?}", stamp.findings);
    }

    #[test]
    fn test_extend_requires_tsa_when_timestamping() {
        let responder = MockResponder::new();
        let signed = sign_with(&responder, SignConfig::default());
        let err = LtvExtender::new(&responder, LtvConfig::default()).extend(&signed);
        assert!(matches!(err, Err(Error::TimestampUnavailable(_))));
    }

    #[test]
    fn test_extend_unsigned_document_fails() {
        let responder = MockResponder::new();
        assert!(LtvExtender::new(&responder, no_timestamp()).extend(&hello_pdf()).is_err());
    }

    #[test]
    fn test_annotation_after_no_changes_certification() {
        let responder = MockResponder::new();
        let config = SignConfig::default()
            .with_ocsp()
            .with_certification(CertificationLevel::NoChangesAllowed);
        let signed = sign_with(&responder, config);

        let doc = PdfDocument::from_bytes(signed).unwrap();
        let note = TextAnnotation::new([100.0, 100.0, 120.0, 120.0], "Looks good");
        let annotated = add_text_annotation(&doc, 0, &note).unwrap();

        let result = &validator().validate_bytes(&annotated).unwrap().signatures[0];
        assert_eq!(result.digest, Check::Pass);
        assert_eq!(result.modifications, Check::Fail);
        assert!(result
            .findings
            .iter()
            .any(|f| matches!(f, Finding::CertificationViolated { revision: 2, .. })));
        assert_eq!(result.status(), VerificationStatus::Invalid);
    }

    #[test]
    fn test_ltv_extension_keeps_certification_intact() {
        let responder = MockResponder::new();
        let config = SignConfig::default().with_certification(CertificationLevel::NoChangesAllowed);
        let signed = sign_with(&responder, config);
        let tsa = TsaClient::new(&responder, TSA_URL);
        let extended = LtvExtender::new(&responder, LtvConfig::default().with_network_retry(fast_retry()))
            .with_tsa(tsa)
            .extend(&signed)
            .unwrap();
        let result = &validator().validate_bytes(&extended.bytes).unwrap().signatures[0];
        assert_eq!(result.modifications, Check::Pass, "{:?}", result.findings);
    }

    #[test]
    fn test_approval_after_form_filling_certification() {
        let responder = MockResponder::new();
        let certified = sign_with(
            &responder,
            SignConfig::default()
                .with_ocsp()
                .with_certification(CertificationLevel::FormFilling),
        );
        let approved = PdfSigner::new(
            TestPki::get().signer_identity(),
            SignConfig::default().with_ocsp().with_network_retry(fast_retry()),
        )
        .with_transport(&responder)
        .sign(&certified)
        .unwrap()
        .bytes;

        let validation = validator().validate_bytes(&approved).unwrap();
        assert_eq!(validation.signatures.len(), 2);
        for result in &validation.signatures {
            assert_eq!(result.status(), VerificationStatus::Valid, "{:?}", result.findings);
        }
        assert_eq!(validation.certification.unwrap().permission, 2);
    }
}

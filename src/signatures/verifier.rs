//! PDF signature verification.
//!
//! Extracts the signatures of a document and performs the checks that only
//! need the file itself: ByteRange sanity, document digest, signature value
//! and embedded timestamp. Chain building, trust and revocation are left to
//! [`LtvValidator`](super::ltv::LtvValidator).

use super::byterange::ByteRange;
use super::certificate::{verify_rsa, Certificate};
use super::cms::{decode_pkcs1_container, SignedData};
use super::mdp;
use super::revocation::RevocationEvidence;
use super::timestamp::TimestampToken;
use super::types::{Check, DigestAlgorithm, Finding, SignatureInfo, SignatureSubFilter};
use crate::document::PdfDocument;
use crate::error::Result;
use crate::object::{parse_pdf_date, Dictionary, Object, ObjectRef};
use chrono::{DateTime, Utc};

/// A signature found in a document's field tree.
#[derive(Debug, Clone)]
pub struct EmbeddedSignature {
    /// Descriptive information
    pub info: SignatureInfo,
    /// The signature dictionary object, when indirect
    pub reference: Option<ObjectRef>,
    /// The signature dictionary
    pub dict: Dictionary,
    /// Decoded `/Contents`, padding included
    pub contents: Vec<u8>,
    /// Parsed `/ByteRange`, if well formed
    pub byte_range: Option<ByteRange>,
}

/// Result of the document-local checks for one signature.
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    /// Document digest matches
    pub digest: Check,
    /// Signature value verifies
    pub signature: Check,
    /// Embedded signature timestamp (or the document timestamp itself)
    pub timestamp: Check,
    /// The certificate whose key produced the signature
    pub signer: Option<Certificate>,
    /// Certificates carried by the container
    pub certificates: Vec<Certificate>,
    /// `signingTime` signed attribute
    pub cms_signing_time: Option<DateTime<Utc>>,
    /// The verified timestamp token
    pub timestamp_token: Option<TimestampToken>,
    /// Revocation values carried by the container
    pub revocation: RevocationEvidence,
    /// Problems found
    pub findings: Vec<Finding>,
}

impl IntegrityReport {
    fn fail(&mut self, finding: Finding) {
        self.findings.push(finding);
    }
}

/// All signed signature fields of `doc`, oldest revision first.
pub fn extract_signatures(doc: &PdfDocument) -> Result<Vec<EmbeddedSignature>> {
    let mut signatures = Vec::new();
    for field in doc.signature_fields()? {
        let value = match field.dict.get("V") {
            Some(v) => v,
            None => {
                log::debug!("Skipping unsigned field {}", field.name);
                continue;
            },
        };
        let dict = match doc.resolve(value)? {
            Object::Dictionary(d) => d,
            other => {
                log::warn!("Field {} has a {} value", field.name, other.type_name());
                continue;
            },
        };

        let contents = dict
            .get("Contents")
            .and_then(|o| o.as_string())
            .map(|s| s.to_vec())
            .unwrap_or_default();
        let values: Vec<i64> = match doc.get_entry(&dict, "ByteRange")? {
            Some(Object::Array(arr)) => arr.iter().filter_map(|o| o.as_integer()).collect(),
            _ => Vec::new(),
        };
        let byte_range = ByteRange::from_array(&values).ok();
        let text = |key: &str| dict.get(key).and_then(|o| o.as_text());
        let sub_filter_name = dict.get("SubFilter").and_then(|o| o.as_name()).map(|s| s.to_string());
        let sub_filter = sub_filter_name.as_deref().and_then(SignatureSubFilter::from_pdf_name);

        let info = SignatureInfo {
            field_name: field.name.clone(),
            signer_name: text("Name"),
            claimed_time: text("M").and_then(|m| parse_pdf_date(&m)),
            reason: text("Reason"),
            location: text("Location"),
            contact_info: text("ContactInfo"),
            sub_filter,
            sub_filter_name,
            byte_range: values,
            covers_whole_document: byte_range.map(|br| br.covers(doc.data().len())).unwrap_or(false),
            revision: byte_range.and_then(|br| doc.revision_ending_at(br.end())),
            certification: mdp::docmdp_permission(doc, &dict)?,
            is_document_timestamp: dict.get("Type").and_then(|o| o.as_name()) == Some("DocTimeStamp")
                || sub_filter == Some(SignatureSubFilter::Rfc3161),
        };

        signatures.push(EmbeddedSignature {
            info,
            reference: value.as_reference(),
            dict,
            contents,
            byte_range,
        });
    }
    signatures.sort_by_key(|s| s.byte_range.map(|br| br.end()).unwrap_or(usize::MAX));
    Ok(signatures)
}

/// Check ByteRange, digest, signature value and timestamp of `sig`.
pub fn verify_integrity(doc: &PdfDocument, sig: &EmbeddedSignature) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    let data = doc.data();

    let byte_range = match sig.byte_range {
        Some(br) => br,
        None => {
            report.digest = Check::Fail;
            report.fail(Finding::ByteRangeInvalid("missing or malformed".to_string()));
            return report;
        },
    };
    if let Err(why) = byte_range.check_window(data) {
        report.digest = Check::Fail;
        report.fail(Finding::ByteRangeInvalid(why));
        return report;
    }
    let signed = match byte_range.extract_signed_bytes(data) {
        Ok(signed) => signed,
        Err(e) => {
            report.digest = Check::Fail;
            report.fail(Finding::ByteRangeInvalid(e.to_string()));
            return report;
        },
    };

    match sig.info.sub_filter {
        Some(SignatureSubFilter::Pkcs7Detached) | Some(SignatureSubFilter::CadesDetached) => {
            verify_cms(&mut report, &sig.contents, CmsContent::Detached(&signed))
        },
        Some(SignatureSubFilter::Pkcs7Sha1) => verify_cms(&mut report, &sig.contents, CmsContent::Sha1Digest(&signed)),
        Some(SignatureSubFilter::X509RsaSha1) => verify_plain(&mut report, doc, sig, &signed),
        Some(SignatureSubFilter::Rfc3161) => verify_document_timestamp(&mut report, &sig.contents, &signed),
        None => {
            let name = sig.info.sub_filter_name.clone().unwrap_or_else(|| "(none)".to_string());
            report.fail(Finding::UnsupportedSubFilter(name));
        },
    }
    report
}

enum CmsContent<'a> {
    /// The signed attributes digest the ByteRange bytes directly
    Detached(&'a [u8]),
    /// The container encapsulates the SHA-1 digest of the ByteRange bytes
    Sha1Digest(&'a [u8]),
}

fn verify_cms(report: &mut IntegrityReport, contents: &[u8], content: CmsContent<'_>) {
    let cms = match SignedData::parse(contents) {
        Ok(cms) => cms,
        Err(e) => {
            report.signature = Check::Fail;
            report.fail(Finding::MalformedContainer(e.to_string()));
            return;
        },
    };
    report.certificates = cms.certificates.clone();
    report.cms_signing_time = cms.signer.signing_time;
    report.revocation = RevocationEvidence::from_archive(&cms.signer.revocation);
    report.revocation.merge(RevocationEvidence::from_der(&[], &cms.crls));

    let algorithm = match cms.signer.digest_algorithm {
        Some(alg) => alg,
        None => {
            report.fail(Finding::MalformedContainer(format!(
                "unsupported digest algorithm {}",
                cms.signer.digest_algorithm_oid
            )));
            return;
        },
    };

    // What the signature value (or the messageDigest attribute) covers
    let covered: Vec<u8> = match content {
        CmsContent::Detached(signed) => {
            report.digest = Check::Pass;
            signed.to_vec()
        },
        CmsContent::Sha1Digest(signed) => {
            let expected = DigestAlgorithm::Sha1.digest(signed);
            let embedded = cms.content.clone().unwrap_or_default();
            report.digest = Check::from_bool(embedded == expected);
            if !report.digest.is_pass() {
                report.fail(Finding::DigestMismatch);
            }
            embedded
        },
    };

    if let Some(md) = &cms.signer.message_digest {
        let ok = *md == algorithm.digest(&covered);
        report.digest = report.digest.and(Check::from_bool(ok));
        if !ok {
            if !report.findings.contains(&Finding::DigestMismatch) {
                report.fail(Finding::DigestMismatch);
            }
            return;
        }
    }

    let signer = match cms.signer_certificate() {
        Some(cert) => cert.clone(),
        None => {
            report.signature = Check::Fail;
            report.fail(Finding::SignatureInvalid("signer certificate not embedded".to_string()));
            return;
        },
    };
    match cms.verify_signature(&signer, Some(&covered)) {
        Ok(()) => report.signature = Check::Pass,
        Err(e) => {
            report.signature = Check::Fail;
            report.fail(Finding::SignatureInvalid(e.to_string()));
        },
    }
    if cms.signer.message_digest.is_none() {
        // Without signed attributes the signature itself covers the content
        report.digest = report.signature;
    }
    if let Some((alg, hash)) = &cms.signer.signing_certificate_hash {
        if alg.digest(signer.der()) != *hash {
            report.signature = Check::Fail;
            report.fail(Finding::SignatureInvalid("signing certificate attribute mismatch".to_string()));
        }
    }

    if let Some(token) = &cms.signer.timestamp_token {
        match check_signature_timestamp(token, &cms.signer.signature, &report.certificates) {
            Ok(token) => {
                report.timestamp = Check::Pass;
                report.timestamp_token = Some(token);
            },
            Err(why) => {
                report.timestamp = Check::Fail;
                report.fail(Finding::TimestampInvalid(why));
            },
        }
    }
    report.signer = Some(signer);
}

fn check_signature_timestamp(
    der: &[u8],
    signature_value: &[u8],
    extra: &[Certificate],
) -> std::result::Result<TimestampToken, String> {
    let token = TimestampToken::parse(der).map_err(|e| e.to_string())?;
    if !token.matches(signature_value) {
        return Err("imprint does not match the signature value".to_string());
    }
    token.verify_signature(extra).map_err(|e| e.to_string())?;
    Ok(token)
}

fn verify_plain(report: &mut IntegrityReport, doc: &PdfDocument, sig: &EmbeddedSignature, signed: &[u8]) {
    let value = match decode_pkcs1_container(&sig.contents) {
        Ok(v) => v,
        Err(e) => {
            report.signature = Check::Fail;
            report.fail(Finding::MalformedContainer(e.to_string()));
            return;
        },
    };
    let blobs: Vec<Vec<u8>> = match doc.get_entry(&sig.dict, "Cert") {
        Ok(Some(Object::String(der))) => vec![der],
        Ok(Some(Object::Array(items))) => items.iter().filter_map(|o| o.as_string().map(|s| s.to_vec())).collect(),
        _ => Vec::new(),
    };
    report.certificates = blobs.into_iter().filter_map(|der| Certificate::from_der(der).ok()).collect();

    let signer = match report.certificates.first() {
        Some(cert) => cert.clone(),
        None => {
            report.signature = Check::Fail;
            report.fail(Finding::MalformedContainer("no /Cert in signature dictionary".to_string()));
            return;
        },
    };
    // The digest algorithm is only recorded inside the PKCS#1 DigestInfo
    let ok = DigestAlgorithm::ALL
        .iter()
        .any(|alg| verify_rsa(signer.public_key_info(), *alg, signed, &value).is_ok());
    report.signature = Check::from_bool(ok);
    report.digest = report.signature;
    if !ok {
        report.fail(Finding::SignatureInvalid("PKCS#1 signature does not verify".to_string()));
    }
    report.signer = Some(signer);
}

fn verify_document_timestamp(report: &mut IntegrityReport, contents: &[u8], signed: &[u8]) {
    let token = match TimestampToken::parse(contents) {
        Ok(token) => token,
        Err(e) => {
            report.signature = Check::Fail;
            report.fail(Finding::MalformedContainer(e.to_string()));
            return;
        },
    };
    report.certificates = token.certificates().to_vec();
    report.digest = Check::from_bool(token.matches(signed));
    if !report.digest.is_pass() {
        report.fail(Finding::DigestMismatch);
        return;
    }
    match token.verify_signature(&[]) {
        Ok(tsa) => {
            report.signature = Check::Pass;
            report.timestamp = Check::Pass;
            report.signer = Some(tsa);
            report.timestamp_token = Some(token);
        },
        Err(e) => {
            report.signature = Check::Fail;
            report.fail(Finding::SignatureInvalid(e.to_string()));
        },
    }
}

//! Revocation evidence: CRLs, OCSP responses and their collection.

use super::certificate::{normalize_serial, verify_rsa, Certificate, CertificateChain};
use super::cms::RevocationArchive;
use super::config::RetryPolicy;
use super::encoding::from_x509_time;
use super::network::{self, content_type, Transport};
use super::ocsp::{CertStatus, OcspClient, OcspResponse};
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use der::{Decode, Encode};
use std::collections::HashMap;
use x509_cert::crl::CertificateList;

/// A parsed certificate revocation list.
#[derive(Debug, Clone)]
pub struct Crl {
    der: Vec<u8>,
    tbs: Vec<u8>,
    signature_algorithm: String,
    signature: Vec<u8>,
    issuer_raw: Vec<u8>,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    revoked: HashMap<Vec<u8>, DateTime<Utc>>,
}

impl Crl {
    /// Parse a DER CertificateList.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let crl = CertificateList::from_der(der).map_err(|e| Error::Asn1(format!("bad CRL: {}", e)))?;
        let tbs = &crl.tbs_cert_list;

        let mut revoked = HashMap::new();
        for entry in tbs.revoked_certificates.iter().flatten() {
            revoked.insert(
                normalize_serial(entry.serial_number.as_bytes()),
                from_x509_time(&entry.revocation_date)?,
            );
        }

        Ok(Self {
            der: der.to_vec(),
            tbs: tbs.to_der()?,
            signature_algorithm: crl.signature_algorithm.oid.to_string(),
            signature: crl.signature.raw_bytes().to_vec(),
            issuer_raw: tbs.issuer.to_der()?,
            this_update: from_x509_time(&tbs.this_update)?,
            next_update: tbs.next_update.as_ref().map(from_x509_time).transpose()?,
            revoked,
        })
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER issuer Name.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// thisUpdate.
    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    /// nextUpdate.
    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    /// Whether this CRL's issuer issued `cert`.
    pub fn covers(&self, cert: &Certificate) -> bool {
        self.issuer_raw == cert.issuer_raw()
    }

    /// Revocation time of `cert`, if listed.
    pub fn revocation_of(&self, cert: &Certificate) -> Option<DateTime<Utc>> {
        self.revoked.get(cert.serial()).copied()
    }

    /// Number of revoked entries.
    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }

    /// Verify the CRL signature with `issuer`'s key.
    pub fn verify(&self, issuer: &Certificate) -> Result<()> {
        if issuer.subject_raw() != self.issuer_raw.as_slice() {
            return Err(Error::Crypto("CRL issuer does not match".to_string()));
        }
        let alg = DigestAlgorithm::from_oid(&self.signature_algorithm)
            .ok_or_else(|| Error::Unsupported(format!("CRL signature algorithm {}", self.signature_algorithm)))?;
        verify_rsa(issuer.public_key_info(), alg, &self.tbs, &self.signature)
    }
}

/// Downloads CRLs from distribution points.
pub struct CrlClient<'a> {
    transport: &'a dyn Transport,
    retry: RetryPolicy,
    url: Option<String>,
}

impl<'a> CrlClient<'a> {
    /// Client using the distribution points found in certificates.
    pub fn new(transport: &'a dyn Transport, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            url: None,
        }
    }

    /// Always download from `url`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Distribution point to use for `cert`.
    pub fn url_for(&self, cert: &Certificate) -> Option<String> {
        self.url.clone().or_else(|| cert.crl_urls().first().cloned())
    }

    /// Download the CRL covering `cert` and verify it against `issuer`.
    pub fn fetch(&self, cert: &Certificate, issuer: &Certificate) -> Result<Crl> {
        let url = self
            .url_for(cert)
            .ok_or_else(|| Error::NetworkUnavailable(format!("no CRL distribution point for {}", cert.display_name())))?;
        log::debug!("Downloading CRL for {} from {}", cert.display_name(), url);
        let body = network::get(self.transport, &self.retry, &url, content_type::PKIX_CRL)?;
        let crl = Crl::parse(&body)?;
        crl.verify(issuer)?;
        Ok(crl)
    }
}

/// Outcome of looking up evidence for one certificate at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceStatus {
    /// Evidence says the certificate was good
    Good,
    /// Evidence says the certificate was revoked at the given time
    Revoked(DateTime<Utc>),
    /// No evidence covers the instant
    NoData,
}

/// OCSP responses and CRLs for a set of certificates.
#[derive(Debug, Clone, Default)]
pub struct RevocationEvidence {
    /// OCSP responses
    pub ocsp: Vec<OcspResponse>,
    /// CRLs
    pub crls: Vec<Crl>,
}

impl RevocationEvidence {
    /// Whether there is no evidence at all.
    pub fn is_empty(&self) -> bool {
        self.ocsp.is_empty() && self.crls.is_empty()
    }

    /// Add everything from `other`, skipping exact duplicates.
    pub fn merge(&mut self, other: RevocationEvidence) {
        for response in other.ocsp {
            if !self.ocsp.iter().any(|r| r.der() == response.der()) {
                self.ocsp.push(response);
            }
        }
        for crl in other.crls {
            if !self.crls.iter().any(|c| c.der() == crl.der()) {
                self.crls.push(crl);
            }
        }
    }

    /// Decode raw DER blobs; unparsable entries are skipped with a warning.
    pub fn from_der(ocsp: &[Vec<u8>], crls: &[Vec<u8>]) -> Self {
        let mut evidence = Self::default();
        for der in ocsp {
            match OcspResponse::parse(der) {
                Ok(r) => evidence.ocsp.push(r),
                Err(e) => log::warn!("Ignoring unreadable OCSP response: {}", e),
            }
        }
        for der in crls {
            match Crl::parse(der) {
                Ok(c) => evidence.crls.push(c),
                Err(e) => log::warn!("Ignoring unreadable CRL: {}", e),
            }
        }
        evidence
    }

    /// Decode the contents of an `adbe-revocationInfoArchival` attribute.
    pub fn from_archive(archive: &RevocationArchive) -> Self {
        Self::from_der(&archive.ocsp_responses, &archive.crls)
    }

    /// Raw values for an `adbe-revocationInfoArchival` attribute.
    pub fn to_archive(&self) -> RevocationArchive {
        RevocationArchive {
            crls: self.crls.iter().map(|c| c.der().to_vec()).collect(),
            ocsp_responses: self.ocsp.iter().map(|r| r.der().to_vec()).collect(),
        }
    }

    /// Status of `cert` at `at` according to verified evidence.
    ///
    /// Evidence counts when it was produced no earlier than `at - skew`
    /// (fresh after signing) or when its validity window contains `at`.
    /// A revocation dated after `at` does not affect the signature.
    pub fn status(&self, cert: &Certificate, issuer: &Certificate, at: DateTime<Utc>, skew: Duration) -> EvidenceStatus {
        let usable = |this_update: DateTime<Utc>, next_update: Option<DateTime<Utc>>| {
            this_update >= at - skew || (this_update <= at + skew && next_update.map_or(false, |n| at <= n + skew))
        };

        let mut good = false;
        for response in &self.ocsp {
            let single = match response.find(cert, issuer) {
                Some(single) => single,
                None => continue,
            };
            if response.verify(issuer).is_err() || !usable(single.this_update, single.next_update) {
                continue;
            }
            match single.status {
                CertStatus::Revoked(when) if when <= at => return EvidenceStatus::Revoked(when),
                CertStatus::Revoked(_) | CertStatus::Good => good = true,
                CertStatus::Unknown => {},
            }
        }
        for crl in &self.crls {
            if !crl.covers(cert) || crl.verify(issuer).is_err() || !usable(crl.this_update, crl.next_update) {
                continue;
            }
            match crl.revocation_of(cert) {
                Some(when) if when <= at => return EvidenceStatus::Revoked(when),
                _ => good = true,
            }
        }
        if good {
            EvidenceStatus::Good
        } else {
            EvidenceStatus::NoData
        }
    }
}

/// Result of a collection run.
#[derive(Debug, Clone, Default)]
pub struct CollectionReport {
    /// Evidence obtained
    pub evidence: RevocationEvidence,
    /// Certificates for which no evidence could be obtained
    pub undetermined: Vec<String>,
}

impl CollectionReport {
    /// Whether every certificate in scope has evidence.
    pub fn is_complete(&self) -> bool {
        self.undetermined.is_empty()
    }
}

/// Gathers OCSP responses and CRLs for a certificate chain.
///
/// A failing responder only affects the certificate being queried: it is
/// reported in [`CollectionReport::undetermined`] and collection continues.
pub struct RevocationCollector<'a> {
    ocsp: Option<OcspClient<'a>>,
    crl: Option<CrlClient<'a>>,
    include_root: bool,
    signer_only: bool,
}

impl<'a> RevocationCollector<'a> {
    /// Collector with no sources; add them with [`with_ocsp`](Self::with_ocsp)
    /// and [`with_crl`](Self::with_crl).
    pub fn new() -> Self {
        Self {
            ocsp: None,
            crl: None,
            include_root: false,
            signer_only: false,
        }
    }

    /// Collector using OCSP and/or CRLs over `transport`.
    pub fn with_transport(transport: &'a dyn Transport, retry: &RetryPolicy, use_ocsp: bool, use_crl: bool) -> Self {
        let mut collector = Self::new();
        if use_ocsp {
            collector = collector.with_ocsp(OcspClient::new(transport, retry.clone()));
        }
        if use_crl {
            collector = collector.with_crl(CrlClient::new(transport, retry.clone()));
        }
        collector
    }

    /// Query OCSP responders.
    pub fn with_ocsp(mut self, client: OcspClient<'a>) -> Self {
        self.ocsp = Some(client);
        self
    }

    /// Download CRLs (as a fallback when OCSP is also configured).
    pub fn with_crl(mut self, client: CrlClient<'a>) -> Self {
        self.crl = Some(client);
        self
    }

    /// Also collect evidence for the self-signed root.
    pub fn include_root(mut self, include: bool) -> Self {
        self.include_root = include;
        self
    }

    /// Only collect evidence for the signing certificate.
    pub fn signer_only(mut self, only: bool) -> Self {
        self.signer_only = only;
        self
    }

    /// Collect evidence for `chain`.
    pub fn collect(&self, chain: &CertificateChain) -> CollectionReport {
        let mut report = CollectionReport::default();
        let mut crl_cache: HashMap<String, Crl> = HashMap::new();

        for (index, cert) in chain.certificates().iter().enumerate() {
            if self.signer_only && index > 0 {
                break;
            }
            if cert.is_self_issued() && !self.include_root {
                continue;
            }
            let issuer = match chain.issuer_of(index) {
                Some(issuer) => issuer,
                None => {
                    log::warn!("No issuer for {}; revocation undetermined", cert.display_name());
                    report.undetermined.push(cert.display_name().to_string());
                    continue;
                },
            };

            if let Some(client) = &self.ocsp {
                match client.query(cert, issuer) {
                    Ok(response) => {
                        log::info!("OCSP evidence collected for {}", cert.display_name());
                        report.evidence.ocsp.push(response);
                        continue;
                    },
                    Err(e) => log::warn!("OCSP failed for {}: {}", cert.display_name(), e),
                }
            }

            if let Some(client) = &self.crl {
                let cached = client
                    .url_for(cert)
                    .and_then(|url| crl_cache.get(&url).cloned().map(|crl| (url, crl)));
                let fetched = match cached {
                    Some((_, crl)) if crl.covers(cert) => Ok(crl),
                    _ => client.fetch(cert, issuer),
                };
                match fetched {
                    Ok(crl) => {
                        log::info!("CRL evidence collected for {}", cert.display_name());
                        if let Some(url) = client.url_for(cert) {
                            crl_cache.insert(url, crl.clone());
                        }
                        if !report.evidence.crls.iter().any(|c| c.der() == crl.der()) {
                            report.evidence.crls.push(crl);
                        }
                        continue;
                    },
                    Err(e) => log::warn!("CRL failed for {}: {}", cert.display_name(), e),
                }
            }

            report.undetermined.push(cert.display_name().to_string());
        }

        report
    }
}

impl Default for RevocationCollector<'_> {
    fn default() -> Self {
        Self::new()
    }
}

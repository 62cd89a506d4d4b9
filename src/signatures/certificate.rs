//! X.509 certificates and certificate chains.
//!
//! The structure (names, serial, key, signed bytes) comes from `x509-cert`;
//! extensions and display strings are read with `x509-parser`. A
//! [`Certificate`] owns its data and can be shared across threads.

use super::encoding::from_x509_time;
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cms::cert::IssuerAndSerialNumber;
use der::oid::AssociatedOid;
use der::{Decode, Encode};
use pkcs8::DecodePublicKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Digest;
use signature::{SignatureEncoding, Signer, Verifier};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_parser::extensions::{DistributionPointName, GeneralName, ParsedExtension};

const OID_AD_OCSP: &str = "1.3.6.1.5.5.7.48.1";
const OID_OCSP_NOCHECK: &str = "1.3.6.1.5.5.7.48.1.5";

/// A parsed X.509 certificate.
#[derive(Debug, Clone)]
pub struct Certificate {
    der: Vec<u8>,
    inner: x509_cert::Certificate,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    serial: Vec<u8>,
    spki: Vec<u8>,
    tbs: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    details: Details,
}

/// What `x509-parser` reads for us: display strings and extensions.
#[derive(Debug, Clone, Default)]
struct Details {
    subject: String,
    common_name: Option<String>,
    ocsp_urls: Vec<String>,
    crl_urls: Vec<String>,
    is_ca: bool,
    time_stamping: bool,
    ocsp_signing: bool,
    ocsp_no_check: bool,
}

impl Details {
    fn read(der: &[u8]) -> Result<Self> {
        let (_, cert) =
            x509_parser::parse_x509_certificate(der).map_err(|e| Error::InvalidCertificate(format!("{}", e)))?;
        let mut details = Details {
            subject: cert.subject().to_string(),
            common_name: cert
                .subject()
                .iter_common_name()
                .next()
                .and_then(|cn| cn.as_str().ok())
                .map(|s| s.to_string()),
            ..Details::default()
        };

        for ext in cert.extensions() {
            if ext.oid.to_id_string() == OID_OCSP_NOCHECK {
                details.ocsp_no_check = true;
            }
            match ext.parsed_extension() {
                ParsedExtension::AuthorityInfoAccess(aia) => {
                    for desc in &aia.accessdescs {
                        if desc.access_method.to_id_string() == OID_AD_OCSP {
                            if let GeneralName::URI(uri) = &desc.access_location {
                                details.ocsp_urls.push(uri.to_string());
                            }
                        }
                    }
                },
                ParsedExtension::CRLDistributionPoints(points) => {
                    for point in &points.points {
                        if let Some(DistributionPointName::FullName(names)) = &point.distribution_point {
                            for name in names {
                                if let GeneralName::URI(uri) = name {
                                    details.crl_urls.push(uri.to_string());
                                }
                            }
                        }
                    }
                },
                ParsedExtension::BasicConstraints(bc) => details.is_ca = bc.ca,
                ParsedExtension::ExtendedKeyUsage(eku) => {
                    details.time_stamping = eku.time_stamping;
                    details.ocsp_signing = eku.ocsp_signing;
                },
                _ => {},
            }
        }
        Ok(details)
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

/// INTEGER magnitude without leading zero bytes.
pub(crate) fn normalize_serial(raw: &[u8]) -> Vec<u8> {
    let start = raw.iter().position(|&b| b != 0).unwrap_or(raw.len().saturating_sub(1));
    raw[start..].to_vec()
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        let inner = x509_cert::Certificate::from_der(&der).map_err(|e| Error::InvalidCertificate(e.to_string()))?;
        let details = Details::read(&der)?;

        let tbs = &inner.tbs_certificate;
        let subject_raw = tbs.subject.to_der()?;
        let issuer_raw = tbs.issuer.to_der()?;
        let serial = normalize_serial(tbs.serial_number.as_bytes());
        let spki = tbs.subject_public_key_info.to_der()?;
        let not_before = from_x509_time(&tbs.validity.not_before)?;
        let not_after = from_x509_time(&tbs.validity.not_after)?;
        let tbs = tbs.to_der()?;
        Ok(Self {
            der,
            inner,
            subject_raw,
            issuer_raw,
            serial,
            spki,
            tbs,
            not_before,
            not_after,
            details,
        })
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle.
    pub fn from_pem(pem: &[u8]) -> Result<Vec<Self>> {
        let mut certs = Vec::new();
        for block in x509_parser::pem::Pem::iter_from_buffer(pem) {
            let block = block.map_err(|e| Error::InvalidCertificate(format!("bad PEM: {}", e)))?;
            if block.label == "CERTIFICATE" {
                certs.push(Self::from_der(block.contents)?);
            }
        }
        Ok(certs)
    }

    /// DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER encoding of the subject Name.
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    /// DER encoding of the issuer Name.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// Serial number magnitude, without leading zeros.
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// The decoded certificate.
    pub fn as_x509(&self) -> &x509_cert::Certificate {
        &self.inner
    }

    /// Subject Name.
    pub fn subject_name(&self) -> &Name {
        &self.inner.tbs_certificate.subject
    }

    /// Serial number as encoded.
    pub fn serial_number(&self) -> &SerialNumber {
        &self.inner.tbs_certificate.serial_number
    }

    /// Subject as an RFC 4514 style string.
    pub fn subject(&self) -> &str {
        &self.details.subject
    }

    /// Subject common name, falling back to the full subject.
    pub fn display_name(&self) -> &str {
        self.details.common_name.as_deref().unwrap_or(&self.details.subject)
    }

    /// Subject common name.
    pub fn common_name(&self) -> Option<&str> {
        self.details.common_name.as_deref()
    }

    /// Start of the validity period.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the validity period.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Whether `at` falls inside the validity period.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.not_before <= at && at <= self.not_after
    }

    /// DER SubjectPublicKeyInfo.
    pub fn public_key_info(&self) -> &[u8] {
        &self.spki
    }

    /// The BIT STRING content of the subjectPublicKey field.
    pub fn public_key_bits(&self) -> &[u8] {
        self.inner
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes()
    }

    /// OCSP responder URLs from the Authority Information Access extension.
    pub fn ocsp_urls(&self) -> &[String] {
        &self.details.ocsp_urls
    }

    /// CRL distribution point URLs.
    pub fn crl_urls(&self) -> &[String] {
        &self.details.crl_urls
    }

    /// Basic constraints CA flag.
    pub fn is_ca(&self) -> bool {
        self.details.is_ca
    }

    /// Extended key usage includes id-kp-timeStamping.
    pub fn is_time_stamping(&self) -> bool {
        self.details.time_stamping
    }

    /// Extended key usage includes id-kp-OCSPSigning.
    pub fn is_ocsp_signing(&self) -> bool {
        self.details.ocsp_signing
    }

    /// Carries id-pkix-ocsp-nocheck.
    pub fn has_ocsp_no_check(&self) -> bool {
        self.details.ocsp_no_check
    }

    /// Subject and issuer names are identical.
    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// SHA-1 of the DER encoding, the usual thumbprint.
    pub fn thumbprint(&self) -> Vec<u8> {
        DigestAlgorithm::Sha1.digest(&self.der)
    }

    /// Check this certificate's signature against `issuer`'s key.
    pub fn verify_signed_by(&self, issuer: &Certificate) -> Result<()> {
        if self.issuer_raw != issuer.subject_raw {
            return Err(Error::InvalidCertificate(format!(
                "{} is not issued by {}",
                self.subject(),
                issuer.subject()
            )));
        }
        let oid = self.inner.signature_algorithm.oid.to_string();
        let alg = DigestAlgorithm::from_oid(&oid)
            .ok_or_else(|| Error::Unsupported(format!("certificate signature algorithm {}", oid)))?;
        verify_rsa(&issuer.spki, alg, &self.tbs, self.inner.signature.raw_bytes())
    }

    /// `IssuerAndSerialNumber` as used by CMS SignerInfo.
    pub fn issuer_and_serial(&self) -> IssuerAndSerialNumber {
        IssuerAndSerialNumber {
            issuer: self.inner.tbs_certificate.issuer.clone(),
            serial_number: self.inner.tbs_certificate.serial_number.clone(),
        }
    }

    /// Whether `key` is the private half of this certificate's public key.
    pub fn matches_key(&self, key: &RsaPublicKey) -> bool {
        RsaPublicKey::from_public_key_der(&self.spki)
            .map(|own| &own == key)
            .unwrap_or(false)
    }
}

fn verify_with<D>(key: RsaPublicKey, message: &[u8], signature: &Signature) -> Result<()>
where
    D: Digest + AssociatedOid,
{
    VerifyingKey::<D>::new(key)
        .verify(message, signature)
        .map_err(|e| Error::Crypto(format!("signature verification failed: {}", e)))
}

/// Verify an RSA PKCS#1 v1.5 signature with the key in `spki`.
pub fn verify_rsa(spki: &[u8], algorithm: DigestAlgorithm, message: &[u8], signature: &[u8]) -> Result<()> {
    let key = RsaPublicKey::from_public_key_der(spki)
        .map_err(|e| Error::Unsupported(format!("public key is not RSA: {}", e)))?;
    let signature =
        Signature::try_from(signature).map_err(|e| Error::Crypto(format!("malformed signature value: {}", e)))?;
    match algorithm {
        DigestAlgorithm::Sha1 => verify_with::<sha1::Sha1>(key, message, &signature),
        DigestAlgorithm::Sha256 => verify_with::<sha2::Sha256>(key, message, &signature),
        DigestAlgorithm::Sha384 => verify_with::<sha2::Sha384>(key, message, &signature),
        DigestAlgorithm::Sha512 => verify_with::<sha2::Sha512>(key, message, &signature),
    }
}

fn sign_with<D>(key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>>
where
    D: Digest + AssociatedOid,
{
    let signing_key = SigningKey::<D>::new(key.clone());
    let signature = signing_key
        .try_sign(message)
        .map_err(|e| Error::Crypto(format!("RSA signing failed: {}", e)))?;
    Ok(signature.to_vec())
}

/// Produce an RSA PKCS#1 v1.5 signature over `message`.
pub fn sign_rsa(key: &RsaPrivateKey, algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
    match algorithm {
        DigestAlgorithm::Sha1 => sign_with::<sha1::Sha1>(key, message),
        DigestAlgorithm::Sha256 => sign_with::<sha2::Sha256>(key, message),
        DigestAlgorithm::Sha384 => sign_with::<sha2::Sha384>(key, message),
        DigestAlgorithm::Sha512 => sign_with::<sha2::Sha512>(key, message),
    }
}

/// Certificates ordered from the signer to the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateChain {
    certs: Vec<Certificate>,
}

impl CertificateChain {
    /// Wrap an already ordered chain.
    pub fn new(certs: Vec<Certificate>) -> Self {
        Self { certs }
    }

    /// Build a chain from `leaf` by repeatedly finding a certificate in
    /// `pool` whose subject is the current issuer and whose key verifies
    /// the current certificate. Stops at a self-issued certificate or when
    /// no issuer is found.
    pub fn build(leaf: &Certificate, pool: &[Certificate]) -> Self {
        let mut certs = vec![leaf.clone()];
        while let Some(current) = certs.last() {
            if current.is_self_issued() || certs.len() > 16 {
                break;
            }
            let issuer = pool
                .iter()
                .find(|c| !certs.contains(c) && current.verify_signed_by(c).is_ok())
                .cloned();
            match issuer {
                Some(issuer) => certs.push(issuer),
                None => break,
            }
        }
        Self { certs }
    }

    /// The signer certificate.
    pub fn leaf(&self) -> Option<&Certificate> {
        self.certs.first()
    }

    /// The last certificate of the chain.
    pub fn root(&self) -> Option<&Certificate> {
        self.certs.last()
    }

    /// Issuer of the certificate at `index`, when it is part of the chain.
    pub fn issuer_of(&self, index: usize) -> Option<&Certificate> {
        let cert = self.certs.get(index)?;
        if cert.is_self_issued() {
            return Some(cert);
        }
        self.certs.get(index + 1)
    }

    /// Whether the chain ends in a self-issued certificate whose signature verifies.
    pub fn is_complete(&self) -> bool {
        match self.root() {
            Some(root) => root.is_self_issued() && root.verify_signed_by(root).is_ok(),
            None => false,
        }
    }

    /// Whether any certificate of the chain is one of `anchors`.
    pub fn is_anchored_in(&self, anchors: &[Certificate]) -> bool {
        self.certs.iter().any(|c| anchors.contains(c))
    }

    /// All certificates, signer first.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certs
    }

    /// Number of certificates.
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

/// Find the certificate in `pool` matching a CMS `IssuerAndSerialNumber`.
pub fn find_by_issuer_serial<'a>(
    pool: &'a [Certificate],
    issuer_and_serial: &IssuerAndSerialNumber,
) -> Option<&'a Certificate> {
    let issuer = issuer_and_serial.issuer.to_der().ok()?;
    let serial = normalize_serial(issuer_and_serial.serial_number.as_bytes());
    pool.iter()
        .find(|c| c.issuer_raw() == issuer.as_slice() && c.serial() == serial.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestPki;

    #[test]
    fn test_parse_test_certificates() {
        let pki = TestPki::get();
        let signer = &pki.signer_cert;
        assert_eq!(signer.common_name(), Some("Test Signer"));
        assert!(!signer.is_ca());
        assert!(pki.root_cert.is_ca());
        assert!(pki.root_cert.is_self_issued());
        assert!(pki.tsa_cert.is_time_stamping());
        assert_eq!(signer.ocsp_urls(), ["http://ocsp.test/".to_string()]);
        assert_eq!(signer.crl_urls(), ["http://crl.test/root.crl".to_string()]);
        assert!(signer.is_valid_at(Utc::now()));
    }

    #[test]
    fn test_signature_verification() {
        let pki = TestPki::get();
        assert!(pki.signer_cert.verify_signed_by(&pki.root_cert).is_ok());
        assert!(pki.root_cert.verify_signed_by(&pki.root_cert).is_ok());
        assert!(pki.root_cert.verify_signed_by(&pki.signer_cert).is_err());
    }

    #[test]
    fn test_chain_building() {
        let pki = TestPki::get();
        let pool = vec![pki.tsa_cert.clone(), pki.root_cert.clone()];
        let chain = CertificateChain::build(&pki.signer_cert, &pool);
        assert_eq!(chain.len(), 2);
        assert!(chain.is_complete());
        assert!(chain.is_anchored_in(&[pki.root_cert.clone()]));
        assert_eq!(chain.issuer_of(0), Some(&pki.root_cert));

        let partial = CertificateChain::build(&pki.signer_cert, &[]);
        assert_eq!(partial.len(), 1);
        assert!(!partial.is_complete());
    }

    #[test]
    fn test_sign_and_verify_rsa() {
        let pki = TestPki::get();
        for alg in DigestAlgorithm::ALL {
            let sig = sign_rsa(&pki.signer_key, alg, b"payload").unwrap();
            assert!(verify_rsa(pki.signer_cert.public_key_info(), alg, b"payload", &sig).is_ok());
            assert!(verify_rsa(pki.signer_cert.public_key_info(), alg, b"tampered", &sig).is_err());
        }
    }

    #[test]
    fn test_matches_key() {
        let pki = TestPki::get();
        assert!(pki.signer_cert.matches_key(&RsaPublicKey::from(&pki.signer_key)));
        assert!(!pki.signer_cert.matches_key(&RsaPublicKey::from(&pki.root_key)));
    }

    #[test]
    fn test_normalize_serial() {
        assert_eq!(normalize_serial(&[0, 0x80, 1]), vec![0x80, 1]);
        assert_eq!(normalize_serial(&[0]), vec![0]);
    }

    #[test]
    fn test_issuer_and_serial_lookup() {
        let pki = TestPki::get();
        let pool = vec![pki.root_cert.clone(), pki.signer_cert.clone()];
        let sid = pki.signer_cert.issuer_and_serial();
        assert_eq!(find_by_issuer_serial(&pool, &sid), Some(&pki.signer_cert));
        assert_eq!(find_by_issuer_serial(&pool[..1], &sid), None);
        assert!(pki.signer_cert.public_key_bits().len() > 100);
    }

    #[test]
    fn test_garbage_is_invalid_certificate() {
        assert!(matches!(
            Certificate::from_der(vec![0x30, 0x03, 0x02, 0x01, 0x01]),
            Err(Error::InvalidCertificate(_))
        ));
    }
}

//! In-memory PKI and a mock OCSP / CRL / TSA responder.

use crate::signatures::certificate::{normalize_serial, sign_rsa, Certificate};
use crate::signatures::cms::{oid, CmsBuilder};
use crate::signatures::config::RetryPolicy;
use crate::signatures::encoding::{generalized_time, rsa_signature_algorithm, x509_time};
use crate::signatures::keystore::SignerIdentity;
use crate::signatures::network::{content_type, Request, Transport, TransportError};
use crate::signatures::ocsp::{nonce_extension, schema, CertId, OcspRequest, OID_OCSP_BASIC};
use crate::signatures::timestamp::{encode_response, TimestampQuery, TstInfo};
use crate::signatures::types::DigestAlgorithm;
use chrono::{DateTime, Duration, TimeZone, Utc};
use der::asn1::{BitString, Ia5String, Null, ObjectIdentifier, OctetString};
use der::oid::AssociatedOid;
use der::{Decode, Encode};
use lazy_static::lazy_static;
use pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rsa::RsaPrivateKey;
use spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::ext::pkix::crl::dp::DistributionPoint;
use x509_cert::ext::pkix::name::{DistributionPointName, GeneralName};
use x509_cert::ext::pkix::{
    AccessDescription, AuthorityInfoAccessSyntax, BasicConstraints, CrlDistributionPoints, ExtendedKeyUsage,
};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Validity;
use x509_cert::{TbsCertificate, Version};

/// URL the mock responder answers time-stamp requests on.
pub const TSA_URL: &str = "http://tsa.test/";
/// OCSP responder named in the signer certificate.
pub const OCSP_URL: &str = "http://ocsp.test/";
/// CRL distribution point named in the signer certificate.
pub const CRL_URL: &str = "http://crl.test/root.crl";

const OID_AD_OCSP: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1");
const OID_KP_TIME_STAMPING: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.3.8");
const TSA_POLICY: &str = "1.3.6.1.4.1.55555.1.1";

/// Retry policy without backoff delays.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
        timeout_ms: 1_000,
    }
}

/// A root CA, a signer and a TSA certificate issued by it.
///
/// The signer and TSA certificates point at [`OCSP_URL`] and [`CRL_URL`];
/// the root carries no revocation pointers.
pub struct TestPki {
    /// Root CA key
    pub root_key: RsaPrivateKey,
    /// Self-signed root certificate ("Test Root CA")
    pub root_cert: Certificate,
    /// Signer key
    pub signer_key: RsaPrivateKey,
    /// Signer certificate ("Test Signer")
    pub signer_cert: Certificate,
    /// TSA key
    pub tsa_key: RsaPrivateKey,
    /// TSA certificate ("Test TSA"), timeStamping EKU
    pub tsa_cert: Certificate,
}

lazy_static! {
    static ref PKI: TestPki = TestPki::generate();
}

fn name(common_name: &str) -> Name {
    Name::from_str(&format!("CN={},O=pdf_ltv tests", common_name)).expect("distinguished name")
}

fn extension<T: Encode + AssociatedOid>(critical: bool, value: &T) -> Extension {
    Extension {
        extn_id: T::OID,
        critical,
        extn_value: OctetString::new(value.to_der().expect("encode extension")).expect("extension value"),
    }
}

fn uri(url: &str) -> GeneralName {
    GeneralName::UniformResourceIdentifier(Ia5String::new(url).expect("ASCII URL"))
}

fn serial_number(magnitude: &[u8]) -> SerialNumber {
    let mut bytes = normalize_serial(magnitude);
    if bytes.first().is_some_and(|b| b & 0x80 != 0) {
        bytes.insert(0, 0);
    }
    SerialNumber::new(&bytes).expect("serial number")
}

fn revocation_pointers() -> Vec<Extension> {
    let aia = AuthorityInfoAccessSyntax(vec![AccessDescription {
        access_method: OID_AD_OCSP,
        access_location: uri(OCSP_URL),
    }]);
    let cdp = CrlDistributionPoints(vec![DistributionPoint {
        distribution_point: Some(DistributionPointName::FullName(vec![uri(CRL_URL)])),
        reasons: None,
        crl_issuer: None,
    }]);
    vec![extension(false, &aia), extension(false, &cdp)]
}

// sha256WithRSAEncryption signature over `tbs` under `key`.
fn sign(key: &RsaPrivateKey, tbs: &impl Encode) -> (AlgorithmIdentifierOwned, BitString) {
    let algorithm = rsa_signature_algorithm(DigestAlgorithm::Sha256).expect("signature algorithm");
    let message = tbs.to_der().expect("encode signed part");
    let signature = sign_rsa(key, DigestAlgorithm::Sha256, &message).expect("sign");
    (algorithm, BitString::from_bytes(&signature).expect("signature bits"))
}

struct CertTemplate<'a> {
    serial: u64,
    subject: &'a str,
    issuer: &'a str,
    key: &'a RsaPrivateKey,
    issuer_key: &'a RsaPrivateKey,
    extensions: Vec<Extension>,
}

impl CertTemplate<'_> {
    fn issue(self) -> Certificate {
        let not_before = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let not_after = Utc.with_ymd_and_hms(2045, 1, 1, 0, 0, 0).unwrap();
        let public_key = self.key.to_public_key().to_public_key_der().expect("encode public key");

        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number: serial_number(&self.serial.to_be_bytes()),
            signature: rsa_signature_algorithm(DigestAlgorithm::Sha256).expect("signature algorithm"),
            issuer: name(self.issuer),
            validity: Validity {
                not_before: x509_time(&not_before).expect("notBefore"),
                not_after: x509_time(&not_after).expect("notAfter"),
            },
            subject: name(self.subject),
            subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(public_key.as_bytes())
                .expect("parse public key"),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(self.extensions),
        };
        let (signature_algorithm, signature) = sign(self.issuer_key, &tbs);
        let cert = x509_cert::Certificate {
            tbs_certificate: tbs,
            signature_algorithm,
            signature,
        };
        Certificate::from_der(cert.to_der().expect("encode certificate")).expect("parse generated certificate")
    }
}

impl TestPki {
    /// The shared PKI.
    pub fn get() -> &'static TestPki {
        &PKI
    }

    fn generate() -> Self {
        let mut rng = StdRng::seed_from_u64(0x5EED_1DEA);
        let mut key = || RsaPrivateKey::new(&mut rng, 1024).expect("generate RSA key");
        let root_key = key();
        let signer_key = key();
        let tsa_key = key();

        let root_cert = CertTemplate {
            serial: 1,
            subject: "Test Root CA",
            issuer: "Test Root CA",
            key: &root_key,
            issuer_key: &root_key,
            extensions: vec![extension(
                true,
                &BasicConstraints {
                    ca: true,
                    path_len_constraint: None,
                },
            )],
        }
        .issue();

        let mut signer_extensions = vec![extension(
            true,
            &BasicConstraints {
                ca: false,
                path_len_constraint: None,
            },
        )];
        signer_extensions.extend(revocation_pointers());
        let signer_cert = CertTemplate {
            serial: 0x1001,
            subject: "Test Signer",
            issuer: "Test Root CA",
            key: &signer_key,
            issuer_key: &root_key,
            extensions: signer_extensions,
        }
        .issue();

        let mut tsa_extensions = vec![extension(true, &ExtendedKeyUsage(vec![OID_KP_TIME_STAMPING]))];
        tsa_extensions.extend(revocation_pointers());
        let tsa_cert = CertTemplate {
            serial: 0x1002,
            subject: "Test TSA",
            issuer: "Test Root CA",
            key: &tsa_key,
            issuer_key: &root_key,
            extensions: tsa_extensions,
        }
        .issue();

        Self {
            root_key,
            root_cert,
            signer_key,
            signer_cert,
            tsa_key,
            tsa_cert,
        }
    }

    /// Signer identity with chain `[signer, root]`.
    pub fn signer_identity(&self) -> SignerIdentity {
        SignerIdentity::from_rsa(
            self.signer_key.clone(),
            vec![self.signer_cert.clone(), self.root_cert.clone()],
        )
        .expect("signer key matches certificate")
    }

    /// TSA identity with chain `[tsa, root]`.
    pub fn tsa_identity(&self) -> SignerIdentity {
        SignerIdentity::from_rsa(self.tsa_key.clone(), vec![self.tsa_cert.clone(), self.root_cert.clone()])
            .expect("TSA key matches certificate")
    }

    /// PEM bundle: the signer chain followed by an unencrypted PKCS#8 key.
    pub fn signer_pem_bundle(&self) -> String {
        let mut pem = String::new();
        for cert in [&self.signer_cert, &self.root_cert] {
            pem.push_str(&der::pem::encode_string("CERTIFICATE", LineEnding::LF, cert.der()).expect("PEM encode"));
        }
        pem.push_str(&self.signer_key.to_pkcs8_pem(LineEnding::LF).expect("PKCS#8 encode"));
        pem
    }

    /// CRL issued by the root listing `revoked` (serial, revocation time).
    pub fn issue_crl(&self, revoked: &[(Vec<u8>, DateTime<Utc>)]) -> Vec<u8> {
        let now = Utc::now();
        let entries: Vec<RevokedCert> = revoked
            .iter()
            .map(|(serial, at)| RevokedCert {
                serial_number: serial_number(serial),
                revocation_date: x509_time(at).expect("revocation date"),
                crl_entry_extensions: None,
            })
            .collect();
        let tbs = TbsCertList {
            version: Version::V2,
            signature: rsa_signature_algorithm(DigestAlgorithm::Sha256).expect("signature algorithm"),
            issuer: self.root_cert.subject_name().clone(),
            this_update: x509_time(&now).expect("thisUpdate"),
            next_update: Some(x509_time(&(now + Duration::days(7))).expect("nextUpdate")),
            revoked_certificates: if entries.is_empty() { None } else { Some(entries) },
            crl_extensions: None,
        };
        let (signature_algorithm, signature) = sign(&self.root_key, &tbs);
        let crl = CertificateList {
            tbs_cert_list: tbs,
            signature_algorithm,
            signature,
        };
        crl.to_der().expect("encode CRL")
    }

    fn ocsp_response(&self, request: &OcspRequest, revoked: &HashMap<Vec<u8>, DateTime<Utc>>) -> Vec<u8> {
        let now = Utc::now();
        let root_id = |id: &CertId| {
            CertId::new(&self.signer_cert, &self.root_cert)
                .map(|own| own.issuer_key_hash == id.issuer_key_hash)
                .unwrap_or(false)
        };
        let responses: Vec<schema::SingleResponse> = request
            .cert_ids
            .iter()
            .map(|id| {
                let cert_status = if !root_id(id) {
                    schema::CertStatus::Unknown(Null)
                } else if let Some(at) = revoked.get(&id.serial()) {
                    schema::CertStatus::Revoked(schema::RevokedInfo {
                        revocation_time: generalized_time(at).expect("revocation time"),
                        revocation_reason: None,
                    })
                } else {
                    schema::CertStatus::Good(Null)
                };
                schema::SingleResponse {
                    cert_id: id.clone(),
                    cert_status,
                    this_update: generalized_time(&now).expect("thisUpdate"),
                    next_update: Some(generalized_time(&(now + Duration::days(7))).expect("nextUpdate")),
                    single_extensions: None,
                }
            })
            .collect();

        let data = schema::ResponseData {
            version: None,
            responder_id: schema::ResponderId::ByName(self.root_cert.subject_name().clone()),
            produced_at: generalized_time(&now).expect("producedAt"),
            responses,
            response_extensions: request
                .nonce
                .as_deref()
                .map(|nonce| vec![nonce_extension(nonce).expect("nonce extension")]),
        };
        let (signature_algorithm, signature) = sign(&self.root_key, &data);
        let basic = schema::BasicOcspResponse {
            tbs_response_data: data,
            signature_algorithm,
            signature,
            certs: None,
        };
        let response = schema::OcspResponse {
            response_status: schema::OcspResponseStatus::Successful,
            response_bytes: Some(schema::ResponseBytes {
                response_type: OID_OCSP_BASIC,
                response: OctetString::new(basic.to_der().expect("encode BasicOCSPResponse"))
                    .expect("response bytes"),
            }),
        };
        response.to_der().expect("encode OCSPResponse")
    }
}

// Mock network

/// Answers OCSP, CRL and RFC 3161 requests with responses signed by
/// [`TestPki`]. Unknown URLs get HTTP 404.
pub struct MockResponder {
    revoked: HashMap<Vec<u8>, DateTime<Utc>>,
    ocsp: bool,
    tsa_offset: Duration,
    tsa_tampering: bool,
    serial: AtomicU64,
    log: Mutex<Vec<String>>,
}

impl Default for MockResponder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockResponder {
    /// Responder reporting every certificate as good.
    pub fn new() -> Self {
        Self {
            revoked: HashMap::new(),
            ocsp: true,
            tsa_offset: Duration::zero(),
            tsa_tampering: false,
            serial: AtomicU64::new(1),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Report the certificate with `serial` as revoked at `at`.
    pub fn revoke(mut self, serial: impl Into<Vec<u8>>, at: DateTime<Utc>) -> Self {
        self.revoked.insert(serial.into(), at);
        self
    }

    /// Refuse OCSP requests so clients fall back to CRLs.
    pub fn without_ocsp(mut self) -> Self {
        self.ocsp = false;
        self
    }

    /// Shift the TSA clock.
    pub fn with_tsa_offset(mut self, offset: Duration) -> Self {
        self.tsa_offset = offset;
        self
    }

    /// Stamp a different imprint than the one requested.
    pub fn with_tsa_tampering(mut self) -> Self {
        self.tsa_tampering = true;
        self
    }

    /// URLs requested so far.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn timestamp_reply(&self, body: &[u8]) -> Result<Vec<u8>, TransportError> {
        let query = TimestampQuery::parse(body).map_err(|_| TransportError::Http(400))?;
        let mut imprint = query.imprint.clone();
        if self.tsa_tampering {
            imprint[0] ^= 0xFF;
        }
        let info = TstInfo {
            policy: TSA_POLICY.to_string(),
            imprint_algorithm: query.algorithm,
            imprint,
            serial: self.serial.fetch_add(1, Ordering::SeqCst).to_be_bytes().to_vec(),
            gen_time: Utc::now() + self.tsa_offset,
            nonce: query.nonce.clone(),
        };
        let identity = TestPki::get().tsa_identity();
        let reply = info
            .encode()
            .and_then(|tst| {
                CmsBuilder::new(&identity, DigestAlgorithm::Sha256)
                    .with_signing_certificate()
                    .sign_encapsulated(oid::TST_INFO, tst)
            })
            .and_then(|cms| cms.to_der())
            .and_then(|token| encode_response(0, Some(&token)))
            .map_err(|_| TransportError::Http(500))?;
        Ok(reply)
    }
}

impl Transport for MockResponder {
    fn send(&self, request: &Request<'_>) -> Result<Vec<u8>, TransportError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(request.url.to_string());
        }
        let pki = TestPki::get();
        match (request.url, request.content_type, request.body) {
            (TSA_URL, content_type::TIMESTAMP_QUERY, Some(body)) => self.timestamp_reply(body),
            (OCSP_URL, content_type::OCSP_REQUEST, Some(body)) if self.ocsp => {
                let parsed = OcspRequest::parse(body).map_err(|_| TransportError::Http(400))?;
                Ok(pki.ocsp_response(&parsed, &self.revoked))
            },
            (CRL_URL, _, None) => {
                let revoked: Vec<(Vec<u8>, DateTime<Utc>)> =
                    self.revoked.iter().map(|(serial, at)| (serial.clone(), *at)).collect();
                Ok(pki.issue_crl(&revoked))
            },
            _ => Err(TransportError::Http(404)),
        }
    }
}

/// Transport whose every request fails with a transient error.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnreachableTransport;

impl Transport for UnreachableTransport {
    fn send(&self, request: &Request<'_>) -> Result<Vec<u8>, TransportError> {
        Err(TransportError::Unreachable(request.url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pki_is_stable() {
        let pki = TestPki::get();
        assert_eq!(pki.signer_cert.serial(), &[0x10, 0x01]);
        assert!(pki.tsa_cert.verify_signed_by(&pki.root_cert).is_ok());
        assert!(!pki.tsa_cert.is_ca());
    }

    #[test]
    fn test_unknown_url_is_404() {
        let responder = MockResponder::new();
        let request = Request {
            url: "http://elsewhere.test/",
            body: None,
            content_type: "text/plain",
            credentials: None,
            timeout: std::time::Duration::from_secs(1),
        };
        assert_eq!(responder.send(&request), Err(TransportError::Http(404)));
        assert_eq!(responder.requests(), vec!["http://elsewhere.test/".to_string()]);
    }
}

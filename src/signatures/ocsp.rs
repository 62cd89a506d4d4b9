//! OCSP (RFC 6960) requests and responses.
//!
//! The wire structures live in [`schema`] as `der` derives; [`OcspResponse`]
//! is the checked, decoded view the rest of the crate works with.

use super::certificate::{normalize_serial, verify_rsa, Certificate};
use super::config::RetryPolicy;
use super::encoding::{algorithm, datetime, digest_of, object_id};
use super::network::{self, content_type, Transport};
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use x509_cert::ext::Extension;

pub use schema::{CertId, ResponderId};

/// id-pkix-ocsp-basic
pub const OID_OCSP_BASIC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.1");
/// id-pkix-ocsp-nonce
pub const OID_OCSP_NONCE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.7.48.1.2");

/// RFC 6960 ASN.1 structures.
pub mod schema {
    use der::asn1::{Any, BitString, GeneralizedTime, Null, ObjectIdentifier, OctetString};
    use der::{Choice, Enumerated, Sequence};
    use spki::AlgorithmIdentifierOwned;
    use x509_cert::ext::pkix::name::GeneralName;
    use x509_cert::ext::Extensions;
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;

    /// `CertID`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct CertId {
        pub hash_algorithm: AlgorithmIdentifierOwned,
        pub issuer_name_hash: OctetString,
        pub issuer_key_hash: OctetString,
        pub serial_number: SerialNumber,
    }

    /// `Request`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct SingleRequest {
        pub req_cert: CertId,
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub single_request_extensions: Option<Extensions>,
    }

    /// `TBSRequest`; version v1 is the DEFAULT and never encoded.
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct TbsRequest {
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub version: Option<u8>,
        #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
        pub requestor_name: Option<GeneralName>,
        pub request_list: Vec<SingleRequest>,
        #[asn1(context_specific = "2", optional = "true", tag_mode = "EXPLICIT")]
        pub request_extensions: Option<Extensions>,
    }

    /// `OCSPRequest`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct OcspRequest {
        pub tbs_request: TbsRequest,
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub optional_signature: Option<Any>,
    }

    /// `OCSPResponseStatus`
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Enumerated)]
    #[repr(u32)]
    pub enum OcspResponseStatus {
        Successful = 0,
        MalformedRequest = 1,
        InternalError = 2,
        TryLater = 3,
        SigRequired = 5,
        Unauthorized = 6,
    }

    /// `ResponseBytes`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct ResponseBytes {
        pub response_type: ObjectIdentifier,
        pub response: OctetString,
    }

    /// `OCSPResponse`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct OcspResponse {
        pub response_status: OcspResponseStatus,
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub response_bytes: Option<ResponseBytes>,
    }

    /// `ResponderID`
    #[derive(Clone, Debug, Eq, PartialEq, Choice)]
    pub enum ResponderId {
        #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true")]
        ByName(Name),
        /// SHA-1 of the responder's public key bits
        #[asn1(context_specific = "2", tag_mode = "EXPLICIT", constructed = "true")]
        ByKey(OctetString),
    }

    /// `RevokedInfo`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct RevokedInfo {
        pub revocation_time: GeneralizedTime,
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub revocation_reason: Option<Any>,
    }

    /// `CertStatus`
    #[derive(Clone, Debug, Eq, PartialEq, Choice)]
    pub enum CertStatus {
        #[asn1(context_specific = "0", tag_mode = "IMPLICIT")]
        Good(Null),
        #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
        Revoked(RevokedInfo),
        #[asn1(context_specific = "2", tag_mode = "IMPLICIT")]
        Unknown(Null),
    }

    /// `SingleResponse`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct SingleResponse {
        pub cert_id: CertId,
        pub cert_status: CertStatus,
        pub this_update: GeneralizedTime,
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub next_update: Option<GeneralizedTime>,
        #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
        pub single_extensions: Option<Extensions>,
    }

    /// `ResponseData`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct ResponseData {
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub version: Option<u8>,
        pub responder_id: ResponderId,
        pub produced_at: GeneralizedTime,
        pub responses: Vec<SingleResponse>,
        #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
        pub response_extensions: Option<Extensions>,
    }

    /// `BasicOCSPResponse`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct BasicOcspResponse {
        pub tbs_response_data: ResponseData,
        pub signature_algorithm: AlgorithmIdentifierOwned,
        pub signature: BitString,
        #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
        pub certs: Option<Vec<x509_cert::Certificate>>,
    }
}

/// Revocation status reported for one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    /// Not revoked
    Good,
    /// Revoked at the given time
    Revoked(DateTime<Utc>),
    /// The responder does not know the certificate
    Unknown,
}

impl CertId {
    /// CertID for `cert` issued by `issuer`, hashed with SHA-1.
    pub fn new(cert: &Certificate, issuer: &Certificate) -> Result<Self> {
        Ok(Self {
            hash_algorithm: algorithm(object_id(DigestAlgorithm::Sha1.oid())?, true)?,
            issuer_name_hash: OctetString::new(DigestAlgorithm::Sha1.digest(cert.issuer_raw()))?,
            issuer_key_hash: OctetString::new(DigestAlgorithm::Sha1.digest(issuer.public_key_bits()))?,
            serial_number: cert.serial_number().clone(),
        })
    }

    /// Serial number magnitude.
    pub fn serial(&self) -> Vec<u8> {
        normalize_serial(self.serial_number.as_bytes())
    }

    /// Same certificate, ignoring how the hash algorithm parameters and the
    /// serial were encoded.
    pub fn matches(&self, other: &CertId) -> bool {
        digest_of(&self.hash_algorithm).is_some()
            && self.hash_algorithm.oid == other.hash_algorithm.oid
            && self.issuer_name_hash == other.issuer_name_hash
            && self.issuer_key_hash == other.issuer_key_hash
            && self.serial() == other.serial()
    }
}

/// The `id-pkix-ocsp-nonce` extension; the value is an OCTET STRING inside extnValue.
pub fn nonce_extension(nonce: &[u8]) -> Result<Extension> {
    Ok(Extension {
        extn_id: OID_OCSP_NONCE,
        critical: false,
        extn_value: OctetString::new(OctetString::new(nonce.to_vec())?.to_der()?)?,
    })
}

fn find_nonce(extensions: Option<&Vec<Extension>>) -> Option<Vec<u8>> {
    let ext = extensions?.iter().find(|ext| ext.extn_id == OID_OCSP_NONCE)?;
    let raw = ext.extn_value.as_bytes();
    // Some responders put the bare nonce in extnValue
    Some(
        OctetString::from_der(raw)
            .map(|inner| inner.as_bytes().to_vec())
            .unwrap_or_else(|_| raw.to_vec()),
    )
}

/// `OCSPRequest` for a single certificate.
pub fn build_request(cert_id: &CertId, nonce: Option<&[u8]>) -> Result<Vec<u8>> {
    let request = schema::OcspRequest {
        tbs_request: schema::TbsRequest {
            version: None,
            requestor_name: None,
            request_list: vec![schema::SingleRequest {
                req_cert: cert_id.clone(),
                single_request_extensions: None,
            }],
            request_extensions: nonce.map(nonce_extension).transpose()?.map(|ext| vec![ext]),
        },
        optional_signature: None,
    };
    Ok(request.to_der()?)
}

/// A decoded `OCSPRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspRequest {
    /// Requested certificates
    pub cert_ids: Vec<CertId>,
    /// Request nonce
    pub nonce: Option<Vec<u8>>,
}

impl OcspRequest {
    /// Decode a DER `OCSPRequest`.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let request = schema::OcspRequest::from_der(der)?;
        let tbs = request.tbs_request;
        Ok(Self {
            cert_ids: tbs.request_list.into_iter().map(|r| r.req_cert).collect(),
            nonce: find_nonce(tbs.request_extensions.as_ref()),
        })
    }
}

/// One `SingleResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleResponse {
    /// Certificate the status applies to
    pub cert_id: CertId,
    /// Status
    pub status: CertStatus,
    /// Time the status was known to be correct
    pub this_update: DateTime<Utc>,
    /// Time newer information will be available
    pub next_update: Option<DateTime<Utc>>,
}

impl SingleResponse {
    fn decode(single: &schema::SingleResponse) -> Result<Self> {
        let status = match &single.cert_status {
            schema::CertStatus::Good(_) => CertStatus::Good,
            schema::CertStatus::Revoked(info) => CertStatus::Revoked(datetime(info.revocation_time.to_unix_duration())?),
            schema::CertStatus::Unknown(_) => CertStatus::Unknown,
        };
        Ok(Self {
            cert_id: single.cert_id.clone(),
            status,
            this_update: datetime(single.this_update.to_unix_duration())?,
            next_update: single
                .next_update
                .map(|t| datetime(t.to_unix_duration()))
                .transpose()?,
        })
    }
}

/// A decoded, successful OCSP response.
#[derive(Debug, Clone)]
pub struct OcspResponse {
    der: Vec<u8>,
    tbs: Vec<u8>,
    signature_algorithm: String,
    signature: Vec<u8>,
    /// Certificates shipped with the response (delegated responder)
    pub certificates: Vec<Certificate>,
    /// Responder identification
    pub responder_id: ResponderId,
    /// When the response was signed
    pub produced_at: DateTime<Utc>,
    /// Per-certificate answers
    pub responses: Vec<SingleResponse>,
    /// Nonce echoed by the responder
    pub nonce: Option<Vec<u8>>,
}

impl OcspResponse {
    /// Decode a DER `OCSPResponse`. Non-successful response statuses are errors.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let message = schema::OcspResponse::from_der(der)?;
        if message.response_status != schema::OcspResponseStatus::Successful {
            return Err(Error::NetworkUnavailable(format!(
                "OCSP responder returned status {}",
                message.response_status as u32
            )));
        }
        let bytes = message
            .response_bytes
            .ok_or_else(|| Error::Asn1("OCSPResponse without responseBytes".to_string()))?;
        if bytes.response_type != OID_OCSP_BASIC {
            return Err(Error::Unsupported(format!("OCSP response type {}", bytes.response_type)));
        }
        let basic = schema::BasicOcspResponse::from_der(bytes.response.as_bytes())?;

        let mut certificates = Vec::new();
        for cert in basic.certs.iter().flatten() {
            certificates.push(Certificate::from_der(cert.to_der()?)?);
        }
        let data = &basic.tbs_response_data;
        let responses = data
            .responses
            .iter()
            .map(SingleResponse::decode)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            der: der.to_vec(),
            tbs: data.to_der()?,
            signature_algorithm: basic.signature_algorithm.oid.to_string(),
            signature: basic.signature.raw_bytes().to_vec(),
            certificates,
            responder_id: data.responder_id.clone(),
            produced_at: datetime(data.produced_at.to_unix_duration())?,
            responses,
            nonce: find_nonce(data.response_extensions.as_ref()),
        })
    }

    /// The DER `OCSPResponse` as received.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The answer for `cert` issued by `issuer`, if present.
    pub fn find(&self, cert: &Certificate, issuer: &Certificate) -> Option<&SingleResponse> {
        let id = CertId::new(cert, issuer).ok()?;
        self.responses.iter().find(|r| r.cert_id.matches(&id))
    }

    fn responder_matches(&self, candidate: &Certificate) -> bool {
        match &self.responder_id {
            ResponderId::ByName(name) => name
                .to_der()
                .map(|name| name.as_slice() == candidate.subject_raw())
                .unwrap_or(false),
            ResponderId::ByKey(hash) => DigestAlgorithm::Sha1.digest(candidate.public_key_bits()) == hash.as_bytes(),
        }
    }

    fn verify_with(&self, signer: &Certificate) -> Result<()> {
        let alg = DigestAlgorithm::from_oid(&self.signature_algorithm)
            .ok_or_else(|| Error::Unsupported(format!("OCSP signature algorithm {}", self.signature_algorithm)))?;
        verify_rsa(signer.public_key_info(), alg, &self.tbs, &self.signature)
    }

    /// Verify the response signature: either the issuing CA signed it, or a
    /// delegated responder certificate issued by that CA with the OCSPSigning
    /// extended key usage. Returns the signing certificate.
    pub fn verify(&self, issuer: &Certificate) -> Result<Certificate> {
        if self.responder_matches(issuer) && self.verify_with(issuer).is_ok() {
            return Ok(issuer.clone());
        }
        for candidate in &self.certificates {
            if self.responder_matches(candidate)
                && candidate.is_ocsp_signing()
                && candidate.verify_signed_by(issuer).is_ok()
                && self.verify_with(candidate).is_ok()
            {
                return Ok(candidate.clone());
            }
        }
        Err(Error::Crypto("OCSP response is not signed by the issuer or a delegated responder".to_string()))
    }
}

/// Queries OCSP responders.
pub struct OcspClient<'a> {
    transport: &'a dyn Transport,
    retry: RetryPolicy,
    url: Option<String>,
}

impl<'a> OcspClient<'a> {
    /// Client using the responder URLs found in certificates.
    pub fn new(transport: &'a dyn Transport, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            url: None,
        }
    }

    /// Always query `url` instead of the certificate's AIA entry.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Fetch and verify the status of `cert`.
    pub fn query(&self, cert: &Certificate, issuer: &Certificate) -> Result<OcspResponse> {
        let url = self
            .url
            .clone()
            .or_else(|| cert.ocsp_urls().first().cloned())
            .ok_or_else(|| Error::NetworkUnavailable(format!("no OCSP responder for {}", cert.display_name())))?;

        let nonce = uuid::Uuid::new_v4().as_bytes().to_vec();
        let cert_id = CertId::new(cert, issuer)?;
        let request = build_request(&cert_id, Some(&nonce))?;
        log::debug!("OCSP request for {} to {}", cert.display_name(), url);

        let body = network::post(
            self.transport,
            &self.retry,
            &url,
            content_type::OCSP_REQUEST,
            &request,
            None,
        )?;
        let response = OcspResponse::parse(&body)?;

        match &response.nonce {
            Some(echoed) if *echoed != nonce => {
                return Err(Error::Crypto("OCSP nonce mismatch".to_string()));
            },
            None => log::debug!("OCSP responder {} did not echo the nonce", url),
            _ => {},
        }
        response.verify(issuer)?;
        if response.find(cert, issuer).is_none() {
            return Err(Error::Crypto(format!(
                "OCSP response does not cover {}",
                cert.display_name()
            )));
        }
        Ok(response)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockResponder, TestPki};

    #[test]
    fn test_request_roundtrip() {
        let pki = TestPki::get();
        let id = CertId::new(&pki.signer_cert, &pki.root_cert).unwrap();
        let der = build_request(&id, Some(b"nonce-123")).unwrap();
        let parsed = OcspRequest::parse(&der).unwrap();
        assert_eq!(parsed.cert_ids, vec![id]);
        assert_eq!(parsed.nonce.as_deref(), Some(&b"nonce-123"[..]));
    }

    #[test]
    fn test_query_good_status() {
        let pki = TestPki::get();
        let responder = MockResponder::new();
        let client = OcspClient::new(&responder, RetryPolicy::no_retry());
        let response = client.query(&pki.signer_cert, &pki.root_cert).unwrap();
        let single = response.find(&pki.signer_cert, &pki.root_cert).unwrap();
        assert_eq!(single.status, CertStatus::Good);
        assert!(single.this_update <= Utc::now());
        assert_eq!(response.verify(&pki.root_cert).unwrap(), pki.root_cert);
    }

    #[test]
    fn test_query_revoked_status() {
        let pki = TestPki::get();
        let revoked_at = Utc::now() - chrono::Duration::days(1);
        let responder = MockResponder::new().revoke(pki.signer_cert.serial(), revoked_at);
        let client = OcspClient::new(&responder, RetryPolicy::no_retry());
        let response = client.query(&pki.signer_cert, &pki.root_cert).unwrap();
        let single = response.find(&pki.signer_cert, &pki.root_cert).unwrap();
        assert!(matches!(single.status, CertStatus::Revoked(_)));
    }

    #[test]
    fn test_response_signed_by_stranger_is_rejected() {
        let pki = TestPki::get();
        let responder = MockResponder::new();
        let client = OcspClient::new(&responder, RetryPolicy::no_retry());
        let response = client.query(&pki.signer_cert, &pki.root_cert).unwrap();
        assert!(response.verify(&pki.tsa_cert).is_err());
    }

    #[test]
    fn test_missing_url_is_network_unavailable() {
        let pki = TestPki::get();
        let responder = MockResponder::new();
        let client = OcspClient::new(&responder, RetryPolicy::no_retry());
        let err = client.query(&pki.root_cert, &pki.root_cert).unwrap_err();
        assert!(matches!(err, Error::NetworkUnavailable(_)));
    }

    #[test]
    fn test_cert_id_matches_absent_hash_parameters() {
        let pki = TestPki::get();
        let id = CertId::new(&pki.signer_cert, &pki.root_cert).unwrap();
        let mut other = id.clone();
        other.hash_algorithm.parameters = None;
        assert!(id.matches(&other));
        assert_eq!(id.serial(), pki.signer_cert.serial());

        let wrong_issuer = CertId::new(&pki.signer_cert, &pki.tsa_cert).unwrap();
        assert!(!id.matches(&wrong_issuer));
    }

    #[test]
    fn test_bare_nonce_is_accepted() {
        let ext = Extension {
            extn_id: OID_OCSP_NONCE,
            critical: false,
            extn_value: OctetString::new(b"raw-nonce".to_vec()).unwrap(),
        };
        assert_eq!(find_nonce(Some(&vec![ext])).as_deref(), Some(&b"raw-nonce"[..]));
        let wrapped = nonce_extension(b"wrapped").unwrap();
        assert_eq!(find_nonce(Some(&vec![wrapped])).as_deref(), Some(&b"wrapped"[..]));
    }

    #[test]
    fn test_error_status() {
        let der = schema::OcspResponse {
            response_status: schema::OcspResponseStatus::Unauthorized,
            response_bytes: None,
        }
        .to_der()
        .unwrap();
        assert!(matches!(OcspResponse::parse(&der), Err(Error::NetworkUnavailable(_))));
    }
}

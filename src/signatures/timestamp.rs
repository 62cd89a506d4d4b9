//! RFC 3161 time-stamp tokens.
//!
//! A signature timestamp is requested over the digest of the CMS signature
//! value and attached as the unsigned `timeStampToken` attribute. A
//! document timestamp is requested over the ByteRange of its own `/Contents`
//! window and stored directly as the container of an `ETSI.RFC3161`
//! signature dictionary.

use super::certificate::{normalize_serial, Certificate};
use super::cms::{oid, SignedData};
use super::config::RetryPolicy;
use super::encoding::{datetime, decode_padded, digest_algorithm, digest_of, generalized_time, object_id};
use super::network::{self, content_type, Credentials, Transport};
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use cms::content_info::ContentInfo;
use der::asn1::{OctetString, Uint};
use der::{Decode, Encode};

/// RFC 3161 ASN.1 structures.
pub mod schema {
    use cms::content_info::ContentInfo;
    use der::asn1::{BitString, GeneralizedTime, ObjectIdentifier, OctetString, Uint};
    use der::Sequence;
    use spki::AlgorithmIdentifierOwned;
    use x509_cert::ext::pkix::name::GeneralName;
    use x509_cert::ext::Extensions;

    /// `MessageImprint`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct MessageImprint {
        pub hash_algorithm: AlgorithmIdentifierOwned,
        pub hashed_message: OctetString,
    }

    /// `TimeStampReq`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct TimeStampReq {
        pub version: u8,
        pub message_imprint: MessageImprint,
        #[asn1(optional = "true")]
        pub req_policy: Option<ObjectIdentifier>,
        #[asn1(optional = "true")]
        pub nonce: Option<Uint>,
        #[asn1(default = "Default::default")]
        pub cert_req: bool,
        #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
        pub extensions: Option<Extensions>,
    }

    /// `Accuracy`
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Sequence)]
    pub struct Accuracy {
        #[asn1(optional = "true")]
        pub seconds: Option<u64>,
        #[asn1(context_specific = "0", tag_mode = "IMPLICIT", optional = "true")]
        pub millis: Option<u16>,
        #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
        pub micros: Option<u16>,
    }

    /// `TSTInfo`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct TstInfo {
        pub version: u8,
        pub policy: ObjectIdentifier,
        pub message_imprint: MessageImprint,
        pub serial_number: Uint,
        pub gen_time: GeneralizedTime,
        #[asn1(optional = "true")]
        pub accuracy: Option<Accuracy>,
        #[asn1(default = "Default::default")]
        pub ordering: bool,
        #[asn1(optional = "true")]
        pub nonce: Option<Uint>,
        #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
        pub tsa: Option<GeneralName>,
        #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
        pub extensions: Option<Extensions>,
    }

    /// `PKIStatusInfo`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct PkiStatusInfo {
        pub status: u8,
        #[asn1(optional = "true")]
        pub status_string: Option<Vec<String>>,
        #[asn1(optional = "true")]
        pub fail_info: Option<BitString>,
    }

    /// `TimeStampResp`
    #[derive(Clone, Debug, Eq, PartialEq, Sequence)]
    pub struct TimeStampResp {
        pub status: PkiStatusInfo,
        #[asn1(optional = "true")]
        pub time_stamp_token: Option<ContentInfo>,
    }
}

/// `TSTInfo` content of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TstInfo {
    /// TSA policy OID
    pub policy: String,
    /// Hash algorithm of the message imprint
    pub imprint_algorithm: DigestAlgorithm,
    /// Hashed message
    pub imprint: Vec<u8>,
    /// Token serial number
    pub serial: Vec<u8>,
    /// Time asserted by the TSA
    pub gen_time: DateTime<Utc>,
    /// Nonce from the request
    pub nonce: Option<Vec<u8>>,
}

fn imprint_of(imprint: &schema::MessageImprint) -> Result<(DigestAlgorithm, Vec<u8>)> {
    let algorithm = digest_of(&imprint.hash_algorithm)
        .ok_or_else(|| Error::Unsupported(format!("imprint algorithm {}", imprint.hash_algorithm.oid)))?;
    Ok((algorithm, imprint.hashed_message.as_bytes().to_vec()))
}

fn message_imprint(algorithm: DigestAlgorithm, imprint: &[u8]) -> Result<schema::MessageImprint> {
    Ok(schema::MessageImprint {
        hash_algorithm: digest_algorithm(algorithm)?,
        hashed_message: OctetString::new(imprint.to_vec())?,
    })
}

impl TstInfo {
    /// Decode DER `TSTInfo`.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let info = schema::TstInfo::from_der(der)?;
        let (imprint_algorithm, imprint) = imprint_of(&info.message_imprint)?;
        Ok(Self {
            policy: info.policy.to_string(),
            imprint_algorithm,
            imprint,
            serial: normalize_serial(info.serial_number.as_bytes()),
            gen_time: datetime(info.gen_time.to_unix_duration())?,
            nonce: info.nonce.map(|n| normalize_serial(n.as_bytes())),
        })
    }

    /// DER `TSTInfo`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let info = schema::TstInfo {
            version: 1,
            policy: object_id(&self.policy)?,
            message_imprint: message_imprint(self.imprint_algorithm, &self.imprint)?,
            serial_number: Uint::new(&self.serial)?,
            gen_time: generalized_time(&self.gen_time)?,
            accuracy: None,
            ordering: false,
            nonce: self.nonce.as_deref().map(Uint::new).transpose()?,
            tsa: None,
            extensions: None,
        };
        Ok(info.to_der()?)
    }
}

/// `TimeStampReq`.
pub fn build_request(algorithm: DigestAlgorithm, imprint: &[u8], nonce: Option<&[u8]>) -> Result<Vec<u8>> {
    let request = schema::TimeStampReq {
        version: 1,
        message_imprint: message_imprint(algorithm, imprint)?,
        req_policy: None,
        nonce: nonce.map(Uint::new).transpose()?,
        cert_req: true,
        extensions: None,
    };
    Ok(request.to_der()?)
}

/// A decoded `TimeStampReq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampQuery {
    /// Imprint hash algorithm
    pub algorithm: DigestAlgorithm,
    /// Imprint
    pub imprint: Vec<u8>,
    /// Nonce
    pub nonce: Option<Vec<u8>>,
    /// Whether the TSA certificate should be included
    pub cert_req: bool,
}

impl TimestampQuery {
    /// Decode a DER `TimeStampReq`.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let request = schema::TimeStampReq::from_der(der)?;
        let (algorithm, imprint) = imprint_of(&request.message_imprint)?;
        Ok(Self {
            algorithm,
            imprint,
            nonce: request.nonce.map(|n| normalize_serial(n.as_bytes())),
            cert_req: request.cert_req,
        })
    }
}

/// DER `TimeStampResp` with `status` and an optional token.
pub fn encode_response(status: u8, token: Option<&[u8]>) -> Result<Vec<u8>> {
    let response = schema::TimeStampResp {
        status: schema::PkiStatusInfo {
            status,
            status_string: None,
            fail_info: None,
        },
        time_stamp_token: token.map(ContentInfo::from_der).transpose()?,
    };
    Ok(response.to_der()?)
}

/// The token inside a `TimeStampResp`, if the TSA granted the request.
pub fn parse_response(der: &[u8]) -> Result<TimestampToken> {
    let response = schema::TimeStampResp::from_der(der)?;
    // granted (0) or grantedWithMods (1)
    if response.status.status > 1 {
        let mut message = format!("TSA rejected the request (status {})", response.status.status);
        if let Some(text) = response.status.status_string {
            message.push_str(": ");
            message.push_str(&text.join("; "));
        }
        return Err(Error::TimestampUnavailable(message));
    }
    let token = response
        .time_stamp_token
        .ok_or_else(|| Error::TimestampUnavailable("TSA response without token".to_string()))?;
    TimestampToken::parse(&token.to_der()?)
}

/// A time-stamp token: CMS SignedData over a `TSTInfo`.
#[derive(Debug, Clone)]
pub struct TimestampToken {
    der: Vec<u8>,
    signed_data: SignedData,
    info: TstInfo,
}

impl TimestampToken {
    /// Decode a DER ContentInfo holding a token.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let raw = decode_padded::<ContentInfo>(der)?.to_der()?;
        let signed_data = SignedData::parse(&raw)?;
        if signed_data.content_type != oid::TST_INFO {
            return Err(Error::Asn1(format!(
                "token content type {} is not id-ct-TSTInfo",
                signed_data.content_type
            )));
        }
        let content = signed_data
            .content
            .as_deref()
            .ok_or_else(|| Error::Asn1("token without TSTInfo".to_string()))?;
        let info = TstInfo::parse(content)?;
        Ok(Self {
            der: raw,
            signed_data,
            info,
        })
    }

    /// DER encoding of the token.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// The TSTInfo.
    pub fn info(&self) -> &TstInfo {
        &self.info
    }

    /// Time asserted by the TSA.
    pub fn gen_time(&self) -> DateTime<Utc> {
        self.info.gen_time
    }

    /// Certificates embedded in the token.
    pub fn certificates(&self) -> &[Certificate] {
        &self.signed_data.certificates
    }

    /// Whether the imprint is the digest of `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.info.imprint_algorithm.digest(data) == self.info.imprint
    }

    /// Verify the token's own signature and return the TSA certificate.
    ///
    /// `extra` supplies certificates for tokens that do not embed the TSA's.
    pub fn verify_signature(&self, extra: &[Certificate]) -> Result<Certificate> {
        let signer = &self.signed_data.signer;
        let content = self
            .signed_data
            .content
            .as_deref()
            .ok_or_else(|| Error::Crypto("token without content".to_string()))?;
        let digest = signer
            .digest_algorithm
            .ok_or_else(|| Error::Unsupported(format!("token digest {}", signer.digest_algorithm_oid)))?;

        match &signer.message_digest {
            Some(md) if *md == digest.digest(content) => {},
            Some(_) => return Err(Error::Crypto("token messageDigest does not match TSTInfo".to_string())),
            None => return Err(Error::Crypto("token without messageDigest".to_string())),
        }

        let mut pool = self.signed_data.certificates.clone();
        pool.extend(extra.iter().cloned());
        let cert = pool
            .iter()
            .find(|c| self.signed_data.verify_signature(c, Some(content)).is_ok())
            .cloned()
            .ok_or_else(|| Error::Crypto("no certificate verifies the token signature".to_string()))?;

        if let Some((alg, hash)) = &signer.signing_certificate_hash {
            if alg.digest(cert.der()) != *hash {
                return Err(Error::Crypto("ESS certificate hash does not match the TSA certificate".to_string()));
            }
        }
        if !cert.is_time_stamping() {
            return Err(Error::Crypto(format!(
                "{} is not authorised for time stamping",
                cert.display_name()
            )));
        }
        Ok(cert)
    }
}

/// Requests tokens from a time-stamp authority.
#[derive(Clone)]
pub struct TsaClient<'a> {
    transport: &'a dyn Transport,
    url: String,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
    digest: DigestAlgorithm,
    max_skew: Duration,
}

impl<'a> TsaClient<'a> {
    /// Client for the TSA at `url`.
    pub fn new(transport: &'a dyn Transport, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: url.into(),
            credentials: None,
            retry: RetryPolicy::default(),
            digest: DigestAlgorithm::Sha256,
            max_skew: Duration::minutes(5),
        }
    }

    /// Authenticate with HTTP basic credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Retry policy for the request.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Imprint hash algorithm.
    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    /// Maximum accepted difference between genTime and the local clock.
    pub fn with_max_skew(mut self, skew: Duration) -> Self {
        self.max_skew = skew;
        self
    }

    /// The TSA URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Obtain a verified token over `data`. Every failure is reported as
    /// [`Error::TimestampUnavailable`].
    pub fn timestamp(&self, data: &[u8]) -> Result<TimestampToken> {
        self.request(data).map_err(|e| match e {
            Error::TimestampUnavailable(_) => e,
            other => Error::TimestampUnavailable(other.to_string()),
        })
    }

    fn request(&self, data: &[u8]) -> Result<TimestampToken> {
        let imprint = self.digest.digest(data);
        let nonce = normalize_serial(&uuid::Uuid::new_v4().as_bytes()[..8]);
        let query = build_request(self.digest, &imprint, Some(&nonce))?;
        log::debug!("Requesting timestamp from {}", self.url);

        let body = network::post(
            self.transport,
            &self.retry,
            &self.url,
            content_type::TIMESTAMP_QUERY,
            &query,
            self.credentials.as_ref(),
        )?;

        let token = parse_response(&body)?;

        if token.info.imprint != imprint || token.info.imprint_algorithm != self.digest {
            return Err(Error::TimestampUnavailable("token imprint does not match the request".to_string()));
        }
        if token.info.nonce.as_deref() != Some(nonce.as_slice()) {
            return Err(Error::TimestampUnavailable("token nonce does not match the request".to_string()));
        }
        token.verify_signature(&[])?;

        let skew = (token.gen_time() - Utc::now()).abs();
        if skew > self.max_skew {
            return Err(Error::TimestampUnavailable(format!(
                "TSA clock differs by {} seconds",
                skew.num_seconds()
            )));
        }

        log::info!("Timestamp obtained from {} at {}", self.url, token.gen_time());
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_retry, MockResponder, TestPki, UnreachableTransport, TSA_URL};

    #[test]
    fn test_request_roundtrip() {
        let der = build_request(DigestAlgorithm::Sha256, &[9u8; 32], Some(&[1, 2, 3])).unwrap();
        let query = TimestampQuery::parse(&der).unwrap();
        assert_eq!(query.algorithm, DigestAlgorithm::Sha256);
        assert_eq!(query.imprint, vec![9u8; 32]);
        assert_eq!(query.nonce.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(query.cert_req);
    }

    #[test]
    fn test_timestamp_from_mock() {
        let pki = TestPki::get();
        let responder = MockResponder::new();
        let client = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let token = client.timestamp(b"signature value").unwrap();
        assert!(token.matches(b"signature value"));
        assert!(!token.matches(b"other"));
        assert_eq!(token.verify_signature(&[]).unwrap(), pki.tsa_cert);
        assert!((token.gen_time() - Utc::now()).num_seconds().abs() < 60);

        let reparsed = TimestampToken::parse(token.der()).unwrap();
        assert_eq!(reparsed.info(), token.info());
    }

    #[test]
    fn test_skewed_clock_is_rejected() {
        let responder = MockResponder::new().with_tsa_offset(Duration::hours(2));
        let client = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        assert!(matches!(client.timestamp(b"x"), Err(Error::TimestampUnavailable(_))));
    }

    #[test]
    fn test_wrong_imprint_is_rejected() {
        let responder = MockResponder::new().with_tsa_tampering();
        let client = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        assert!(matches!(client.timestamp(b"x"), Err(Error::TimestampUnavailable(_))));
    }

    #[test]
    fn test_unreachable_tsa() {
        let client = TsaClient::new(&UnreachableTransport, TSA_URL).with_retry(fast_retry());
        let err = client.timestamp(b"x").unwrap_err();
        assert!(matches!(err, Error::TimestampUnavailable(_)));
    }

    #[test]
    fn test_tst_info_nonce() {
        let info = TstInfo {
            policy: "1.2.3.4".to_string(),
            imprint_algorithm: DigestAlgorithm::Sha256,
            imprint: vec![0; 32],
            serial: vec![5],
            gen_time: Utc::now(),
            nonce: Some(vec![0x80, 1]),
        };
        let parsed = TstInfo::parse(&info.encode().unwrap()).unwrap();
        assert_eq!(parsed.nonce, info.nonce);
        assert_eq!(parsed.gen_time.timestamp(), info.gen_time.timestamp());
    }

    #[test]
    fn test_rejected_response() {
        let der = encode_response(2, None).unwrap();
        assert!(matches!(parse_response(&der), Err(Error::TimestampUnavailable(m)) if m.contains("status 2")));

        let granted_without_token = encode_response(0, None).unwrap();
        assert!(matches!(
            parse_response(&granted_without_token),
            Err(Error::TimestampUnavailable(_))
        ));
    }

    #[test]
    fn test_response_carries_token() {
        let responder = MockResponder::new();
        let client = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let token = client.timestamp(b"payload").unwrap();
        let der = encode_response(1, Some(token.der())).unwrap();
        let reparsed = parse_response(&der).unwrap();
        assert_eq!(reparsed.der(), token.der());
    }
}

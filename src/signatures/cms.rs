//! CMS (Cryptographic Message Syntax) SignedData for PDF signatures.
//!
//! Building happens in two steps. [`CmsBuilder::sign_digest`] produces a
//! [`CmsSignature`] whose signed attributes and signature value are final;
//! unsigned attributes (timestamp token, revocation values) can still be
//! added afterwards because they are outside the signature. [`CmsSignature::to_der`]
//! then assembles the `cms` crate's `SignedData` and encodes the ContentInfo.
//!
//! ```text
//! ContentInfo { signedData, [0] SignedData {
//!     version, digestAlgorithms, encapContentInfo,
//!     [0] certificates,
//!     signerInfos { SignerInfo {
//!         sid, digestAlgorithm,
//!         [0] signedAttrs   (contentType, signingTime, messageDigest, signingCertificateV2)
//!         signatureAlgorithm, signature,
//!         [1] unsignedAttrs (timeStampToken, revocationInfoArchival)
//! }}}}
//! ```

use super::certificate::{find_by_issuer_serial, verify_rsa, Certificate};
use super::encoding::{
    algorithm, decode_padded, digest_algorithm, digest_of, from_any, from_x509_time, to_any, x509_time,
};
use super::keystore::SignerIdentity;
use super::types::DigestAlgorithm;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::content_info::{CmsVersion, ContentInfo};
use cms::revocation::RevocationInfoChoice;
use cms::signed_data::{
    CertificateSet, EncapsulatedContentInfo, SignedAttributes, SignedData as CmsSignedData, SignerIdentifier,
    SignerInfo as CmsSignerInfo, SignerInfos,
};
use der::asn1::{Any, ObjectIdentifier, OctetString, SetOfVec};
use der::{Decode, Encode, Sequence, Tag, Tagged};
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::Time;

/// Object identifiers used in signature containers.
pub mod oid {
    use der::asn1::ObjectIdentifier;

    /// id-data
    pub const DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
    /// id-signedData
    pub const SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
    /// rsaEncryption
    pub const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");
    /// id-contentType
    pub const CONTENT_TYPE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.3");
    /// id-messageDigest
    pub const MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
    /// id-signingTime
    pub const SIGNING_TIME: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.5");
    /// id-aa-signingCertificate (ESS, SHA-1)
    pub const SIGNING_CERTIFICATE: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.12");
    /// id-aa-signingCertificateV2 (ESS)
    pub const SIGNING_CERTIFICATE_V2: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.47");
    /// id-aa-timeStampToken
    pub const TIMESTAMP_TOKEN: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.2.14");
    /// id-ct-TSTInfo
    pub const TST_INFO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.16.1.4");
    /// adbe-revocationInfoArchival
    pub const REVOCATION_INFO_ARCHIVAL: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113583.1.1.8");
}

/// ```text
/// RevocationInfoArchival ::= SEQUENCE {
///     crl          [0] EXPLICIT SEQUENCE OF CRLs OPTIONAL,
///     ocsp         [1] EXPLICIT SEQUENCE OF OCSPResponse OPTIONAL,
///     otherRevInfo [2] EXPLICIT SEQUENCE OF OtherRevInfo OPTIONAL }
/// ```
#[derive(Clone, Debug, Default, Eq, PartialEq, Sequence)]
struct RevocationInfoArchival {
    #[asn1(context_specific = "0", optional = "true", tag_mode = "EXPLICIT")]
    crl: Option<Vec<Any>>,
    #[asn1(context_specific = "1", optional = "true", tag_mode = "EXPLICIT")]
    ocsp: Option<Vec<Any>>,
    #[asn1(context_specific = "2", optional = "true", tag_mode = "EXPLICIT")]
    other_rev_info: Option<Vec<Any>>,
}

/// Revocation values carried in `adbe-revocationInfoArchival`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationArchive {
    /// DER CertificateLists
    pub crls: Vec<Vec<u8>>,
    /// DER OCSPResponses
    pub ocsp_responses: Vec<Vec<u8>>,
}

fn any_list(items: &[Vec<u8>]) -> Result<Option<Vec<Any>>> {
    if items.is_empty() {
        return Ok(None);
    }
    items
        .iter()
        .map(|der| Ok(Any::from_der(der)?))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn der_list(items: Option<&Vec<Any>>) -> Result<Vec<Vec<u8>>> {
    items
        .into_iter()
        .flatten()
        .map(|any| Ok(any.to_der()?))
        .collect()
}

impl RevocationArchive {
    /// Whether there is nothing to embed.
    pub fn is_empty(&self) -> bool {
        self.crls.is_empty() && self.ocsp_responses.is_empty()
    }

    /// Append everything from `other`.
    pub fn extend(&mut self, other: RevocationArchive) {
        self.crls.extend(other.crls);
        self.ocsp_responses.extend(other.ocsp_responses);
    }

    /// DER `RevocationInfoArchival`.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let archival = RevocationInfoArchival {
            crl: any_list(&self.crls)?,
            ocsp: any_list(&self.ocsp_responses)?,
            other_rev_info: None,
        };
        Ok(archival.to_der()?)
    }

    fn from_any(value: &Any) -> Result<Self> {
        let archival: RevocationInfoArchival = from_any(value)?;
        Ok(Self {
            crls: der_list(archival.crl.as_ref())?,
            ocsp_responses: der_list(archival.ocsp.as_ref())?,
        })
    }
}

/// `IssuerSerial ::= SEQUENCE { issuer GeneralNames, serialNumber CertificateSerialNumber }`
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct IssuerSerial {
    issuer: Vec<GeneralName>,
    serial_number: SerialNumber,
}

/// `ESSCertIDv2`; an absent hash algorithm means SHA-256.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertIdV2 {
    #[asn1(optional = "true")]
    hash_algorithm: Option<AlgorithmIdentifierOwned>,
    cert_hash: OctetString,
    #[asn1(optional = "true")]
    issuer_serial: Option<IssuerSerial>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificateV2 {
    certs: Vec<EssCertIdV2>,
    #[asn1(optional = "true")]
    policies: Option<Vec<Any>>,
}

/// `ESSCertID`, always SHA-1.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct EssCertId {
    cert_hash: OctetString,
    #[asn1(optional = "true")]
    issuer_serial: Option<IssuerSerial>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
struct SigningCertificate {
    certs: Vec<EssCertId>,
    #[asn1(optional = "true")]
    policies: Option<Vec<Any>>,
}

fn signing_certificate_v2(cert: &Certificate, digest: DigestAlgorithm) -> Result<SigningCertificateV2> {
    // SHA-256 is the DEFAULT and must be omitted in DER
    let hash_algorithm = match digest {
        DigestAlgorithm::Sha256 => None,
        other => Some(digest_algorithm(other)?),
    };
    let issuer_and_serial = cert.issuer_and_serial();
    Ok(SigningCertificateV2 {
        certs: vec![EssCertIdV2 {
            hash_algorithm,
            cert_hash: OctetString::new(digest.digest(cert.der()))?,
            issuer_serial: Some(IssuerSerial {
                issuer: vec![GeneralName::DirectoryName(issuer_and_serial.issuer)],
                serial_number: issuer_and_serial.serial_number,
            }),
        }],
        policies: None,
    })
}

fn attribute(oid: ObjectIdentifier, value: Any) -> Result<Attribute> {
    Ok(Attribute {
        oid,
        values: SetOfVec::try_from(vec![value])?,
    })
}

/// Builds the signer side of a SignedData.
#[derive(Debug, Clone)]
pub struct CmsBuilder<'a> {
    identity: &'a SignerIdentity,
    digest: DigestAlgorithm,
    signing_time: Option<DateTime<Utc>>,
    signing_certificate: bool,
    extra_certificates: Vec<Certificate>,
}

impl<'a> CmsBuilder<'a> {
    /// PKCS#7 style signer: contentType, signingTime and messageDigest.
    pub fn new(identity: &'a SignerIdentity, digest: DigestAlgorithm) -> Self {
        Self {
            identity,
            digest,
            signing_time: Some(Utc::now()),
            signing_certificate: false,
            extra_certificates: Vec::new(),
        }
    }

    /// CAdES baseline: adds signingCertificateV2 and drops signingTime
    /// (the time lives in the PDF `/M` entry instead).
    pub fn cades(mut self) -> Self {
        self.signing_certificate = true;
        self.signing_time = None;
        self
    }

    /// Override the claimed signing time; `None` omits the attribute.
    pub fn signing_time(mut self, time: Option<DateTime<Utc>>) -> Self {
        self.signing_time = time;
        self
    }

    /// Include the ESS signingCertificateV2 attribute.
    pub fn with_signing_certificate(mut self) -> Self {
        self.signing_certificate = true;
        self
    }

    /// Embed extra certificates besides the signer's chain.
    pub fn with_certificates(mut self, certs: impl IntoIterator<Item = Certificate>) -> Self {
        self.extra_certificates.extend(certs);
        self
    }

    /// Sign a detached message given its digest.
    pub fn sign_digest(&self, message_digest: &[u8]) -> Result<CmsSignature> {
        self.sign_inner(oid::DATA, None, message_digest)
    }

    /// Sign encapsulated content of type `content_type` (timestamp tokens,
    /// `adbe.pkcs7.sha1` containers).
    pub fn sign_encapsulated(&self, content_type: ObjectIdentifier, content: Vec<u8>) -> Result<CmsSignature> {
        let digest = self.digest.digest(&content);
        self.sign_inner(content_type, Some(content), &digest)
    }

    fn sign_inner(
        &self,
        content_type: ObjectIdentifier,
        content: Option<Vec<u8>>,
        message_digest: &[u8],
    ) -> Result<CmsSignature> {
        let signer = self.identity.certificate();

        let mut attrs = vec![attribute(oid::CONTENT_TYPE, to_any(&content_type)?)?];
        if let Some(time) = &self.signing_time {
            attrs.push(attribute(oid::SIGNING_TIME, to_any(&x509_time(time)?)?)?);
        }
        attrs.push(attribute(
            oid::MESSAGE_DIGEST,
            to_any(&OctetString::new(message_digest.to_vec())?)?,
        )?);
        if self.signing_certificate {
            attrs.push(attribute(
                oid::SIGNING_CERTIFICATE_V2,
                to_any(&signing_certificate_v2(signer, self.digest)?)?,
            )?);
        }
        let attr_count = attrs.len();

        // The signature covers the attributes encoded as an explicit SET OF
        let signed_attrs: SignedAttributes = SetOfVec::try_from(attrs)?;
        let signature = self.identity.sign(self.digest, &signed_attrs.to_der()?)?;

        let mut certificates: Vec<Certificate> = self.identity.chain().certificates().to_vec();
        for cert in &self.extra_certificates {
            if !certificates.contains(cert) {
                certificates.push(cert.clone());
            }
        }

        log::debug!(
            "CMS signer info: {} signed attribute(s), {} certificate(s), {}",
            attr_count,
            certificates.len(),
            self.digest.name()
        );

        Ok(CmsSignature {
            digest: self.digest,
            content_type,
            content,
            certificates,
            sid: signer.issuer_and_serial(),
            signed_attrs,
            signature,
            unsigned_attrs: Vec::new(),
        })
    }
}

/// A signer info whose signature is final.
#[derive(Debug, Clone)]
pub struct CmsSignature {
    digest: DigestAlgorithm,
    content_type: ObjectIdentifier,
    content: Option<Vec<u8>>,
    certificates: Vec<Certificate>,
    sid: IssuerAndSerialNumber,
    signed_attrs: SignedAttributes,
    signature: Vec<u8>,
    unsigned_attrs: Vec<Attribute>,
}

impl CmsSignature {
    /// The raw signature value; a signature timestamp is requested over its digest.
    pub fn signature_value(&self) -> &[u8] {
        &self.signature
    }

    /// Digest algorithm of the signer.
    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        self.digest
    }

    /// Add an unsigned attribute. Leaves the signature intact.
    pub fn add_unsigned_attribute(&mut self, oid: ObjectIdentifier, value: Any) -> Result<()> {
        self.unsigned_attrs.push(attribute(oid, value)?);
        Ok(())
    }

    /// Attach an RFC 3161 TimeStampToken (a DER ContentInfo).
    pub fn add_timestamp_token(&mut self, token: &[u8]) -> Result<()> {
        let token = ContentInfo::from_der(token)?;
        self.add_unsigned_attribute(oid::TIMESTAMP_TOKEN, to_any(&token)?)
    }

    /// Attach revocation values for the chain.
    pub fn add_revocation(&mut self, archive: &RevocationArchive) -> Result<()> {
        if archive.is_empty() {
            return Ok(());
        }
        self.add_unsigned_attribute(oid::REVOCATION_INFO_ARCHIVAL, Any::from_der(&archive.encode()?)?)
    }

    /// Encode the complete ContentInfo.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let digest_alg = digest_algorithm(self.digest)?;
        let unsigned_attrs = if self.unsigned_attrs.is_empty() {
            None
        } else {
            Some(SetOfVec::try_from(self.unsigned_attrs.clone())?)
        };
        let signer_info = CmsSignerInfo {
            version: CmsVersion::V1,
            sid: SignerIdentifier::IssuerAndSerialNumber(self.sid.clone()),
            digest_alg: digest_alg.clone(),
            signed_attrs: Some(self.signed_attrs.clone()),
            signature_algorithm: algorithm(oid::RSA_ENCRYPTION, true)?,
            signature: OctetString::new(self.signature.clone())?,
            unsigned_attrs,
        };

        let certificates = self
            .certificates
            .iter()
            .map(|c| CertificateChoices::Certificate(c.as_x509().clone()))
            .collect::<Vec<_>>();
        let econtent = match &self.content {
            Some(content) => Some(Any::new(Tag::OctetString, content.clone())?),
            None => None,
        };
        let version = if self.content_type == oid::DATA {
            CmsVersion::V1
        } else {
            CmsVersion::V3
        };

        let signed_data = CmsSignedData {
            version,
            digest_algorithms: SetOfVec::try_from(vec![digest_alg])?,
            encap_content_info: EncapsulatedContentInfo {
                econtent_type: self.content_type,
                econtent,
            },
            certificates: Some(CertificateSet(SetOfVec::try_from(certificates)?)),
            crls: None,
            signer_infos: SignerInfos(SetOfVec::try_from(vec![signer_info])?),
        };
        let content_info = ContentInfo {
            content_type: oid::SIGNED_DATA,
            content: to_any(&signed_data)?,
        };
        Ok(content_info.to_der()?)
    }
}

/// A decoded SignerInfo.
#[derive(Debug, Clone, Default)]
pub struct SignerInfo {
    /// `sid` when it names the certificate by issuer and serial
    pub sid: Option<IssuerAndSerialNumber>,
    /// Digest algorithm
    pub digest_algorithm: Option<DigestAlgorithm>,
    /// Raw digest algorithm OID
    pub digest_algorithm_oid: String,
    /// Signed attributes encoded as `SET OF`, the bytes the signature covers
    pub signed_attributes: Option<Vec<u8>>,
    /// messageDigest attribute
    pub message_digest: Option<Vec<u8>>,
    /// signingTime attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// contentType attribute
    pub content_type: Option<ObjectIdentifier>,
    /// ESS certificate hash (signingCertificate or signingCertificateV2)
    pub signing_certificate_hash: Option<(DigestAlgorithm, Vec<u8>)>,
    /// Signature algorithm OID
    pub signature_algorithm: String,
    /// Signature value
    pub signature: Vec<u8>,
    /// Unsigned timeStampToken attribute (DER ContentInfo)
    pub timestamp_token: Option<Vec<u8>>,
    /// Revocation values from signed or unsigned attributes
    pub revocation: RevocationArchive,
}

impl SignerInfo {
    fn from_cms(info: &CmsSignerInfo) -> Result<Self> {
        let mut out = SignerInfo {
            sid: match &info.sid {
                SignerIdentifier::IssuerAndSerialNumber(sid) => Some(sid.clone()),
                _ => None,
            },
            digest_algorithm: digest_of(&info.digest_alg),
            digest_algorithm_oid: info.digest_alg.oid.to_string(),
            signature_algorithm: info.signature_algorithm.oid.to_string(),
            signature: info.signature.as_bytes().to_vec(),
            ..SignerInfo::default()
        };
        if let Some(attrs) = &info.signed_attrs {
            out.signed_attributes = Some(attrs.to_der()?);
            for attr in attrs.iter() {
                out.apply(attr)?;
            }
        }
        if let Some(attrs) = &info.unsigned_attrs {
            for attr in attrs.iter() {
                out.apply(attr)?;
            }
        }
        Ok(out)
    }

    fn apply(&mut self, attr: &Attribute) -> Result<()> {
        let value = match attr.values.iter().next() {
            Some(value) => value,
            None => return Ok(()),
        };
        if attr.oid == oid::CONTENT_TYPE {
            self.content_type = Some(from_any(value)?);
        } else if attr.oid == oid::MESSAGE_DIGEST {
            self.message_digest = Some(from_any::<OctetString>(value)?.as_bytes().to_vec());
        } else if attr.oid == oid::SIGNING_TIME {
            self.signing_time = Some(from_x509_time(&from_any::<Time>(value)?)?);
        } else if attr.oid == oid::TIMESTAMP_TOKEN {
            self.timestamp_token = Some(value.to_der()?);
        } else if attr.oid == oid::REVOCATION_INFO_ARCHIVAL {
            self.revocation.extend(RevocationArchive::from_any(value)?);
        } else if attr.oid == oid::SIGNING_CERTIFICATE_V2 {
            let ess: SigningCertificateV2 = from_any(value)?;
            self.signing_certificate_hash = match ess.certs.first() {
                Some(id) => match &id.hash_algorithm {
                    None => Some((DigestAlgorithm::Sha256, id.cert_hash.as_bytes().to_vec())),
                    Some(alg) => digest_of(alg).map(|alg| (alg, id.cert_hash.as_bytes().to_vec())),
                },
                None => None,
            };
        } else if attr.oid == oid::SIGNING_CERTIFICATE {
            let ess: SigningCertificate = from_any(value)?;
            self.signing_certificate_hash = ess
                .certs
                .first()
                .map(|id| (DigestAlgorithm::Sha1, id.cert_hash.as_bytes().to_vec()));
        } else {
            log::trace!("Ignoring attribute {}", attr.oid);
        }
        Ok(())
    }
}

/// A decoded SignedData.
#[derive(Debug, Clone)]
pub struct SignedData {
    /// eContentType
    pub content_type: ObjectIdentifier,
    /// eContent, absent for detached signatures
    pub content: Option<Vec<u8>>,
    /// Embedded certificates
    pub certificates: Vec<Certificate>,
    /// Embedded CRLs (`[1] crls`)
    pub crls: Vec<Vec<u8>>,
    /// The first signer
    pub signer: SignerInfo,
}

impl SignedData {
    /// Decode a ContentInfo wrapping SignedData. Trailing zero padding from
    /// the PDF placeholder is ignored.
    pub fn parse(der: &[u8]) -> Result<Self> {
        let content_info: ContentInfo = decode_padded(der)?;
        if content_info.content_type != oid::SIGNED_DATA {
            return Err(Error::Asn1(format!(
                "ContentInfo type {} is not signedData",
                content_info.content_type
            )));
        }
        let signed: CmsSignedData = from_any(&content_info.content)?;

        let content = match &signed.encap_content_info.econtent {
            Some(econtent) if econtent.tag() == Tag::OctetString => Some(econtent.value().to_vec()),
            Some(other) => return Err(Error::Asn1(format!("eContent has tag {}", other.tag()))),
            None => None,
        };

        let mut certificates = Vec::new();
        for choice in signed.certificates.iter().flat_map(|set| set.0.iter()) {
            if let CertificateChoices::Certificate(cert) = choice {
                match cert.to_der().map_err(Error::from).and_then(Certificate::from_der) {
                    Ok(c) => certificates.push(c),
                    Err(e) => log::warn!("Skipping unusable embedded certificate: {}", e),
                }
            }
        }

        let mut crls = Vec::new();
        for choice in signed.crls.iter().flat_map(|set| set.0.iter()) {
            if let RevocationInfoChoice::Crl(list) = choice {
                crls.push(list.to_der()?);
            }
        }

        let first = signed
            .signer_infos
            .0
            .iter()
            .next()
            .ok_or_else(|| Error::Asn1("no SignerInfo".to_string()))?;

        Ok(Self {
            content_type: signed.encap_content_info.econtent_type,
            content,
            certificates,
            crls,
            signer: SignerInfo::from_cms(first)?,
        })
    }

    /// The certificate named by the signer's `sid`, or the first embedded
    /// certificate whose key verifies the signature.
    pub fn signer_certificate(&self) -> Option<&Certificate> {
        if let Some(cert) = self
            .signer
            .sid
            .as_ref()
            .and_then(|sid| find_by_issuer_serial(&self.certificates, sid))
        {
            return Some(cert);
        }
        self.certificates
            .iter()
            .find(|cert| self.verify_signature(cert, self.content.as_deref()).is_ok())
    }

    /// Verify the signature value with `cert`'s key. With signed attributes
    /// the signature covers them; without, it covers `content` directly.
    pub fn verify_signature(&self, cert: &Certificate, content: Option<&[u8]>) -> Result<()> {
        let digest = self
            .signer
            .digest_algorithm
            .or_else(|| DigestAlgorithm::from_oid(&self.signer.signature_algorithm))
            .ok_or_else(|| Error::Unsupported(format!("digest algorithm {}", self.signer.digest_algorithm_oid)))?;
        let message = match (&self.signer.signed_attributes, content) {
            (Some(attrs), _) => attrs.as_slice(),
            (None, Some(content)) => content,
            (None, None) => return Err(Error::Crypto("no signed attributes and no content".to_string())),
        };
        verify_rsa(cert.public_key_info(), digest, message, &self.signer.signature)
    }
}

/// `adbe.x509.rsa_sha1` container: the PKCS#1 signature as an OCTET STRING.
pub fn encode_pkcs1_container(signature: &[u8]) -> Result<Vec<u8>> {
    Ok(OctetString::new(signature.to_vec())?.to_der()?)
}

/// Extract the PKCS#1 signature from an `adbe.x509.rsa_sha1` container.
pub fn decode_pkcs1_container(der: &[u8]) -> Result<Vec<u8>> {
    let octets: OctetString = decode_padded(der)?;
    Ok(octets.as_bytes().to_vec())
}

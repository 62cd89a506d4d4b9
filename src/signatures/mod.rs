//! PDF digital signatures and long-term validation.
//!
//! This module signs PDFs by incremental update, attaches RFC 3161
//! timestamps, embeds revocation evidence (in the signature container or in
//! a Document Security Store) and validates existing signatures offline.
//!
//! ## Features
//!
//! - **Signing**: CMS (`adbe.pkcs7.detached`, `ETSI.CAdES.detached`) and
//!   plain PKCS#1 (`adbe.x509.rsa_sha1`) signatures, optionally certifying
//! - **Timestamps**: signature timestamps and `ETSI.RFC3161` document timestamps
//! - **Revocation**: OCSP and CRL collection with bounded retries
//! - **DSS**: `/DSS` dictionary with per-signature VRI entries
//! - **Validation**: digest, chain, trust, revocation, timestamp and DocMDP checks
//!
//! ## Signature Types Supported
//!
//! - PKCS#7 detached signatures (adbe.pkcs7.detached)
//! - PKCS#7 SHA-1 signatures (adbe.pkcs7.sha1, verification only)
//! - PAdES signatures (ETSI.CAdES.detached)
//! - Plain RSA signatures (adbe.x509.rsa_sha1)
//! - Document timestamps (ETSI.RFC3161)
//!
//! ## Example
//!
//! ```ignore
//! use pdf_ltv::signatures::{KeyStore, PemKeyStore, PdfSigner, SignConfig};
//!
//! let identity = PemKeyStore::new().load_signer("signer.pem", "password")?;
//! let config = SignConfig::default().with_reason("Approved");
//! PdfSigner::new(identity, config).sign_file("document.pdf", "signed.pdf")?;
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - ISO 32000-2:2020 Section 12.8 - Digital Signatures
//! - ETSI TS 102 778 / EN 319 142 - PAdES
//!
//! Requires the `signatures` feature to be enabled.

pub mod byterange;
pub mod certificate;
pub mod cms;
pub mod config;
pub mod digest;
pub mod dss;
pub(crate) mod encoding;
pub mod keystore;
pub mod ltv;
pub mod mdp;
pub mod network;
pub mod ocsp;
pub mod revocation;
pub mod signer;
pub mod timestamp;
pub mod types;
pub mod verifier;

pub use byterange::{ByteRange, ByteRangeCalculator, Reservation};
pub use certificate::{Certificate, CertificateChain};
pub use config::{CertificateScope, LtvConfig, RetryPolicy, SignConfig};
pub use dss::{DssBuilder, DssData};
pub use keystore::{KeyStore, MemoryKeyStore, PemKeyStore, PrivateKeyHandle, RsaKeyHandle, SignerIdentity};
pub use ltv::{DocumentValidation, LtvExtender, LtvExtension, LtvValidator};
pub use mdp::{ChangeKind, Certification};
pub use network::{Credentials, Request, Transport, TransportError};
pub use revocation::{CollectionReport, RevocationCollector, RevocationEvidence};
pub use signer::{DocumentTimestamper, PdfSigner, SignedDocument};
pub use timestamp::{TimestampToken, TsaClient};
pub use types::{
    Check, CertificationLevel, DigestAlgorithm, Finding, RevocationPlacement, SignatureAppearance, SignatureInfo,
    SignatureSubFilter, ValidationResult, ValidationState, VerificationStatus,
};
pub use verifier::{extract_signatures, verify_integrity, EmbeddedSignature, IntegrityReport};

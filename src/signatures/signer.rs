//! PDF signing pipeline.
//!
//! One signature is one incremental update:
//!
//! 1. A signature dictionary with zeroed `/ByteRange` and `/Contents`
//!    placeholders, a widget-annotated signature field and (for
//!    certification) the DocMDP references are appended.
//! 2. The real ByteRange is written over its placeholder and the two
//!    spans around the `/Contents` window are hashed.
//! 3. The container (CMS or plain PKCS#1) is built, optionally with
//!    revocation data and a signature timestamp.
//! 4. The container is spliced into the reserved window. This is the only
//!    in-place write and never changes the file length.
//!
//! A container that outgrows its reservation restarts the pipeline with a
//! larger window.

use super::byterange::{splice_contents, write_byte_range, ByteRange, ByteRangeCalculator, Reservation};
use super::cms::{encode_pkcs1_container, CmsBuilder};
use super::config::SignConfig;
use super::digest::digest_byte_range;
use super::dss::DssBuilder;
use super::keystore::SignerIdentity;
use super::mdp;
use super::network::Transport;
use super::revocation::{CollectionReport, RevocationCollector};
use super::timestamp::TsaClient;
use super::types::{RevocationPlacement, SignatureSubFilter};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{pdf_date, text_string, Dictionary, Object, ObjectRef};
use crate::writer::{AppearanceStreamBuilder, IncrementalUpdate, ObjectSerializer};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

/// `/Prop_Build /App /Name` written into every signature dictionary.
const APP_NAME: &str = "pdf_ltv";

/// Widget flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;

/// AcroForm `/SigFlags`: SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// Outcome of a signing run.
#[derive(Debug, Clone)]
pub struct SignedDocument {
    /// The complete signed file
    pub bytes: Vec<u8>,
    /// Name of the new signature field
    pub field_name: String,
    /// ByteRange of the new signature
    pub byte_range: ByteRange,
    /// Encoded container length
    pub container_len: usize,
    /// Bytes reserved for the container
    pub reserved: usize,
    /// Pipeline runs needed to fit the container
    pub attempts: u32,
    /// Whether a timestamp token was embedded
    pub timestamped: bool,
    /// Certificates whose revocation status could not be collected
    pub undetermined: Vec<String>,
    /// Whether a DSS revision was appended after the signature
    pub dss_added: bool,
}

/// Signs documents with one identity and configuration.
///
/// # Example
///
/// ```no_run
/// use pdf_ltv::signatures::{PdfSigner, PemKeyStore, KeyStore, SignConfig};
///
/// let identity = PemKeyStore::new().load_signer("signer.pem", "secret")?;
/// let signer = PdfSigner::new(identity, SignConfig::default().with_reason("Approved"));
/// signer.sign_file("hello.pdf", "hello_signed.pdf")?;
/// # Ok::<(), pdf_ltv::error::Error>(())
/// ```
pub struct PdfSigner<'a> {
    identity: SignerIdentity,
    config: SignConfig,
    transport: Option<&'a dyn Transport>,
    tsa: Option<TsaClient<'a>>,
}

impl<'a> PdfSigner<'a> {
    /// Create a signer.
    pub fn new(identity: SignerIdentity, config: SignConfig) -> Self {
        Self {
            identity,
            config,
            transport: None,
            tsa: None,
        }
    }

    /// Transport for OCSP and CRL requests.
    pub fn with_transport(mut self, transport: &'a dyn Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Time-stamp authority for signature timestamps.
    pub fn with_tsa(mut self, tsa: TsaClient<'a>) -> Self {
        self.tsa = Some(tsa);
        self
    }

    /// The signing configuration.
    pub fn config(&self) -> &SignConfig {
        &self.config
    }

    /// The signing identity.
    pub fn identity(&self) -> &SignerIdentity {
        &self.identity
    }

    /// Sign `input` and return the new file.
    pub fn sign(&self, input: &[u8]) -> Result<SignedDocument> {
        let config = &self.config;
        if !config.sub_filter.can_sign() {
            return Err(Error::Unsupported(format!(
                "cannot produce {} signatures",
                config.sub_filter.as_pdf_name()
            )));
        }
        if config.include_timestamp && !config.sub_filter.is_cms() {
            if config.timestamp_required {
                return Err(Error::Unsupported(format!(
                    "{} containers cannot carry a timestamp",
                    config.sub_filter.as_pdf_name()
                )));
            }
            log::warn!("Timestamp skipped: {} has no unsigned attributes", config.sub_filter.as_pdf_name());
        }

        let doc = PdfDocument::from_bytes(input.to_vec())?;
        let existing = mdp::find_certification(&doc)?;
        mdp::check_certify_again(existing.as_ref().map(|c| c.permission), config.certification)?;

        let field_name = next_field_name(&doc, config.field_name.as_deref(), "Signature")?;
        let now = Utc::now();
        log::info!(
            "Signing as {} into field {} ({}, {})",
            self.identity.certificate().display_name(),
            field_name,
            config.sub_filter.as_pdf_name(),
            config.digest_algorithm.name()
        );

        let report = if config.include_ocsp || config.include_crl {
            Some(self.collect_revocation())
        } else {
            None
        };
        let embed_revocation =
            config.sub_filter.is_cms() && config.revocation_placement == RevocationPlacement::InSignature;

        let field = self.field_spec(&field_name, now);
        let mut timestamped = false;
        let ((mut bytes, byte_range, reservation, container), attempts) = with_reservation_retry(
            config.estimated_size,
            config.reservation_margin,
            config.max_reservation_attempts,
            |capacity| {
                let mut prepared = prepare(&doc, &field, capacity)?;
                let container = match config.sub_filter {
                    SignatureSubFilter::X509RsaSha1 => {
                        let signed = prepared.byte_range.extract_signed_bytes(&prepared.bytes)?;
                        encode_pkcs1_container(&self.identity.sign(config.digest_algorithm, &signed)?)?
                    },
                    _ => {
                        let evidence = report.as_ref().filter(|_| embed_revocation);
                        let (container, ts) = self.build_cms(&prepared, now, evidence)?;
                        timestamped = ts;
                        container
                    },
                };
                splice_contents(&mut prepared.bytes, &prepared.reservation, &container)?;
                Ok((prepared.bytes, prepared.byte_range, prepared.reservation, container))
            },
        )?;

        let mut dss_added = false;
        if let Some(report) = report.as_ref().filter(|r| !embed_revocation && !r.evidence.is_empty()) {
            let mut contents = container.clone();
            contents.resize(reservation.capacity(), 0);
            bytes = append_dss(bytes, &contents, &self.identity, report)?;
            dss_added = true;
        }

        log::info!(
            "Signed {}: container {} of {} bytes, {} attempt(s)",
            field_name,
            container.len(),
            reservation.capacity(),
            attempts
        );
        Ok(SignedDocument {
            bytes,
            field_name,
            byte_range,
            container_len: container.len(),
            reserved: reservation.capacity(),
            attempts,
            timestamped,
            undetermined: report.map(|r| r.undetermined).unwrap_or_default(),
            dss_added,
        })
    }

    /// Sign the file at `input` and write the result to `output`.
    ///
    /// The output is written to a temporary file next to `output` and moved
    /// into place only once signing has succeeded.
    pub fn sign_file(&self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<SignedDocument> {
        let data = std::fs::read(input.as_ref())?;
        let signed = self.sign(&data)?;
        write_atomic(output.as_ref(), &signed.bytes)?;
        log::info!("Wrote {} ({} bytes)", output.as_ref().display(), signed.bytes.len());
        Ok(signed)
    }

    /// Sign independent documents in parallel. Results keep the input order.
    pub fn sign_batch(&self, inputs: &[Vec<u8>]) -> Vec<Result<SignedDocument>> {
        use rayon::prelude::*;
        inputs.par_iter().map(|input| self.sign(input)).collect()
    }

    fn collect_revocation(&self) -> CollectionReport {
        let config = &self.config;
        let collector = match self.transport {
            Some(transport) => RevocationCollector::with_transport(
                transport,
                &config.network_retry,
                config.include_ocsp,
                config.include_crl,
            ),
            None => {
                log::warn!("No transport configured; revocation status will be undetermined");
                RevocationCollector::new()
            },
        };
        let report = collector
            .include_root(!config.skip_root_revocation)
            .collect(self.identity.chain());
        if !report.is_complete() {
            log::warn!("Revocation undetermined for: {}", report.undetermined.join(", "));
        }
        report
    }

    fn build_cms(
        &self,
        prepared: &Prepared,
        now: DateTime<Utc>,
        evidence: Option<&CollectionReport>,
    ) -> Result<(Vec<u8>, bool)> {
        let config = &self.config;
        let digest = digest_byte_range(config.digest_algorithm, &prepared.bytes, &prepared.byte_range)?;

        let builder = CmsBuilder::new(&self.identity, config.digest_algorithm);
        let builder = match config.sub_filter {
            SignatureSubFilter::CadesDetached => builder.cades(),
            _ => builder.signing_time(Some(now)),
        };
        let mut cms = builder.sign_digest(&digest)?;

        if let Some(report) = evidence {
            cms.add_revocation(&report.evidence.to_archive())?;
        }

        let mut timestamped = false;
        if config.include_timestamp {
            let token = match &self.tsa {
                Some(tsa) => tsa.timestamp(cms.signature_value()),
                None => Err(Error::TimestampUnavailable("no time-stamp authority configured".to_string())),
            };
            match token {
                Ok(token) => {
                    log::debug!("Signature timestamp at {}", token.gen_time());
                    cms.add_timestamp_token(token.der())?;
                    timestamped = true;
                },
                Err(e) if config.timestamp_required => return Err(e),
                Err(e) => log::warn!("Continuing without timestamp: {}", e),
            }
        }

        Ok((cms.to_der()?, timestamped))
    }

    fn field_spec(&self, field_name: &str, now: DateTime<Utc>) -> FieldSpec {
        let config = &self.config;
        let mut sig = Dictionary::new();
        sig.insert("Type".to_string(), ObjectSerializer::name("Sig"));
        sig.insert("Filter".to_string(), ObjectSerializer::name("Adobe.PPKLite"));
        sig.insert("SubFilter".to_string(), ObjectSerializer::name(config.sub_filter.as_pdf_name()));
        sig.insert("M".to_string(), ObjectSerializer::string(&pdf_date(&now)));
        sig.insert(
            "Prop_Build".to_string(),
            ObjectSerializer::dict(vec![("App", ObjectSerializer::dict(vec![("Name", ObjectSerializer::name(APP_NAME))]))]),
        );
        let optional = [
            ("Reason", &config.reason),
            ("Location", &config.location),
            ("ContactInfo", &config.contact_info),
            ("Name", &config.name),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                sig.insert(key.to_string(), text_string(value));
            }
        }

        if config.sub_filter == SignatureSubFilter::X509RsaSha1 {
            let certs: Vec<Object> = self
                .identity
                .chain()
                .certificates()
                .iter()
                .map(|c| Object::String(c.der().to_vec()))
                .collect();
            let cert = if certs.len() == 1 {
                certs.into_iter().next().unwrap_or(Object::Null)
            } else {
                Object::Array(certs)
            };
            sig.insert("Cert".to_string(), cert);
        }

        let permission = config.certification.permission();
        if let Some(p) = permission {
            let params = ObjectSerializer::dict(vec![
                ("Type", ObjectSerializer::name("TransformParams")),
                ("P", ObjectSerializer::integer(p as i64)),
                ("V", ObjectSerializer::name("1.2")),
            ]);
            let sig_ref = ObjectSerializer::dict(vec![
                ("Type", ObjectSerializer::name("SigRef")),
                ("TransformMethod", ObjectSerializer::name("DocMDP")),
                ("TransformParams", params),
            ]);
            sig.insert("Reference".to_string(), Object::Array(vec![sig_ref]));
        }

        let widget = config.appearance.as_ref().map(|appearance| {
            let [llx, lly, urx, ury] = appearance.rect;
            let signer = config
                .name
                .clone()
                .unwrap_or_else(|| self.identity.certificate().display_name().to_string());
            let mut builder = AppearanceStreamBuilder::new(urx - llx, ury - lly).font_size(appearance.font_size);
            if appearance.show_name {
                builder = builder.line(format!("Digitally signed by {}", signer));
            }
            if appearance.show_date {
                builder = builder.line(format!("Date: {}", now.format("%Y.%m.%d %H:%M:%S UTC")));
            }
            if let (true, Some(reason)) = (appearance.show_reason, &config.reason) {
                builder = builder.line(format!("Reason: {}", reason));
            }
            if let (true, Some(location)) = (appearance.show_location, &config.location) {
                builder = builder.line(format!("Location: {}", location));
            }
            Widget {
                page: appearance.page,
                rect: appearance.rect,
                appearance: Some(builder.build()),
            }
        });

        FieldSpec {
            name: field_name.to_string(),
            signature: sig,
            widget: widget.unwrap_or_default(),
            certification: permission.is_some(),
        }
    }
}

/// Adds an `ETSI.RFC3161` document timestamp as a new revision.
pub struct DocumentTimestamper<'a> {
    tsa: TsaClient<'a>,
    estimated_size: usize,
    reservation_margin: usize,
    max_attempts: u32,
    field_name: Option<String>,
}

impl<'a> DocumentTimestamper<'a> {
    /// Timestamp documents with `tsa`.
    pub fn new(tsa: TsaClient<'a>) -> Self {
        let defaults = SignConfig::default();
        Self {
            tsa,
            estimated_size: defaults.estimated_size,
            reservation_margin: defaults.reservation_margin,
            max_attempts: defaults.max_reservation_attempts,
            field_name: None,
        }
    }

    /// Initial container reservation in bytes.
    pub fn with_estimated_size(mut self, size: usize) -> Self {
        self.estimated_size = size;
        self
    }

    /// Use a specific field name.
    pub fn with_field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = Some(name.into());
        self
    }

    /// Append a document timestamp covering all of `input`.
    pub fn timestamp(&self, input: &[u8]) -> Result<SignedDocument> {
        let doc = PdfDocument::from_bytes(input.to_vec())?;
        let field_name = next_field_name(&doc, self.field_name.as_deref(), "Timestamp")?;

        let mut sig = Dictionary::new();
        sig.insert("Type".to_string(), ObjectSerializer::name("DocTimeStamp"));
        sig.insert("Filter".to_string(), ObjectSerializer::name("Adobe.PPKLite"));
        sig.insert("SubFilter".to_string(), ObjectSerializer::name(SignatureSubFilter::Rfc3161.as_pdf_name()));
        let field = FieldSpec {
            name: field_name.clone(),
            signature: sig,
            widget: Widget::default(),
            certification: false,
        };

        let ((bytes, byte_range, reservation, container), attempts) =
            with_reservation_retry(self.estimated_size, self.reservation_margin, self.max_attempts, |capacity| {
                let mut prepared = prepare(&doc, &field, capacity)?;
                let signed = prepared.byte_range.extract_signed_bytes(&prepared.bytes)?;
                let token = self.tsa.timestamp(&signed)?;
                let container = token.der().to_vec();
                splice_contents(&mut prepared.bytes, &prepared.reservation, &container)?;
                Ok((prepared.bytes, prepared.byte_range, prepared.reservation, container))
            })?;

        log::info!("Document timestamp {} from {}", field_name, self.tsa.url());
        Ok(SignedDocument {
            bytes,
            field_name,
            byte_range,
            container_len: container.len(),
            reserved: reservation.capacity(),
            attempts,
            timestamped: true,
            undetermined: Vec::new(),
            dss_added: false,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Widget {
    page: usize,
    rect: [f64; 4],
    appearance: Option<Object>,
}

/// Everything the new revision adds besides the placeholders.
#[derive(Debug, Clone)]
struct FieldSpec {
    name: String,
    signature: Dictionary,
    widget: Widget,
    certification: bool,
}

/// A written revision whose ByteRange is final and whose `/Contents` is still zero.
struct Prepared {
    bytes: Vec<u8>,
    reservation: Reservation,
    byte_range: ByteRange,
}

fn prepare(doc: &PdfDocument, field: &FieldSpec, capacity: usize) -> Result<Prepared> {
    let calc = ByteRangeCalculator::new(capacity);
    let mut update = IncrementalUpdate::new(doc);

    let mut sig = field.signature.clone();
    sig.insert("ByteRange".to_string(), ByteRangeCalculator::placeholder_byte_range());
    sig.insert("Contents".to_string(), calc.placeholder_contents());
    let sig_ref = update.add_object(Object::Dictionary(sig));

    let (page_ref, _) = doc.page(field.widget.page)?;
    let widget_ref = add_signature_widget(&mut update, field, sig_ref, page_ref);
    update.add_page_annotation(page_ref, widget_ref)?;
    update.add_form_field(widget_ref, SIG_FLAGS)?;

    if field.certification {
        let mut catalog = update.catalog()?;
        catalog.insert(
            "Perms".to_string(),
            ObjectSerializer::dict(vec![("DocMDP", Object::Reference(sig_ref))]),
        );
        update.set_catalog(catalog)?;
    }

    let output = update.write()?;
    let span = |key: &str| {
        output
            .value_span(sig_ref.id, key)
            .ok_or_else(|| Error::CorruptDocument(format!("signature dictionary written without /{}", key)))
    };
    let (byte_range_span, contents_span) = (span("ByteRange")?, span("Contents")?);

    let mut bytes = output.bytes;
    let reservation = calc.locate(&bytes, byte_range_span, contents_span)?;
    let byte_range = calc.calculate_byte_range(bytes.len(), &reservation);
    write_byte_range(&mut bytes, &reservation, &byte_range)?;
    log::debug!("ByteRange {} over {} bytes", byte_range.format(), bytes.len());

    Ok(Prepared {
        bytes,
        reservation,
        byte_range,
    })
}

fn add_signature_widget(
    update: &mut IncrementalUpdate<'_>,
    field: &FieldSpec,
    sig_ref: ObjectRef,
    page_ref: ObjectRef,
) -> ObjectRef {
    let [llx, lly, urx, ury] = field.widget.rect;
    let mut entries = vec![
        ("Type", ObjectSerializer::name("Annot")),
        ("Subtype", ObjectSerializer::name("Widget")),
        ("FT", ObjectSerializer::name("Sig")),
        ("T", text_string(&field.name)),
        ("V", Object::Reference(sig_ref)),
        ("Rect", ObjectSerializer::rect(llx, lly, urx, ury)),
        ("F", ObjectSerializer::integer(WIDGET_FLAGS)),
        ("P", Object::Reference(page_ref)),
    ];
    if let Some(stream) = &field.widget.appearance {
        let ap = update.add_object(stream.clone());
        entries.push(("AP", ObjectSerializer::dict(vec![("N", Object::Reference(ap))])));
    }
    update.add_object(ObjectSerializer::dict(entries))
}

/// Requested field name if free, else the first free `<prefix>N`.
fn next_field_name(doc: &PdfDocument, requested: Option<&str>, prefix: &str) -> Result<String> {
    let taken: HashSet<String> = doc.fields()?.into_iter().map(|f| f.name).collect();
    if let Some(name) = requested {
        if taken.contains(name) {
            return Err(Error::Unsupported(format!("field name {} is already in use", name)));
        }
        return Ok(name.to_string());
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}{}", prefix, n);
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Run `attempt` with growing reservations until the container fits.
fn with_reservation_retry<T>(
    initial: usize,
    margin: usize,
    max_attempts: u32,
    mut attempt: impl FnMut(usize) -> Result<T>,
) -> Result<(T, u32)> {
    let max_attempts = max_attempts.max(1);
    let mut capacity = initial;
    let mut n = 1;
    loop {
        match attempt(capacity) {
            Ok(value) => return Ok((value, n)),
            Err(Error::ReservationTooSmall { needed, reserved }) if n < max_attempts => {
                let next = needed + margin;
                log::warn!(
                    "Container needs {} bytes but {} were reserved; retrying with {}",
                    needed,
                    reserved,
                    next
                );
                capacity = next;
                n += 1;
            },
            Err(e) => return Err(e),
        }
    }
}

fn append_dss(bytes: Vec<u8>, contents: &[u8], identity: &SignerIdentity, report: &CollectionReport) -> Result<Vec<u8>> {
    let doc = PdfDocument::from_bytes(bytes)?;
    let mut builder = DssBuilder::new();
    builder.add_signature(contents, identity.chain().certificates(), &report.evidence);
    let mut update = IncrementalUpdate::new(&doc);
    builder.write(&mut update)?;
    Ok(update.write()?.bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signatures::cms::SignedData;
    use crate::signatures::types::CertificationLevel;
    use crate::testing::{fast_retry, hello_pdf, MockResponder, TestPki, TSA_URL};

    fn signer(config: SignConfig) -> PdfSigner<'static> {
        PdfSigner::new(TestPki::get().signer_identity(), config)
    }

    fn contents_of(doc: &PdfDocument, field: &str) -> Vec<u8> {
        let info = doc.signature_fields().unwrap().into_iter().find(|f| f.name == field).unwrap();
        let sig = doc.resolve(info.dict.get("V").unwrap()).unwrap();
        sig.as_dict().unwrap().get("Contents").unwrap().as_string().unwrap().to_vec()
    }

    #[test]
    fn test_sign_appends_one_revision() {
        let input = hello_pdf();
        let signed = signer(SignConfig::default()).sign(&input).unwrap();

        assert!(signed.bytes.starts_with(&input));
        assert_eq!(signed.field_name, "Signature1");
        assert_eq!(signed.attempts, 1);
        assert!(signed.byte_range.covers(signed.bytes.len()));

        let doc = PdfDocument::from_bytes(signed.bytes.clone()).unwrap();
        assert_eq!(doc.revision_count(), 2);
        let contents = contents_of(&doc, "Signature1");
        assert_eq!(contents.len(), signed.reserved);
        let cms = SignedData::parse(&contents).unwrap();
        assert!(cms.signer.signing_time.is_some());
    }

    #[test]
    fn test_field_names_increment() {
        let first = signer(SignConfig::default()).sign(&hello_pdf()).unwrap();
        let second = signer(SignConfig::default()).sign(&first.bytes).unwrap();
        assert_eq!(second.field_name, "Signature2");
    }

    #[test]
    fn test_duplicate_field_name_rejected() {
        let config = SignConfig::default().with_field_name("Approval");
        let first = signer(config.clone()).sign(&hello_pdf()).unwrap();
        assert!(signer(config).sign(&first.bytes).is_err());
    }

    #[test]
    fn test_reservation_grows_on_retry() {
        let config = SignConfig::default().with_estimated_size(64);
        let signed = signer(config).sign(&hello_pdf()).unwrap();
        assert_eq!(signed.attempts, 2);
        assert!(signed.reserved >= signed.container_len);
    }

    #[test]
    fn test_reservation_retry_is_bounded() {
        let mut config = SignConfig::default().with_estimated_size(64);
        config.max_reservation_attempts = 1;
        let err = signer(config).sign(&hello_pdf()).unwrap_err();
        assert!(err.is_reservation_too_small());
    }

    #[test]
    fn test_certification_writes_perms() {
        let config = SignConfig::default().with_certification(CertificationLevel::NoChangesAllowed);
        let signed = signer(config).sign(&hello_pdf()).unwrap();
        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        let cert = mdp::find_certification(&doc).unwrap().unwrap();
        assert_eq!(cert.permission, 1);
        assert_eq!(cert.revision, Some(1));
    }

    #[test]
    fn test_certify_over_stricter_lock_fails() {
        let strict = SignConfig::default().with_certification(CertificationLevel::FormFilling);
        let signed = signer(strict).sign(&hello_pdf()).unwrap();
        let loose = SignConfig::default().with_certification(CertificationLevel::FormFillingAndAnnotations);
        assert!(matches!(
            signer(loose).sign(&signed.bytes),
            Err(Error::CertificationLocked { existing: 2, requested: 3 })
        ));
    }

    #[test]
    fn test_plain_mode_carries_cert() {
        let config = SignConfig::default().with_sub_filter(SignatureSubFilter::X509RsaSha1);
        let signed = signer(config).sign(&hello_pdf()).unwrap();
        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        let info = &doc.signature_fields().unwrap()[0];
        let sig = doc.resolve(info.dict.get("V").unwrap()).unwrap();
        assert!(sig.as_dict().unwrap().contains_key("Cert"));
    }

    #[test]
    fn test_timestamp_embedded() {
        let responder = MockResponder::new();
        let tsa = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let config = SignConfig::default().with_timestamp(true);
        let signed = PdfSigner::new(TestPki::get().signer_identity(), config)
            .with_tsa(tsa)
            .sign(&hello_pdf())
            .unwrap();
        assert!(signed.timestamped);
    }

    #[test]
    fn test_optional_timestamp_failure_is_tolerated() {
        let config = SignConfig::default().with_timestamp(false);
        let signed = signer(config).sign(&hello_pdf()).unwrap();
        assert!(!signed.timestamped);
    }

    #[test]
    fn test_required_timestamp_failure_aborts() {
        let config = SignConfig::default().with_timestamp(true);
        assert!(matches!(signer(config).sign(&hello_pdf()), Err(Error::TimestampUnavailable(_))));
    }

    #[test]
    fn test_revocation_in_dss() {
        let responder = MockResponder::new();
        let config = SignConfig::default()
            .with_ocsp()
            .with_revocation_placement(RevocationPlacement::Dss)
            .with_network_retry(fast_retry());
        let signed = PdfSigner::new(TestPki::get().signer_identity(), config)
            .with_transport(&responder)
            .sign(&hello_pdf())
            .unwrap();
        assert!(signed.dss_added);
        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        assert_eq!(doc.revision_count(), 3);
    }

    #[test]
    fn test_document_timestamp() {
        let responder = MockResponder::new();
        let tsa = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let stamped = DocumentTimestamper::new(tsa).timestamp(&hello_pdf()).unwrap();
        assert_eq!(stamped.field_name, "Timestamp1");
        let doc = PdfDocument::from_bytes(stamped.bytes).unwrap();
        let info = &doc.signature_fields().unwrap()[0];
        let sig = doc.resolve(info.dict.get("V").unwrap()).unwrap();
        assert_eq!(sig.as_dict().unwrap().get("Type").unwrap().as_name(), Some("DocTimeStamp"));
    }

    #[test]
    fn test_sign_file_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("hello.pdf");
        let output = dir.path().join("signed.pdf");
        std::fs::write(&input, hello_pdf()).unwrap();
        let signed = signer(SignConfig::default()).sign_file(&input, &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), signed.bytes);
    }

    #[test]
    fn test_failed_sign_file_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("broken.pdf");
        let output = dir.path().join("signed.pdf");
        std::fs::write(&input, b"not a pdf").unwrap();
        assert!(signer(SignConfig::default()).sign_file(&input, &output).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_sign_batch() {
        let inputs = vec![hello_pdf(), hello_pdf(), b"garbage".to_vec()];
        let results = signer(SignConfig::default()).sign_batch(&inputs);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].is_err());
    }
}

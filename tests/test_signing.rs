//! Integration tests for incremental signing.

use pdf_ltv::signatures::{
    extract_signatures, verify_integrity, Check, CertificationLevel, DigestAlgorithm, KeyStore, LtvConfig, LtvValidator,
    MemoryKeyStore, PdfSigner, PemKeyStore, SignConfig, SignatureAppearance, SignatureSubFilter, TsaClient,
    VerificationStatus,
};
use pdf_ltv::testing::{fast_retry, hello_pdf, hello_pdf_xref_stream, MockResponder, TestPki, TSA_URL};
use pdf_ltv::{Error, PdfDocument};
use std::fs;
use tempfile::tempdir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn signer(config: SignConfig) -> PdfSigner<'static> {
    PdfSigner::new(TestPki::get().signer_identity(), config)
}

mod basic_signing_tests {
    use super::*;

    #[test]
    fn test_signed_file_keeps_original_prefix() {
        init_logging();
        let original = hello_pdf();
        let signed = signer(SignConfig::default()).sign(&original).unwrap();

        assert!(signed.bytes.starts_with(&original));
        assert_eq!(signed.field_name, "Signature1");
        assert_eq!(signed.attempts, 1);
        assert!(!signed.timestamped);

        let doc = PdfDocument::from_bytes(signed.bytes.clone()).unwrap();
        assert_eq!(doc.revision_count(), 2);
        assert_eq!(doc.revision_bytes(0).unwrap(), &original[..]);
    }

    #[test]
    fn test_byte_range_brackets_contents() {
        let signed = signer(SignConfig::default()).sign(&hello_pdf()).unwrap();
        let range = signed.byte_range;

        assert_eq!(range.offset1, 0);
        assert!(range.covers(signed.bytes.len()));
        assert_eq!(signed.bytes[range.length1], b'<');
        assert_eq!(signed.bytes[range.offset2 - 1], b'>');
        assert_eq!(range.gap().len(), signed.reserved * 2 + 2);
    }

    #[test]
    fn test_every_sub_filter_verifies() {
        for sub_filter in [
            SignatureSubFilter::Pkcs7Detached,
            SignatureSubFilter::CadesDetached,
            SignatureSubFilter::X509RsaSha1,
        ] {
            let config = SignConfig::default().with_sub_filter(sub_filter);
            let signed = signer(config).sign(&hello_pdf()).unwrap();

            let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
            let sigs = extract_signatures(&doc).unwrap();
            assert_eq!(sigs.len(), 1);
            assert_eq!(sigs[0].info.sub_filter, Some(sub_filter));

            let report = verify_integrity(&doc, &sigs[0]);
            assert_eq!(report.digest, Check::Pass, "{:?}: {:?}", sub_filter, report.findings);
            assert_eq!(report.signature, Check::Pass, "{:?}: {:?}", sub_filter, report.findings);
        }
    }

    #[test]
    fn test_digest_algorithms() {
        for digest in [DigestAlgorithm::Sha256, DigestAlgorithm::Sha384, DigestAlgorithm::Sha512] {
            let signed = signer(SignConfig::default().with_digest(digest)).sign(&hello_pdf()).unwrap();
            let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
            let sig = &extract_signatures(&doc).unwrap()[0];
            assert!(verify_integrity(&doc, sig).digest.is_pass(), "{:?}", digest);
        }
    }

    #[test]
    fn test_sign_xref_stream_document() {
        let signed = signer(SignConfig::default()).sign(&hello_pdf_xref_stream()).unwrap();
        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        assert!(doc.uses_xref_stream());
        let sig = &extract_signatures(&doc).unwrap()[0];
        assert_eq!(verify_integrity(&doc, sig).digest, Check::Pass);
    }

    #[test]
    fn test_signature_metadata() {
        let config = SignConfig::default()
            .with_reason("Approved")
            .with_location("Zurich")
            .with_contact_info("qa@example.test")
            .with_field_name("Approval");
        let signed = signer(config).sign(&hello_pdf()).unwrap();
        assert_eq!(signed.field_name, "Approval");

        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        let info = &extract_signatures(&doc).unwrap()[0].info;
        assert_eq!(info.field_name, "Approval");
        assert_eq!(info.reason.as_deref(), Some("Approved"));
        assert_eq!(info.location.as_deref(), Some("Zurich"));
        assert_eq!(info.contact_info.as_deref(), Some("qa@example.test"));
        assert!(info.claimed_time.is_some());
        assert!(info.covers_whole_document);
    }

    #[test]
    fn test_metadata_with_pdf_syntax_round_trips() {
        let fake_window = format!("/Contents <{}>", "0".repeat(64));
        let mut config = SignConfig::default()
            .with_reason("see /ByteRange [0 1 2 3] endobj")
            .with_contact_info(format!("see /Contents <00> for details, or {}", fake_window));
        config.name = Some("J. Doe >> endobj trailer".to_string());
        let signed = signer(config).sign(&hello_pdf()).unwrap();

        let doc = PdfDocument::from_bytes(signed.bytes.clone()).unwrap();
        let info = &extract_signatures(&doc).unwrap()[0].info;
        assert_eq!(info.reason.as_deref(), Some("see /ByteRange [0 1 2 3] endobj"));
        assert!(info.contact_info.as_deref().unwrap().ends_with(&fake_window));
        assert_eq!(info.signer_name.as_deref(), Some("J. Doe >> endobj trailer"));

        let validation = LtvValidator::new(LtvConfig::default())
            .with_trust_anchor(TestPki::get().root_cert.clone())
            .validate_bytes(&signed.bytes)
            .unwrap();
        let result = &validation.signatures[0];
        assert_eq!(result.digest, Check::Pass, "{:?}", result.findings);
        assert_eq!(result.signature, Check::Pass, "{:?}", result.findings);
        assert_ne!(result.status(), VerificationStatus::Invalid);
    }

    #[test]
    fn test_visible_signature_gets_widget_on_page() {
        let config = SignConfig::default().with_appearance(SignatureAppearance::new(0, [72.0, 72.0, 272.0, 132.0]));
        let signed = signer(config).sign(&hello_pdf()).unwrap();

        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        let (_, page) = doc.page(0).unwrap();
        let annots = doc.get_entry(&page, "Annots").unwrap().unwrap();
        assert_eq!(annots.as_array().map(|a| a.len()), Some(1));
    }
}

mod multiple_signature_tests {
    use super::*;

    #[test]
    fn test_second_signature_keeps_first_valid() {
        let first = signer(SignConfig::default()).sign(&hello_pdf()).unwrap();
        let second = signer(SignConfig::default()).sign(&first.bytes).unwrap();
        assert_eq!(second.field_name, "Signature2");
        assert!(second.bytes.starts_with(&first.bytes));

        let doc = PdfDocument::from_bytes(second.bytes).unwrap();
        let sigs = extract_signatures(&doc).unwrap();
        assert_eq!(sigs.len(), 2);
        assert!(!sigs[0].info.covers_whole_document);
        assert!(sigs[1].info.covers_whole_document);
        for sig in &sigs {
            assert_eq!(verify_integrity(&doc, sig).digest, Check::Pass, "{}", sig.info.field_name);
        }
    }

    #[test]
    fn test_duplicate_field_name_is_rejected() {
        let first = signer(SignConfig::default().with_field_name("Approval"))
            .sign(&hello_pdf())
            .unwrap();
        let err = signer(SignConfig::default().with_field_name("Approval"))
            .sign(&first.bytes)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)), "{:?}", err);
    }

    #[test]
    fn test_certify_again_is_locked() {
        let certified = signer(SignConfig::default().with_certification(CertificationLevel::FormFilling))
            .sign(&hello_pdf())
            .unwrap();
        let err = signer(SignConfig::default().with_certification(CertificationLevel::FormFillingAndAnnotations))
            .sign(&certified.bytes)
            .unwrap_err();
        assert!(matches!(err, Error::CertificationLocked { .. }), "{:?}", err);
    }

    #[test]
    fn test_batch_keeps_order() {
        let inputs = vec![hello_pdf(), b"not a pdf".to_vec(), hello_pdf_xref_stream()];
        let results = signer(SignConfig::default()).sign_batch(&inputs);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}

mod reservation_tests {
    use super::*;

    #[test]
    fn test_small_reservation_is_retried() {
        let config = SignConfig::default().with_estimated_size(64);
        let signed = signer(config).sign(&hello_pdf()).unwrap();
        assert!(signed.attempts >= 2);
        assert!(signed.reserved >= signed.container_len);

        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        let sig = &extract_signatures(&doc).unwrap()[0];
        assert_eq!(verify_integrity(&doc, sig).digest, Check::Pass);
    }

    #[test]
    fn test_reservation_attempts_are_bounded() {
        let mut config = SignConfig::default().with_estimated_size(64);
        config.max_reservation_attempts = 1;
        let err = signer(config).sign(&hello_pdf()).unwrap_err();
        assert!(matches!(err, Error::ReservationTooSmall { .. }), "{:?}", err);
    }
}

mod timestamp_tests {
    use super::*;

    #[test]
    fn test_signature_timestamp_is_embedded() {
        let responder = MockResponder::new();
        let tsa = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let config = SignConfig::default().with_timestamp(true).with_network_retry(fast_retry());
        let signed = PdfSigner::new(TestPki::get().signer_identity(), config)
            .with_tsa(tsa)
            .sign(&hello_pdf())
            .unwrap();
        assert!(signed.timestamped);

        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        let sig = &extract_signatures(&doc).unwrap()[0];
        let report = verify_integrity(&doc, sig);
        assert_eq!(report.timestamp, Check::Pass, "{:?}", report.findings);
        assert!(report.timestamp_token.is_some());
    }

    #[test]
    fn test_required_timestamp_fails_without_tsa_answer() {
        let responder = MockResponder::new().with_tsa_tampering();
        let tsa = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let config = SignConfig::default().with_timestamp(true).with_network_retry(fast_retry());
        let err = PdfSigner::new(TestPki::get().signer_identity(), config)
            .with_tsa(tsa)
            .sign(&hello_pdf())
            .unwrap_err();
        assert!(matches!(err, Error::TimestampUnavailable(_)), "{:?}", err);
    }

    #[test]
    fn test_optional_timestamp_degrades() {
        let responder = MockResponder::new().with_tsa_tampering();
        let tsa = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let mut config = SignConfig::default().with_timestamp(true).with_network_retry(fast_retry());
        config.timestamp_required = false;
        let signed = PdfSigner::new(TestPki::get().signer_identity(), config)
            .with_tsa(tsa)
            .sign(&hello_pdf())
            .unwrap();
        assert!(!signed.timestamped);
    }
}

mod file_and_store_tests {
    use super::*;

    #[test]
    fn test_sign_file_writes_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("hello.pdf");
        let output = dir.path().join("hello_signed.pdf");
        fs::write(&input, hello_pdf()).unwrap();

        let signed = signer(SignConfig::default()).sign_file(&input, &output).unwrap();
        let written = fs::read(&output).unwrap();
        assert_eq!(written, signed.bytes);
        // Input untouched
        assert_eq!(fs::read(&input).unwrap(), hello_pdf());
    }

    #[test]
    fn test_sign_file_failure_leaves_no_output() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("broken.pdf");
        let output = dir.path().join("broken_signed.pdf");
        fs::write(&input, b"%PDF-1.7\nnot really").unwrap();

        assert!(signer(SignConfig::default()).sign_file(&input, &output).is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_pem_store_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("signer.pem");
        fs::write(&path, TestPki::get().signer_pem_bundle()).unwrap();

        let identity = PemKeyStore::new().load_signer(path.to_str().unwrap(), "").unwrap();
        assert_eq!(identity.certificate().der(), TestPki::get().signer_cert.der());

        let signed = PdfSigner::new(identity, SignConfig::default()).sign(&hello_pdf()).unwrap();
        assert!(!signed.bytes.is_empty());
    }

    #[test]
    fn test_pem_store_missing_file() {
        let err = PemKeyStore::new().load_signer("/nonexistent/signer.pem", "").unwrap_err();
        assert!(matches!(err, Error::StoreError(_)));
    }

    #[test]
    fn test_memory_store_password() {
        let mut store = MemoryKeyStore::new();
        store.insert("signer", "secret", TestPki::get().signer_identity());
        assert!(store.load_signer("signer", "secret").is_ok());
        assert!(matches!(store.load_signer("signer", "wrong"), Err(Error::StoreError(_))));
        assert!(matches!(store.load_signer("other", "secret"), Err(Error::StoreError(_))));
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_sign_config_from_json() {
        let config = SignConfig::from_json(
            r#"{
                "digest_algorithm": "sha384",
                "sub_filter": "ETSI.CAdES.detached",
                "reason": "Approved",
                "include_ocsp": true
            }"#,
        )
        .unwrap();
        assert_eq!(config.digest_algorithm, DigestAlgorithm::Sha384);
        assert_eq!(config.sub_filter, SignatureSubFilter::CadesDetached);
        assert_eq!(config.reason.as_deref(), Some("Approved"));
        assert!(config.include_ocsp);
        assert_eq!(config.estimated_size, SignConfig::default().estimated_size);
    }

    #[test]
    fn test_sign_config_round_trip() {
        let config = SignConfig::default()
            .with_certification(CertificationLevel::FormFillingAndAnnotations)
            .with_reason("Checked");
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(SignConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(SignConfig::from_json("{ nope"), Err(Error::Config(_))));
    }
}

//! Integration tests for LTV extension and offline validation.

use chrono::{Duration, Utc};
use pdf_ltv::signatures::{
    extract_signatures, CertificateScope, Check, DssData, LtvConfig, LtvExtender, LtvValidator, PdfSigner,
    RevocationPlacement, SignConfig, SignatureSubFilter, TsaClient, ValidationState, VerificationStatus,
};
use pdf_ltv::testing::{fast_retry, hello_pdf, MockResponder, TestPki, UnreachableTransport, TSA_URL};
use pdf_ltv::PdfDocument;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn validator() -> LtvValidator {
    LtvValidator::new(LtvConfig::default()).with_trust_anchor(TestPki::get().root_cert.clone())
}

fn plain_signature() -> Vec<u8> {
    PdfSigner::new(TestPki::get().signer_identity(), SignConfig::default())
        .sign(&hello_pdf())
        .unwrap()
        .bytes
}

fn no_timestamp() -> LtvConfig {
    LtvConfig::default()
        .with_document_timestamp(false)
        .with_network_retry(fast_retry())
}

mod end_to_end_tests {
    use super::*;

    #[test]
    fn test_sign_timestamp_extend_validate() {
        init_logging();
        let responder = MockResponder::new();
        let tsa = TsaClient::new(&responder, TSA_URL).with_retry(fast_retry());
        let config = SignConfig::default()
            .with_sub_filter(SignatureSubFilter::CadesDetached)
            .with_timestamp(true)
            .with_network_retry(fast_retry());
        let signed = PdfSigner::new(TestPki::get().signer_identity(), config)
            .with_tsa(tsa.clone())
            .sign(&hello_pdf())
            .unwrap();
        assert!(signed.timestamped);

        let extended = LtvExtender::new(&responder, LtvConfig::default().with_network_retry(fast_retry()))
            .with_tsa(tsa)
            .extend(&signed.bytes)
            .unwrap();
        assert!(extended.timestamped);
        assert!(extended.undetermined.is_empty(), "{:?}", extended.undetermined);

        let doc = PdfDocument::from_bytes(extended.bytes).unwrap();
        // signature, DSS, document timestamp
        assert_eq!(doc.revision_count(), 4);

        let validation = validator().validate(&doc).unwrap();
        assert!(validation.has_dss);
        assert_eq!(validation.signatures.len(), 2);
        let result = validation.get(&signed.field_name).unwrap();
        assert_eq!(result.status(), VerificationStatus::Valid, "{:?}", result.findings);
        assert_eq!(result.state, ValidationState::Done);
        assert_eq!(result.timestamp, Check::Pass);
        assert!(validation.signatures[1].info.is_document_timestamp);
    }

    #[test]
    fn test_extended_dss_has_vri_for_signature() {
        let responder = MockResponder::new();
        let signed = plain_signature();
        let extended = LtvExtender::new(&responder, no_timestamp()).extend(&signed).unwrap();

        let doc = PdfDocument::from_bytes(extended.bytes).unwrap();
        let dss = DssData::read(&doc).unwrap().expect("DSS present");
        let sig = &extract_signatures(&doc).unwrap()[0];
        assert!(dss.has_vri(&sig.contents));
        assert_eq!(dss.vri_keys.len(), 1);
        assert!(!dss.ocsp_responses.is_empty());
        assert!(dss.certificates.len() >= 2);
    }

    #[test]
    fn test_extending_twice_keeps_one_vri_per_signature() {
        let responder = MockResponder::new();
        let once = LtvExtender::new(&responder, no_timestamp()).extend(&plain_signature()).unwrap();
        let twice = LtvExtender::new(&responder, no_timestamp()).extend(&once.bytes).unwrap();
        assert!(twice.bytes.starts_with(&once.bytes));

        let doc = PdfDocument::from_bytes(twice.bytes).unwrap();
        assert_eq!(DssData::read(&doc).unwrap().unwrap().vri_keys.len(), 1);
        assert!(validator().validate(&doc).unwrap().is_valid());
    }
}

mod revocation_source_tests {
    use super::*;

    #[test]
    fn test_crl_only_extension() {
        let responder = MockResponder::new().without_ocsp();
        let extended = LtvExtender::new(&responder, no_timestamp()).extend(&plain_signature()).unwrap();

        let doc = PdfDocument::from_bytes(extended.bytes).unwrap();
        let dss = DssData::read(&doc).unwrap().unwrap();
        assert!(dss.ocsp_responses.is_empty());
        assert_eq!(dss.crls.len(), 1);

        let result = &validator().validate(&doc).unwrap().signatures[0];
        assert_eq!(result.revocation_checked, Check::Pass, "{:?}", result.findings);
        assert_eq!(result.status(), VerificationStatus::Valid);
    }

    #[test]
    fn test_unreachable_responders_leave_revocation_undetermined() {
        let transport = UnreachableTransport;
        let extended = LtvExtender::new(&transport, no_timestamp()).extend(&plain_signature()).unwrap();
        assert_eq!(extended.signatures, 1);
        assert!(!extended.undetermined.is_empty());

        let result = &validator().validate_bytes(&extended.bytes).unwrap().signatures[0];
        assert_eq!(result.revocation_checked, Check::Undetermined);
        assert_eq!(result.status(), VerificationStatus::Unknown);
    }

    #[test]
    fn test_dss_placement_at_signing_time() {
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

        let validation = validator().validate_bytes(&signed.bytes).unwrap();
        assert!(validation.has_dss);
        assert_eq!(validation.status(), VerificationStatus::Valid);
    }

    #[test]
    fn test_signer_only_scope() {
        let responder = MockResponder::new();
        let config = no_timestamp().with_scope(CertificateScope::SigningCertificate);
        let extended = LtvExtender::new(&responder, config.clone()).extend(&plain_signature()).unwrap();

        let result = &LtvValidator::new(config)
            .with_trust_anchor(TestPki::get().root_cert.clone())
            .validate_bytes(&extended.bytes)
            .unwrap()
            .signatures[0];
        assert_eq!(result.revocation_checked, Check::Pass, "{:?}", result.findings);
    }

    #[test]
    fn test_revocation_after_signing_keeps_signature_valid() {
        let pki = TestPki::get();
        // Revoked long after the signature was made
        let responder = MockResponder::new().revoke(pki.signer_cert.serial().to_vec(), Utc::now() + Duration::days(30));
        let extended = LtvExtender::new(&responder, no_timestamp()).extend(&plain_signature()).unwrap();

        let result = &validator().validate_bytes(&extended.bytes).unwrap().signatures[0];
        assert_eq!(result.revocation_status, Check::Pass, "{:?}", result.findings);
    }
}

mod config_tests {
    use super::*;

    #[test]
    fn test_ltv_config_from_json() {
        let config = LtvConfig::from_json(
            r#"{
                "scope": "signing_certificate",
                "add_document_timestamp": false,
                "network_retry": { "max_attempts": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.scope, CertificateScope::SigningCertificate);
        assert!(!config.add_document_timestamp);
        assert_eq!(config.network_retry.max_attempts, 5);
        assert_eq!(config.network_retry.timeout_ms, 10_000);
        assert_eq!(config.clock_skew_secs, 300);
    }

    #[test]
    fn test_negative_skew_is_clamped() {
        let mut config = LtvConfig::default();
        config.clock_skew_secs = -10;
        assert_eq!(config.clock_skew(), Duration::zero());
    }
}

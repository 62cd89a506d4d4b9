//! Integration tests for document parsing: revisions, cross-reference
//! streams and compressed objects.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use pdf_ltv::object::{Object, ObjectRef};
use pdf_ltv::signatures::{extract_signatures, verify_integrity, Check, PdfSigner, SignConfig};
use pdf_ltv::testing::{hello_pdf, hello_pdf_xref_stream, TestPki};
use pdf_ltv::writer::IncrementalUpdate;
use pdf_ltv::PdfDocument;
use std::io::Write;

/// One-page document whose font dictionary lives in a compressed object
/// stream, indexed by a cross-reference stream.
fn object_stream_pdf() -> Vec<u8> {
    let content = "BT /F1 12 Tf 72 720 Td (Packed) Tj ET";
    let plain = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content),
    ];

    let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in plain.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }

    // Object 5 inside object stream 6
    let font = b"<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>";
    let header = b"5 0 ";
    let mut raw = header.to_vec();
    raw.extend_from_slice(font);
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).unwrap();
    let packed = encoder.finish().unwrap();

    let objstm_offset = out.len();
    out.extend_from_slice(
        format!(
            "6 0 obj\n<< /Type /ObjStm /N 1 /First {} /Filter /FlateDecode /Length {} >>\nstream\n",
            header.len(),
            packed.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&packed);
    out.extend_from_slice(b"\nendstream\nendobj\n");

    let xref_offset = out.len();
    let mut rows = vec![0u8, 0, 0, 0, 0, 0xFF, 0xFF];
    for offset in &offsets {
        rows.push(1);
        rows.extend_from_slice(&(*offset as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
    }
    // 5: compressed, stream 6, index 0
    rows.extend_from_slice(&[2, 0, 0, 0, 6, 0, 0]);
    for offset in [objstm_offset, xref_offset] {
        rows.push(1);
        rows.extend_from_slice(&(offset as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
    }
    out.extend_from_slice(
        format!(
            "7 0 obj\n<< /Type /XRef /Size 8 /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
            rows.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&rows);
    out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    out
}

mod parsing_tests {
    use super::*;

    #[test]
    fn test_hello_pdf() {
        let doc = PdfDocument::from_bytes(hello_pdf()).unwrap();
        assert_eq!(doc.version(), (1, 7));
        assert_eq!(doc.revision_count(), 1);
        assert!(!doc.uses_xref_stream());
        assert_eq!(doc.pages().unwrap().len(), 1);
        assert!(doc.fields().unwrap().is_empty());
        assert_eq!(doc.next_object_number(), 6);
    }

    #[test]
    fn test_xref_stream_pdf() {
        let doc = PdfDocument::from_bytes(hello_pdf_xref_stream()).unwrap();
        assert!(doc.uses_xref_stream());
        let (_, page) = doc.page(0).unwrap();
        assert_eq!(page.get("Type").and_then(|t| t.as_name()), Some("Page"));
    }

    #[test]
    fn test_compressed_object_is_resolved() {
        let doc = PdfDocument::from_bytes(object_stream_pdf()).unwrap();
        let font = doc.get_object(ObjectRef::new(5, 0)).unwrap();
        let font = font.as_dict().unwrap();
        assert_eq!(font.get("BaseFont").and_then(|f| f.as_name()), Some("Courier"));
    }

    #[test]
    fn test_missing_object_is_error() {
        let doc = PdfDocument::from_bytes(hello_pdf()).unwrap();
        assert!(doc.get_object(ObjectRef::new(99, 0)).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(PdfDocument::from_bytes(Vec::new()).is_err());
        assert!(PdfDocument::from_bytes(b"hello world".to_vec()).is_err());
        assert!(PdfDocument::from_bytes(b"%PDF-1.7\n1 0 obj\n<< >>\nendobj\n".to_vec()).is_err());
    }

    #[test]
    fn test_open_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.pdf");
        std::fs::write(&path, hello_pdf()).unwrap();
        let doc = PdfDocument::open(&path).unwrap();
        assert_eq!(doc.data(), &hello_pdf()[..]);
    }
}

mod revision_tests {
    use super::*;

    #[test]
    fn test_revisions_after_updates() {
        let original = hello_pdf();
        let doc = PdfDocument::from_bytes(original.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        let first = update.add_object(Object::Integer(1));
        let one = update.write().unwrap().bytes;

        let doc = PdfDocument::from_bytes(one.clone()).unwrap();
        let mut update = IncrementalUpdate::new(&doc);
        update.set_object(first, Object::Integer(2));
        let two = update.write().unwrap().bytes;

        let doc = PdfDocument::from_bytes(two.clone()).unwrap();
        assert_eq!(doc.revision_count(), 3);
        assert_eq!(doc.revision_end(0), Some(original.len()));
        assert_eq!(doc.revision_end(1), Some(one.len()));
        assert_eq!(doc.revision_ending_at(one.len()), Some(1));
        assert_eq!(doc.revision_bytes(1).unwrap(), &one[..]);

        // Each revision sees its own version of the object
        assert_eq!(doc.get_object(first).unwrap(), Object::Integer(2));
        assert_eq!(doc.revision(1).unwrap().get_object(first).unwrap(), Object::Integer(1));
        assert_eq!(doc.objects_in_revision(2), vec![first]);
    }

    #[test]
    fn test_sign_object_stream_document() {
        let signed = PdfSigner::new(TestPki::get().signer_identity(), SignConfig::default())
            .sign(&object_stream_pdf())
            .unwrap();
        let doc = PdfDocument::from_bytes(signed.bytes).unwrap();
        assert!(doc.uses_xref_stream());
        let sig = &extract_signatures(&doc).unwrap()[0];
        assert_eq!(verify_integrity(&doc, sig).digest, Check::Pass);
        // The packed font is still reachable through the new revision
        assert!(doc.get_object(ObjectRef::new(5, 0)).is_ok());
    }
}

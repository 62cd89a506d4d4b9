//! Test fixtures: small PDFs, an in-memory PKI and a mock responder.
//!
//! Everything here is deterministic apart from timestamps: keys come from
//! a seeded RNG and certificates are rebuilt identically on every run.
//! The PKI is generated once per process.

#[cfg(feature = "signatures")]
mod pki;

#[cfg(feature = "signatures")]
pub use pki::{fast_retry, MockResponder, TestPki, UnreachableTransport, CRL_URL, OCSP_URL, TSA_URL};

const HELLO_CONTENT: &str = "BT /F1 24 Tf 72 720 Td (Hello) Tj ET";

fn hello_objects() -> Vec<String> {
    vec![
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 5 0 R >> >> /Contents 4 0 R >>"
            .to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", HELLO_CONTENT.len(), HELLO_CONTENT),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ]
}

fn write_objects(out: &mut Vec<u8>, objects: &[String]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    offsets
}

/// One-page PDF 1.7 with a classic xref table. The page shows "Hello".
pub fn hello_pdf() -> Vec<u8> {
    let objects = hello_objects();
    let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let offsets = write_objects(&mut out, &objects);

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref_offset
        )
        .as_bytes(),
    );
    out
}

/// The same document with an unfiltered cross-reference stream.
pub fn hello_pdf_xref_stream() -> Vec<u8> {
    let objects = hello_objects();
    let mut out = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let offsets = write_objects(&mut out, &objects);

    let xref_id = objects.len() + 1;
    let xref_offset = out.len();
    let mut rows = vec![0u8, 0, 0, 0, 0, 0xFF, 0xFF];
    for offset in offsets.iter().chain(std::iter::once(&xref_offset)) {
        rows.push(1);
        rows.extend_from_slice(&(*offset as u32).to_be_bytes());
        rows.extend_from_slice(&[0, 0]);
    }
    out.extend_from_slice(
        format!(
            "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Root 1 0 R /Length {} >>\nstream\n",
            xref_id,
            xref_id + 1,
            rows.len()
        )
        .as_bytes(),
    );
    out.extend_from_slice(&rows);
    out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PdfDocument;

    #[test]
    fn test_fixtures_parse() {
        for data in [hello_pdf(), hello_pdf_xref_stream()] {
            let doc = PdfDocument::from_bytes(data).unwrap();
            assert_eq!(doc.pages().unwrap().len(), 1);
        }
    }
}

//! Document Security Store (PAdES LTV).
//!
//! ```text
//! Catalog
//!   /DSS << /Type /DSS
//!           /Certs [ stream ... ]  /OCSPs [ stream ... ]  /CRLs [ stream ... ]
//!           /VRI << /<SHA-1 of /Contents, upper hex> << /Cert [...] /OCSP [...] /CRL [...] /TU (date) >> >>
//!        >>
//!   /Extensions << /ADBE << /BaseVersion /1.7 /ExtensionLevel 5 >> >>
//! ```
//!
//! An update merges with whatever DSS the document already carries: existing
//! streams are referenced again, new data is only added when it is not
//! already present.

use super::certificate::Certificate;
use super::revocation::RevocationEvidence;
use super::types::DigestAlgorithm;
use crate::decoders::flate_encode;
use crate::document::PdfDocument;
use crate::error::Result;
use crate::object::{pdf_date, Dictionary, Object, ObjectRef};
use crate::writer::{IncrementalUpdate, ObjectSerializer};
use std::collections::BTreeMap;

/// VRI key for a signature: upper-case hex SHA-1 of its decoded `/Contents`
/// bytes, zero padding included.
pub fn vri_key(contents: &[u8]) -> String {
    hex::encode_upper(DigestAlgorithm::Sha1.digest(contents))
}

/// DSS content read from a document.
#[derive(Debug, Clone, Default)]
pub struct DssData {
    /// Certificates (`/Certs`)
    pub certificates: Vec<Certificate>,
    /// DER OCSP responses (`/OCSPs`)
    pub ocsp_responses: Vec<Vec<u8>>,
    /// DER CRLs (`/CRLs`)
    pub crls: Vec<Vec<u8>>,
    /// VRI dictionary keys
    pub vri_keys: Vec<String>,
}

impl DssData {
    /// Read the DSS of `doc`, if any. Unparsable certificates are skipped.
    pub fn read(doc: &PdfDocument) -> Result<Option<Self>> {
        let catalog = doc.catalog()?;
        let dss = match doc.get_entry(&catalog, "DSS")? {
            Some(Object::Dictionary(dss)) => dss,
            _ => return Ok(None),
        };

        let mut data = Self::default();
        for blob in stream_array(doc, &dss, "Certs")? {
            match Certificate::from_der(blob) {
                Ok(cert) => data.certificates.push(cert),
                Err(e) => log::warn!("Skipping DSS certificate: {}", e),
            }
        }
        data.ocsp_responses = stream_array(doc, &dss, "OCSPs")?;
        data.crls = stream_array(doc, &dss, "CRLs")?;
        if let Some(Object::Dictionary(vri)) = doc.get_entry(&dss, "VRI")? {
            data.vri_keys = vri.keys().cloned().collect();
            data.vri_keys.sort();
        }
        Ok(Some(data))
    }

    /// Revocation evidence stored in the DSS.
    pub fn evidence(&self) -> RevocationEvidence {
        RevocationEvidence::from_der(&self.ocsp_responses, &self.crls)
    }

    /// Whether a VRI entry exists for `contents`.
    pub fn has_vri(&self, contents: &[u8]) -> bool {
        let key = vri_key(contents);
        self.vri_keys.iter().any(|k| *k == key)
    }
}

fn stream_array(doc: &PdfDocument, dss: &Dictionary, key: &str) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    if let Some(Object::Array(items)) = doc.get_entry(dss, key)? {
        for item in &items {
            match doc.resolve(item) {
                Ok(stream @ Object::Stream { .. }) => out.push(stream.decode_stream_data()?),
                Ok(other) => log::warn!("DSS /{} entry is a {}", key, other.type_name()),
                Err(e) => log::warn!("DSS /{} entry unreadable: {}", key, e),
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Default)]
struct VriEntry {
    certs: Vec<usize>,
    ocsps: Vec<usize>,
    crls: Vec<usize>,
}

/// Collects certificates and revocation data and writes them as a DSS.
#[derive(Debug, Default)]
pub struct DssBuilder {
    certs: Vec<Vec<u8>>,
    ocsps: Vec<Vec<u8>>,
    crls: Vec<Vec<u8>>,
    vri: BTreeMap<String, VriEntry>,
}

fn intern(pool: &mut Vec<Vec<u8>>, blob: &[u8]) -> usize {
    match pool.iter().position(|b| b.as_slice() == blob) {
        Some(i) => i,
        None => {
            pool.push(blob.to_vec());
            pool.len() - 1
        },
    }
}

impl DssBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add data for the signature whose decoded `/Contents` is `contents`.
    pub fn add_signature(&mut self, contents: &[u8], certificates: &[Certificate], evidence: &RevocationEvidence) {
        let mut entry = VriEntry::default();
        for cert in certificates {
            entry.certs.push(intern(&mut self.certs, cert.der()));
        }
        for response in &evidence.ocsp {
            entry.ocsps.push(intern(&mut self.ocsps, response.der()));
        }
        for crl in &evidence.crls {
            entry.crls.push(intern(&mut self.crls, crl.der()));
        }
        self.vri.insert(vri_key(contents), entry);
    }

    /// Whether nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty() && self.ocsps.is_empty() && self.crls.is_empty() && self.vri.is_empty()
    }

    /// Add the DSS (merged with any existing one) and the ADBE extension to `update`.
    pub fn write(&self, update: &mut IncrementalUpdate<'_>) -> Result<()> {
        let doc = update.document();
        let mut catalog = update.catalog()?;

        let (dss_ref, mut dss) = match catalog.get("DSS").cloned() {
            Some(Object::Reference(r)) => (r, update.get_dict(r)?),
            Some(Object::Dictionary(d)) => (update.allocate(), d),
            _ => (update.allocate(), Dictionary::new()),
        };
        dss.insert("Type".to_string(), ObjectSerializer::name("DSS"));

        let certs = merge_streams(update, doc, &mut dss, "Certs", &self.certs)?;
        let ocsps = merge_streams(update, doc, &mut dss, "OCSPs", &self.ocsps)?;
        let crls = merge_streams(update, doc, &mut dss, "CRLs", &self.crls)?;

        let mut vri = match dss.get("VRI") {
            Some(obj) => match doc.resolve(obj)? {
                Object::Dictionary(d) => d,
                _ => Dictionary::new(),
            },
            None => Dictionary::new(),
        };
        let now = ObjectSerializer::string(&pdf_date(&chrono::Utc::now()));
        for (key, entry) in &self.vri {
            let refs = |pool: &[ObjectRef], idx: &[usize]| -> Object {
                Object::Array(idx.iter().map(|&i| Object::Reference(pool[i])).collect())
            };
            let mut item = vec![("Type", ObjectSerializer::name("VRI")), ("TU", now.clone())];
            if !entry.certs.is_empty() {
                item.push(("Cert", refs(&certs, &entry.certs)));
            }
            if !entry.ocsps.is_empty() {
                item.push(("OCSP", refs(&ocsps, &entry.ocsps)));
            }
            if !entry.crls.is_empty() {
                item.push(("CRL", refs(&crls, &entry.crls)));
            }
            vri.insert(key.clone(), ObjectSerializer::dict(item));
        }
        if !vri.is_empty() {
            dss.insert("VRI".to_string(), Object::Dictionary(vri));
        }

        update.set_object(dss_ref, Object::Dictionary(dss));
        catalog.insert("DSS".to_string(), Object::Reference(dss_ref));
        add_adbe_extension(&mut catalog);
        update.set_catalog(catalog)?;

        log::info!(
            "DSS update: {} cert(s), {} OCSP response(s), {} CRL(s), {} VRI entr(ies)",
            self.certs.len(),
            self.ocsps.len(),
            self.crls.len(),
            self.vri.len()
        );
        Ok(())
    }
}

/// Reuse streams already listed under `key`, add the missing ones, and
/// return a reference for every blob of `pool` in order.
fn merge_streams(
    update: &mut IncrementalUpdate<'_>,
    doc: &PdfDocument,
    dss: &mut Dictionary,
    key: &str,
    pool: &[Vec<u8>],
) -> Result<Vec<ObjectRef>> {
    let mut listed: Vec<Object> = match dss.get(key) {
        Some(obj) => match doc.resolve(obj)? {
            Object::Array(items) => items,
            _ => Vec::new(),
        },
        None => Vec::new(),
    };

    let mut existing: Vec<(ObjectRef, Vec<u8>)> = Vec::new();
    for item in &listed {
        if let Some(r) = item.as_reference() {
            if let Ok(data) = doc.get_object(r).and_then(|o| o.decode_stream_data()) {
                existing.push((r, data));
            }
        }
    }

    let mut refs = Vec::with_capacity(pool.len());
    for blob in pool {
        match existing.iter().find(|(_, data)| data == blob) {
            Some((r, _)) => refs.push(*r),
            None => {
                let mut dict = Dictionary::new();
                dict.insert("Filter".to_string(), ObjectSerializer::name("FlateDecode"));
                let stream = Object::Stream {
                    dict,
                    data: bytes::Bytes::from(flate_encode(blob)?),
                };
                let r = update.add_object(stream);
                listed.push(Object::Reference(r));
                existing.push((r, blob.clone()));
                refs.push(r);
            },
        }
    }

    if !listed.is_empty() {
        dss.insert(key.to_string(), Object::Array(listed));
    }
    Ok(refs)
}

/// Declare the Adobe extension level required by DSS and document timestamps.
pub fn add_adbe_extension(catalog: &mut Dictionary) {
    let mut extensions = match catalog.get("Extensions") {
        Some(Object::Dictionary(d)) => d.clone(),
        _ => Dictionary::new(),
    };
    let level = extensions
        .get("ADBE")
        .and_then(|o| o.as_dict())
        .and_then(|d| d.get("ExtensionLevel"))
        .and_then(|o| o.as_integer())
        .unwrap_or(0);
    if level < 5 {
        extensions.insert(
            "ADBE".to_string(),
            ObjectSerializer::dict(vec![
                ("BaseVersion", ObjectSerializer::name("1.7")),
                ("ExtensionLevel", ObjectSerializer::integer(5)),
            ]),
        );
    }
    catalog.insert("Extensions".to_string(), Object::Dictionary(extensions));
}

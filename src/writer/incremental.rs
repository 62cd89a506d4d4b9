//! Incremental updates.
//!
//! An incremental update appends new and replacement objects after the
//! existing `%%EOF`, followed by a cross-reference section that lists only
//! those objects and a trailer whose `/Prev` points at the previous section.
//! The original bytes are never touched, so every earlier revision remains
//! a byte-exact prefix of the output.
//!
//! ```text
//! <original bytes>%%EOF
//! 12 0 obj << ... >> endobj          <- new objects
//! 3 0 obj << ... >> endobj           <- replaced objects (same number)
//! xref                                <- or an xref stream if the
//! 0 1                                    previous section was one
//! 0000000000 65535 f
//! 3 1
//! ...
//! trailer << /Prev 1234 ... >>
//! startxref
//! %%EOF
//! ```

use super::object_serializer::{ObjectSerializer, ValueSpans};
use crate::decoders::flate_encode;
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::ops::Range;

/// Result of writing an incremental update.
#[derive(Debug, Clone)]
pub struct IncrementalOutput {
    /// The complete new file: original bytes followed by the update
    pub bytes: Vec<u8>,
    /// Absolute offset of each written object's `N G obj` line
    pub offsets: BTreeMap<u32, usize>,
    /// Where each written object landed, as reported by the serializer
    pub objects: BTreeMap<u32, WrittenObject>,
    /// Length of the original document (start of the appended section)
    pub base_len: usize,
}

/// Placement of one serialized object in the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenObject {
    /// `N G obj` through the line ending after `endobj`
    pub span: Range<usize>,
    /// Absolute spans of the top-level dictionary values
    pub values: ValueSpans,
}

impl IncrementalOutput {
    /// The serialized bytes of object `id`, from `N G obj` through `endobj`.
    pub fn object_bytes(&self, id: u32) -> Option<(usize, &[u8])> {
        let span = self.objects.get(&id)?.span.clone();
        Some((span.start, &self.bytes[span]))
    }

    /// Absolute span of the value stored under `key` in object `id`'s dictionary.
    pub fn value_span(&self, id: u32, key: &str) -> Option<Range<usize>> {
        self.objects.get(&id)?.values.get(key).cloned()
    }
}

/// Builder for one incremental update on top of a parsed document.
pub struct IncrementalUpdate<'a> {
    doc: &'a PdfDocument,
    next_id: u32,
    objects: BTreeMap<u32, (u16, Object)>,
    serializer: ObjectSerializer,
}

impl<'a> IncrementalUpdate<'a> {
    /// Start a new update for `doc`.
    pub fn new(doc: &'a PdfDocument) -> Self {
        Self {
            doc,
            next_id: doc.next_object_number(),
            objects: BTreeMap::new(),
            serializer: ObjectSerializer::new(),
        }
    }

    /// The document being updated.
    pub fn document(&self) -> &'a PdfDocument {
        self.doc
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let r = ObjectRef::new(self.next_id, 0);
        self.next_id += 1;
        r
    }

    /// Add a new object and return its reference.
    pub fn add_object(&mut self, obj: Object) -> ObjectRef {
        let r = self.allocate();
        self.objects.insert(r.id, (r.gen, obj));
        r
    }

    /// Set the content of an allocated or existing object.
    pub fn set_object(&mut self, r: ObjectRef, obj: Object) {
        self.objects.insert(r.id, (r.gen, obj));
    }

    /// Whether the update contains an object numbered `id`.
    pub fn contains(&self, id: u32) -> bool {
        self.objects.contains_key(&id)
    }

    /// Current content of an object: the pending version if this update
    /// touches it, otherwise the document's.
    pub fn get_object(&self, r: ObjectRef) -> Result<Object> {
        match self.objects.get(&r.id) {
            Some((_, obj)) => Ok(obj.clone()),
            None => self.doc.get_object(r),
        }
    }

    /// Current dictionary content of an object.
    pub fn get_dict(&self, r: ObjectRef) -> Result<Dictionary> {
        let obj = self.get_object(r)?;
        obj.as_dict().cloned().ok_or_else(|| Error::InvalidObjectType {
            expected: "Dictionary".to_string(),
            found: obj.type_name().to_string(),
        })
    }

    /// Reference to the catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.doc.catalog_ref()
    }

    /// Current catalog dictionary, including pending changes.
    pub fn catalog(&self) -> Result<Dictionary> {
        self.get_dict(self.catalog_ref()?)
    }

    /// Replace the catalog.
    pub fn set_catalog(&mut self, catalog: Dictionary) -> Result<()> {
        let r = self.catalog_ref()?;
        self.set_object(r, Object::Dictionary(catalog));
        Ok(())
    }

    /// Append `annot` to a page's `/Annots`, updating an indirect array in place.
    pub fn add_page_annotation(&mut self, page_ref: ObjectRef, annot: ObjectRef) -> Result<()> {
        let mut page = self.get_dict(page_ref)?;
        match page.get("Annots").cloned() {
            Some(Object::Reference(arr_ref)) => {
                let mut arr = match self.get_object(arr_ref)? {
                    Object::Array(arr) => arr,
                    _ => Vec::new(),
                };
                arr.push(Object::Reference(annot));
                self.set_object(arr_ref, Object::Array(arr));
            },
            Some(Object::Array(mut arr)) => {
                arr.push(Object::Reference(annot));
                page.insert("Annots".to_string(), Object::Array(arr));
                self.set_object(page_ref, Object::Dictionary(page));
            },
            _ => {
                page.insert("Annots".to_string(), Object::Array(vec![Object::Reference(annot)]));
                self.set_object(page_ref, Object::Dictionary(page));
            },
        }
        Ok(())
    }

    /// Register a field in the AcroForm, creating the form if needed and
    /// OR-ing `sig_flags` into `/SigFlags` when non-zero.
    pub fn add_form_field(&mut self, field: ObjectRef, sig_flags: i64) -> Result<()> {
        let mut catalog = self.catalog()?;
        let (form_ref, mut form) = match catalog.get("AcroForm").cloned() {
            Some(Object::Reference(r)) => (Some(r), self.get_dict(r)?),
            Some(Object::Dictionary(d)) => (None, d),
            _ => (None, Dictionary::new()),
        };

        match form.get("Fields").cloned() {
            Some(Object::Reference(arr_ref)) => {
                let mut arr = match self.get_object(arr_ref)? {
                    Object::Array(arr) => arr,
                    _ => Vec::new(),
                };
                arr.push(Object::Reference(field));
                self.set_object(arr_ref, Object::Array(arr));
            },
            Some(Object::Array(mut arr)) => {
                arr.push(Object::Reference(field));
                form.insert("Fields".to_string(), Object::Array(arr));
            },
            _ => {
                form.insert("Fields".to_string(), Object::Array(vec![Object::Reference(field)]));
            },
        }

        if sig_flags != 0 {
            let existing = form.get("SigFlags").and_then(|o| o.as_integer()).unwrap_or(0);
            form.insert("SigFlags".to_string(), Object::Integer(existing | sig_flags));
        }

        match form_ref {
            Some(r) => self.set_object(r, Object::Dictionary(form)),
            None => {
                let r = self.add_object(Object::Dictionary(form));
                catalog.insert("AcroForm".to_string(), Object::Reference(r));
                self.set_catalog(catalog)?;
            },
        }
        Ok(())
    }

    /// Serialize the update and append it to the document bytes.
    pub fn write(mut self) -> Result<IncrementalOutput> {
        if self.objects.is_empty() {
            return Err(Error::Unsupported("empty incremental update".to_string()));
        }

        let base = self.doc.data();
        let mut bytes = Vec::with_capacity(base.len() + 4096);
        bytes.extend_from_slice(base);
        if !matches!(bytes.last(), Some(b'\n') | Some(b'\r')) {
            bytes.push(b'\n');
        }

        let use_stream = self.doc.uses_xref_stream();
        let xref_stream_ref = if use_stream { Some(self.allocate()) } else { None };

        let mut offsets = BTreeMap::new();
        let mut written = BTreeMap::new();
        for (id, (gen, obj)) in &self.objects {
            let start = bytes.len();
            let (serialized, values) = self.serializer.serialize_indirect_tracked(*id, *gen, obj);
            bytes.extend_from_slice(&serialized);
            offsets.insert(*id, start);
            written.insert(
                *id,
                WrittenObject {
                    span: start..bytes.len(),
                    values: values
                        .into_iter()
                        .map(|(key, span)| (key, start + span.start..start + span.end))
                        .collect(),
                },
            );
        }

        let size = self.next_id.max(self.doc.next_object_number());
        let mut trailer = Dictionary::new();
        trailer.insert("Size".to_string(), Object::Integer(size as i64));
        trailer.insert("Prev".to_string(), Object::Integer(self.doc.startxref() as i64));
        for key in ["Root", "Info"] {
            if let Some(value) = self.doc.trailer().get(key) {
                trailer.insert(key.to_string(), value.clone());
            }
        }
        trailer.insert("ID".to_string(), self.document_id(&bytes));

        let xref_offset = bytes.len();
        match xref_stream_ref {
            Some(stream_ref) => {
                offsets.insert(stream_ref.id, xref_offset);
                let stream = build_xref_stream(&offsets, &self.objects, stream_ref, trailer)?;
                bytes.extend_from_slice(&self.serializer.serialize_indirect(stream_ref.id, 0, &stream));
            },
            None => {
                bytes.extend_from_slice(&build_xref_table(&offsets, &self.objects));
                bytes.extend_from_slice(b"trailer\n");
                bytes.extend_from_slice(&self.serializer.serialize(&Object::Dictionary(trailer)));
                bytes.push(b'\n');
            },
        }
        bytes.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());

        log::debug!(
            "Incremental update: {} object(s), {} bytes appended, xref {} at {}",
            self.objects.len(),
            bytes.len() - base.len(),
            if use_stream { "stream" } else { "table" },
            xref_offset
        );

        Ok(IncrementalOutput {
            bytes,
            offsets,
            objects: written,
            base_len: base.len(),
        })
    }

    /// Keep the permanent identifier, derive a fresh changing identifier.
    fn document_id(&self, content: &[u8]) -> Object {
        let fresh = Sha256::digest(content)[..16].to_vec();
        let permanent = self
            .doc
            .trailer()
            .get("ID")
            .and_then(|o| o.as_array())
            .and_then(|arr| arr.first())
            .and_then(|o| o.as_string())
            .map(|s| s.to_vec())
            .unwrap_or_else(|| fresh.clone());
        Object::Array(vec![Object::String(permanent), Object::String(fresh)])
    }
}

/// Group object numbers into contiguous subsections.
fn subsections(ids: &[u32]) -> Vec<(u32, Vec<u32>)> {
    let mut groups: Vec<(u32, Vec<u32>)> = Vec::new();
    for &id in ids {
        match groups.last_mut() {
            Some((start, members)) if *start + members.len() as u32 == id => members.push(id),
            _ => groups.push((id, vec![id])),
        }
    }
    groups
}

fn build_xref_table(offsets: &BTreeMap<u32, usize>, objects: &BTreeMap<u32, (u16, Object)>) -> Vec<u8> {
    let mut ids = vec![0];
    ids.extend(offsets.keys().copied().filter(|&id| id != 0));

    let mut out = b"xref\n".to_vec();
    for (start, members) in subsections(&ids) {
        out.extend_from_slice(format!("{} {}\n", start, members.len()).as_bytes());
        for id in members {
            if id == 0 {
                out.extend_from_slice(b"0000000000 65535 f\r\n");
            } else {
                let gen = objects.get(&id).map(|(g, _)| *g).unwrap_or(0);
                out.extend_from_slice(format!("{:010} {:05} n\r\n", offsets[&id], gen).as_bytes());
            }
        }
    }
    out
}

fn build_xref_stream(
    offsets: &BTreeMap<u32, usize>,
    objects: &BTreeMap<u32, (u16, Object)>,
    stream_ref: ObjectRef,
    mut dict: Dictionary,
) -> Result<Object> {
    let ids: Vec<u32> = offsets.keys().copied().collect();
    let mut rows = Vec::with_capacity(ids.len() * 7);
    let mut index = Vec::new();

    for (start, members) in subsections(&ids) {
        index.push(Object::Integer(start as i64));
        index.push(Object::Integer(members.len() as i64));
        for id in members {
            let offset = u32::try_from(offsets[&id])
                .map_err(|_| Error::Unsupported("xref stream offsets beyond 4 GiB".to_string()))?;
            let gen = if id == stream_ref.id { 0 } else { objects.get(&id).map(|(g, _)| *g).unwrap_or(0) };
            rows.push(1u8);
            rows.extend_from_slice(&offset.to_be_bytes());
            rows.extend_from_slice(&gen.to_be_bytes());
        }
    }

    dict.insert("Type".to_string(), Object::Name("XRef".to_string()));
    dict.insert(
        "W".to_string(),
        Object::Array(vec![Object::Integer(1), Object::Integer(4), Object::Integer(2)]),
    );
    dict.insert("Index".to_string(), Object::Array(index));
    dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));

    Ok(Object::Stream {
        dict,
        data: bytes::Bytes::from(flate_encode(&rows)?),
    })
}

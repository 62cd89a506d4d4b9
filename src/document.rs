//! PDF document model.
//!
//! A [`PdfDocument`] owns the raw bytes of a file and the cross-reference
//! sections of every revision. Objects are loaded lazily from the newest
//! section that declares them. Earlier revisions stay reachable: the file
//! prefix ending after each revision's `%%EOF` marker is itself a complete
//! PDF and can be reopened with [`PdfDocument::revision`].

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_object;
use crate::xref::{find_startxref, parse_xref_chain, XRefEntry, XRefEntryType, XRefSection};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

/// Maximum recursion depth for reference resolution and tree walks.
const MAX_RECURSION_DEPTH: u32 = 100;

/// An interactive form field, with inherited attributes resolved.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Reference to the field dictionary
    pub reference: ObjectRef,
    /// Fully qualified field name (partial names joined with '.')
    pub name: String,
    /// Field type (`/FT`), possibly inherited from an ancestor
    pub field_type: Option<String>,
    /// The field dictionary
    pub dict: Dictionary,
}

impl FieldInfo {
    /// Whether this is a signature field.
    pub fn is_signature(&self) -> bool {
        self.field_type.as_deref() == Some("Sig")
    }
}

/// PDF document.
///
/// # Example
///
/// ```no_run
/// use pdf_ltv::document::PdfDocument;
///
/// let doc = PdfDocument::open("signed.pdf")?;
/// println!("PDF {}.{}, {} revision(s)", doc.version().0, doc.version().1, doc.revision_count());
/// # Ok::<(), pdf_ltv::error::Error>(())
/// ```
pub struct PdfDocument {
    data: Vec<u8>,
    version: (u8, u8),
    /// Sections oldest first
    sections: Vec<XRefSection>,
    /// End offset (exclusive) of each revision, parallel to `sections`
    revision_ends: Vec<usize>,
    /// Merged view, newest entry wins
    xref: BTreeMap<u32, XRefEntry>,
    /// Newest trailer
    trailer: Dictionary,
    /// Parsed object streams by stream object number
    objstm_cache: RefCell<HashMap<u32, HashMap<u32, Object>>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("version", &self.version)
            .field("len", &self.data.len())
            .field("revisions", &self.sections.len())
            .field("xref_entries", &self.xref.len())
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Open a PDF document from a file path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Parse a PDF document held in memory.
    ///
    /// Fails with [`Error::CorruptDocument`] when the header, the `startxref`
    /// pointer or any section of the `/Prev` chain cannot be read.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Result<Self> {
        let data = data.into();
        let version = parse_header(&data)?;

        let start = find_startxref(&data)
            .map_err(|_| Error::CorruptDocument("missing or invalid startxref".to_string()))?;
        let mut sections = parse_xref_chain(&data, start).map_err(|e| {
            Error::CorruptDocument(format!("unreadable cross-reference chain: {}", e))
        })?;
        sections.reverse();

        let trailer = match sections.last() {
            Some(newest) if newest.trailer.contains_key("Root") => newest.trailer.clone(),
            _ => return Err(Error::CorruptDocument("trailer has no /Root".to_string())),
        };

        let revision_ends = compute_revision_ends(&data, &sections);

        let mut xref = BTreeMap::new();
        for section in &sections {
            for (id, entry) in &section.entries {
                xref.insert(*id, entry.clone());
            }
        }

        log::debug!(
            "Opened PDF {}.{}: {} bytes, {} revision(s), {} xref entries",
            version.0,
            version.1,
            data.len(),
            sections.len(),
            xref.len()
        );

        Ok(Self {
            data,
            version,
            sections,
            revision_ends,
            xref,
            trailer,
            objstm_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Raw bytes of the whole file.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// PDF version (major, minor) from the header.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Number of revisions (cross-reference sections in the `/Prev` chain).
    pub fn revision_count(&self) -> usize {
        self.sections.len()
    }

    /// Exact bytes of revision `index` (0 is the oldest).
    pub fn revision_bytes(&self, index: usize) -> Result<&[u8]> {
        let end = *self.revision_ends.get(index).ok_or_else(|| {
            Error::CorruptDocument(format!("revision {} does not exist", index))
        })?;
        Ok(&self.data[..end])
    }

    /// End offset (exclusive) of revision `index`.
    pub fn revision_end(&self, index: usize) -> Option<usize> {
        self.revision_ends.get(index).copied()
    }

    /// Reopen revision `index` as a standalone document.
    pub fn revision(&self, index: usize) -> Result<PdfDocument> {
        PdfDocument::from_bytes(self.revision_bytes(index)?.to_vec())
    }

    /// Index of the revision ending exactly at `end`, if any.
    pub fn revision_ending_at(&self, end: usize) -> Option<usize> {
        self.revision_ends.iter().position(|&e| e == end)
    }

    /// Cross-reference section of revision `index`.
    pub fn section(&self, index: usize) -> Option<&XRefSection> {
        self.sections.get(index)
    }

    /// The newest trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> u64 {
        self.sections.last().map(|s| s.offset).unwrap_or(0)
    }

    /// Whether the newest section is a cross-reference stream.
    pub fn uses_xref_stream(&self) -> bool {
        self.sections.last().is_some_and(|s| s.is_stream())
    }

    /// First object number not used by any revision.
    pub fn next_object_number(&self) -> u32 {
        let declared = self.sections.iter().map(|s| s.size()).max().unwrap_or(0);
        let used = self.xref.keys().next_back().map(|id| id + 1).unwrap_or(1);
        declared.max(used).max(1)
    }

    /// Generation number of the newest entry for `id`.
    pub fn generation_of(&self, id: u32) -> u16 {
        match self.xref.get(&id) {
            Some(entry) if entry.entry_type == XRefEntryType::Uncompressed => entry.generation,
            _ => 0,
        }
    }

    /// Load an indirect object.
    pub fn get_object(&self, obj_ref: ObjectRef) -> Result<Object> {
        let entry = self
            .xref
            .get(&obj_ref.id)
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        match entry.entry_type {
            XRefEntryType::Free => Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
            XRefEntryType::Uncompressed => {
                let offset = entry.offset as usize;
                if offset >= self.data.len() {
                    return Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen));
                }
                let (found, obj) = parse_indirect_object(&self.data[offset..], offset)?;
                if found.id != obj_ref.id {
                    log::warn!("xref entry for {} points at object {}", obj_ref, found);
                }
                Ok(obj)
            },
            XRefEntryType::Compressed => {
                let stream_id = entry.offset as u32;
                if let Some(obj) = self
                    .objstm_cache
                    .borrow()
                    .get(&stream_id)
                    .and_then(|objects| objects.get(&obj_ref.id))
                {
                    return Ok(obj.clone());
                }

                let stream = self.get_object(ObjectRef::new(stream_id, 0))?;
                let objects = parse_object_stream(&stream)?;
                let obj = objects
                    .get(&obj_ref.id)
                    .cloned()
                    .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;
                self.objstm_cache.borrow_mut().insert(stream_id, objects);
                Ok(obj)
            },
        }
    }

    /// Follow references until a direct object is reached.
    pub fn resolve(&self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        let mut depth = 0;
        while let Object::Reference(r) = current {
            depth += 1;
            if depth > MAX_RECURSION_DEPTH {
                return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
            }
            current = self.get_object(r)?;
        }
        Ok(current)
    }

    /// Resolve `dict[key]`, returning `None` when the key is absent.
    pub fn get_entry(&self, dict: &Dictionary, key: &str) -> Result<Option<Object>> {
        match dict.get(key) {
            Some(obj) => self.resolve(obj).map(Some),
            None => Ok(None),
        }
    }

    /// Reference to the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::CorruptDocument("trailer /Root is not a reference".to_string()))
    }

    /// The document catalog.
    pub fn catalog(&self) -> Result<Dictionary> {
        let catalog = self.get_object(self.catalog_ref()?)?;
        catalog
            .as_dict()
            .cloned()
            .ok_or_else(|| Error::CorruptDocument("catalog is not a dictionary".to_string()))
    }

    /// All pages in document order.
    pub fn pages(&self) -> Result<Vec<(ObjectRef, Dictionary)>> {
        let catalog = self.catalog()?;
        let root = catalog
            .get("Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::CorruptDocument("catalog has no /Pages".to_string()))?;

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(root, &mut pages, &mut visited, 0)?;
        Ok(pages)
    }

    fn collect_pages(
        &self,
        node_ref: ObjectRef,
        pages: &mut Vec<(ObjectRef, Dictionary)>,
        visited: &mut HashSet<ObjectRef>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
        }
        if !visited.insert(node_ref) {
            log::warn!("Page tree cycle at {}", node_ref);
            return Ok(());
        }

        let node = self.get_object(node_ref)?;
        let dict = node
            .as_dict()
            .ok_or_else(|| Error::CorruptDocument(format!("page tree node {} is not a dictionary", node_ref)))?;

        match dict.get("Kids").and_then(|o| o.as_array()) {
            Some(kids) if node.dict_type() != Some("Page") => {
                for kid in kids.iter().filter_map(|k| k.as_reference()) {
                    self.collect_pages(kid, pages, visited, depth + 1)?;
                }
            },
            _ => pages.push((node_ref, dict.clone())),
        }
        Ok(())
    }

    /// The page at `index` (0-based).
    pub fn page(&self, index: usize) -> Result<(ObjectRef, Dictionary)> {
        let mut pages = self.pages()?;
        if index >= pages.len() {
            return Err(Error::CorruptDocument(format!(
                "page {} out of range (document has {})",
                index,
                pages.len()
            )));
        }
        Ok(pages.swap_remove(index))
    }

    /// The interactive form dictionary, with its reference when it is indirect.
    pub fn acroform(&self) -> Result<Option<(Option<ObjectRef>, Dictionary)>> {
        let catalog = self.catalog()?;
        match catalog.get("AcroForm") {
            Some(Object::Reference(r)) => {
                let form = self.get_object(*r)?;
                Ok(form.as_dict().cloned().map(|d| (Some(*r), d)))
            },
            Some(Object::Dictionary(d)) => Ok(Some((None, d.clone()))),
            _ => Ok(None),
        }
    }

    /// All terminal form fields, with inherited field types resolved.
    pub fn fields(&self) -> Result<Vec<FieldInfo>> {
        let form = match self.acroform()? {
            Some((_, form)) => form,
            None => return Ok(Vec::new()),
        };
        let roots = match self.get_entry(&form, "Fields")? {
            Some(Object::Array(arr)) => arr,
            _ => return Ok(Vec::new()),
        };

        let mut fields = Vec::new();
        let mut visited = HashSet::new();
        for root in roots.iter().filter_map(|o| o.as_reference()) {
            self.collect_fields(root, "", None, &mut fields, &mut visited, 0)?;
        }
        Ok(fields)
    }

    fn collect_fields(
        &self,
        field_ref: ObjectRef,
        parent_name: &str,
        inherited_type: Option<String>,
        fields: &mut Vec<FieldInfo>,
        visited: &mut HashSet<ObjectRef>,
        depth: u32,
    ) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
        }
        if !visited.insert(field_ref) {
            return Ok(());
        }

        let obj = self.get_object(field_ref)?;
        let dict = match obj.as_dict() {
            Some(d) => d.clone(),
            None => return Ok(()),
        };

        let partial = dict.get("T").and_then(|o| o.as_text());
        let name = match (&partial, parent_name.is_empty()) {
            (Some(t), true) => t.clone(),
            (Some(t), false) => format!("{}.{}", parent_name, t),
            (None, _) => parent_name.to_string(),
        };
        let field_type = dict
            .get("FT")
            .and_then(|o| o.as_name())
            .map(|s| s.to_string())
            .or(inherited_type);

        // Kids with a /T are child fields; kids without are widget annotations
        let child_fields: Vec<ObjectRef> = match self.get_entry(&dict, "Kids")? {
            Some(Object::Array(kids)) => kids
                .iter()
                .filter_map(|k| k.as_reference())
                .filter(|k| {
                    self.get_object(*k)
                        .ok()
                        .and_then(|o| o.as_dict().map(|d| d.contains_key("T")))
                        .unwrap_or(false)
                })
                .collect(),
            _ => Vec::new(),
        };

        if child_fields.is_empty() {
            fields.push(FieldInfo {
                reference: field_ref,
                name,
                field_type,
                dict,
            });
        } else {
            for kid in child_fields {
                self.collect_fields(kid, &name, field_type.clone(), fields, visited, depth + 1)?;
            }
        }
        Ok(())
    }

    /// Signature fields, in field-tree order.
    pub fn signature_fields(&self) -> Result<Vec<FieldInfo>> {
        Ok(self.fields()?.into_iter().filter(|f| f.is_signature()).collect())
    }

    /// Object numbers declared in use by revision `index`'s own section.
    pub fn objects_in_revision(&self, index: usize) -> Vec<ObjectRef> {
        self.sections
            .get(index)
            .map(|section| {
                section
                    .entries
                    .iter()
                    .filter(|(_, e)| e.in_use())
                    .map(|(id, e)| {
                        let gen = if e.entry_type == XRefEntryType::Uncompressed { e.generation } else { 0 };
                        ObjectRef::new(*id, gen)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Object number of the cross-reference stream of revision `index`, if any.
    pub fn xref_stream_id(&self, index: usize) -> Option<u32> {
        self.sections.get(index).and_then(|s| s.stream_id)
    }
}

/// Parse the `%PDF-x.y` header within the first kilobyte.
fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| {
            let found = String::from_utf8_lossy(&data[..data.len().min(8)]).into_owned();
            Error::InvalidHeader(found)
        })?;

    let version = &window[pos + 5..];
    let digit = |i: usize| version.get(i).filter(|c| c.is_ascii_digit()).map(|c| c - b'0');
    match (digit(0), version.get(1), digit(2)) {
        (Some(major), Some(b'.'), Some(minor)) => Ok((major, minor)),
        _ => Err(Error::InvalidHeader(
            String::from_utf8_lossy(&version[..version.len().min(8)]).into_owned(),
        )),
    }
}

/// End of each revision: just past the first `%%EOF` (and its end-of-line)
/// that follows the revision's cross-reference section.
fn compute_revision_ends(data: &[u8], sections: &[XRefSection]) -> Vec<usize> {
    let marker = b"%%EOF";
    let count = sections.len();
    sections
        .iter()
        .enumerate()
        .map(|(i, section)| {
            let from = (section.offset as usize).min(data.len());
            let found = data[from..]
                .windows(marker.len())
                .position(|w| w == marker)
                .map(|p| from + p + marker.len());
            match found {
                Some(mut end) => {
                    if data[end..].starts_with(b"\r\n") {
                        end += 2;
                    } else if data[end..].starts_with(b"\n") || data[end..].starts_with(b"\r") {
                        end += 1;
                    }
                    end
                },
                None if i + 1 == count => data.len(),
                None => {
                    log::warn!("No %%EOF after xref section at {}", section.offset);
                    data.len()
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hello_pdf, hello_pdf_xref_stream};

    #[test]
    fn test_open_hello() {
        let doc = PdfDocument::from_bytes(hello_pdf()).unwrap();
        assert_eq!(doc.version(), (1, 7));
        assert_eq!(doc.revision_count(), 1);
        assert_eq!(doc.pages().unwrap().len(), 1);
        assert_eq!(doc.revision_bytes(0).unwrap(), &hello_pdf()[..]);
        assert!(doc.signature_fields().unwrap().is_empty());
        assert!(!doc.uses_xref_stream());
    }

    #[test]
    fn test_open_xref_stream_variant() {
        let doc = PdfDocument::from_bytes(hello_pdf_xref_stream()).unwrap();
        assert!(doc.uses_xref_stream());
        assert_eq!(doc.pages().unwrap().len(), 1);
        assert_eq!(doc.catalog().unwrap().get("Type").unwrap().as_name(), Some("Catalog"));
    }

    #[test]
    fn test_invalid_header() {
        assert!(matches!(PdfDocument::from_bytes(b"GIF89a".to_vec()), Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_truncated_is_corrupt() {
        let mut data = hello_pdf();
        let cut = data.len() - 40;
        data.truncate(cut);
        assert!(matches!(PdfDocument::from_bytes(data), Err(Error::CorruptDocument(_))));
    }

    #[test]
    fn test_revision_out_of_range() {
        let doc = PdfDocument::from_bytes(hello_pdf()).unwrap();
        assert!(doc.revision_bytes(3).is_err());
    }

    #[test]
    fn test_next_object_number() {
        let doc = PdfDocument::from_bytes(hello_pdf()).unwrap();
        assert!(doc.next_object_number() >= 5);
    }
}

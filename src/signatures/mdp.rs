//! DocMDP certification: finding the lock and checking later revisions against it.
//!
//! Every revision after the certifying one is diffed object by object
//! against the revision before it. Each changed object is classified and
//! the class decides the lowest `/P` value under which it is allowed:
//!
//! | change                                  | allowed at |
//! |-----------------------------------------|------------|
//! | DSS, document timestamp                 | P >= 1     |
//! | signing, form filling, appearances      | P >= 2     |
//! | annotations                             | P = 3      |
//! | anything else                           | never      |

use super::byterange::ByteRange;
use super::types::{CertificationLevel, Finding};
use crate::document::PdfDocument;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use std::collections::HashSet;
use std::fmt;

/// Catalog keys a DSS update may touch.
const DSS_CATALOG_KEYS: &[&str] = &["DSS", "Extensions"];

/// Keys of a field or widget that form filling may change.
const FORM_FILL_KEYS: &[&str] = &["V", "AS", "AP", "MK"];

const MAX_DEPTH: u32 = 32;

/// What a changed object amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// Document Security Store content
    Dss,
    /// A document timestamp and its field
    DocumentTimestamp,
    /// A signature, its field and widget
    Signing,
    /// Field values
    FormFill,
    /// Widget appearance streams
    Appearance,
    /// Annotation creation, change or removal
    Annotation,
    /// Anything not permitted under a lock
    Other(String),
}

impl ChangeKind {
    /// Lowest DocMDP permission allowing this change, `None` when never allowed.
    pub fn required_permission(&self) -> Option<u8> {
        match self {
            ChangeKind::Dss | ChangeKind::DocumentTimestamp => Some(1),
            ChangeKind::Signing | ChangeKind::FormFill | ChangeKind::Appearance => Some(2),
            ChangeKind::Annotation => Some(3),
            ChangeKind::Other(_) => None,
        }
    }

    /// Whether the change is allowed under permission `p`.
    pub fn allowed_under(&self, p: u8) -> bool {
        self.required_permission().map(|req| req <= p).unwrap_or(false)
    }

    fn rank(&self) -> u8 {
        self.required_permission().unwrap_or(u8::MAX)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Dss => write!(f, "DSS update"),
            ChangeKind::DocumentTimestamp => write!(f, "document timestamp"),
            ChangeKind::Signing => write!(f, "signature"),
            ChangeKind::FormFill => write!(f, "form fill"),
            ChangeKind::Appearance => write!(f, "appearance stream"),
            ChangeKind::Annotation => write!(f, "annotation"),
            ChangeKind::Other(what) => write!(f, "{}", what),
        }
    }
}

/// One changed object in a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Revision index (0-based)
    pub revision: usize,
    /// The changed object
    pub object: ObjectRef,
    /// Classification
    pub kind: ChangeKind,
}

/// A certifying signature found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certification {
    /// The certifying signature dictionary
    pub signature: ObjectRef,
    /// DocMDP `/P`
    pub permission: u8,
    /// Revision created by the certifying signature
    pub revision: Option<usize>,
}

impl Certification {
    /// Level matching `/P`.
    pub fn level(&self) -> CertificationLevel {
        CertificationLevel::from_permission(self.permission as i64)
    }
}

/// DocMDP `/P` of a signature dictionary's `/Reference`, if it certifies.
pub fn docmdp_permission(doc: &PdfDocument, sig: &Dictionary) -> Result<Option<u8>> {
    let refs = match doc.get_entry(sig, "Reference")? {
        Some(Object::Array(refs)) => refs,
        _ => return Ok(None),
    };
    for item in &refs {
        let sig_ref = match doc.resolve(item)? {
            Object::Dictionary(d) => d,
            _ => continue,
        };
        if sig_ref.get("TransformMethod").and_then(|o| o.as_name()) != Some("DocMDP") {
            continue;
        }
        let p = match doc.get_entry(&sig_ref, "TransformParams")? {
            Some(Object::Dictionary(params)) => params.get("P").and_then(|o| o.as_integer()).unwrap_or(2),
            _ => 2,
        };
        return Ok(Some(CertificationLevel::from_permission(p).permission().unwrap_or(2)));
    }
    Ok(None)
}

/// Locate the document's certifying signature through catalog `/Perms /DocMDP`.
pub fn find_certification(doc: &PdfDocument) -> Result<Option<Certification>> {
    let catalog = doc.catalog()?;
    let perms = match doc.get_entry(&catalog, "Perms")? {
        Some(Object::Dictionary(perms)) => perms,
        _ => return Ok(None),
    };
    let signature = match perms.get("DocMDP").and_then(|o| o.as_reference()) {
        Some(r) => r,
        None => return Ok(None),
    };
    let sig = match doc.get_object(signature)? {
        Object::Dictionary(d) => d,
        other => {
            return Err(Error::InvalidObjectType {
                expected: "Dictionary".to_string(),
                found: other.type_name().to_string(),
            })
        },
    };
    let permission = docmdp_permission(doc, &sig)?.unwrap_or(2);
    let revision = match sig.get("ByteRange") {
        Some(obj) => ByteRange::from_object(&doc.resolve(obj)?)
            .ok()
            .and_then(|br| doc.revision_ending_at(br.end())),
        None => None,
    };
    Ok(Some(Certification {
        signature,
        permission,
        revision,
    }))
}

/// Decide whether a new signature at `requested` level may be applied on top
/// of an existing certification with permission `existing`.
///
/// A document carries at most one certification signature, so certifying
/// an already certified document is always refused. Approval signatures
/// are allowed; under P=1 they break the lock, which is logged.
pub fn check_certify_again(existing: Option<u8>, requested: CertificationLevel) -> Result<()> {
    match (existing, requested.permission()) {
        (Some(e), Some(p)) => Err(Error::CertificationLocked {
            existing: e,
            requested: p,
        }),
        (Some(1), None) => {
            log::warn!("Document is certified with no changes allowed; a new signature will break the certification");
            Ok(())
        },
        _ => Ok(()),
    }
}

/// Classify every object changed by revision `index` (must be at least 1).
pub fn classify_revision(doc: &PdfDocument, index: usize) -> Result<Vec<Change>> {
    if index == 0 || index >= doc.revision_count() {
        return Err(Error::Unsupported(format!("no revision {} to compare", index)));
    }
    let rev = doc.revision(index)?;
    let prev = doc.revision(index - 1)?;
    let ctx = RevisionContext::new(&rev, &prev)?;
    let xref_id = doc.xref_stream_id(index);

    let mut changes = Vec::new();
    for r in doc.objects_in_revision(index) {
        if Some(r.id) == xref_id {
            continue;
        }
        let new = match rev.get_object(r) {
            Ok(obj) => obj,
            Err(e) => {
                changes.push(Change {
                    revision: index,
                    object: r,
                    kind: ChangeKind::Other(format!("unreadable object {}: {}", r, e)),
                });
                continue;
            },
        };
        if matches!(new.dict_type(), Some("ObjStm") | Some("XRef")) {
            continue;
        }
        let old = prev.get_object(r).ok().filter(|o| !o.is_null());
        if old.as_ref() == Some(&new) {
            continue;
        }
        let kind = ctx.classify(r, &new, old.as_ref())?;
        log::debug!("Revision {}: {} is a {}", index, r, kind);
        changes.push(Change {
            revision: index,
            object: r,
            kind,
        });
    }

    // A timestamp-only revision also adds its field and widget
    if ctx.has_doc_timestamp && !ctx.has_signature {
        for change in &mut changes {
            if matches!(change.kind, ChangeKind::Signing | ChangeKind::Appearance) {
                change.kind = ChangeKind::DocumentTimestamp;
            }
        }
    }
    Ok(changes)
}

/// Findings for every revision after the certifying one that the lock forbids.
pub fn check_modifications(doc: &PdfDocument, certification: &Certification) -> Result<Vec<Finding>> {
    let start = match certification.revision {
        Some(r) => r + 1,
        None => return Ok(Vec::new()),
    };
    let mut findings = Vec::new();
    for index in start..doc.revision_count() {
        for change in classify_revision(doc, index)? {
            if !change.kind.allowed_under(certification.permission) {
                findings.push(Finding::CertificationViolated {
                    revision: index,
                    reason: format!("{} ({}) not allowed under P={}", change.kind, change.object, certification.permission),
                });
            }
        }
    }
    Ok(findings)
}

struct RevisionContext<'a> {
    rev: &'a PdfDocument,
    prev: &'a PdfDocument,
    catalog_ref: ObjectRef,
    acroform_ref: Option<ObjectRef>,
    fields_ref: Option<ObjectRef>,
    dss_objects: HashSet<ObjectRef>,
    annots_arrays: HashSet<ObjectRef>,
    has_doc_timestamp: bool,
    has_signature: bool,
}

impl<'a> RevisionContext<'a> {
    fn new(rev: &'a PdfDocument, prev: &'a PdfDocument) -> Result<Self> {
        let catalog_ref = rev.catalog_ref()?;
        let catalog = rev.catalog()?;

        let mut dss_objects = HashSet::new();
        if let Some(dss) = catalog.get("DSS") {
            collect_refs(rev, dss, &mut dss_objects, 0);
        }

        let acroform_ref = catalog.get("AcroForm").and_then(|o| o.as_reference());
        let fields_ref = match rev.acroform()? {
            Some((_, form)) => form.get("Fields").and_then(|o| o.as_reference()),
            None => None,
        };

        let mut annots_arrays = HashSet::new();
        for (_, page) in rev.pages().unwrap_or_default() {
            if let Some(r) = page.get("Annots").and_then(|o| o.as_reference()) {
                annots_arrays.insert(r);
            }
        }

        let mut ctx = Self {
            rev,
            prev,
            catalog_ref,
            acroform_ref,
            fields_ref,
            dss_objects,
            annots_arrays,
            has_doc_timestamp: false,
            has_signature: false,
        };
        ctx.scan_signatures();
        Ok(ctx)
    }

    fn scan_signatures(&mut self) {
        let fields = self.rev.signature_fields().unwrap_or_default();
        let old: HashSet<Option<ObjectRef>> = self
            .prev
            .signature_fields()
            .unwrap_or_default()
            .iter()
            .map(|f| f.dict.get("V").and_then(|o| o.as_reference()))
            .collect();
        for field in fields {
            let v = field.dict.get("V").and_then(|o| o.as_reference());
            if v.is_none() || old.contains(&v) {
                continue;
            }
            let sig = v.and_then(|r| self.rev.get_object(r).ok());
            match sig.as_ref().and_then(|s| s.as_dict()) {
                Some(d) if is_doc_timestamp(d) => self.has_doc_timestamp = true,
                Some(_) => self.has_signature = true,
                None => {},
            }
        }
    }

    fn classify(&self, r: ObjectRef, new: &Object, old: Option<&Object>) -> Result<ChangeKind> {
        if self.dss_objects.contains(&r) {
            return Ok(ChangeKind::Dss);
        }
        if r == self.catalog_ref {
            return self.classify_catalog(new, old);
        }
        if Some(r) == self.acroform_ref {
            return self.classify_acroform(new, old);
        }
        if Some(r) == self.fields_ref || self.annots_arrays.contains(&r) {
            let new_items = new.as_array().cloned().unwrap_or_default();
            let old_items = old.and_then(|o| o.as_array()).cloned().unwrap_or_default();
            return Ok(if Some(r) == self.fields_ref {
                self.classify_added_fields(&new_items, &old_items)
            } else {
                self.classify_added_annots(&new_items, &old_items)
            });
        }

        let dict = match new {
            Object::Dictionary(d) => d,
            Object::Stream { dict, .. } => dict,
            _ => return Ok(ChangeKind::Other(format!("changed {} object", new.type_name()))),
        };
        let old_dict = old.and_then(|o| match o {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        });

        let kind = match dict.get("Type").and_then(|o| o.as_name()) {
            Some("Sig") if is_doc_timestamp(dict) => ChangeKind::DocumentTimestamp,
            Some("DocTimeStamp") => ChangeKind::DocumentTimestamp,
            Some("Sig") => ChangeKind::Signing,
            Some("Page") => self.classify_page(dict, old_dict),
            Some("XObject") if dict.get("Subtype").and_then(|o| o.as_name()) == Some("Form") => {
                if old.is_none() {
                    ChangeKind::Appearance
                } else {
                    ChangeKind::Other("page content XObject modified".to_string())
                }
            },
            Some("Pages") | Some("Catalog") => ChangeKind::Other("page tree modified".to_string()),
            _ if dict.get("Subtype").and_then(|o| o.as_name()) == Some("Widget") || dict.contains_key("FT") => {
                self.classify_field(dict, old_dict)
            },
            Some("Annot") => ChangeKind::Annotation,
            _ if dict.contains_key("Subtype") && dict.contains_key("Rect") => ChangeKind::Annotation,
            _ if dict.contains_key("Parent") && dict.contains_key("T") => self.classify_field(dict, old_dict),
            _ => ChangeKind::Other(format!("{} modified", describe(dict))),
        };
        Ok(kind)
    }

    fn classify_catalog(&self, new: &Object, old: Option<&Object>) -> Result<ChangeKind> {
        let empty = Dictionary::new();
        let new = new.as_dict().unwrap_or(&empty);
        let old = old.and_then(|o| o.as_dict()).unwrap_or(&empty);
        let changed = changed_keys(new, old);
        if changed.iter().all(|k| DSS_CATALOG_KEYS.contains(&k.as_str())) {
            return Ok(ChangeKind::Dss);
        }
        let unexpected: Vec<&String> = changed
            .iter()
            .filter(|k| !DSS_CATALOG_KEYS.contains(&k.as_str()) && k.as_str() != "AcroForm")
            .collect();
        if !unexpected.is_empty() {
            return Ok(ChangeKind::Other(format!("catalog /{} modified", unexpected[0])));
        }
        // Inline AcroForm changed alongside
        match (new.get("AcroForm"), old.get("AcroForm")) {
            (Some(n), o) if n.as_reference().is_none() => self.classify_acroform(n, o),
            _ => Ok(ChangeKind::Signing),
        }
    }

    fn classify_acroform(&self, new: &Object, old: Option<&Object>) -> Result<ChangeKind> {
        let empty = Dictionary::new();
        let new_form = match self.rev.resolve(new)? {
            Object::Dictionary(d) => d,
            _ => Dictionary::new(),
        };
        let old_form = match old {
            Some(o) => match self.prev.resolve(o)? {
                Object::Dictionary(d) => d,
                _ => Dictionary::new(),
            },
            None => empty,
        };
        let mut kind = ChangeKind::Signing;
        for key in changed_keys(&new_form, &old_form) {
            let k = match key.as_str() {
                "Fields" => {
                    let new_items = self.resolve_array(new_form.get("Fields"), self.rev);
                    let old_items = self.resolve_array(old_form.get("Fields"), self.prev);
                    self.classify_added_fields(&new_items, &old_items)
                },
                "SigFlags" | "DR" | "DA" | "NeedAppearances" => ChangeKind::Signing,
                other => ChangeKind::Other(format!("AcroForm /{} modified", other)),
            };
            kind = most_restrictive(kind, k);
        }
        Ok(kind)
    }

    fn classify_page(&self, new: &Dictionary, old: Option<&Dictionary>) -> ChangeKind {
        let old = match old {
            Some(old) => old,
            None => return ChangeKind::Other("page added".to_string()),
        };
        let mut kind = ChangeKind::Dss;
        for key in changed_keys(new, old) {
            let k = if key == "Annots" {
                let new_items = self.resolve_array(new.get("Annots"), self.rev);
                let old_items = self.resolve_array(old.get("Annots"), self.prev);
                self.classify_added_annots(&new_items, &old_items)
            } else {
                ChangeKind::Other(format!("page /{} modified", key))
            };
            kind = most_restrictive(kind, k);
        }
        kind
    }

    fn classify_added_annots(&self, new: &[Object], old: &[Object]) -> ChangeKind {
        let added: Vec<&Object> = new.iter().filter(|o| !old.contains(o)).collect();
        if added.is_empty() {
            // Only removals
            return ChangeKind::Annotation;
        }
        let mut kind = ChangeKind::Dss;
        for annot in added {
            let k = match self.rev.resolve(annot) {
                Ok(Object::Dictionary(d)) => {
                    if d.get("Subtype").and_then(|o| o.as_name()) == Some("Widget") {
                        self.classify_field(&d, None)
                    } else {
                        ChangeKind::Annotation
                    }
                },
                _ => ChangeKind::Other("unresolvable annotation".to_string()),
            };
            kind = most_restrictive(kind, k);
        }
        kind
    }

    fn classify_added_fields(&self, new: &[Object], old: &[Object]) -> ChangeKind {
        let mut kind = ChangeKind::Signing;
        for field in new.iter().filter(|o| !old.contains(o)) {
            let k = match self.rev.resolve(field) {
                Ok(Object::Dictionary(d)) if self.field_type(&d, 0).as_deref() == Some("Sig") => ChangeKind::Signing,
                Ok(Object::Dictionary(_)) => ChangeKind::Other("form field added".to_string()),
                _ => ChangeKind::Other("unresolvable form field".to_string()),
            };
            kind = most_restrictive(kind, k);
        }
        kind
    }

    fn classify_field(&self, new: &Dictionary, old: Option<&Dictionary>) -> ChangeKind {
        if self.field_type(new, 0).as_deref() == Some("Sig") {
            return ChangeKind::Signing;
        }
        match old {
            Some(old) => {
                let changed = changed_keys(new, old);
                match changed.iter().find(|k| !FORM_FILL_KEYS.contains(&k.as_str())) {
                    Some(key) => ChangeKind::Other(format!("form field /{} modified", key)),
                    None => ChangeKind::FormFill,
                }
            },
            None => ChangeKind::Other("form field added".to_string()),
        }
    }

    fn field_type(&self, dict: &Dictionary, depth: u32) -> Option<String> {
        if let Some(ft) = dict.get("FT").and_then(|o| o.as_name()) {
            return Some(ft.to_string());
        }
        if depth >= MAX_DEPTH {
            return None;
        }
        let parent = dict.get("Parent").and_then(|o| o.as_reference())?;
        match self.rev.get_object(parent).ok()? {
            Object::Dictionary(p) => self.field_type(&p, depth + 1),
            _ => None,
        }
    }

    fn resolve_array(&self, obj: Option<&Object>, doc: &PdfDocument) -> Vec<Object> {
        match obj.map(|o| doc.resolve(o)) {
            Some(Ok(Object::Array(items))) => items,
            _ => Vec::new(),
        }
    }
}

fn is_doc_timestamp(sig: &Dictionary) -> bool {
    sig.get("Type").and_then(|o| o.as_name()) == Some("DocTimeStamp")
        || sig.get("SubFilter").and_then(|o| o.as_name()) == Some("ETSI.RFC3161")
}

fn most_restrictive(a: ChangeKind, b: ChangeKind) -> ChangeKind {
    if b.rank() > a.rank() {
        b
    } else {
        a
    }
}

fn changed_keys(new: &Dictionary, old: &Dictionary) -> Vec<String> {
    let mut keys: Vec<String> = new
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .chain(old.keys().filter(|k| !new.contains_key(*k)).cloned())
        .collect();
    keys.sort();
    keys
}

fn describe(dict: &Dictionary) -> String {
    match dict.get("Type").and_then(|o| o.as_name()) {
        Some(t) => format!("/{} object", t),
        None => "object".to_string(),
    }
}

fn collect_refs(doc: &PdfDocument, obj: &Object, out: &mut HashSet<ObjectRef>, depth: u32) {
    if depth > MAX_DEPTH {
        return;
    }
    match obj {
        Object::Reference(r) => {
            if out.insert(*r) {
                if let Ok(target) = doc.get_object(*r) {
                    collect_refs(doc, &target, out, depth + 1);
                }
            }
        },
        Object::Array(items) => {
            for item in items {
                collect_refs(doc, item, out, depth + 1);
            }
        },
        Object::Dictionary(d) | Object::Stream { dict: d, .. } => {
            for value in d.values() {
                collect_refs(doc, value, out, depth + 1);
            }
        },
        _ => {},
    }
}

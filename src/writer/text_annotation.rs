//! Text annotations (sticky notes) added as an incremental update.

use super::incremental::IncrementalUpdate;
use super::object_serializer::ObjectSerializer;
use crate::document::PdfDocument;
use crate::error::Result;
use crate::object::{pdf_date, text_string, Object, ObjectRef};

/// A text annotation (sticky note).
#[derive(Debug, Clone)]
pub struct TextAnnotation {
    /// Bounding rectangle `[llx lly urx ury]`
    pub rect: [f64; 4],
    /// Text contents of the note
    pub contents: String,
    /// Author (`/T`)
    pub author: Option<String>,
    /// RGB color of the icon
    pub color: [f64; 3],
    /// Whether the pop-up is initially open
    pub open: bool,
}

impl TextAnnotation {
    /// Create a closed, yellow note.
    pub fn new(rect: [f64; 4], contents: impl Into<String>) -> Self {
        Self {
            rect,
            contents: contents.into(),
            author: None,
            color: [1.0, 1.0, 0.0],
            open: false,
        }
    }

    /// Set the author.
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Set whether the pop-up is open.
    pub fn with_open(mut self, open: bool) -> Self {
        self.open = open;
        self
    }

    /// Build the annotation dictionary for a page.
    pub fn to_object(&self, page: ObjectRef) -> Object {
        let [llx, lly, urx, ury] = self.rect;
        let mut entries = vec![
            ("Type", ObjectSerializer::name("Annot")),
            ("Subtype", ObjectSerializer::name("Text")),
            ("Rect", ObjectSerializer::rect(llx, lly, urx, ury)),
            ("Contents", text_string(&self.contents)),
            ("Name", ObjectSerializer::name("Comment")),
            ("Open", Object::Boolean(self.open)),
            ("C", Object::Array(self.color.iter().map(|&c| Object::Real(c)).collect())),
            ("F", ObjectSerializer::integer(4)),
            ("P", ObjectSerializer::reference(page)),
            ("M", ObjectSerializer::string(&pdf_date(&chrono::Utc::now()))),
        ];
        if let Some(author) = &self.author {
            entries.push(("T", text_string(author)));
        }
        ObjectSerializer::dict(entries)
    }
}

/// Add a text annotation to page `page_index` as a new revision.
pub fn add_text_annotation(
    doc: &PdfDocument,
    page_index: usize,
    annotation: &TextAnnotation,
) -> Result<Vec<u8>> {
    let (page_ref, _) = doc.page(page_index)?;
    let mut update = IncrementalUpdate::new(doc);
    let annot = update.add_object(annotation.to_object(page_ref));
    update.add_page_annotation(page_ref, annot)?;

    log::info!("Adding text annotation {} to page {}", annot, page_index);
    Ok(update.write()?.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::hello_pdf;

    #[test]
    fn test_add_text_annotation() {
        let doc = PdfDocument::from_bytes(hello_pdf()).unwrap();
        let note = TextAnnotation::new([100.0, 700.0, 124.0, 724.0], "Reviewed").with_author("QA");
        let bytes = add_text_annotation(&doc, 0, &note).unwrap();

        let updated = PdfDocument::from_bytes(bytes).unwrap();
        assert_eq!(updated.revision_count(), 2);
        let (_, page) = updated.page(0).unwrap();
        let annots = page.get("Annots").unwrap().as_array().unwrap();
        assert_eq!(annots.len(), 1);
        let annot = updated.resolve(&annots[0]).unwrap();
        assert_eq!(annot.as_dict().unwrap().get("Subtype").unwrap().as_name(), Some("Text"));
    }

    #[test]
    fn test_page_out_of_range() {
        let doc = PdfDocument::from_bytes(hello_pdf()).unwrap();
        let note = TextAnnotation::new([0.0, 0.0, 10.0, 10.0], "x");
        assert!(add_text_annotation(&doc, 5, &note).is_err());
    }
}

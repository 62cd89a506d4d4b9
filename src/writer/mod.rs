//! PDF writing: object serialization and incremental updates.
//!
//! ## Architecture
//!
//! ```text
//! PdfDocument (parsed original)
//!     ↓
//! [IncrementalUpdate] (new / replaced objects, form and page helpers)
//!     ↓
//! [ObjectSerializer] (serializes PDF objects)
//!     ↓
//! original bytes + appended section (xref table or xref stream)
//! ```

mod appearance;
mod incremental;
mod object_serializer;
mod text_annotation;

pub use appearance::AppearanceStreamBuilder;
pub use incremental::{IncrementalOutput, IncrementalUpdate, WrittenObject};
pub use object_serializer::{ObjectSerializer, ValueSpans};
pub use text_annotation::{add_text_annotation, TextAnnotation};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_exports() {
        let _serializer = ObjectSerializer::new();
        let _ap = AppearanceStreamBuilder::new(10.0, 10.0);
    }
}

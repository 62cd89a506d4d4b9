//! Appearance streams for signature widgets.
//!
//! A visible signature's widget carries an `/AP << /N form >>` entry whose
//! normal appearance is a Form XObject drawing a border and a few lines of
//! Helvetica text (signer, date, reason).

use super::object_serializer::ObjectSerializer;
use crate::object::{Dictionary, Object};

/// Builder for a signature appearance Form XObject.
#[derive(Debug, Clone)]
pub struct AppearanceStreamBuilder {
    width: f64,
    height: f64,
    lines: Vec<String>,
    font_size: f64,
}

impl AppearanceStreamBuilder {
    /// Appearance for a widget of the given size.
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: width.max(0.0),
            height: height.max(0.0),
            lines: Vec::new(),
            font_size: 8.0,
        }
    }

    /// Add a line of text.
    pub fn line(mut self, text: impl Into<String>) -> Self {
        self.lines.push(text.into());
        self
    }

    /// Set the font size (clamped to at least 1pt).
    pub fn font_size(mut self, size: f64) -> Self {
        self.font_size = size.max(1.0);
        self
    }

    /// Content stream operators.
    pub fn content(&self) -> Vec<u8> {
        let mut ops = String::new();
        ops.push_str("q\n0.5 w 0 0 0 RG\n");
        ops.push_str(&format!("0.5 0.5 {:.2} {:.2} re S\n", (self.width - 1.0).max(0.0), (self.height - 1.0).max(0.0)));
        ops.push_str("BT\n");
        ops.push_str(&format!("/Helv {} Tf\n", self.font_size));
        let leading = self.font_size * 1.25;
        ops.push_str(&format!("{:.2} TL\n", leading));
        ops.push_str(&format!("2 {:.2} Td\n", (self.height - leading).max(0.0)));
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                ops.push_str("T*\n");
            }
            ops.push_str(&format!("({}) Tj\n", escape_text(line)));
        }
        ops.push_str("ET\nQ\n");
        ops.into_bytes()
    }

    /// Build the Form XObject.
    pub fn build(&self) -> Object {
        let font = ObjectSerializer::dict(vec![
            ("Type", ObjectSerializer::name("Font")),
            ("Subtype", ObjectSerializer::name("Type1")),
            ("BaseFont", ObjectSerializer::name("Helvetica")),
            ("Encoding", ObjectSerializer::name("WinAnsiEncoding")),
        ]);
        let resources = ObjectSerializer::dict(vec![("Font", ObjectSerializer::dict(vec![("Helv", font)]))]);

        let dict: Dictionary = ObjectSerializer::dictionary(vec![
            ("Type", ObjectSerializer::name("XObject")),
            ("Subtype", ObjectSerializer::name("Form")),
            ("BBox", ObjectSerializer::rect(0.0, 0.0, self.width, self.height)),
            ("Resources", resources),
        ]);
        Object::Stream {
            dict,
            data: bytes::Bytes::from(self.content()),
        }
    }
}

/// Escape text for a literal string operand, replacing non-Latin-1 characters.
fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            },
            c if (c as u32) < 0x20 => out.push(' '),
            c if (c as u32) < 0x7F => out.push(c),
            c if (c as u32) <= 0xFF => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push('?'),
        }
    }
    out
}

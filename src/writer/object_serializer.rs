//! PDF object serialization.
//!
//! Converts [`Object`] values back into PDF syntax. Dictionary keys are
//! written in sorted order so output is deterministic. When serializing an
//! indirect object the serializer also reports where each top-level
//! dictionary value landed, which is how the signature placeholders are
//! found without scanning the output text.

use crate::object::{Dictionary, Object, ObjectRef};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::ops::Range;

/// Byte span of each top-level dictionary value, keyed by dictionary key.
pub type ValueSpans = BTreeMap<String, Range<usize>>;

/// Serializer for PDF objects.
#[derive(Debug, Clone, Default)]
pub struct ObjectSerializer {
    /// Omit line breaks inside dictionaries
    compact: bool,
}

impl ObjectSerializer {
    /// Create a serializer that writes one dictionary entry per line.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compact serializer (no line breaks inside dictionaries).
    pub fn compact() -> Self {
        Self { compact: true }
    }

    /// Serialize an object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an object to a string (lossy for binary stream data).
    pub fn serialize_to_string(&self, obj: &Object) -> String {
        String::from_utf8_lossy(&self.serialize(obj)).into_owned()
    }

    /// Serialize an indirect object definition: `id gen obj ... endobj`.
    pub fn serialize_indirect(&self, id: u32, gen: u16, obj: &Object) -> Vec<u8> {
        self.serialize_indirect_tracked(id, gen, obj).0
    }

    /// Like [`serialize_indirect`](Self::serialize_indirect), also returning
    /// the spans of the object's top-level dictionary values relative to the
    /// start of the returned buffer. Non-dictionary objects report no spans.
    pub fn serialize_indirect_tracked(&self, id: u32, gen: u16, obj: &Object) -> (Vec<u8>, ValueSpans) {
        let mut buf = format!("{} {} obj\n", id, gen).into_bytes();
        let mut spans = ValueSpans::new();
        match obj {
            Object::Dictionary(dict) => self.write_dictionary(&mut buf, dict, Some(&mut spans)),
            Object::Stream { dict, data } => self.write_stream(&mut buf, dict, data, Some(&mut spans)),
            other => self.write_object(&mut buf, other),
        }
        buf.extend_from_slice(b"\nendobj\n");
        (buf, spans)
    }

    // Writing into a Vec<u8> cannot fail, so the io::Result is discarded.
    fn write_object(&self, w: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => w.extend_from_slice(b"null"),
            Object::Boolean(b) => w.extend_from_slice(if *b { &b"true"[..] } else { &b"false"[..] }),
            Object::Integer(i) => {
                let _ = write!(w, "{}", i);
            },
            Object::Real(r) => write_real(w, *r),
            Object::String(s) => write_string(w, s),
            Object::Name(n) => write_name(w, n),
            Object::Array(arr) => self.write_array(w, arr),
            Object::Dictionary(dict) => self.write_dictionary(w, dict, None),
            Object::Stream { dict, data } => self.write_stream(w, dict, data, None),
            Object::Reference(r) => {
                let _ = write!(w, "{} {} R", r.id, r.gen);
            },
        }
    }

    fn write_array(&self, w: &mut Vec<u8>, arr: &[Object]) {
        w.push(b'[');
        for (i, obj) in arr.iter().enumerate() {
            if i > 0 {
                w.push(b' ');
            }
            self.write_object(w, obj);
        }
        w.push(b']');
    }

    fn write_dictionary(&self, w: &mut Vec<u8>, dict: &Dictionary, mut spans: Option<&mut ValueSpans>) {
        w.extend_from_slice(b"<<");

        let mut keys: Vec<_> = dict.keys().collect();
        keys.sort();

        for key in keys {
            if let Some(value) = dict.get(key) {
                if self.compact {
                    w.push(b' ');
                } else {
                    w.extend_from_slice(b"\n  ");
                }
                write_name(w, key);
                w.push(b' ');
                let start = w.len();
                self.write_object(w, value);
                if let Some(spans) = spans.as_deref_mut() {
                    spans.insert(key.clone(), start..w.len());
                }
            }
        }

        if self.compact {
            w.push(b' ');
        } else if !dict.is_empty() {
            w.push(b'\n');
        }
        w.extend_from_slice(b">>");
    }

    /// `/Length` always reflects the data written, replacing any indirect length.
    fn write_stream(&self, w: &mut Vec<u8>, dict: &Dictionary, data: &[u8], spans: Option<&mut ValueSpans>) {
        let mut dict_with_length = dict.clone();
        dict_with_length.insert("Length".to_string(), Object::Integer(data.len() as i64));

        self.write_dictionary(w, &dict_with_length, spans);
        w.extend_from_slice(b"\nstream\n");
        w.extend_from_slice(data);
        w.extend_from_slice(b"\nendstream");
    }
}

fn write_real(w: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 {
        let _ = write!(w, "{}", value as i64);
    } else {
        let formatted = format!("{:.5}", value);
        let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
        w.extend_from_slice(trimmed.as_bytes());
    }
}

/// Printable strings are written as literals, anything else as uppercase hex.
fn write_string(w: &mut Vec<u8>, data: &[u8]) {
    let is_printable = data
        .iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b'\t' || (0x20..=0x7E).contains(&b));

    if is_printable {
        w.push(b'(');
        for &byte in data {
            match byte {
                b'(' => w.extend_from_slice(b"\\("),
                b')' => w.extend_from_slice(b"\\)"),
                b'\\' => w.extend_from_slice(b"\\\\"),
                b'\n' => w.extend_from_slice(b"\\n"),
                b'\r' => w.extend_from_slice(b"\\r"),
                b'\t' => w.extend_from_slice(b"\\t"),
                _ => w.push(byte),
            }
        }
        w.push(b')');
    } else {
        w.push(b'<');
        w.extend_from_slice(hex::encode_upper(data).as_bytes());
        w.push(b'>');
    }
}

/// Names escape whitespace, delimiters, `#` and non-ASCII bytes as `#XX`.
fn write_name(w: &mut Vec<u8>, name: &str) {
    w.push(b'/');
    for byte in name.bytes() {
        match byte {
            b'!'..=b'~'
                if !matches!(byte, b'#' | b'%' | b'(' | b')' | b'/' | b'<' | b'>' | b'[' | b']' | b'{' | b'}') =>
            {
                w.push(byte)
            },
            _ => {
                let _ = write!(w, "#{:02X}", byte);
            },
        }
    }
}

/// Helper functions for building PDF objects.
impl ObjectSerializer {
    /// Create a Name object.
    pub fn name(s: &str) -> Object {
        Object::Name(s.to_string())
    }

    /// Create a String object from a Rust string.
    pub fn string(s: &str) -> Object {
        Object::String(s.as_bytes().to_vec())
    }

    /// Create an Integer object.
    pub fn integer(i: i64) -> Object {
        Object::Integer(i)
    }

    /// Create an Array object.
    pub fn array(items: Vec<Object>) -> Object {
        Object::Array(items)
    }

    /// Create a Dictionary object.
    pub fn dict(entries: Vec<(&str, Object)>) -> Object {
        Object::Dictionary(Self::dictionary(entries))
    }

    /// Create a bare dictionary map.
    pub fn dictionary(entries: Vec<(&str, Object)>) -> Dictionary {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<HashMap<String, Object>>()
    }

    /// Create a Reference object.
    pub fn reference(r: ObjectRef) -> Object {
        Object::Reference(r)
    }

    /// Create a rectangle array `[llx lly urx ury]`.
    pub fn rect(llx: f64, lly: f64, urx: f64, ury: f64) -> Object {
        Object::Array(vec![
            Object::Real(llx),
            Object::Real(lly),
            Object::Real(urx),
            Object::Real(ury),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_object;

    #[test]
    fn test_serialize_primitives() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Null), "null");
        assert_eq!(s.serialize_to_string(&Object::Boolean(false)), "false");
        assert_eq!(s.serialize_to_string(&Object::Integer(-123)), "-123");
        assert_eq!(s.serialize_to_string(&Object::Real(1.0)), "1");
        assert_eq!(s.serialize_to_string(&Object::Real(0.5)), "0.5");
    }

    #[test]
    fn test_serialize_string() {
        let s = ObjectSerializer::new();
        assert_eq!(
            s.serialize_to_string(&Object::String(b"Test (parens)".to_vec())),
            "(Test \\(parens\\))"
        );
        assert_eq!(s.serialize_to_string(&Object::String(vec![0x00, 0xFF, 0x80])), "<00FF80>");
    }

    #[test]
    fn test_serialize_name_escapes() {
        let s = ObjectSerializer::new();
        assert_eq!(s.serialize_to_string(&Object::Name("adbe.pkcs7.detached".to_string())), "/adbe.pkcs7.detached");
        assert_eq!(s.serialize_to_string(&Object::Name("A B".to_string())), "/A#20B");
        assert_eq!(s.serialize_to_string(&Object::Name("a/b".to_string())), "/a#2Fb");
    }

    #[test]
    fn test_dictionary_keys_sorted() {
        let s = ObjectSerializer::compact();
        let dict = ObjectSerializer::dict(vec![
            ("Contents", Object::String(vec![0; 2])),
            ("ByteRange", Object::Array(vec![Object::Integer(0)])),
            ("Type", ObjectSerializer::name("Sig")),
        ]);
        assert_eq!(s.serialize_to_string(&dict), "<< /ByteRange [0] /Contents <0000> /Type /Sig >>");
    }

    #[test]
    fn test_stream_length_replaced() {
        let s = ObjectSerializer::compact();
        let mut dict = HashMap::new();
        dict.insert("Length".to_string(), Object::Reference(ObjectRef::new(9, 0)));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"stream data"),
        };
        let result = s.serialize_to_string(&stream);
        assert!(result.contains("/Length 11"));
        assert!(result.ends_with("stream\nstream data\nendstream"));
    }

    #[test]
    fn test_serialized_dictionary_parses_back() {
        let s = ObjectSerializer::new();
        let dict = ObjectSerializer::dict(vec![
            ("Name", crate::object::text_string("Jörg")),
            ("Rect", Object::Array(vec![Object::Integer(0), Object::Real(100.5)])),
            ("P", ObjectSerializer::reference(ObjectRef::new(3, 0))),
        ]);
        let bytes = s.serialize(&dict);
        let (_, parsed) = parse_object(&bytes).unwrap();
        assert_eq!(parsed, dict);
    }

    #[test]
    fn test_tracked_spans_ignore_lookalike_text() {
        let s = ObjectSerializer::new();
        let dict = ObjectSerializer::dict(vec![
            ("ContactInfo", ObjectSerializer::string("/Contents <00> /ByteRange [1 2] endobj")),
            ("ByteRange", Object::Array(vec![Object::Integer(0), Object::Integer(7)])),
            ("Contents", Object::String(vec![0; 3])),
        ]);
        let (bytes, spans) = s.serialize_indirect_tracked(4, 0, &dict);
        assert_eq!(&bytes[spans["Contents"].clone()], b"<000000>");
        assert_eq!(&bytes[spans["ByteRange"].clone()], b"[0 7]");
        assert!(bytes[spans["ContactInfo"].clone()].starts_with(b"(/Contents"));
        assert_eq!(spans.len(), 3);

        let (_, none) = s.serialize_indirect_tracked(5, 0, &Object::Integer(1));
        assert!(none.is_empty());
    }

    #[test]
    fn test_serialize_indirect() {
        let s = ObjectSerializer::new();
        let bytes = s.serialize_indirect(1, 0, &Object::Integer(42));
        assert_eq!(bytes, b"1 0 obj\n42\nendobj\n");
    }
}

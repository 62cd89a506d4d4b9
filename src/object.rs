//! PDF object types.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// Dictionary type shared by dictionaries and stream dictionaries.
pub type Dictionary = HashMap<String, Object>;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (starting with /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(Dictionary),
    /// Stream (dictionary + data)
    Stream {
        /// Stream dictionary
        dict: Dictionary,
        /// Raw (still encoded) stream data
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Get the type name of this object (without data).
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Mutable access to a dictionary or stream dictionary.
    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to cast to a number (integer or real).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Real(r) => Some(*r),
            Object::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Text value of a string object, decoding UTF-16BE when a BOM is present.
    pub fn as_text(&self) -> Option<String> {
        let bytes = self.as_string()?;
        if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
            let units: Vec<u16> = bytes[2..]
                .chunks(2)
                .filter(|c| c.len() == 2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            Some(String::from_utf16_lossy(&units))
        } else {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }

    /// Check if object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Value of `/Type` for dictionaries and streams.
    pub fn dict_type(&self) -> Option<&str> {
        self.as_dict()?.get("Type")?.as_name()
    }

    /// Decode stream data using the filters named in the stream dictionary.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        match self {
            Object::Stream { dict, data } => {
                let filters = dict
                    .get("Filter")
                    .map(extract_filter_names)
                    .unwrap_or_default();

                if filters.is_empty() {
                    return Ok(data.to_vec());
                }

                let decode_params = extract_decode_params(dict.get("DecodeParms"));
                crate::decoders::decode_stream_with_params(data, &filters, decode_params.as_ref())
            },
            _ => Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: self.type_name().to_string(),
            }),
        }
    }
}

/// Encode a text string for a PDF string object.
///
/// ASCII stays as-is; anything else becomes UTF-16BE with a byte order mark.
pub fn text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::String(text.as_bytes().to_vec())
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes)
    }
}

/// Format a timestamp as a PDF date string: `D:YYYYMMDDHHmmSS+HH'mm'`.
pub fn pdf_date<Tz: chrono::TimeZone>(dt: &chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let offset = dt.format("%z").to_string();
    let tz = if offset == "+0000" {
        "Z".to_string()
    } else {
        format!("{}'{}'", &offset[..3], &offset[3..])
    };
    format!("D:{}{}", dt.format("%Y%m%d%H%M%S"), tz)
}

/// Parse a PDF date string. Missing trailing fields default to their minimum;
/// a missing time zone is taken as UTC.
pub fn parse_pdf_date(text: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    use chrono::{FixedOffset, NaiveDate, TimeZone};

    let s = text.trim().strip_prefix("D:").unwrap_or(text.trim());
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return None;
    }
    let field = |start: usize, len: usize, default: u32| -> u32 {
        digits
            .get(start..start + len)
            .and_then(|d| d.parse().ok())
            .unwrap_or(default)
    };
    let year = digits[..4].parse::<i32>().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, field(4, 2, 1), field(6, 2, 1))?
        .and_hms_opt(field(8, 2, 0), field(10, 2, 0), field(12, 2, 0))?;

    let rest = &s[digits.len()..];
    let offset_secs = match rest.chars().next() {
        Some(sign @ ('+' | '-')) => {
            let tz: String = rest[1..].chars().filter(|c| c.is_ascii_digit()).collect();
            let hours: i32 = tz.get(..2).and_then(|h| h.parse().ok()).unwrap_or(0);
            let minutes: i32 = tz.get(2..4).and_then(|m| m.parse().ok()).unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            if sign == '-' { -secs } else { secs }
        },
        _ => 0,
    };
    let offset = FixedOffset::east_opt(offset_secs)?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Extract filter names from a Filter object (a single name or an array of names).
fn extract_filter_names(filter_obj: &Object) -> Vec<String> {
    match filter_obj {
        Object::Name(name) => vec![name.clone()],
        Object::Array(arr) => arr
            .iter()
            .filter_map(|obj| obj.as_name().map(|s| s.to_string()))
            .collect(),
        _ => vec![],
    }
}

/// Extract predictor parameters from a DecodeParms dictionary (or the first one of an array).
pub(crate) fn extract_decode_params(
    params_obj: Option<&Object>,
) -> Option<crate::decoders::DecodeParams> {
    let dict = match params_obj? {
        Object::Dictionary(d) => d,
        Object::Array(arr) => arr.iter().filter_map(|obj| obj.as_dict()).next()?,
        _ => return None,
    };

    let get = |key: &str, default: i64| dict.get(key).and_then(|o| o.as_integer()).unwrap_or(default);

    Some(crate::decoders::DecodeParams {
        predictor: get("Predictor", 1),
        columns: get("Columns", 1) as usize,
        colors: get("Colors", 1) as usize,
        bits_per_component: get("BitsPerComponent", 8) as usize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_integer() {
        let obj = Object::Integer(42);
        assert_eq!(obj.as_integer(), Some(42));
        assert_eq!(obj.as_number(), Some(42.0));
        assert!(obj.as_name().is_none());
        assert!(!obj.is_null());
    }

    #[test]
    fn test_object_name() {
        let obj = Object::Name("Type".to_string());
        assert_eq!(obj.as_name(), Some("Type"));
        assert!(obj.as_integer().is_none());
    }

    #[test]
    fn test_object_stream_dict_access() {
        let mut dict = HashMap::new();
        dict.insert("Type".to_string(), Object::Name("XRef".to_string()));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from_static(b"stream data"),
        };

        assert_eq!(obj.dict_type(), Some("XRef"));
    }

    #[test]
    fn test_object_ref_display_and_order() {
        let a = ObjectRef::new(10, 0);
        let b = ObjectRef::new(11, 0);
        assert_eq!(format!("{}", a), "10 0 R");
        assert!(a < b);
    }

    #[test]
    fn test_text_string_ascii_and_unicode() {
        assert_eq!(text_string("Hello"), Object::String(b"Hello".to_vec()));

        let encoded = text_string("Zürich");
        let bytes = encoded.as_string().unwrap();
        assert_eq!(&bytes[..2], &[0xFE, 0xFF]);
        assert_eq!(encoded.as_text().unwrap(), "Zürich");
    }

    #[test]
    fn test_pdf_date_round_trip() {
        use chrono::TimeZone;
        let dt = chrono::Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(pdf_date(&dt), "D:20240309140507Z");
        assert_eq!(parse_pdf_date("D:20240309140507Z"), Some(dt));
    }

    #[test]
    fn test_parse_pdf_date_with_offset() {
        use chrono::TimeZone;
        let parsed = parse_pdf_date("D:20240309160507+02'00'").unwrap();
        assert_eq!(parsed, chrono::Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap());
        assert_eq!(
            parse_pdf_date("D:2024").unwrap(),
            chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(parse_pdf_date("garbage").is_none());
    }

    #[test]
    fn test_decode_stream_no_filter() {
        let obj = Object::Stream {
            dict: HashMap::new(),
            data: bytes::Bytes::from_static(b"Hello"),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_stream_flate() {
        use flate2::{write::ZlibEncoder, Compression};
        use std::io::Write;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"compressed payload").unwrap();
        let mut dict = HashMap::new();
        dict.insert("Filter".to_string(), Object::Name("FlateDecode".to_string()));
        let obj = Object::Stream {
            dict,
            data: bytes::Bytes::from(enc.finish().unwrap()),
        };
        assert_eq!(obj.decode_stream_data().unwrap(), b"compressed payload");
    }

    #[test]
    fn test_decode_stream_not_a_stream() {
        match Object::Integer(42).decode_stream_data() {
            Err(Error::InvalidObjectType { expected, found }) => {
                assert_eq!(expected, "Stream");
                assert_eq!(found, "Integer");
            },
            _ => panic!("Expected InvalidObjectType error"),
        }
    }

    #[test]
    fn test_extract_decode_params() {
        let mut params = HashMap::new();
        params.insert("Predictor".to_string(), Object::Integer(12));
        params.insert("Columns".to_string(), Object::Integer(7));
        let p = extract_decode_params(Some(&Object::Dictionary(params))).unwrap();
        assert_eq!(p.predictor, 12);
        assert_eq!(p.columns, 7);
        assert_eq!(p.colors, 1);
    }
}

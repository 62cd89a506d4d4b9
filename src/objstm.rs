//! Object stream parsing (PDF 1.5+).
//!
//! Object streams (/Type /ObjStm) pack several objects into one compressed
//! stream:
//! ```text
//! N 0 obj
//! << /Type /ObjStm /N 3 /First 14 /Filter /FlateDecode >>
//! stream
//! 10 0 11 15 12 28     % Pairs: (obj_num, offset relative to /First)
//! <dict> <array> ...
//! endstream
//! endobj
//! ```

use crate::error::{Error, Result};
use crate::object::Object;
use crate::parser::parse_object;
use std::collections::HashMap;

/// Parse an object stream and extract all objects.
pub fn parse_object_stream(stream_obj: &Object) -> Result<HashMap<u32, Object>> {
    let dict = match stream_obj {
        Object::Stream { dict, .. } => dict,
        _ => return Err(Error::CorruptDocument("object stream is not a Stream object".to_string())),
    };

    if let Some(type_name) = stream_obj.dict_type() {
        if type_name != "ObjStm" {
            return Err(Error::CorruptDocument(format!(
                "expected /Type /ObjStm, got /Type /{}",
                type_name
            )));
        }
    }

    let n = dict
        .get("N")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::CorruptDocument("object stream missing /N entry".to_string()))?;
    let first = dict
        .get("First")
        .and_then(|o| o.as_integer())
        .ok_or_else(|| Error::CorruptDocument("object stream missing /First entry".to_string()))?;
    if n < 0 || first < 0 {
        return Err(Error::CorruptDocument("negative /N or /First in object stream".to_string()));
    }
    let first = first as usize;

    let data = stream_obj.decode_stream_data()?;
    if first > data.len() {
        return Err(Error::CorruptDocument(format!(
            "object stream /First {} beyond data length {}",
            first,
            data.len()
        )));
    }

    let header = &data[..first];
    let mut numbers = Vec::with_capacity(n as usize);
    let mut remaining = header;
    while let Ok((rest, obj)) = parse_object(remaining) {
        match obj {
            Object::Integer(i) => numbers.push(i),
            _ => break,
        }
        remaining = rest;
    }

    let pairs: Vec<(u32, usize)> = numbers
        .chunks_exact(2)
        .take(n as usize)
        .map(|pair| (pair[0] as u32, pair[1] as usize))
        .collect();
    if pairs.len() != n as usize {
        log::warn!("Object stream declares {} objects but lists {}", n, pairs.len());
    }

    let mut objects = HashMap::with_capacity(pairs.len());
    for (obj_num, rel_offset) in pairs {
        let start = first + rel_offset;
        if start >= data.len() {
            log::warn!("Object {} offset {} outside object stream", obj_num, rel_offset);
            continue;
        }
        match parse_object(&data[start..]) {
            Ok((_, obj)) => {
                objects.insert(obj_num, obj);
            },
            Err(e) => log::warn!("Failed to parse object {} in object stream: {:?}", obj_num, e),
        }
    }

    Ok(objects)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn objstm(body: &[u8], n: i64, first: i64) -> Object {
        let mut dict = HashMap::new();
        dict.insert("Type".to_string(), Object::Name("ObjStm".to_string()));
        dict.insert("N".to_string(), Object::Integer(n));
        dict.insert("First".to_string(), Object::Integer(first));
        Object::Stream {
            dict,
            data: bytes::Bytes::from(body.to_vec()),
        }
    }

    #[test]
    fn test_parse_object_stream() {
        let body = b"10 0 11 10 << /A 1 >>[1 2 3]";
        let objects = parse_object_stream(&objstm(body, 2, 11)).unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects.get(&10).unwrap().as_dict().is_some());
        assert_eq!(objects.get(&11).unwrap().as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_missing_first() {
        let mut obj = objstm(b"", 0, 0);
        if let Object::Stream { dict, .. } = &mut obj {
            dict.remove("First");
        }
        assert!(parse_object_stream(&obj).is_err());
    }

    #[test]
    fn test_not_a_stream() {
        assert!(parse_object_stream(&Object::Integer(1)).is_err());
    }
}

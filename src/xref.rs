//! Cross-reference parsing.
//!
//! Every revision of a PDF ends with its own cross-reference section: a
//! traditional `xref` table followed by a `trailer`, or a cross-reference
//! stream (PDF 1.5+) whose dictionary doubles as the trailer. Sections are
//! chained newest-to-oldest through `/Prev`. This module parses single
//! sections and walks the chain without merging, so callers can still see
//! which revision introduced which object.

use crate::error::{Error, Result};
use crate::lexer::{is_whitespace, skip_ws};
use crate::object::{Dictionary, Object};
use crate::parser::{parse_indirect_object, parse_object};
use std::collections::{BTreeMap, HashSet};

/// Upper bound on the number of chained sections.
const MAX_SECTIONS: usize = 4096;

/// Cross-reference table entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntryType {
    /// Entry for a free object
    Free,
    /// Entry for an object stored at a byte offset
    Uncompressed,
    /// Entry for an object inside an object stream (PDF 1.5+)
    Compressed,
}

/// Cross-reference table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XRefEntry {
    /// Type of entry
    pub entry_type: XRefEntryType,
    /// Byte offset (uncompressed), object stream number (compressed) or next free object
    pub offset: u64,
    /// Generation number (uncompressed) or index within the object stream (compressed)
    pub generation: u16,
}

impl XRefEntry {
    /// Create a new uncompressed entry.
    pub fn uncompressed(offset: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Uncompressed,
            offset,
            generation,
        }
    }

    /// Create a new compressed entry (object in object stream).
    pub fn compressed(stream_obj_num: u64, index_in_stream: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Compressed,
            offset: stream_obj_num,
            generation: index_in_stream,
        }
    }

    /// Create a new free entry.
    pub fn free(next_free: u64, generation: u16) -> Self {
        Self {
            entry_type: XRefEntryType::Free,
            offset: next_free,
            generation,
        }
    }

    /// Whether the entry points at a live object.
    pub fn in_use(&self) -> bool {
        self.entry_type != XRefEntryType::Free
    }
}

/// One cross-reference section together with its trailer.
#[derive(Debug, Clone)]
pub struct XRefSection {
    /// Byte offset of the section (the `startxref` value that points at it)
    pub offset: u64,
    /// Entries declared by this section only
    pub entries: BTreeMap<u32, XRefEntry>,
    /// Trailer dictionary (the stream dictionary for xref streams)
    pub trailer: Dictionary,
    /// Object number of the xref stream, if this section is a stream
    pub stream_id: Option<u32>,
}

impl XRefSection {
    /// Offset of the previous section, if any.
    pub fn prev(&self) -> Option<u64> {
        self.trailer
            .get("Prev")
            .and_then(|o| o.as_integer())
            .filter(|&p| p >= 0)
            .map(|p| p as u64)
    }

    /// Whether this section is a cross-reference stream.
    pub fn is_stream(&self) -> bool {
        self.stream_id.is_some()
    }

    /// `/Size` declared in the trailer.
    pub fn size(&self) -> u32 {
        self.trailer
            .get("Size")
            .and_then(|o| o.as_integer())
            .unwrap_or(0)
            .max(0) as u32
    }
}

/// Find the offset named by the last `startxref` keyword in the file.
pub fn find_startxref(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";

    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;

    let rest = skip_ws(&tail[pos + keyword.len()..]);
    let digits: Vec<u8> = rest.iter().take_while(|c| c.is_ascii_digit()).copied().collect();
    std::str::from_utf8(&digits)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(Error::InvalidXref)
}

/// Walk the `/Prev` chain starting at `start`, newest section first.
pub fn parse_xref_chain(data: &[u8], start: u64) -> Result<Vec<XRefSection>> {
    let mut sections = Vec::new();
    let mut visited = HashSet::new();
    let mut next = Some(start);

    while let Some(offset) = next {
        if !visited.insert(offset) {
            log::warn!("Circular /Prev chain at offset {}", offset);
            break;
        }
        if sections.len() >= MAX_SECTIONS {
            return Err(Error::RecursionLimitExceeded(MAX_SECTIONS as u32));
        }

        let section = parse_xref_section(data, offset)?;
        log::debug!(
            "xref section at {}: {} entries, stream={}, prev={:?}",
            offset,
            section.entries.len(),
            section.is_stream(),
            section.prev()
        );
        next = section.prev();
        sections.push(section);
    }

    Ok(sections)
}

/// Parse the cross-reference section at `offset`, detecting its format.
pub fn parse_xref_section(data: &[u8], offset: u64) -> Result<XRefSection> {
    let start = offset as usize;
    if start >= data.len() {
        return Err(Error::InvalidXref);
    }
    let body = skip_ws(&data[start..]);

    let mut section = if body.starts_with(b"xref") {
        parse_traditional_xref(data, offset)?
    } else if body.first().is_some_and(|c| c.is_ascii_digit()) {
        parse_xref_stream(data, offset)?
    } else {
        return Err(Error::InvalidXref);
    };

    // Hybrid-reference files keep compressed objects in a side stream
    if let Some(stm_offset) = section.trailer.get("XRefStm").and_then(|o| o.as_integer()) {
        match parse_xref_stream(data, stm_offset as u64) {
            Ok(side) => {
                for (id, entry) in side.entries {
                    section.entries.entry(id).or_insert(entry);
                }
            },
            Err(e) => log::warn!("Ignoring unreadable /XRefStm at {}: {}", stm_offset, e),
        }
    }

    Ok(section)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_ws(&mut self) {
        while self.pos < self.data.len() && is_whitespace(self.data[self.pos]) {
            self.pos += 1;
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn number(&mut self) -> Result<u64> {
        self.skip_ws();
        let begin = self.pos;
        while self.pos < self.data.len() && self.data[self.pos].is_ascii_digit() {
            self.pos += 1;
        }
        std::str::from_utf8(&self.data[begin..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(Error::InvalidXref)
    }

    fn byte(&mut self) -> Option<u8> {
        self.skip_ws();
        let b = self.data.get(self.pos).copied();
        self.pos += 1;
        b
    }
}

/// Parse a traditional cross-reference table:
///
/// ```text
/// xref
/// 0 6
/// 0000000000 65535 f
/// 0000000018 00000 n
/// ...
/// trailer
/// << /Size 6 /Root 1 0 R >>
/// ```
fn parse_traditional_xref(data: &[u8], offset: u64) -> Result<XRefSection> {
    let mut cur = Cursor {
        data,
        pos: offset as usize,
    };
    cur.skip_ws();
    cur.pos += b"xref".len();

    let mut entries = BTreeMap::new();
    loop {
        cur.skip_ws();
        if cur.rest().starts_with(b"trailer") {
            cur.pos += b"trailer".len();
            break;
        }
        if cur.rest().is_empty() {
            return Err(Error::InvalidXref);
        }

        let first = cur.number()? as u32;
        let count = cur.number()? as u32;
        if count > 10_000_000 {
            return Err(Error::CorruptDocument("xref subsection count exceeds limit".to_string()));
        }

        for i in 0..count {
            let entry_offset = cur.number()?;
            let generation = cur.number()? as u16;
            let entry = match cur.byte() {
                Some(b'n') => XRefEntry::uncompressed(entry_offset, generation),
                Some(b'f') => XRefEntry::free(entry_offset, generation),
                other => {
                    log::warn!("Invalid xref type flag {:?} for object {}", other, first + i);
                    XRefEntry::free(0, generation)
                },
            };
            entries.insert(first + i, entry);
        }
    }

    let (_, trailer) = parse_object(cur.rest()).map_err(|_| Error::InvalidXref)?;
    let trailer = match trailer {
        Object::Dictionary(d) => d,
        _ => return Err(Error::InvalidXref),
    };

    Ok(XRefSection {
        offset,
        entries,
        trailer,
        stream_id: None,
    })
}

/// Parse a cross-reference stream (`/Type /XRef`).
///
/// Each row holds three big-endian fields sized by `/W`: the entry type
/// (0 free, 1 uncompressed, 2 compressed) and two type-specific numbers.
fn parse_xref_stream(data: &[u8], offset: u64) -> Result<XRefSection> {
    let start = offset as usize;
    if start >= data.len() {
        return Err(Error::InvalidXref);
    }
    let (id, obj) = parse_indirect_object(&data[start..], start)?;

    if obj.dict_type() != Some("XRef") {
        return Err(Error::CorruptDocument(format!("object {} is not an xref stream", id)));
    }
    let dict = obj.as_dict().cloned().unwrap_or_default();

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|o| o.as_array())
        .map(|arr| arr.iter().filter_map(|o| o.as_integer()).map(|w| w as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(Error::CorruptDocument("invalid /W array in xref stream".to_string()));
    }
    let (w1, w2, w3) = (widths[0], widths[1], widths[2]);
    let row_len = w1 + w2 + w3;

    let size = dict.get("Size").and_then(|o| o.as_integer()).unwrap_or(0) as u32;
    let ranges: Vec<(u32, u32)> = match dict.get("Index").and_then(|o| o.as_array()) {
        Some(index) => index
            .chunks(2)
            .filter_map(|pair| match pair {
                [a, b] => Some((a.as_integer()? as u32, b.as_integer()? as u32)),
                _ => None,
            })
            .collect(),
        None => vec![(0, size)],
    };

    let decoded = obj.decode_stream_data()?;
    let mut entries = BTreeMap::new();
    let mut rows = decoded.chunks_exact(row_len.max(1));

    for (first, count) in ranges {
        for i in 0..count {
            let row = rows
                .next()
                .ok_or_else(|| Error::CorruptDocument("truncated xref stream data".to_string()))?;
            let entry_type = if w1 > 0 { read_int(&row[..w1]) } else { 1 };
            let field2 = read_int(&row[w1..w1 + w2]);
            let field3 = read_int(&row[w1 + w2..]);

            let entry = match entry_type {
                0 => XRefEntry::free(field2, field3 as u16),
                1 => XRefEntry::uncompressed(field2, field3 as u16),
                2 => XRefEntry::compressed(field2, field3 as u16),
                // Unknown types are treated as null references
                _ => continue,
            };
            entries.insert(first + i, entry);
        }
    }

    Ok(XRefSection {
        offset,
        entries,
        trailer: dict,
        stream_id: Some(id.id),
    })
}

fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

//! ByteRange reservation for PDF signatures.
//!
//! PDF digital signatures use a ByteRange array to specify which portions
//! of the document are covered by the signature. The signature itself is
//! stored in a placeholder that is excluded from the signed bytes.
//!
//! ## ByteRange Format
//!
//! The ByteRange is an array of four integers:
//! `[offset1, length1, offset2, length2]`
//!
//! Where:
//! - `offset1` = 0 (start of file)
//! - `length1` = byte offset of the `<` opening the signature value
//! - `offset2` = byte offset just after the closing `>`
//! - `length2` = remaining bytes to end of file
//!
//! ## Reservation
//!
//! The signature dictionary is first written with a wide placeholder
//! ByteRange and a zero-filled `/Contents` string. Once the final file
//! length is known the ByteRange text is overwritten in place (padded with
//! spaces to the same width), and once the container is computed its hex
//! encoding replaces the zeros. Neither step changes the file length.

use crate::error::{Error, Result};
use crate::object::Object;
use std::ops::Range;

/// Value written for each unknown ByteRange entry. Wide enough for any
/// offset below 10 GB.
pub const PLACEHOLDER_VALUE: i64 = 9_999_999_999;

/// A parsed `/ByteRange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// Start of the first span (0 for a well-formed signature)
    pub offset1: usize,
    /// Length of the first span
    pub length1: usize,
    /// Start of the second span
    pub offset2: usize,
    /// Length of the second span
    pub length2: usize,
}

impl ByteRange {
    /// Create a ByteRange from its four components.
    pub fn new(offset1: usize, length1: usize, offset2: usize, length2: usize) -> Self {
        Self {
            offset1,
            length1,
            offset2,
            length2,
        }
    }

    /// Parse `[a b c d]`; rejects negative values and the wrong arity.
    pub fn from_array(values: &[i64]) -> Result<Self> {
        if values.len() != 4 {
            return Err(Error::CorruptDocument(format!(
                "ByteRange has {} entries, expected 4",
                values.len()
            )));
        }
        let mut parts = [0usize; 4];
        for (slot, &value) in parts.iter_mut().zip(values) {
            *slot = usize::try_from(value)
                .map_err(|_| Error::CorruptDocument(format!("negative ByteRange entry {}", value)))?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }

    /// Parse a `/ByteRange` array object.
    pub fn from_object(obj: &Object) -> Result<Self> {
        let arr = obj
            .as_array()
            .ok_or_else(|| Error::CorruptDocument("ByteRange is not an array".to_string()))?;
        let values: Vec<i64> = arr
            .iter()
            .map(|o| {
                o.as_integer()
                    .ok_or_else(|| Error::CorruptDocument("non-integer ByteRange entry".to_string()))
            })
            .collect::<Result<_>>()?;
        Self::from_array(&values)
    }

    /// The four values in PDF order.
    pub fn to_array(&self) -> [i64; 4] {
        [
            self.offset1 as i64,
            self.length1 as i64,
            self.offset2 as i64,
            self.length2 as i64,
        ]
    }

    /// The ByteRange as a PDF array object.
    pub fn to_object(&self) -> Object {
        Object::Array(self.to_array().iter().map(|&v| Object::Integer(v)).collect())
    }

    /// Format a ByteRange array as a PDF array string.
    pub fn format(&self) -> String {
        format!("[{} {} {} {}]", self.offset1, self.length1, self.offset2, self.length2)
    }

    /// The excluded window between the two spans.
    pub fn gap(&self) -> Range<usize> {
        self.offset1 + self.length1..self.offset2
    }

    /// Offset just past the second span.
    pub fn end(&self) -> usize {
        self.offset2 + self.length2
    }

    /// Whether the two spans and the gap cover `file_len` bytes exactly.
    pub fn covers(&self, file_len: usize) -> bool {
        self.offset1 == 0 && self.end() == file_len
    }

    /// Borrow the two signed spans.
    pub fn spans<'a>(&self, data: &'a [u8]) -> Result<[&'a [u8]; 2]> {
        let first = self.offset1.checked_add(self.length1);
        let second = self.offset2.checked_add(self.length2);
        match (first, second) {
            (Some(e1), Some(e2)) if e1 <= data.len() && e2 <= data.len() && e1 <= self.offset2 => {
                Ok([&data[self.offset1..e1], &data[self.offset2..e2]])
            },
            _ => Err(Error::CorruptDocument(format!(
                "ByteRange {} exceeds file size {}",
                self.format(),
                data.len()
            ))),
        }
    }

    /// Extract the bytes to be signed: the concatenation of both spans.
    pub fn extract_signed_bytes(&self, data: &[u8]) -> Result<Vec<u8>> {
        let [first, second] = self.spans(data)?;
        let mut signed = Vec::with_capacity(first.len() + second.len());
        signed.extend_from_slice(first);
        signed.extend_from_slice(second);
        Ok(signed)
    }

    /// Check that the gap holds exactly one hex string `<...>` and nothing else.
    pub fn check_window(&self, data: &[u8]) -> std::result::Result<(), String> {
        if self.offset1 != 0 {
            return Err(format!("first span starts at {}", self.offset1));
        }
        let gap = self.gap();
        if gap.start >= gap.end || gap.end > data.len() {
            return Err(format!("window {:?} is empty or out of bounds", gap));
        }
        let window = &data[gap];
        if window.len() < 2 || window[0] != b'<' || window[window.len() - 1] != b'>' {
            return Err("window is not a hex string".to_string());
        }
        if !window[1..window.len() - 1].iter().all(|b| b.is_ascii_hexdigit()) {
            return Err("window contains non-hex bytes".to_string());
        }
        Ok(())
    }
}

/// Where the placeholders of a serialized signature dictionary sit in the output buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// The placeholder `[...]` array text, brackets included
    pub byte_range: Range<usize>,
    /// The `<...>` hex string, brackets included
    pub contents: Range<usize>,
}

impl Reservation {
    /// Container bytes that fit in the window.
    pub fn capacity(&self) -> usize {
        (self.contents.len() - 2) / 2
    }

    /// ByteRange bracketing the contents window of a file of `file_len` bytes.
    pub fn byte_range(&self, file_len: usize) -> ByteRange {
        let after = self.contents.end;
        ByteRange::new(0, self.contents.start, after, file_len - after)
    }
}

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy)]
pub struct ByteRangeCalculator {
    /// Size of the reserved container in bytes (before hex encoding)
    estimated_size: usize,
}

impl ByteRangeCalculator {
    /// Create a new ByteRange calculator with the specified signature size.
    ///
    /// The placeholder size will be `(signature_size * 2) + 2` because the
    /// signature is hex-encoded and enclosed in angle brackets.
    pub fn new(estimated_signature_size: usize) -> Self {
        Self {
            estimated_size: estimated_signature_size.max(1),
        }
    }

    /// Container capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.estimated_size
    }

    /// Get the placeholder size (for the /Contents value).
    pub fn placeholder_size(&self) -> usize {
        self.estimated_size * 2 + 2
    }

    /// The zero-filled `/Contents` value; serializes as `<00...00>`.
    pub fn placeholder_contents(&self) -> Object {
        Object::String(vec![0; self.estimated_size])
    }

    /// The `/ByteRange` value written before offsets are known.
    pub fn placeholder_byte_range() -> Object {
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(PLACEHOLDER_VALUE),
            Object::Integer(PLACEHOLDER_VALUE),
            Object::Integer(PLACEHOLDER_VALUE),
        ])
    }

    /// Check the placeholder spans reported by the serializer and turn
    /// them into a [`Reservation`].
    ///
    /// `byte_range` must cover the `[...]` placeholder array and `contents`
    /// the zero-filled `<...>` string, both taken from where the values were
    /// written rather than from searching the output.
    pub fn locate(&self, data: &[u8], byte_range: Range<usize>, contents: Range<usize>) -> Result<Reservation> {
        let array = placeholder_slot(data, &byte_range, "ByteRange")?;
        if array[0] != b'[' || array[array.len() - 1] != b']' {
            return Err(Error::CorruptDocument("ByteRange placeholder is not an array".to_string()));
        }
        let window = placeholder_slot(data, &contents, "Contents")?;
        if window[0] != b'<' || window[window.len() - 1] != b'>' || window[1..window.len() - 1].iter().any(|&b| b != b'0') {
            return Err(Error::CorruptDocument("Contents placeholder is not a zeroed hex string".to_string()));
        }

        let reservation = Reservation { byte_range, contents };
        if reservation.capacity() != self.estimated_size {
            return Err(Error::CorruptDocument(format!(
                "Contents window holds {} bytes, expected {}",
                reservation.capacity(),
                self.estimated_size
            )));
        }
        Ok(reservation)
    }

    /// Calculate the ByteRange for a file of `file_size` bytes.
    pub fn calculate_byte_range(&self, file_size: usize, reservation: &Reservation) -> ByteRange {
        reservation.byte_range(file_size)
    }
}

fn placeholder_slot<'d>(data: &'d [u8], span: &Range<usize>, what: &str) -> Result<&'d [u8]> {
    data.get(span.clone())
        .filter(|s| s.len() >= 2)
        .ok_or_else(|| Error::CorruptDocument(format!("{} placeholder {:?} out of bounds", what, span)))
}

/// Overwrite the placeholder ByteRange text, padding with spaces.
pub fn write_byte_range(buf: &mut [u8], reservation: &Reservation, byte_range: &ByteRange) -> Result<()> {
    let text = byte_range.format();
    let slot = reservation.byte_range.clone();
    if text.len() > slot.len() {
        return Err(Error::CorruptDocument(format!(
            "ByteRange {} does not fit in {} reserved bytes",
            text,
            slot.len()
        )));
    }
    let target = &mut buf[slot];
    target.fill(b' ');
    target[..text.len()].copy_from_slice(text.as_bytes());
    Ok(())
}

/// Write `container` into the reserved window as zero-padded uppercase hex.
///
/// Fails with [`Error::ReservationTooSmall`] before touching `buf` when the
/// container does not fit.
pub fn splice_contents(buf: &mut [u8], reservation: &Reservation, container: &[u8]) -> Result<()> {
    let capacity = reservation.capacity();
    if container.len() > capacity {
        return Err(Error::ReservationTooSmall {
            needed: container.len(),
            reserved: capacity,
        });
    }
    let inner = reservation.contents.start + 1..reservation.contents.end - 1;
    let target = &mut buf[inner];
    let encoded = hex::encode_upper(container);
    target.fill(b'0');
    target[..encoded.len()].copy_from_slice(encoded.as_bytes());
    Ok(())
}

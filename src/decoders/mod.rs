//! Stream decoder implementations for PDF filters.
//!
//! Signed documents only need what cross-reference streams and object streams
//! use in practice: FlateDecode (with PNG predictors) and ASCIIHexDecode.

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::{FlateDecoder, flate_encode};
pub use predictor::{DecodeParams, decode_predictor};

/// Upper bound on decoded stream size (decompression bomb protection).
const MAX_DECOMPRESSED_SIZE: usize = 100 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of this decoder (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

/// ASCIIHexDecode filter.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let end = input.iter().position(|&b| b == b'>').unwrap_or(input.len());
        crate::parser::decode_hex(&input[..end])
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

/// Decode stream data through a filter pipeline, then undo any predictor.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder: Box<dyn StreamDecoder> = match filter_name.as_str() {
            "FlateDecode" | "Fl" => Box::new(FlateDecoder),
            "ASCIIHexDecode" | "AHx" => Box::new(AsciiHexDecoder),
            _ => return Err(Error::UnsupportedFilter(filter_name.clone())),
        };

        current = decoder.decode(&current)?;
        log::trace!("{} produced {} bytes", decoder.name(), current.len());

        if current.len() > MAX_DECOMPRESSED_SIZE {
            return Err(Error::Decode(format!(
                "decompressed size {} bytes exceeds limit {} bytes",
                current.len(),
                MAX_DECOMPRESSED_SIZE
            )));
        }
    }

    match params {
        Some(params) if params.predictor != 1 => decode_predictor(&current, params),
        _ => Ok(current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_hex_pipeline() {
        let out = decode_stream_with_params(b"48656C6C6F>", &["ASCIIHexDecode".to_string()], None)
            .unwrap();
        assert_eq!(out, b"Hello");
    }

    #[test]
    fn test_flate_round_trip_through_pipeline() {
        let encoded = flate_encode(b"xref stream rows").unwrap();
        let out = decode_stream_with_params(&encoded, &["FlateDecode".to_string()], None).unwrap();
        assert_eq!(out, b"xref stream rows");
    }

    #[test]
    fn test_unsupported_filter() {
        let result = decode_stream_with_params(b"", &["JBIG2Decode".to_string()], None);
        assert!(matches!(result, Err(Error::UnsupportedFilter(_))));
    }
}

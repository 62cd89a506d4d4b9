//! FlateDecode (zlib/deflate) implementation.
//!
//! Uses the flate2 crate for both directions: decoding streams read from
//! existing documents and compressing the cross-reference streams we append.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// FlateDecode filter implementation.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            Err(e) if !output.is_empty() => {
                log::warn!(
                    "FlateDecode partial recovery: extracted {} bytes before corruption: {}",
                    output.len(),
                    e
                );
                Ok(output)
            },
            Err(e) => {
                // Some writers omit the zlib header and emit raw deflate data
                log::debug!("Zlib decode failed ({}), trying raw deflate", e);
                output.clear();
                DeflateDecoder::new(input)
                    .read_to_end(&mut output)
                    .map_err(|err| Error::Decode(format!("FlateDecode failed: {}", err)))?;
                Ok(output)
            },
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}

/// Compress data with zlib for a `/FlateDecode` stream.
pub fn flate_encode(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

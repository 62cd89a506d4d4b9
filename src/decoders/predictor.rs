//! PNG predictor decoding for Flate streams.
//!
//! Cross-reference streams are routinely written with `/Predictor 12` (PNG Up),
//! so the PNG family (10-15) is supported. TIFF predictor 2 is not.

use crate::error::{Error, Result};

/// Decode parameters for stream decoders.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 10-15 = PNG)
    pub predictor: i64,
    /// Number of columns (width in samples)
    pub columns: usize,
    /// Number of color components per sample (default 1)
    pub colors: usize,
    /// Bits per component (default 8)
    pub bits_per_component: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl DecodeParams {
    /// Number of bytes of sample data per row (without the PNG tag byte).
    pub fn pixel_bytes_per_row(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Reverse predictor encoding.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        10..=15 => decode_png_predictor(data, params),
        other => Err(Error::Decode(format!("Unsupported predictor: {}", other))),
    }
}

fn decode_png_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let pixel_bytes = params.pixel_bytes_per_row();
    let row_len = pixel_bytes + 1;
    if pixel_bytes == 0 || data.len() % row_len != 0 {
        return Err(Error::Decode(format!(
            "Data length {} is not a multiple of row size {}",
            data.len(),
            row_len
        )));
    }

    let bpp = params.bytes_per_pixel();
    let mut output: Vec<u8> = Vec::with_capacity(data.len());
    let mut prev = vec![0u8; pixel_bytes];

    for row in data.chunks(row_len) {
        let tag = row[0];
        let mut cur = row[1..].to_vec();

        for i in 0..pixel_bytes {
            let left = if i >= bpp { cur[i - bpp] } else { 0 };
            let up = prev[i];
            let up_left = if i >= bpp { prev[i - bpp] } else { 0 };
            let predicted = match tag {
                0 => 0,
                1 => left,
                2 => up,
                3 => ((left as u16 + up as u16) / 2) as u8,
                4 => paeth(left, up, up_left),
                _ => return Err(Error::Decode(format!("Invalid PNG predictor tag: {}", tag))),
            };
            cur[i] = cur[i].wrapping_add(predicted);
        }

        output.extend_from_slice(&cur);
        prev = cur;
    }

    Ok(output)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = a as i16 + b as i16 - c as i16;
    let pa = (p - a as i16).abs();
    let pb = (p - b as i16).abs();
    let pc = (p - c as i16).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(columns: usize) -> DecodeParams {
        DecodeParams {
            predictor: 12,
            columns,
            ..Default::default()
        }
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of 3 bytes, second row encoded as "Up" differences
        let data = [2, 1, 2, 3, 2, 1, 1, 1];
        let out = decode_predictor(&data, &params(3)).unwrap();
        assert_eq!(out, vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_png_sub_predictor() {
        let data = [1, 5, 1, 1];
        let out = decode_predictor(&data, &params(3)).unwrap();
        assert_eq!(out, vec![5, 6, 7]);
    }

    #[test]
    fn test_png_bad_length() {
        assert!(decode_predictor(&[2, 1, 2], &params(3)).is_err());
    }

    #[test]
    fn test_tiff_predictor_unsupported() {
        let p = DecodeParams {
            predictor: 2,
            ..Default::default()
        };
        assert!(decode_predictor(&[1, 2, 3], &p).is_err());
    }
}

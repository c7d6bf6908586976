//! PNG predictors (10-15) as used by cross-reference streams.

use crate::error::{Error, Result};

/// `/DecodeParms` values relevant to predictor decoding.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Predictor algorithm (1 = none, 10-15 = PNG)
    pub predictor: i64,
    /// Samples per row
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per component
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
    fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }

    fn pixel_bytes(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }
}

/// Reverse the predictor encoding described by `params`.
pub fn decode_predictor(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        10..=15 => decode_png(data, params),
        other => Err(Error::Decode(format!("Unsupported predictor: {}", other))),
    }
}

fn decode_png(data: &[u8], params: &DecodeParams) -> Result<Vec<u8>> {
    let row_len = params.row_bytes();
    let stride = row_len + 1;
    if row_len == 0 || data.len() % stride != 0 {
        return Err(Error::Decode(format!(
            "predictor data length {} is not a multiple of row size {}",
            data.len(),
            stride
        )));
    }

    let bpp = params.pixel_bytes();
    let mut output = Vec::with_capacity(data.len() / stride * row_len);
    let mut prev = vec![0u8; row_len];

    for row in data.chunks(stride) {
        let (tag, encoded) = (row[0], &row[1..]);
        let mut current = vec![0u8; row_len];
        for i in 0..row_len {
            let left = if i >= bpp { current[i - bpp] } else { 0 };
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
            current[i] = encoded[i].wrapping_add(predicted);
        }
        output.extend_from_slice(&current);
        prev = current;
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
    fn test_up_predictor_rows() {
        // Typical xref stream rows: W [1 2 1], Up predictor.
        let data = [2, 1, 0, 16, 0, 2, 0, 0, 5, 0];
        let out = decode_predictor(&data, &params(4)).unwrap();
        assert_eq!(out, vec![1, 0, 16, 0, 1, 0, 21, 0]);
    }

    #[test]
    fn test_sub_and_none_tags() {
        let data = [0, 9, 9, 1, 1, 1];
        let out = decode_predictor(&data, &params(2)).unwrap();
        assert_eq!(out, vec![9, 9, 1, 2]);
    }

    #[test]
    fn test_ragged_data_rejected() {
        assert!(decode_predictor(&[2, 1, 2], &params(4)).is_err());
    }

    #[test]
    fn test_paeth_prefers_left_on_ties() {
        assert_eq!(paeth(10, 10, 10), 10);
        assert_eq!(paeth(0, 5, 0), 5);
    }
}

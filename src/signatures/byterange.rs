//! ByteRange calculation for PDF signatures.
//!
//! A signature covers the whole revision except the `/Contents` value that
//! will hold it. `/ByteRange` names the two covered spans:
//!
//! ```text
//! [0  contents_start  contents_end  revision_end - contents_end]
//! ```
//!
//! Both placeholders are written at a fixed width before the digest is known
//! and patched in place afterwards, so no other offset in the file moves.

use crate::error::{Error, Result};
use crate::writer::object_serializer::hex_upper;

/// Width reserved for the `/ByteRange` array text, padded with spaces.
pub const BYTE_RANGE_WIDTH: usize = 48;

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone)]
pub struct ByteRangeCalculator {
    /// Size of the `/Contents` value: hex digits plus the two angle brackets
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Reserve room for a DER signature of up to `reserved_bytes` bytes.
    pub fn new(reserved_bytes: usize) -> Self {
        Self {
            placeholder_size: reserved_bytes * 2 + 2,
        }
    }

    /// Create a calculator with an exact placeholder size (brackets included).
    pub fn with_placeholder_size(placeholder_size: usize) -> Self {
        Self { placeholder_size }
    }

    /// Size of the `/Contents` value, brackets included.
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// `<000...0>` filling the whole placeholder.
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size.saturating_sub(2)))
    }

    /// Fixed-width `/ByteRange` placeholder.
    pub fn byte_range_placeholder() -> String {
        pad_byte_range(&[0, 0, 0, 0])
    }

    /// ByteRange for a revision of `file_size` bytes whose `/Contents` value
    /// starts at `contents_offset` (the `<`).
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [i64; 4] {
        let after = contents_offset + self.placeholder_size;
        [0, contents_offset as i64, after as i64, file_size as i64 - after as i64]
    }

    /// `[a b c d]` as PDF array text.
    pub fn format_byte_range(byte_range: &[i64; 4]) -> String {
        format!("[{} {} {} {}]", byte_range[0], byte_range[1], byte_range[2], byte_range[3])
    }

    /// Overwrite the `/ByteRange` placeholder at `offset` with `byte_range`.
    pub fn patch_byte_range(pdf_data: &mut [u8], offset: usize, byte_range: &[i64; 4]) -> Result<()> {
        let text = pad_byte_range(byte_range);
        if text.len() != BYTE_RANGE_WIDTH {
            return Err(Error::Signing(format!(
                "ByteRange {} does not fit its placeholder",
                Self::format_byte_range(byte_range)
            )));
        }
        let slot = pdf_data
            .get_mut(offset..offset + BYTE_RANGE_WIDTH)
            .ok_or_else(|| Error::Signing("ByteRange placeholder beyond end of data".to_string()))?;
        if slot.first() != Some(&b'[') {
            return Err(Error::Signing(format!("no ByteRange placeholder at offset {}", offset)));
        }
        slot.copy_from_slice(text.as_bytes());
        Ok(())
    }

    /// Concatenate the two spans named by `byte_range`.
    pub fn extract_signed_bytes(pdf_data: &[u8], byte_range: &[i64; 4]) -> Result<Vec<u8>> {
        let [o1, l1, o2, l2] = checked_spans(byte_range)?;

        if o1 + l1 > pdf_data.len() {
            return Err(Error::malformed(format!(
                "ByteRange first span exceeds file size: {} + {} > {}",
                o1,
                l1,
                pdf_data.len()
            )));
        }
        if o2 + l2 > pdf_data.len() {
            return Err(Error::malformed(format!(
                "ByteRange second span exceeds file size: {} + {} > {}",
                o2,
                l2,
                pdf_data.len()
            )));
        }

        let mut signed_bytes = Vec::with_capacity(l1 + l2);
        signed_bytes.extend_from_slice(&pdf_data[o1..o1 + l1]);
        signed_bytes.extend_from_slice(&pdf_data[o2..o2 + l2]);
        Ok(signed_bytes)
    }

    /// Check that `byte_range` starts at 0, ends at `expected_end`, and that
    /// the gap between the spans is exactly a hex string.
    pub fn validate_byte_range(pdf_data: &[u8], byte_range: &[i64; 4], expected_end: usize) -> Result<()> {
        let [o1, l1, o2, l2] = checked_spans(byte_range)?;

        if o1 != 0 {
            return Err(Error::malformed(format!("ByteRange must start at 0, got {}", o1)));
        }
        if o2 + l2 != expected_end {
            return Err(Error::malformed(format!(
                "ByteRange must end at {}, got {}",
                expected_end,
                o2 + l2
            )));
        }
        if l1 >= o2 {
            return Err(Error::malformed(format!(
                "ByteRange first span ({}) overlaps second span start ({})",
                l1, o2
            )));
        }
        if pdf_data.get(l1) != Some(&b'<') || pdf_data.get(o2 - 1) != Some(&b'>') {
            return Err(Error::malformed("ByteRange gap is not the /Contents hex string"));
        }
        Ok(())
    }

    /// Offset of the `<` opening the `/Contents` value, searching from `from`.
    pub fn find_contents_offset(pdf_data: &[u8], from: usize) -> Option<usize> {
        let window = pdf_data.get(from..)?;
        let pattern = b"/Contents";
        let pos = window.windows(pattern.len()).position(|w| w == pattern)?;
        let after = pos + pattern.len();
        window[after..]
            .iter()
            .position(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r'))
            .map(|p| after + p)
            .filter(|&p| window[p] == b'<')
            .map(|p| from + p)
    }

    /// Write `signature` (DER) into the `/Contents` placeholder, zero padded.
    pub fn insert_signature(&self, pdf_data: &mut [u8], contents_offset: usize, signature: &[u8]) -> Result<()> {
        let signature_hex = hex_upper(signature);
        if signature_hex.len() + 2 > self.placeholder_size {
            return Err(Error::Signing(format!(
                "signature ({} bytes) exceeds reserved /Contents space ({} bytes)",
                signature.len(),
                (self.placeholder_size - 2) / 2
            )));
        }

        let mut value = String::with_capacity(self.placeholder_size);
        value.push('<');
        value.push_str(&signature_hex);
        value.push_str(&"0".repeat(self.placeholder_size - 2 - signature_hex.len()));
        value.push('>');

        let slot = pdf_data
            .get_mut(contents_offset..contents_offset + self.placeholder_size)
            .ok_or_else(|| Error::Signing("signature insertion would exceed file bounds".to_string()))?;
        slot.copy_from_slice(value.as_bytes());
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(8192)
    }
}

fn pad_byte_range(byte_range: &[i64; 4]) -> String {
    let mut text = ByteRangeCalculator::format_byte_range(byte_range);
    while text.len() < BYTE_RANGE_WIDTH {
        text.push(' ');
    }
    text
}

fn checked_spans(byte_range: &[i64; 4]) -> Result<[usize; 4]> {
    let mut out = [0usize; 4];
    for (slot, value) in out.iter_mut().zip(byte_range) {
        *slot = usize::try_from(*value)
            .map_err(|_| Error::malformed(format!("negative ByteRange value {}", value)))?;
    }
    if out[0].checked_add(out[1]).is_none() || out[2].checked_add(out[3]).is_none() {
        return Err(Error::malformed("ByteRange overflows"));
    }
    Ok(out)
}

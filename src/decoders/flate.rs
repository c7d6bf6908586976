//! FlateDecode (zlib/deflate) using `flate2`.

use super::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            Err(e) if !output.is_empty() => {
                log::warn!("FlateDecode recovered {} bytes before error: {}", output.len(), e);
                Ok(output)
            },
            Err(zlib_err) => {
                // Some writers omit the zlib wrapper.
                output.clear();
                DeflateDecoder::new(input)
                    .read_to_end(&mut output)
                    .map_err(|_| Error::Decode(format!("FlateDecode failed: {}", zlib_err)))?;
                Ok(output)
            },
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_zlib_stream() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"1 0 obj").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&compressed).unwrap(), b"1 0 obj");
    }

    #[test]
    fn test_raw_deflate_fallback() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate body").unwrap();
        let compressed = enc.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&compressed).unwrap(), b"raw deflate body");
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(FlateDecoder.decode(b"\x00\x01not flate").is_err());
    }
}

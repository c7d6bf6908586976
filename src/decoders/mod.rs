//! Stream filters needed to read cross-reference and object streams.
//!
//! Signing only ever has to look inside the structural streams of a document
//! (`/Type /XRef` and `/Type /ObjStm`), which in practice are FlateDecode with
//! an optional PNG predictor. Anything else is rejected with
//! [`Error::UnsupportedFilter`].

use crate::error::{Error, Result};

mod flate;
mod predictor;

pub use flate::FlateDecoder;
pub use predictor::{decode_predictor, DecodeParams};

/// A single PDF stream filter.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Filter name as written in the stream dictionary (e.g. "FlateDecode").
    fn name(&self) -> &str;
}

fn decoder_for(filter: &str) -> Result<Box<dyn StreamDecoder>> {
    match filter {
        "FlateDecode" | "Fl" => Ok(Box::new(FlateDecoder)),
        other => Err(Error::UnsupportedFilter(other.to_string())),
    }
}

/// Apply a filter pipeline, then the predictor from `params` if any.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();
    for filter in filters {
        let decoder = decoder_for(filter)?;
        current = decoder.decode(&current)?;
        log::trace!("{} produced {} bytes", decoder.name(), current.len());
    }

    match params {
        Some(p) if p.predictor > 1 => decode_predictor(&current, p),
        _ => Ok(current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_filters_is_identity() {
        let out = decode_stream_with_params(b"abc", &[], None).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_unknown_filter_rejected() {
        let err = decode_stream_with_params(b"abc", &["DCTDecode".to_string()], None);
        assert!(matches!(err, Err(Error::UnsupportedFilter(name)) if name == "DCTDecode"));
    }
}

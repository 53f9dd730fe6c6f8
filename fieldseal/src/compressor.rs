//! Payload compression applied before encryption.

use crate::error::Error;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fmt;
use std::io::{Read, Write};

/// Default size above which payloads are compressed, in bytes.
///
/// Below this, the zlib framing overhead outweighs any savings.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 140;

/// Reversible byte transform applied to plaintext before encryption.
///
/// Implementations must satisfy `inflate(deflate(x)) == x` for every input,
/// including the empty one.
pub trait Compressor: Send + Sync + fmt::Debug {
    /// Compresses `data`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Encryption` if compression fails.
    fn deflate(&self, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Decompresses `data`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidMessage` if `data` is not valid compressed input.
    fn inflate(&self, data: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Zlib (deflate) compressor.
#[derive(Debug, Clone, Copy)]
pub struct ZlibCompressor {
    level: Compression,
}

impl ZlibCompressor {
    /// Creates a compressor with the given level (0 = store, 9 = best).
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self { level: Compression::new(level.min(9)) }
    }
}

impl Default for ZlibCompressor {
    fn default() -> Self {
        Self { level: Compression::default() }
    }
}

impl Compressor for ZlibCompressor {
    fn deflate(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut encoder = ZlibEncoder::new(Vec::new(), self.level);
        encoder
            .write_all(data)
            .map_err(|e| Error::Encryption(format!("compression failed: {e}")))?;
        encoder.finish().map_err(|e| Error::Encryption(format!("compression failed: {e}")))
    }

    fn inflate(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let mut decoder = ZlibDecoder::new(data);
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(|e| Error::InvalidMessage(format!("payload does not inflate: {e}")))?;
        Ok(inflated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zlib_round_trip() {
        let compressor = ZlibCompressor::default();
        let data = b"lorem ipsum ".repeat(50);

        let deflated = compressor.deflate(&data).expect("deflate failed");
        assert!(deflated.len() < data.len());

        let inflated = compressor.inflate(&deflated).expect("inflate failed");
        assert_eq!(inflated, data);
    }

    #[test]
    fn test_zlib_empty_input() {
        let compressor = ZlibCompressor::new(9);

        let deflated = compressor.deflate(b"").unwrap();
        assert_eq!(compressor.inflate(&deflated).unwrap(), b"");
    }

    #[test]
    fn test_inflate_garbage_is_invalid_message() {
        let compressor = ZlibCompressor::default();

        let result = compressor.inflate(b"definitely not zlib");
        assert!(matches!(result, Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn test_level_is_clamped() {
        let compressor = ZlibCompressor::new(42);
        let deflated = compressor.deflate(b"abc").unwrap();

        assert_eq!(compressor.inflate(&deflated).unwrap(), b"abc");
    }

    proptest! {
        #[test]
        fn prop_inflate_inverts_deflate(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let compressor = ZlibCompressor::default();
            let deflated = compressor.deflate(&data).unwrap();
            prop_assert_eq!(compressor.inflate(&deflated).unwrap(), data);
        }
    }
}

//! Payload compression for cache entries.
//!
//! The cache manager only keeps a compressed payload when it is actually
//! smaller than the original; [`CompressionService::compress_if_smaller`]
//! encodes that rule so callers cannot get it wrong.

use std::io::{Read, Write};

use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use thiserror::Error;

/// Compression failures. Both directions wrap the underlying I/O error.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("{algorithm:?} compression failed: {source}")]
    Compress {
        algorithm: CompressionAlgorithm,
        #[source]
        source: std::io::Error,
    },
    #[error("{algorithm:?} decompression failed: {source}")]
    Decompress {
        algorithm: CompressionAlgorithm,
        #[source]
        source: std::io::Error,
    },
}

/// Compression algorithms supported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionAlgorithm {
    Gzip,
    Zlib,
}

/// Stateless compressor configured with an algorithm and level.
#[derive(Debug, Clone, Copy)]
pub struct CompressionService {
    algorithm: CompressionAlgorithm,
    level: u32,
}

impl CompressionService {
    /// Create a compression service; levels above 9 are clamped.
    pub fn new(algorithm: CompressionAlgorithm, level: u32) -> Self {
        Self { algorithm, level: level.min(9) }
    }

    /// Gzip at the given level
    pub fn gzip(level: u32) -> Self {
        Self::new(CompressionAlgorithm::Gzip, level)
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Compress data
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let level = Compression::new(self.level);
        let wrap = |source| CompressionError::Compress { algorithm: self.algorithm, source };

        match self.algorithm {
            CompressionAlgorithm::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(data).map_err(wrap)?;
                encoder.finish().map_err(wrap)
            }
            CompressionAlgorithm::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), level);
                encoder.write_all(data).map_err(wrap)?;
                encoder.finish().map_err(wrap)
            }
        }
    }

    /// Decompress data
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let mut out = Vec::new();
        let result = match self.algorithm {
            CompressionAlgorithm::Gzip => GzDecoder::new(data).read_to_end(&mut out),
            CompressionAlgorithm::Zlib => ZlibDecoder::new(data).read_to_end(&mut out),
        };
        result
            .map(|_| out)
            .map_err(|source| CompressionError::Decompress { algorithm: self.algorithm, source })
    }

    /// Compress when `data` is at least `min_size` bytes and the result is
    /// strictly smaller.
    ///
    /// Returns `Ok(None)` when the original should be stored as-is.
    pub fn compress_if_smaller(
        &self,
        data: &[u8],
        min_size: usize,
    ) -> Result<Option<Vec<u8>>, CompressionError> {
        if data.len() < min_size {
            return Ok(None);
        }
        let compressed = self.compress(data)?;
        if compressed.len() < data.len() {
            Ok(Some(compressed))
        } else {
            Ok(None)
        }
    }

    /// Fraction of bytes saved, in `0.0..=1.0`. Zero when nothing was saved.
    pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
        if original == 0 || compressed >= original {
            return 0.0;
        }
        1.0 - (compressed as f64 / original as f64)
    }
}

impl Default for CompressionService {
    fn default() -> Self {
        Self::new(CompressionAlgorithm::Gzip, 6)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for compression.
    use super::*;

    /// Validates gzip and zlib both invert correctly.
    ///
    /// Assertions:
    /// - Confirms `decompressed` equals `original` for both algorithms.
    /// - Ensures repetitive data actually shrinks.
    #[test]
    fn test_compress_decompress() {
        let original =
            b"Hello, World! This is a test message that should compress well. ".repeat(10);

        for algorithm in [CompressionAlgorithm::Gzip, CompressionAlgorithm::Zlib] {
            let service = CompressionService::new(algorithm, 6);
            let compressed = service.compress(&original).unwrap();
            let decompressed = service.decompress(&compressed).unwrap();

            assert_eq!(decompressed, original);
            assert!(compressed.len() < original.len());
        }
    }

    /// Validates the size threshold and never-grow rule.
    ///
    /// Assertions:
    /// - Payloads under `min_size` are left alone.
    /// - Incompressible short payloads are left alone even above the
    ///   threshold.
    /// - Repetitive payloads above the threshold are compressed.
    #[test]
    fn test_compress_if_smaller() {
        let service = CompressionService::default();

        let small = b"tiny".to_vec();
        assert!(service.compress_if_smaller(&small, 1024).unwrap().is_none());

        // gzip framing alone is ~20 bytes, so a 4-byte payload can only grow
        assert!(service.compress_if_smaller(&small, 1).unwrap().is_none());

        let big = b"a".repeat(4096);
        let compressed = service.compress_if_smaller(&big, 1024).unwrap().unwrap();
        assert!(compressed.len() < big.len());
    }

    #[test]
    fn test_decompress_garbage_fails() {
        let service = CompressionService::gzip(6);
        let err = service.decompress(b"definitely not gzip").unwrap_err();
        assert!(matches!(err, CompressionError::Decompress { .. }));
    }

    #[test]
    fn test_compression_ratio() {
        assert_eq!(CompressionService::compression_ratio(0, 0), 0.0);
        assert_eq!(CompressionService::compression_ratio(100, 150), 0.0);
        let ratio = CompressionService::compression_ratio(1000, 250);
        assert!((ratio - 0.75).abs() < f64::EPSILON);
    }
}

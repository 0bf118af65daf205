// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Pluggable block compressor used for per-series data blocks and the
//! segment meta section.

use crate::error::DecodeError;

/// Selects the concrete compression algorithm used for a segment's
/// lifetime. The same kind must be used to write and read a given
/// segment.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CompressionKind {
    /// No compression.
    None,

    /// zstd at its fastest encoder level.
    Zstd,

    /// Snappy.
    Snappy,
}

/// Symmetric compress/decompress capability over a block of bytes.
pub trait BytesCompressor: Send + Sync {
    /// Compresses `data`, returning a new buffer.
    fn compress(&self, data: &[u8]) -> Vec<u8>;

    /// Decompresses `data`, produced by a prior `compress` call with the
    /// same kind.
    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError>;

    /// The concrete kind this compressor implements.
    fn kind(&self) -> CompressionKind;
}

/// Identity compressor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCompressor;

impl BytesCompressor for NoopCompressor {
    fn compress(&self, data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        Ok(data.to_vec())
    }

    fn kind(&self) -> CompressionKind {
        CompressionKind::None
    }
}

/// zstd at the fastest encoder level.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZstdCompressor;

impl BytesCompressor for ZstdCompressor {
    fn compress(&self, data: &[u8]) -> Vec<u8> {
        // Level 1 is zstd's fastest encoder setting.
        zstd::encode_all(data, 1).unwrap_or_else(|_| data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        zstd::decode_all(data).map_err(|_| DecodeError::Decompress)
    }

    fn kind(&self) -> CompressionKind {
        CompressionKind::Zstd
    }
}

/// Snappy.
#[derive(Debug, Default, Clone, Copy)]
pub struct SnappyCompressor;

impl BytesCompressor for SnappyCompressor {
    fn compress(&self, data: &[u8]) -> Vec<u8> {
        snap::raw::Encoder::new()
            .compress_vec(data)
            .unwrap_or_else(|_| data.to_vec())
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
        snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|_| DecodeError::Decompress)
    }

    fn kind(&self) -> CompressionKind {
        CompressionKind::Snappy
    }
}

/// Builds the concrete compressor for a given kind.
#[must_use]
pub fn compressor_for(kind: CompressionKind) -> Box<dyn BytesCompressor> {
    match kind {
        CompressionKind::None => Box::new(NoopCompressor),
        CompressionKind::Zstd => Box::new(ZstdCompressor),
        CompressionKind::Snappy => Box::new(SnappyCompressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(c: &dyn BytesCompressor) {
        let data = b"hello hello hello hello world world world".repeat(4);
        let compressed = c.compress(&data);
        let decompressed = c.decompress(&compressed).unwrap();
        assert_eq!(data, decompressed);
    }

    #[test]
    fn noop_roundtrip() {
        roundtrip(&NoopCompressor);
    }

    #[test]
    fn zstd_roundtrip() {
        roundtrip(&ZstdCompressor);
    }

    #[test]
    fn snappy_roundtrip() {
        roundtrip(&SnappyCompressor);
    }
}

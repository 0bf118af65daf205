// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

// Error types for the time-series storage engine.

use std::fmt;

/// Error returned while decoding a binary-encoded value.
#[derive(Debug, Clone)]
pub enum DecodeError {
    /// A slice was shorter than the fixed width being decoded.
    InvalidSize {
        /// What was being decoded.
        what: &'static str,
        /// Bytes required.
        wanted: usize,
        /// Bytes available.
        got: usize,
    },

    /// Block decompression failed.
    Decompress,

    /// The segment trailer signature is absent or does not match.
    BadSignature,

    /// A UTF-8 string section contained invalid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSize { what, wanted, got } => write!(
                f,
                "invalid size decoding {what}: wanted {wanted} bytes, got {got}"
            ),
            Self::Decompress => write!(f, "failed to decompress block"),
            Self::BadSignature => write!(f, "segment trailer signature missing or mismatched"),
            Self::InvalidUtf8 => write!(f, "invalid utf-8 in decoded string"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Top-level error type for the engine.
#[derive(Debug)]
pub enum Error {
    /// `insert_rows` timed out waiting for queue capacity.
    Overload,

    /// A segment's signature or length checks failed while loading.
    BadSegment(DecodeError),

    /// Decoding/decompression failure outside of segment load.
    Decode(DecodeError),

    /// Filesystem failure during freeze, scan, or segment open.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overload => write!(f, "write overload: insert_rows queue is full"),
            Self::BadSegment(e) => write!(f, "bad segment: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BadSegment(e) | Self::Decode(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Overload => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

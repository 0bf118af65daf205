// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Hashing helpers used for series id construction and label hashing.

/// 64-bit xxHash of `bytes`, matching the reference implementation's use
/// of classic (non-xxh3) xxHash64 for metric and label hashing.
#[must_use]
pub fn hash64(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh64::xxh64(bytes, 0)
}

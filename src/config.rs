// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Engine configuration.
//!
//! Per design note §9 ("Global state"), this replaces the reference
//! implementation's `defaultOpts` process-wide singleton with an owned,
//! explicit value passed into [`crate::tsdb::TsDb::open`] — nothing here
//! is a `static`, which keeps tests hermetic.

use crate::compression::{compressor_for, BytesCompressor, CompressionKind};
use crate::segment_format::{BinaryMetaSerializer, MetaSerializer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Owned, builder-constructed engine options.
#[derive(Clone)]
pub struct Config {
    pub(crate) meta_serializer: Arc<dyn MetaSerializer>,
    pub(crate) compressor: Arc<dyn BytesCompressor>,
    pub(crate) retention: Duration,
    pub(crate) segment_duration: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) only_memory_mode: bool,
    pub(crate) enable_outdated: bool,
    pub(crate) max_rows_per_segment: u64,
    pub(crate) data_path: PathBuf,
}

impl Config {
    /// Starts a builder rooted at `data_path`, with every other option at
    /// its documented default.
    #[must_use]
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            meta_serializer: Arc::new(BinaryMetaSerializer),
            compressor: compressor_for(CompressionKind::None).into(),
            retention: Duration::from_secs(7 * 24 * 60 * 60),
            segment_duration: Duration::from_secs(2 * 60 * 60),
            write_timeout: Duration::from_secs(30),
            only_memory_mode: false,
            enable_outdated: true,
            max_rows_per_segment: 19_960_412,
            data_path: data_path.into(),
        }
    }

    /// Overrides the block compressor used for series blocks and the meta
    /// section. Defaults to [`CompressionKind::None`].
    #[must_use]
    pub fn compression(mut self, kind: CompressionKind) -> Self {
        self.compressor = compressor_for(kind).into();
        self
    }

    /// Overrides the meta section codec. Defaults to the binary layout
    /// documented on [`crate::segment_format`].
    #[must_use]
    pub fn meta_serializer(mut self, serializer: Arc<dyn MetaSerializer>) -> Self {
        self.meta_serializer = serializer;
        self
    }

    /// How long a frozen segment is retained before it becomes eligible
    /// for deletion. Defaults to 7 days.
    #[must_use]
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// The `(maxTs - minTs)` threshold past which the head freezes.
    /// Defaults to 2 hours.
    #[must_use]
    pub fn segment_duration(mut self, duration: Duration) -> Self {
        self.segment_duration = duration;
        self
    }

    /// Max time `insert_rows` waits for queue capacity before returning
    /// [`crate::error::Error::Overload`]. Defaults to 30 seconds.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// If set, the head never freezes and `close`/`persist` write
    /// nothing. Defaults to `false`.
    #[must_use]
    pub fn only_memory_mode(mut self, enabled: bool) -> Self {
        self.only_memory_mode = enabled;
        self
    }

    /// Whether out-of-order points are captured in the outdated tree
    /// rather than silently dropped. Defaults to `true`.
    #[must_use]
    pub fn enable_outdated(mut self, enabled: bool) -> Self {
        self.enable_outdated = enabled;
        self
    }

    /// Advisory cap on rows per head; exceeding it is logged, not
    /// enforced (the head still only freezes on `segment_duration`).
    /// Defaults to ~2×10⁷.
    #[must_use]
    pub fn max_rows_per_segment(mut self, max_rows: u64) -> Self {
        self.max_rows_per_segment = max_rows;
        self
    }

    /// Root directory segments are persisted under and scanned from at
    /// startup.
    #[must_use]
    pub fn data_path(&self) -> &std::path::Path {
        &self.data_path
    }

    /// The configured segment freeze threshold, in whole seconds.
    #[must_use]
    pub fn segment_duration_secs(&self) -> i64 {
        self.segment_duration.as_secs() as i64
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("compressor_kind", &self.compressor.kind())
            .field("retention", &self.retention)
            .field("segment_duration", &self.segment_duration)
            .field("write_timeout", &self.write_timeout)
            .field("only_memory_mode", &self.only_memory_mode)
            .field("enable_outdated", &self.enable_outdated)
            .field("max_rows_per_segment", &self.max_rows_per_segment)
            .field("data_path", &self.data_path)
            .finish()
    }
}

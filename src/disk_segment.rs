// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Immutable, mmap-backed on-disk segment.
//!
//! Opening a segment only reads the small JSON sidecar (cheap startup
//! bounds recovery); the compressed meta section inside `data` — the
//! label index and per-series byte offsets — is parsed lazily, once, on
//! first query.

use crate::compression::BytesCompressor;
use crate::error::{Error, Result};
use crate::index::DiskIndex;
use crate::label::Label;
use crate::row::Point;
use crate::segment_format::{self, MetaSerializer, Metadata, SidecarMeta};
use crate::segment_list::Segment;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

struct LoadedMeta {
    metadata: Metadata,
    index: DiskIndex,
}

/// A frozen, read-only segment backed by a memory-mapped `data` file.
pub struct DiskSegment {
    dir: PathBuf,
    mmap: Mmap,
    sidecar: SidecarMeta,
    compressor: Arc<dyn BytesCompressor>,
    meta_serializer: Arc<dyn MetaSerializer>,
    loaded: RwLock<Option<LoadedMeta>>,
}

impl DiskSegment {
    /// Opens a segment directory, reading only its `meta` sidecar. The
    /// `data` file is mmapped but its internal meta section is left
    /// unparsed until [`DiskSegment::load`] (called automatically by the
    /// query methods) runs.
    pub fn open_unloaded(
        dir: impl Into<PathBuf>,
        compressor: Arc<dyn BytesCompressor>,
        meta_serializer: Arc<dyn MetaSerializer>,
    ) -> Result<Self> {
        let dir = dir.into();
        let sidecar_bytes = std::fs::read(dir.join("meta"))?;
        let sidecar: SidecarMeta = serde_json::from_slice(&sidecar_bytes).map_err(std::io::Error::from)?;

        let data_file = File::open(dir.join("data"))?;
        // SAFETY: the data file is only ever appended-to-then-closed by
        // `Memtable::persist`; nothing truncates or rewrites it in place
        // while a segment has it open.
        let mmap = unsafe { Mmap::map(&data_file)? };

        Ok(Self {
            dir,
            mmap,
            sidecar,
            compressor,
            meta_serializer,
            loaded: RwLock::new(None),
        })
    }

    /// Parses the compressed meta section inside `data` — the label
    /// index and per-series byte offsets — if it hasn't been already.
    /// Idempotent; safe to call from multiple threads concurrently.
    pub fn load(&self) -> Result<()> {
        if self.loaded.read().expect("lock poisoned").is_some() {
            return Ok(());
        }
        let mut guard = self.loaded.write().expect("lock poisoned");
        if guard.is_some() {
            return Ok(());
        }

        let bytes = &self.mmap[..];
        let mut header = crate::coding::Decoder::new(bytes);
        let data_len = header.unmarshal_u64();
        let meta_len = header.unmarshal_u64();
        if let Some(err) = header.err() {
            return Err(Error::BadSegment(err.clone()));
        }

        let meta_start = segment_format::HEADER_LEN as usize + data_len as usize;
        let meta_end = meta_start + meta_len as usize;
        let meta_compressed = bytes
            .get(meta_start..meta_end)
            .ok_or_else(|| Error::BadSegment(crate::error::DecodeError::InvalidSize {
                what: "meta section",
                wanted: meta_len as usize,
                got: bytes.len().saturating_sub(meta_start),
            }))?;
        let meta_raw = self
            .compressor
            .decompress(meta_compressed)
            .map_err(Error::BadSegment)?;
        let metadata = self
            .meta_serializer
            .unmarshal(&meta_raw)
            .map_err(Error::BadSegment)?;

        let index = DiskIndex::build(
            &metadata
                .labels
                .iter()
                .map(|l| (l.name.clone(), l.sids.clone()))
                .collect::<Vec<_>>(),
        );

        *guard = Some(LoadedMeta { metadata, index });
        Ok(())
    }

    /// The directory this segment was opened from.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of distinct series recorded at freeze time.
    #[must_use]
    pub fn series_count(&self) -> i64 {
        self.sidecar.series_count
    }

    /// Number of points recorded at freeze time.
    #[must_use]
    pub fn data_points_count(&self) -> i64 {
        self.sidecar.data_points_count
    }

    fn decode_series(&self, entry: &segment_format::MetaSeries, start: i64, end: i64) -> Result<Vec<Point>> {
        let data_start = segment_format::HEADER_LEN as usize + entry.start_offset as usize;
        let data_end = segment_format::HEADER_LEN as usize + entry.end_offset as usize;
        let compressed = &self.mmap[data_start..data_end];
        let raw = self.compressor.decompress(compressed).map_err(Error::BadSegment)?;
        let points = crate::series::decode_block(&raw).map_err(Error::BadSegment)?;

        Ok(points
            .into_iter()
            .filter(|p| p.timestamp >= start && p.timestamp <= end)
            .collect())
    }

    /// Every value observed for `label` across this segment.
    pub fn label_values(&self, label: &str) -> Result<Vec<String>> {
        self.load()?;
        let guard = self.loaded.read().expect("lock poisoned");
        let loaded = guard.as_ref().expect("just loaded");
        let mut values: Vec<String> = loaded
            .metadata
            .labels
            .iter()
            .filter_map(|entry| {
                let (name, value) = Label::unmarshal_name(&entry.name);
                (name == label).then_some(value)
            })
            .collect();
        values.sort();
        values.dedup();
        Ok(values)
    }

    /// Decodes `[start, end]` for every series matching `metric` AND all
    /// of `matchers` (`name = value` equality).
    pub fn select(
        &self,
        metric: &str,
        matchers: &[(String, String)],
        start: i64,
        end: i64,
    ) -> Result<Vec<(String, Vec<Point>)>> {
        self.load()?;
        let guard = self.loaded.read().expect("lock poisoned");
        let loaded = guard.as_ref().expect("just loaded");

        let mut candidates: Option<roaring::RoaringBitmap> = None;
        let mut narrow = |token: &str, candidates: &mut Option<roaring::RoaringBitmap>| {
            let hits = loaded.index.lookup(token).cloned().unwrap_or_default();
            *candidates = Some(match candidates.take() {
                Some(existing) => existing & hits,
                None => hits,
            });
        };

        narrow(&Label::new(crate::label::METRIC_NAME, metric).marshal_name(), &mut candidates);
        for (name, value) in matchers {
            narrow(&Label::new(name, value).marshal_name(), &mut candidates);
        }

        let mut out = Vec::new();
        if let Some(bitmap) = candidates {
            for ordinal in bitmap {
                let position = ordinal as usize;
                if let Some(entry) = loaded.metadata.series.get(position) {
                    let points = self.decode_series(entry, start, end)?;
                    out.push((entry.sid.clone(), points));
                }
            }
        }
        Ok(out)
    }
}

impl Segment for DiskSegment {
    fn insert_rows(&self, _rows: Vec<crate::row::Row>) {
        log::error!("disk segments are not mutable");
    }

    fn min_ts(&self) -> i64 {
        self.sidecar.min_timestamp
    }

    fn max_ts(&self) -> i64 {
        self.sidecar.max_timestamp
    }

    fn frozen(&self) -> bool {
        true
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    fn select(&self, metric: &str, matchers: &[(String, String)], start: i64, end: i64) -> Result<Vec<(String, Vec<Point>)>> {
        DiskSegment::select(self, metric, matchers, start, end)
    }

    fn label_values(&self, label: &str) -> Result<Vec<String>> {
        DiskSegment::label_values(self, label)
    }
}

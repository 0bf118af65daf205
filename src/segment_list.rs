// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Time-indexed collection of segments: the mutable head plus every
//! frozen, overlap-free disk segment, keyed by `minTs`.

use crate::config::Config;
use crate::disk_segment::DiskSegment;
use crate::error::Result;
use crate::memtable::Memtable;
use crate::row::{Point, Row};
use crate::time_index::TimeIndex;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Common lifecycle and read surface shared by the mutable head and
/// frozen disk segments, so callers can query across both uniformly
/// instead of branching on concrete type.
pub trait Segment: Send + Sync {
    /// Routes `rows` into this segment. Disk segments refuse and log.
    fn insert_rows(&self, rows: Vec<Row>);
    /// Minimum timestamp observed.
    fn min_ts(&self) -> i64;
    /// Maximum timestamp observed.
    fn max_ts(&self) -> i64;
    /// `true` once this segment is past its freeze boundary (always
    /// `true` for a disk segment).
    fn frozen(&self) -> bool;
    /// Marshals to disk if applicable. Idempotent.
    fn close(&self) -> Result<()>;
    /// Removes on-disk state. No-op for the head.
    fn cleanup(&self) -> Result<()>;
    /// Decodes `[start, end]` for every series matching `metric` and
    /// `matchers` (`AND`-ed exact `name=value` equality).
    fn select(&self, metric: &str, matchers: &[(String, String)], start: i64, end: i64) -> Result<Vec<(String, Vec<Point>)>>;
    /// Every value observed for `label`.
    fn label_values(&self, label: &str) -> Result<Vec<String>>;
}

/// The overlap rule from spec.md §4.10, verbatim: a segment spanning
/// `[seg_min, seg_max]` is returned for `[start, end]` iff any of —
/// `seg_min < start < seg_max`, `start < seg_min <= seg_max < end`, or
/// `seg_min < end < seg_max`. Deliberately stricter than a plain closed-
/// interval intersection test: touching only at a shared boundary point
/// does not count as overlap.
fn overlaps(seg_min: i64, seg_max: i64, start: i64, end: i64) -> bool {
    (seg_min < start && start < seg_max)
        || (start < seg_min && seg_min <= seg_max && seg_max < end)
        || (seg_min < end && end < seg_max)
}

/// The head memtable plus every frozen disk segment, indexed by minTs.
pub struct SegmentList {
    head: RwLock<Arc<Memtable>>,
    disk: RwLock<TimeIndex<Arc<DiskSegment>>>,
}

impl SegmentList {
    /// Builds a list with a single, empty head.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            head: RwLock::new(Arc::new(Memtable::new(config))),
            disk: RwLock::new(TimeIndex::new()),
        }
    }

    /// The current mutable head.
    #[must_use]
    pub fn head(&self) -> Arc<Memtable> {
        self.head.read().expect("lock poisoned").clone()
    }

    /// Routes `rows` into the current head, holding a read lock on it for
    /// the duration of the insert. A concurrent freeze takes the write
    /// lock only around its own persist-and-swap, so ordinary inserts
    /// never block each other; they're only held back while a freeze is
    /// in flight, and a freeze always waits for in-flight inserts to
    /// finish before it swaps the head out from under them.
    pub fn insert_rows(&self, rows: Vec<Row>) {
        self.head.read().expect("lock poisoned").insert_rows(rows);
    }

    /// Files a frozen disk segment under its own `minTs`.
    pub fn add_disk_segment(&self, segment: Arc<DiskSegment>) {
        let min_ts = segment.min_ts();
        self.disk.write().expect("lock poisoned").add(min_ts, segment);
    }

    /// Every frozen disk segment, in `minTs` order.
    #[must_use]
    pub fn disk_segments(&self) -> Vec<Arc<DiskSegment>> {
        self.disk.read().expect("lock poisoned").all().cloned().collect()
    }

    /// Head plus every disk segment whose `[minTs, maxTs]` overlaps
    /// `[start, end]`, as trait objects — the spec's `get(start, end)`.
    #[must_use]
    pub fn get(&self, start: i64, end: i64) -> Vec<Arc<dyn Segment>> {
        let mut out: Vec<Arc<dyn Segment>> = Vec::new();
        let head = self.head();
        if overlaps(head.min_ts(), head.max_ts(), start, end) {
            out.push(head);
        }
        for segment in self.disk_segments() {
            if overlaps(segment.min_ts(), segment.max_ts(), start, end) {
                out.push(segment);
            }
        }
        out
    }

    /// If the head is past its freeze boundary, persists it, opens the
    /// result as a [`DiskSegment`], files it under the old head's
    /// `minTs`, and swaps in a fresh head. Mirrors the source's
    /// `segmentList.Replace(pre, next)`, with `pre.Close()` folded into
    /// the head's own idempotent `persist`.
    pub fn freeze_if_needed(&self, config: &Config) -> Result<Option<PathBuf>> {
        // Cheap fast-path check under a read lock so the common
        // not-yet-frozen case never contends for the write lock.
        if !self.head().frozen() {
            return Ok(None);
        }
        self.rotate_head(config)
    }

    /// Persists the head and swaps in a fresh one regardless of whether
    /// it has crossed its freeze boundary, as long as it holds any data.
    /// Used by an explicit flush.
    pub fn force_freeze(&self, config: &Config) -> Result<Option<PathBuf>> {
        self.rotate_head(config)
    }

    /// Persists the current head, builds a [`DiskSegment`] from the
    /// result, and swaps in a fresh empty head — all under the head's
    /// write lock, so no insert can land in a head that's mid-rotation
    /// and no two rotations can race each other. A no-op if the head has
    /// nothing to persist (including a repeated call after a prior
    /// rotation already handled it).
    fn rotate_head(&self, config: &Config) -> Result<Option<PathBuf>> {
        let mut head_guard = self.head.write().expect("lock poisoned");
        let Some(dir) = head_guard.persist()? else {
            return Ok(None);
        };

        let segment = Arc::new(DiskSegment::open_unloaded(
            dir.clone(),
            config.compressor.clone(),
            config.meta_serializer.clone(),
        )?);
        *head_guard = Arc::new(Memtable::new(config));
        drop(head_guard);
        self.add_disk_segment(segment);
        Ok(Some(dir))
    }

    /// Adds an already-opened disk segment discovered at startup.
    pub fn adopt(&self, segment: Arc<DiskSegment>) {
        self.add_disk_segment(segment);
    }

    /// Removes and cleans up every disk segment whose `maxTs` is older
    /// than `now - retention_secs`.
    pub fn evict_expired(&self, now: i64, retention_secs: i64) -> Result<usize> {
        let cutoff = now - retention_secs;
        let expired: Vec<(i64, Arc<DiskSegment>)> = self
            .disk
            .read()
            .expect("lock poisoned")
            .iter()
            .filter(|(_, seg)| seg.max_ts() < cutoff)
            .map(|(k, seg)| (*k, seg.clone()))
            .collect();

        for (key, segment) in &expired {
            segment.cleanup()?;
            self.disk.write().expect("lock poisoned").remove(*key);
        }
        Ok(expired.len())
    }
}

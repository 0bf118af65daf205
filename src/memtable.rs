// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The mutable head segment: routes rows to per-series stores, tracks
//! label indexes and timestamp bounds, stashes out-of-order points, and
//! serializes itself to the on-disk format at freeze time.

use crate::config::Config;
use crate::error::Result;
use crate::index::MemIndex;
use crate::row::{Point, Row, SeriesId};
use crate::segment_format::{self, MetaSeries, Metadata, SeriesWithLabel, SidecarMeta};
use crate::segment_list::Segment;
use crate::series::MemSeries;
use crate::time_index::TimeIndex;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// The live, appendable head of the segment list.
pub struct Memtable {
    series: DashMap<SeriesId, Arc<MemSeries>>,
    index: MemIndex,
    label_values: RwLock<HashMap<String, HashSet<String>>>,
    outdated: RwLock<HashMap<SeriesId, TimeIndex<Point>>>,

    min_timestamp: AtomicI64,
    max_timestamp: AtomicI64,
    series_count: AtomicI64,
    data_points_count: AtomicI64,

    persisted: AtomicBool,

    segment_duration_secs: i64,
    only_memory_mode: bool,
    enable_outdated: bool,
    max_rows_per_segment: u64,
    data_path: PathBuf,
    compressor: Arc<dyn crate::compression::BytesCompressor>,
    meta_serializer: Arc<dyn segment_format::MetaSerializer>,
}

impl Memtable {
    /// Builds an empty head from `config`.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            series: DashMap::new(),
            index: MemIndex::new(),
            label_values: RwLock::new(HashMap::new()),
            outdated: RwLock::new(HashMap::new()),
            min_timestamp: AtomicI64::new(i64::MAX),
            max_timestamp: AtomicI64::new(i64::MIN),
            series_count: AtomicI64::new(0),
            data_points_count: AtomicI64::new(0),
            persisted: AtomicBool::new(false),
            segment_duration_secs: config.segment_duration_secs(),
            only_memory_mode: config.only_memory_mode,
            enable_outdated: config.enable_outdated,
            max_rows_per_segment: config.max_rows_per_segment,
            data_path: config.data_path.clone(),
            compressor: config.compressor.clone(),
            meta_serializer: config.meta_serializer.clone(),
        }
    }

    /// Number of distinct series observed.
    #[must_use]
    pub fn series_count(&self) -> i64 {
        self.series_count.load(Ordering::Relaxed)
    }

    /// Number of points inserted (including out-of-order ones).
    #[must_use]
    pub fn data_points_count(&self) -> i64 {
        self.data_points_count.load(Ordering::Relaxed)
    }

    /// Routes each row to its series, updating the label-value catalog,
    /// timestamp bounds, outdated tree, and inverted index.
    pub fn insert_rows(&self, rows: Vec<Row>) {
        for mut row in rows {
            {
                let mut values = self.label_values.write().expect("lock poisoned");
                values
                    .entry(crate::label::METRIC_NAME.to_owned())
                    .or_default()
                    .insert(row.metric.clone());
                for label in row.labels.iter() {
                    values
                        .entry(label.name.clone())
                        .or_default()
                        .insert(label.value.clone());
                }
            }

            row.labels = row.labels.clone().add_metric(&row.metric).sorted();
            let sid = row.id();

            let series = match self.series.entry(sid.clone()) {
                Entry::Occupied(e) => e.get().clone(),
                Entry::Vacant(e) => {
                    self.series_count.fetch_add(1, Ordering::Relaxed);
                    let created = Arc::new(MemSeries::new(row.labels.clone()));
                    e.insert(created.clone());
                    created
                }
            };

            if let Some(rejected) = series.store.append(row.point) {
                if self.enable_outdated {
                    let mut outdated = self.outdated.write().expect("lock poisoned");
                    outdated
                        .entry(sid.clone())
                        .or_default()
                        .add(rejected.timestamp, rejected);
                }
            }

            cas_min(&self.min_timestamp, row.point.timestamp);
            cas_max(&self.max_timestamp, row.point.timestamp);
            let count = self.data_points_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count as u64 == self.max_rows_per_segment {
                log::warn!(
                    "memtable has reached its advisory max_rows_per_segment ({})",
                    self.max_rows_per_segment
                );
            }

            self.index.update_index(&sid, &row.labels);
        }
    }

    /// The minimum observed timestamp, or `i64::MAX` if empty.
    #[must_use]
    pub fn min_ts(&self) -> i64 {
        self.min_timestamp.load(Ordering::Relaxed)
    }

    /// The maximum observed timestamp, or `i64::MIN` if empty.
    #[must_use]
    pub fn max_ts(&self) -> i64 {
        self.max_timestamp.load(Ordering::Relaxed)
    }

    /// `true` once `max_ts - min_ts` exceeds the configured segment
    /// duration. Always `false` in memory-only mode.
    #[must_use]
    pub fn frozen(&self) -> bool {
        if self.only_memory_mode {
            return false;
        }
        let min = self.min_ts();
        let max = self.max_ts();
        min <= max && max - min > self.segment_duration_secs
    }

    /// Values observed for `label`, merged across every series.
    #[must_use]
    pub fn label_values(&self, label: &str) -> Vec<String> {
        self.label_values
            .read()
            .expect("lock poisoned")
            .get(label)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Decodes `[start, end]` for every series whose labels satisfy
    /// `matchers` (`AND`-ed exact `name=value` equality).
    #[must_use]
    pub fn select(&self, metric: &str, matchers: &[(String, String)], start: i64, end: i64) -> Vec<(SeriesId, Vec<Point>)> {
        let mut candidates: Option<HashSet<SeriesId>> = None;
        let name_token = crate::label::Label::new(crate::label::METRIC_NAME, metric).marshal_name();
        let mut narrow = |token: String, candidates: &mut Option<HashSet<SeriesId>>| {
            let hits: HashSet<SeriesId> = self.index.lookup(&token).into_iter().collect();
            *candidates = Some(match candidates.take() {
                Some(existing) => existing.intersection(&hits).cloned().collect(),
                None => hits,
            });
        };
        narrow(name_token, &mut candidates);
        for (name, value) in matchers {
            let token = crate::label::Label::new(name, value).marshal_name();
            narrow(token, &mut candidates);
        }

        let mut out = Vec::new();
        if let Some(sids) = candidates {
            for sid in sids {
                if let Some(series) = self.series.get(&sid) {
                    out.push((sid, series.store.get(start, end)));
                }
            }
        }
        out
    }

    /// Idempotently marshals this head to disk, returning the segment
    /// directory it was written to. Returns `Ok(None)` on a repeated
    /// call, when the head is empty, or in memory-only mode — matching
    /// the source's no-op `Close` cases.
    pub fn persist(&self) -> Result<Option<PathBuf>> {
        if self.persisted.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        if self.only_memory_mode || self.data_points_count.load(Ordering::Relaxed) == 0 {
            return Ok(None);
        }

        let min_ts = self.min_ts();
        let max_ts = self.max_ts();
        let dir = self.data_path.join(segment_format::segment_dir_name(min_ts, max_ts));
        std::fs::create_dir_all(&dir)?;

        let mut sid_order: Vec<SeriesId> = self.series.iter().map(|e| e.key().clone()).collect();
        sid_order.sort();

        let outdated = self.outdated.read().expect("lock poisoned");

        let mut data_buf: Vec<u8> = Vec::new();
        let mut meta_series: Vec<MetaSeries> = Vec::with_capacity(sid_order.len());
        let mut label_ordinal: HashMap<String, u32> = HashMap::new();
        let mut label_entries: Vec<SeriesWithLabel> = Vec::new();

        for (idx, sid) in sid_order.iter().enumerate() {
            let series = self
                .series
                .get(sid)
                .expect("sid snapshot must still be present")
                .clone();

            let outdated_points: Vec<Point> = outdated
                .get(sid)
                .map(|tree| tree.all().copied().collect())
                .unwrap_or_default();
            let merged = series.store.merge_outdated(outdated_points);
            let compressed = self.compressor.compress(&merged.bytes());

            let start_offset = data_buf.len() as u64;
            data_buf.extend_from_slice(&compressed);
            let end_offset = data_buf.len() as u64;

            let mut label_ordinals = Vec::with_capacity(series.labels.len());
            for label in series.labels.iter() {
                let token = label.marshal_name();
                let ordinal = *label_ordinal.entry(token.clone()).or_insert_with(|| {
                    let next = label_entries.len() as u32;
                    label_entries.push(SeriesWithLabel {
                        name: token,
                        sids: Vec::new(),
                    });
                    next
                });
                label_entries[ordinal as usize].sids.push(idx as u32);
                label_ordinals.push(ordinal);
            }
            label_ordinals.sort_unstable();

            meta_series.push(MetaSeries {
                sid: sid.as_str().to_owned(),
                start_offset,
                end_offset,
                labels: label_ordinals,
            });
        }
        drop(outdated);

        let metadata = Metadata {
            min_timestamp: min_ts,
            max_timestamp: max_ts,
            series: meta_series,
            labels: label_entries,
        };
        let meta_bytes = self.meta_serializer.marshal(&metadata);
        let meta_compressed = self.compressor.compress(&meta_bytes);

        let mut file_buf = crate::coding::EncodeBuf::with_capacity(
            segment_format::HEADER_LEN as usize + data_buf.len() + meta_compressed.len(),
        );
        file_buf.marshal_u64(&[data_buf.len() as u64, meta_compressed.len() as u64]);
        file_buf.marshal_bytes(&data_buf);
        file_buf.marshal_bytes(&meta_compressed);
        std::fs::write(dir.join("data"), file_buf.bytes())?;

        let sidecar = SidecarMeta {
            series_count: self.series_count.load(Ordering::Relaxed),
            data_points_count: self.data_points_count.load(Ordering::Relaxed),
            max_timestamp: max_ts,
            min_timestamp: min_ts,
        };
        std::fs::write(dir.join("meta"), serde_json::to_vec_pretty(&sidecar).map_err(std::io::Error::from)?)?;

        log::debug!("memtable persisted to {dir:?}");
        Ok(Some(dir))
    }
}

fn cas_min(atomic: &AtomicI64, val: i64) {
    let mut current = atomic.load(Ordering::Relaxed);
    while val < current {
        match atomic.compare_exchange_weak(current, val, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

fn cas_max(atomic: &AtomicI64, val: i64) {
    let mut current = atomic.load(Ordering::Relaxed);
    while val > current {
        match atomic.compare_exchange_weak(current, val, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}

impl Segment for Memtable {
    fn insert_rows(&self, rows: Vec<Row>) {
        Memtable::insert_rows(self, rows);
    }

    fn min_ts(&self) -> i64 {
        Memtable::min_ts(self)
    }

    fn max_ts(&self) -> i64 {
        Memtable::max_ts(self)
    }

    fn frozen(&self) -> bool {
        Memtable::frozen(self)
    }

    fn close(&self) -> Result<()> {
        self.persist().map(|_| ())
    }

    fn cleanup(&self) -> Result<()> {
        Ok(())
    }

    fn select(&self, metric: &str, matchers: &[(String, String)], start: i64, end: i64) -> Result<Vec<(String, Vec<Point>)>> {
        Ok(Memtable::select(self, metric, matchers, start, end)
            .into_iter()
            .map(|(sid, points)| (sid.to_string(), points))
            .collect())
    }

    fn label_values(&self, label: &str) -> Result<Vec<String>> {
        Ok(Memtable::label_values(self, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::{Label, LabelList};
    use tempfile::tempdir;

    fn row(metric: &str, labels: Vec<Label>, ts: i64, val: f64) -> Row {
        Row::new(metric, LabelList::new(labels), Point::new(ts, val))
    }

    #[test]
    fn insert_and_scan_head_series() {
        let dir = tempdir().unwrap();
        let cfg = Config::new(dir.path());
        let mt = Memtable::new(&cfg);

        let labels = vec![Label::new("node", "vm1"), Label::new("dc", "gz")];
        let rows: Vec<Row> = (1..=5)
            .map(|ts| row("cpu.busy", labels.clone(), ts, ts as f64))
            .collect();
        mt.insert_rows(rows);

        assert_eq!(1, mt.series_count());
        assert_eq!(5, mt.data_points_count());
        assert_eq!(1, mt.min_ts());
        assert_eq!(5, mt.max_ts());

        let got = mt.select("cpu.busy", &[("node".to_owned(), "vm1".to_owned())], 1, 5);
        assert_eq!(1, got.len());
        assert_eq!(5, got[0].1.len());
    }

    #[test]
    fn out_of_order_point_goes_to_outdated_not_block() {
        let dir = tempdir().unwrap();
        let cfg = Config::new(dir.path());
        let mt = Memtable::new(&cfg);

        let labels = vec![Label::new("node", "vm1")];
        mt.insert_rows(vec![
            row("cpu.busy", labels.clone(), 10, 1.0),
            row("cpu.busy", labels.clone(), 20, 2.0),
            row("cpu.busy", labels.clone(), 15, 1.5),
            row("cpu.busy", labels, 25, 2.5),
        ]);

        let sid = row("cpu.busy", vec![Label::new("node", "vm1")], 0, 0.0).id();
        let series = mt.series.get(&sid).unwrap().clone();
        let block_ts: Vec<i64> = series.store.all().into_iter().map(|p| p.timestamp).collect();
        assert_eq!(vec![10, 20, 25], block_ts);

        assert!(mt.outdated.read().unwrap().contains_key(&sid));
    }

    #[test]
    fn frozen_respects_segment_duration() {
        let dir = tempdir().unwrap();
        let cfg = Config::new(dir.path()).segment_duration(std::time::Duration::from_secs(10));
        let mt = Memtable::new(&cfg);

        let labels = vec![Label::new("node", "vm1")];
        mt.insert_rows(vec![
            row("cpu.busy", labels.clone(), 0, 1.0),
            row("cpu.busy", labels, 5, 1.0),
        ]);
        assert!(!mt.frozen());

        let labels = vec![Label::new("node", "vm1")];
        mt.insert_rows(vec![row("cpu.busy", labels, 20, 1.0)]);
        assert!(mt.frozen());
    }

    #[test]
    fn only_memory_mode_never_freezes_and_never_persists() {
        let dir = tempdir().unwrap();
        let cfg = Config::new(dir.path())
            .only_memory_mode(true)
            .segment_duration(std::time::Duration::from_secs(1));
        let mt = Memtable::new(&cfg);
        mt.insert_rows(vec![row("cpu.busy", vec![Label::new("a", "1")], 0, 1.0)]);
        mt.insert_rows(vec![row("cpu.busy", vec![Label::new("a", "1")], 100, 1.0)]);
        assert!(!mt.frozen());
        assert!(mt.persist().unwrap().is_none());
    }

    #[test]
    fn persist_writes_data_and_meta_files() {
        let dir = tempdir().unwrap();
        let cfg = Config::new(dir.path());
        let mt = Memtable::new(&cfg);
        mt.insert_rows(vec![
            row("cpu.busy", vec![Label::new("node", "vm1")], 1, 1.0),
            row("cpu.busy", vec![Label::new("node", "vm1")], 2, 2.0),
        ]);

        let seg_dir = mt.persist().unwrap().expect("should persist");
        assert!(seg_dir.join("data").exists());
        assert!(seg_dir.join("meta").exists());

        // idempotent: second call is a no-op
        assert!(mt.persist().unwrap().is_none());
    }

    #[test]
    fn empty_memtable_does_not_persist() {
        let dir = tempdir().unwrap();
        let cfg = Config::new(dir.path());
        let mt = Memtable::new(&cfg);
        assert!(mt.persist().unwrap().is_none());
    }

    #[test]
    fn label_values_are_catalogued_per_row() {
        let dir = tempdir().unwrap();
        let cfg = Config::new(dir.path());
        let mt = Memtable::new(&cfg);
        mt.insert_rows(vec![
            row("cpu.busy", vec![Label::new("node", "vm1")], 1, 1.0),
            row("cpu.busy", vec![Label::new("node", "vm2")], 2, 1.0),
        ]);
        let mut values = mt.label_values("node");
        values.sort();
        assert_eq!(vec!["vm1".to_owned(), "vm2".to_owned()], values);
    }
}

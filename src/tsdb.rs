// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Frontend: bounded write queue, worker pool, freeze orchestration,
//! startup segment scan, and the minimal read surface over the segment
//! list.

use crate::config::Config;
use crate::disk_segment::DiskSegment;
use crate::error::{Error, Result};
use crate::row::{Point, Row};
use crate::segment_format;
use crate::segment_list::{Segment, SegmentList};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Queue capacity ahead of the worker pool, matching the source's
/// buffered-channel sizing.
const QUEUE_CAPACITY: usize = 512;

/// How often an idle worker re-checks the stop signal between queue
/// receives.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// One series' decoded points from a [`TsDb::select`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesScan {
    /// The series id string.
    pub sid: String,
    /// Points within the requested range.
    pub points: Vec<Point>,
}

/// The embeddable time-series engine handle.
pub struct TsDb {
    config: Config,
    segments: Arc<SegmentList>,
    sender: Sender<Vec<Row>>,
    stop_signal: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    freeze_lock: Mutex<()>,
}

impl TsDb {
    /// Opens (or creates) the engine rooted at `config.data_path()`,
    /// scanning for existing `seg-*` segments and starting the worker
    /// pool. A segment that fails verification is logged and skipped;
    /// the engine proceeds with whatever loaded.
    pub fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.data_path())?;

        let segments = Arc::new(SegmentList::new(&config));
        for dir in scan_segment_dirs(config.data_path())? {
            let opened = DiskSegment::open_unloaded(dir.clone(), config.compressor.clone(), config.meta_serializer.clone())
                .and_then(|segment| segment.load().map(|()| segment));
            match opened {
                Ok(segment) => segments.adopt(Arc::new(segment)),
                Err(err) => log::warn!("skipping bad segment {dir:?}: {err}"),
            }
        }

        let (sender, receiver) = bounded::<Vec<Row>>(QUEUE_CAPACITY);
        let stop_signal = Arc::new(AtomicBool::new(false));
        let freeze_lock = Mutex::new(());

        let worker_count = num_cpus::get().max(1);
        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let receiver = receiver.clone();
            let segments = segments.clone();
            let stop_signal = stop_signal.clone();
            let config = config.clone();
            workers.push(
                std::thread::Builder::new()
                    .name(format!("tsdb-worker-{id}"))
                    .spawn(move || worker_loop(receiver, segments, stop_signal, config))
                    .expect("failed to spawn tsdb worker thread"),
            );
        }

        Ok(Self {
            config,
            segments,
            sender,
            stop_signal,
            workers: Mutex::new(workers),
            freeze_lock,
        })
    }

    /// Enqueues `rows` for ingestion, blocking up to the configured
    /// write timeout for queue capacity. Returns [`Error::Overload`] if
    /// the queue stays full past the timeout.
    pub fn insert_rows(&self, rows: Vec<Row>) -> Result<()> {
        self.sender
            .send_timeout(rows, self.config.write_timeout)
            .map_err(|_| Error::Overload)
    }

    /// Every value observed for `label` across the head and every disk
    /// segment overlapping `[start, end]`.
    #[must_use]
    pub fn query_label_values(&self, label: &str, start: i64, end: i64) -> Vec<String> {
        let mut values = Vec::new();
        for segment in self.segments.get(start, end) {
            match segment.label_values(label) {
                Ok(vs) => values.extend(vs),
                Err(err) => log::warn!("label_values failed on a segment: {err}"),
            }
        }
        values.sort();
        values.dedup();
        values
    }

    /// Decodes `[start, end]` for every series matching `metric` and
    /// `matchers`, across the head and every overlapping disk segment.
    #[must_use]
    pub fn select(&self, metric: &str, matchers: &[(String, String)], start: i64, end: i64) -> Vec<SeriesScan> {
        let mut out = Vec::new();
        for segment in self.segments.get(start, end) {
            match segment.select(metric, matchers, start, end) {
                Ok(hits) => out.extend(hits.into_iter().map(|(sid, points)| SeriesScan { sid, points })),
                Err(err) => log::warn!("select failed on a segment: {err}"),
            }
        }
        out
    }

    /// Number of frozen disk segments currently adopted. Exposed mainly
    /// for tests asserting on startup scan behavior.
    #[must_use]
    pub fn disk_segment_count(&self) -> usize {
        self.segments.disk_segments().len()
    }

    /// Removes disk segments older than the configured retention,
    /// relative to `now`.
    pub fn evict_expired(&self, now: i64) -> Result<usize> {
        self.segments.evict_expired(now, self.config.retention.as_secs() as i64)
    }

    /// Signals workers to stop and joins them. Does not flush the head
    /// to disk — call [`TsDb::flush`] first if that's desired.
    pub fn close(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        let handles: Vec<JoinHandle<()>> = self.workers.lock().expect("lock poisoned").drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Forces the head to persist regardless of its freeze boundary, if
    /// it holds any data.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.freeze_lock.lock().expect("lock poisoned");
        self.segments.force_freeze(&self.config)?;
        Ok(())
    }
}

impl Drop for TsDb {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(receiver: Receiver<Vec<Row>>, segments: Arc<SegmentList>, stop_signal: Arc<AtomicBool>, config: Config) {
    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(rows) => {
                segments.insert_rows(rows);
                if let Err(err) = segments.freeze_if_needed(&config) {
                    log::error!("freeze failed: {err}");
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if stop_signal.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn scan_segment_dirs(root: &std::path::Path) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if segment_format::is_segment_dir_name(&name) {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

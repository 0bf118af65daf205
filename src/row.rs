// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Ingress types: a single sample (`Point`), the ingested unit
//! (`Row`), and the deterministic series fingerprint (`SeriesId`).

use crate::hash::hash64;
use crate::label::LabelList;
use std::fmt;

/// A single `(timestamp, value)` sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    /// Unix-ish timestamp. The engine truncates this to 32 bits once it
    /// reaches a series' compressed block (see [`crate::series`]).
    pub timestamp: i64,
    /// Sample value.
    pub value: f64,
}

impl Point {
    /// Builds a point.
    #[must_use]
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Deterministic fingerprint of a series: `(metric, canonical label set)`.
///
/// Stable for any two rows that share a metric and, after
/// [`LabelList::filter`]ing and sorting, an equal label multiset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId(String);

impl SeriesId {
    /// Computes the id for `metric` paired with its already-canonicalized
    /// (filtered, metric-tagged, sorted) `labels`.
    #[must_use]
    pub fn compute(metric: &str, labels: &LabelList) -> Self {
        Self(format!("{}/-/{}", hash64(metric.as_bytes()), labels.hash()))
    }

    /// Borrows the underlying string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SeriesId> for String {
    fn from(id: SeriesId) -> Self {
        id.0
    }
}

/// A single ingested sample: metric name, label set, and point.
#[derive(Debug, Clone)]
pub struct Row {
    /// Metric name. Becomes the `__name__` label once canonicalized.
    pub metric: String,
    /// Labels as supplied by the caller; canonicalized in place by
    /// [`Memtable::insert_rows`](crate::memtable::Memtable::insert_rows).
    pub labels: LabelList,
    /// The sample itself.
    pub point: Point,
}

impl Row {
    /// Builds a row.
    #[must_use]
    pub fn new(metric: impl Into<String>, labels: LabelList, point: Point) -> Self {
        Self {
            metric: metric.into(),
            labels,
            point,
        }
    }

    /// Computes this row's [`SeriesId`]. `self.labels` must already be
    /// canonicalized (filtered, `__name__`-tagged, sorted) for the id to
    /// be stable across semantically equal rows.
    #[must_use]
    pub fn id(&self) -> SeriesId {
        SeriesId::compute(&self.metric, &self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Label;

    #[test]
    fn id_is_stable_for_equal_canonical_label_sets() {
        let a = Row::new(
            "cpu.busy",
            LabelList::new(vec![Label::new("dc", "gz"), Label::new("node", "vm1")])
                .add_metric("cpu.busy")
                .sorted(),
            Point::new(1, 1.0),
        );
        let b = Row::new(
            "cpu.busy",
            LabelList::new(vec![Label::new("node", "vm1"), Label::new("dc", "gz")])
                .add_metric("cpu.busy")
                .sorted(),
            Point::new(2, 2.0),
        );
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn id_differs_across_metrics() {
        let labels = LabelList::new(vec![Label::new("node", "vm1")]);
        let a = Row::new(
            "cpu.busy",
            labels.clone().add_metric("cpu.busy").sorted(),
            Point::new(1, 1.0),
        );
        let b = Row::new(
            "mem.used",
            labels.add_metric("mem.used").sorted(),
            Point::new(1, 1.0),
        );
        assert_ne!(a.id(), b.id());
    }
}

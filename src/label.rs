// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Canonical label list: filtering, stable ordering, and fingerprinting.

use crate::hash::hash64;
use std::cell::RefCell;

/// The synthetic label carrying a row's metric name.
pub const METRIC_NAME: &str = "__name__";

const SEPARATOR: &str = "/-/";

/// A single `name=value` label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    /// Label name.
    pub name: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Builds a label.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Serializes as `"name/-/value"`, the token used as an inverted
    /// index key.
    #[must_use]
    pub fn marshal_name(&self) -> String {
        format!("{}{SEPARATOR}{}", self.name, self.value)
    }

    /// Splits a token on the first `"/-/"` occurrence, returning
    /// `("", "")` if the token is malformed.
    #[must_use]
    pub fn unmarshal_name(token: &str) -> (String, String) {
        match token.find(SEPARATOR) {
            Some(idx) => (
                token[..idx].to_owned(),
                token[idx + SEPARATOR.len()..].to_owned(),
            ),
            None => (String::new(), String::new()),
        }
    }
}

/// An ordered list of labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelList(pub Vec<Label>);

thread_local! {
    static HASH_SCRATCH: RefCell<Vec<u8>> = RefCell::new(Vec::with_capacity(1024));
}

impl LabelList {
    /// Wraps a `Vec<Label>`.
    #[must_use]
    pub fn new(labels: Vec<Label>) -> Self {
        Self(labels)
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the labels.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Drops labels with an empty name or value and deduplicates by
    /// name, keeping the first occurrence. A name is marked seen as soon
    /// as any label carries it, even one dropped for an empty value, so
    /// a later label reusing that name is dropped too rather than kept.
    #[must_use]
    pub fn filter(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.0.retain(|label| {
            let already_seen = seen.contains(&label.name);
            let keep = !label.name.is_empty() && !label.value.is_empty() && !already_seen;
            seen.insert(label.name.clone());
            keep
        });
        self
    }

    /// Filters, then appends the synthetic `__name__=metric` label.
    #[must_use]
    pub fn add_metric(self, metric: &str) -> Self {
        let mut filtered = self.filter();
        filtered.0.push(Label::new(METRIC_NAME, metric));
        filtered
    }

    /// Sorts labels by name, ascending.
    #[must_use]
    pub fn sorted(mut self) -> Self {
        self.0.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    /// 64-bit fingerprint over `name \xff value \xff` for every label, in
    /// list order. Callers should `sorted()` first for a canonical hash.
    #[must_use]
    pub fn hash(&self) -> u64 {
        HASH_SCRATCH.with(|scratch| {
            let mut buf = scratch.borrow_mut();
            buf.clear();
            for label in &self.0 {
                buf.extend_from_slice(label.name.as_bytes());
                buf.push(0xff);
                buf.extend_from_slice(label.value.as_bytes());
                buf.push(0xff);
            }
            hash64(&buf)
        })
    }
}

impl IntoIterator for LabelList {
    type Item = Label;
    type IntoIter = std::vec::IntoIter<Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Vec<Label>> for LabelList {
    fn from(labels: Vec<Label>) -> Self {
        Self(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_drops_empty_and_dedups() {
        let labels = LabelList::new(vec![
            Label::new("a", "1"),
            Label::new("", "x"),
            Label::new("b", ""),
            Label::new("a", "2"),
        ])
        .filter();

        assert_eq!(1, labels.len());
        assert_eq!("1", labels.0[0].value);
    }

    #[test]
    fn filter_poisons_name_even_when_dropped_for_empty_value() {
        let labels = LabelList::new(vec![Label::new("a", ""), Label::new("a", "1")]).filter();
        assert!(labels.is_empty());
    }

    #[test]
    fn add_metric_appends_name_label() {
        let labels = LabelList::new(vec![Label::new("node", "vm1")]).add_metric("cpu.busy");
        assert_eq!(2, labels.len());
        assert_eq!(METRIC_NAME, labels.0[1].name);
        assert_eq!("cpu.busy", labels.0[1].value);
    }

    #[test]
    fn sorted_orders_by_name() {
        let labels = LabelList::new(vec![Label::new("b", "2"), Label::new("a", "1")]).sorted();
        assert_eq!("a", labels.0[0].name);
        assert_eq!("b", labels.0[1].name);
    }

    #[test]
    fn hash_is_deterministic_for_equal_sets() {
        let a = LabelList::new(vec![Label::new("dc", "gz"), Label::new("node", "vm1")])
            .add_metric("cpu.busy")
            .sorted();
        let b = LabelList::new(vec![Label::new("node", "vm1"), Label::new("dc", "gz")])
            .add_metric("cpu.busy")
            .sorted();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn marshal_name_roundtrip() {
        let label = Label::new("node", "vm1");
        let token = label.marshal_name();
        assert_eq!(("node".to_owned(), "vm1".to_owned()), Label::unmarshal_name(&token));
    }

    #[test]
    fn unmarshal_name_malformed_is_empty() {
        assert_eq!(
            (String::new(), String::new()),
            Label::unmarshal_name("not-a-token")
        );
    }
}

// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sorted time index: an ordered `i64 -> V` mapping used to organize
//! segments by their minimum timestamp.
//!
//! Any balanced ordered structure satisfies the contract the rest of the
//! crate relies on (insert-or-replace, remove, forward range, full
//! iteration). The reference implementation hand-rolls an AVL tree whose
//! root starts as an unused sentinel (`height == -2`); that's a wart in
//! the source, not a requirement, so this wraps `BTreeMap` instead.

use std::collections::BTreeMap;

/// An ordered `i64`-keyed container.
#[derive(Debug)]
pub struct TimeIndex<V> {
    tree: BTreeMap<i64, V>,
}

impl<V> Default for TimeIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> TimeIndex<V> {
    /// Builds an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: BTreeMap::new(),
        }
    }

    /// Inserts `value` under `key`. A duplicate key overwrites the prior
    /// value.
    pub fn add(&mut self, key: i64, value: V) {
        self.tree.insert(key, value);
    }

    /// Removes the entry at `key`, returning whether one was present.
    pub fn remove(&mut self, key: i64) -> bool {
        self.tree.remove(&key).is_some()
    }

    /// Iterates the values whose key lies in `[start, end]`, in key
    /// order.
    pub fn range(&self, start: i64, end: i64) -> impl Iterator<Item = &V> {
        self.tree.range(start..=end).map(|(_, v)| v)
    }

    /// Iterates every value, in key order.
    pub fn all(&self) -> impl Iterator<Item = &V> {
        self.tree.values()
    }

    /// Iterates every `(key, value)` pair, in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&i64, &V)> {
        self.tree.iter()
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Returns `true` if the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_range() {
        let mut idx = TimeIndex::new();
        idx.add(10, "a");
        idx.add(20, "b");
        idx.add(30, "c");

        let got: Vec<_> = idx.range(15, 25).copied().collect();
        assert_eq!(vec!["b"], got);
    }

    #[test]
    fn add_overwrites_duplicate_key() {
        let mut idx = TimeIndex::new();
        idx.add(1, "a");
        idx.add(1, "b");
        assert_eq!(1, idx.len());
        assert_eq!(vec!["b"], idx.all().copied().collect::<Vec<_>>());
    }

    #[test]
    fn remove_reports_presence() {
        let mut idx = TimeIndex::new();
        idx.add(5, "x");
        assert!(idx.remove(5));
        assert!(!idx.remove(5));
        assert!(idx.is_empty());
    }

    #[test]
    fn all_is_in_key_order() {
        let mut idx = TimeIndex::new();
        idx.add(3, 3);
        idx.add(1, 1);
        idx.add(2, 2);
        assert_eq!(vec![1, 2, 3], idx.all().copied().collect::<Vec<_>>());
    }

    #[test]
    fn range_is_inclusive_of_bounds() {
        let mut idx = TimeIndex::new();
        idx.add(1, 1);
        idx.add(2, 2);
        idx.add(3, 3);
        assert_eq!(vec![1, 2, 3], idx.range(1, 3).copied().collect::<Vec<_>>());
    }
}

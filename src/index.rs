// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Inverted label index: memtable (string series ids) and disk (dense
//! `u32` ordinals packed into a roaring bitmap) variants.

use crate::label::LabelList;
use crate::row::SeriesId;
use roaring::RoaringBitmap;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// `label/-/value` token -> set of series ids, as seen by the live head.
///
/// The outer map and each token's set are independently lock-guarded so
/// concurrent `update_index` calls for different tokens don't serialize
/// on each other more than necessary.
#[derive(Default)]
pub struct MemIndex {
    index: RwLock<HashMap<String, RwLock<HashSet<SeriesId>>>>,
}

impl MemIndex {
    /// Builds an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `sid` under every label token in `labels`.
    pub fn update_index(&self, sid: &SeriesId, labels: &LabelList) {
        for label in labels.iter() {
            let token = label.marshal_name();

            {
                let index = self.index.read().expect("lock poisoned");
                if let Some(set) = index.get(&token) {
                    set.write().expect("lock poisoned").insert(sid.clone());
                    continue;
                }
            }

            let mut index = self.index.write().expect("lock poisoned");
            index
                .entry(token)
                .or_insert_with(|| RwLock::new(HashSet::new()))
                .write()
                .expect("lock poisoned")
                .insert(sid.clone());
        }
    }

    /// Series ids indexed under `token`, or an empty vec if the token was
    /// never observed.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Vec<SeriesId> {
        let index = self.index.read().expect("lock poisoned");
        match index.get(token) {
            Some(set) => set.read().expect("lock poisoned").iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Invokes `f` with every `(token, members)` pair under the outer
    /// lock, mirroring the source's `Range` callback shape.
    pub fn range(&self, mut f: impl FnMut(&str, &HashSet<SeriesId>)) {
        let index = self.index.read().expect("lock poisoned");
        for (token, set) in index.iter() {
            f(token, &set.read().expect("lock poisoned"));
        }
    }
}

/// `label/-/value` token -> roaring bitmap of series ordinals, built once
/// from a loaded segment's meta section.
pub struct DiskIndex {
    label2sids: HashMap<String, RoaringBitmap>,
    /// Ordinal -> token, in the order tokens appeared in the meta.
    label_ordered: Vec<String>,
}

impl DiskIndex {
    /// Builds the index from an ordered `(token, ordinals)` list, as
    /// parsed from a segment's meta `labels_block`. The list's position
    /// becomes each token's ordinal in `label_ordered`.
    #[must_use]
    pub fn build(entries: &[(String, Vec<u32>)]) -> Self {
        let mut label2sids = HashMap::with_capacity(entries.len());
        let mut label_ordered = Vec::with_capacity(entries.len());

        for (token, sids) in entries {
            let mut bitmap = RoaringBitmap::new();
            for &sid in sids {
                bitmap.insert(sid);
            }
            label2sids.insert(token.clone(), bitmap);
            label_ordered.push(token.clone());
        }

        Self {
            label2sids,
            label_ordered,
        }
    }

    /// The bitmap of series ordinals indexed under `token`, if any.
    #[must_use]
    pub fn lookup(&self, token: &str) -> Option<&RoaringBitmap> {
        self.label2sids.get(token)
    }

    /// The token at `ordinal`, its position in the original meta list.
    #[must_use]
    pub fn token_at(&self, ordinal: usize) -> Option<&str> {
        self.label_ordered.get(ordinal).map(String::as_str)
    }

    /// Number of distinct tokens indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.label_ordered.len()
    }

    /// Returns `true` if no tokens are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.label_ordered.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::Label;

    fn sid(s: &str) -> SeriesId {
        SeriesId::compute(s, &LabelList::new(vec![Label::new("x", "1")]).add_metric(s))
    }

    #[test]
    fn mem_index_update_and_lookup() {
        let index = MemIndex::new();
        let id = sid("cpu.busy");
        let labels = LabelList::new(vec![Label::new("node", "vm1")]).add_metric("cpu.busy");
        index.update_index(&id, &labels);

        let hits = index.lookup(&Label::new("node", "vm1").marshal_name());
        assert_eq!(vec![id], hits);
    }

    #[test]
    fn mem_index_unknown_token_is_empty() {
        let index = MemIndex::new();
        assert!(index.lookup("missing/-/token").is_empty());
    }

    #[test]
    fn mem_index_range_visits_every_token() {
        let index = MemIndex::new();
        let id = sid("cpu.busy");
        let labels = LabelList::new(vec![Label::new("a", "1"), Label::new("b", "2")]).add_metric("cpu.busy");
        index.update_index(&id, &labels);

        let mut seen = Vec::new();
        index.range(|token, _| seen.push(token.to_owned()));
        seen.sort();
        assert_eq!(
            vec![
                Label::new("__name__", "cpu.busy").marshal_name(),
                Label::new("a", "1").marshal_name(),
                Label::new("b", "2").marshal_name(),
            ]
            .into_iter()
            .collect::<std::collections::BTreeSet<_>>(),
            seen.into_iter().collect::<std::collections::BTreeSet<_>>()
        );
    }

    #[test]
    fn disk_index_build_and_lookup() {
        let idx = DiskIndex::build(&[
            ("node/-/vm1".to_owned(), vec![0, 2]),
            ("dc/-/gz".to_owned(), vec![1]),
        ]);
        assert_eq!(2, idx.len());
        assert!(idx.lookup("node/-/vm1").unwrap().contains(0));
        assert!(idx.lookup("node/-/vm1").unwrap().contains(2));
        assert_eq!(Some("node/-/vm1"), idx.token_at(0));
        assert_eq!(Some("dc/-/gz"), idx.token_at(1));
        assert!(idx.lookup("missing").is_none());
    }
}

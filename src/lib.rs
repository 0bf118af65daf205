// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! An embeddable time-series storage engine: a bounded write queue feeds
//! a mutable head memtable, which periodically freezes into an
//! immutable, mmap-backed, Gorilla-compressed disk segment.
//!
//! No WAL, no cross-process writers, no replication, no label
//! full-text search, and no mutation of persisted samples — see
//! [`tsdb::TsDb`] for the entry point.

mod coding;
mod compression;
mod config;
mod disk_segment;
mod error;
mod hash;
mod index;
mod label;
mod memtable;
mod row;
mod segment_format;
mod segment_list;
mod series;
mod time_index;
mod tsdb;

pub use compression::CompressionKind;
pub use config::Config;
pub use error::{DecodeError, Error, Result};
pub use label::{Label, LabelList};
pub use row::{Point, Row, SeriesId};
pub use segment_format::{is_segment_dir_name, segment_dir_name, BinaryMetaSerializer, MetaSerializer};
pub use tsdb::{SeriesScan, TsDb};

// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! On-disk segment binary layout: the `data` file's framing, the
//! compressed meta section inside it, and the human-readable sidecar
//! `meta` JSON file used to cheaply recover a segment's time bounds on
//! startup scan without touching `data` at all.
//!
//! `data` file:
//! ```text
//! [0..8)              u64  dataLen
//! [8..16)             u64  metaLen
//! [16..16+dataLen)    concatenated compressed per-series blocks
//! [16+dataLen..end)   compressed meta section (length = metaLen)
//! ```
//! The meta section, once decompressed, is:
//! ```text
//! labels_block: repeat { u16 nameLen (0xffff ends); utf8 name; u32 sidCount; u32[sidCount] ordinals }
//! series_block: repeat { u16 sidLen  (0xffff ends); utf8 sid;  u64 start; u64 end; u32 labelCount; u32[labelCount] ordinals }
//! trailer:      u64 minTimestamp; u64 maxTimestamp; utf8 signature
//! ```

use crate::coding::{Decoder, EncodeBuf};
use crate::error::DecodeError;
use serde::{Deserialize, Serialize};

/// Length-prefix field width: two `u64`s (`dataLen`, `metaLen`).
pub const HEADER_LEN: u64 = 16;

/// Sentinel ending both variable-length meta sections. Legitimate label
/// names and series ids never reach this length.
pub const SENTINEL: u16 = 0xffff;

/// Literal trailer marker verified on load.
pub const SIGNATURE: &str = "https://github.com/azhsmesos";

/// One series' entry in the meta `series_block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaSeries {
    /// The series id string.
    pub sid: String,
    /// Start offset of this series' compressed block within the `data`
    /// section.
    pub start_offset: u64,
    /// End offset (exclusive) of this series' compressed block.
    pub end_offset: u64,
    /// Ascending ordinals into `labels_block`, identifying which labels
    /// this series carries.
    pub labels: Vec<u32>,
}

/// One label token's entry in the meta `labels_block`: the token plus
/// every series ordinal observed under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesWithLabel {
    /// The `name/-/value` token.
    pub name: String,
    /// Series ordinals (positions in the `series_block` list) carrying
    /// this token.
    pub sids: Vec<u32>,
}

/// A segment's full meta section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Minimum observed timestamp across the segment.
    pub min_timestamp: i64,
    /// Maximum observed timestamp across the segment.
    pub max_timestamp: i64,
    /// Series entries, in meta order (their position is the ordinal
    /// other structures reference).
    pub series: Vec<MetaSeries>,
    /// Label entries, in meta order (their position is the ordinal
    /// `MetaSeries::labels` refers to).
    pub labels: Vec<SeriesWithLabel>,
}

/// Serializes `meta` into the uncompressed binary layout documented
/// above. The caller is responsible for running the result through the
/// segment's configured [`BytesCompressor`](crate::compression::BytesCompressor).
#[must_use]
pub fn marshal_meta(meta: &Metadata) -> Vec<u8> {
    let mut buf = EncodeBuf::new();

    for entry in &meta.labels {
        let name_bytes = entry.name.as_bytes();
        buf.marshal_u16(&[name_bytes.len() as u16]);
        buf.marshal_string(&entry.name);
        buf.marshal_u32(&[entry.sids.len() as u32]);
        buf.marshal_u32(&entry.sids);
    }
    buf.marshal_u16(&[SENTINEL]);

    for entry in &meta.series {
        let sid_bytes = entry.sid.as_bytes();
        buf.marshal_u16(&[sid_bytes.len() as u16]);
        buf.marshal_string(&entry.sid);
        buf.marshal_u64(&[entry.start_offset, entry.end_offset]);
        buf.marshal_u32(&[entry.labels.len() as u32]);
        buf.marshal_u32(&entry.labels);
    }
    buf.marshal_u16(&[SENTINEL]);

    buf.marshal_u64(&[meta.min_timestamp as u64, meta.max_timestamp as u64]);
    buf.marshal_string(SIGNATURE);

    buf.into_bytes()
}

/// Parses the uncompressed binary meta layout, verifying the trailer
/// signature. Returns [`DecodeError::BadSignature`] if it is absent or
/// mismatched, or [`DecodeError::InvalidSize`] on a truncated buffer.
pub fn unmarshal_meta(bytes: &[u8]) -> Result<Metadata, DecodeError> {
    let mut dec = Decoder::new(bytes);

    let mut labels = Vec::new();
    loop {
        let name_len = dec.unmarshal_u16();
        if let Some(err) = dec.err() {
            return Err(err.clone());
        }
        if name_len == SENTINEL {
            break;
        }
        let name = dec.unmarshal_string(name_len as usize);
        let sid_count = dec.unmarshal_u32();
        let mut sids = Vec::with_capacity(sid_count as usize);
        for _ in 0..sid_count {
            sids.push(dec.unmarshal_u32());
        }
        if let Some(err) = dec.err() {
            return Err(err.clone());
        }
        labels.push(SeriesWithLabel { name, sids });
    }

    let mut series = Vec::new();
    loop {
        let sid_len = dec.unmarshal_u16();
        if let Some(err) = dec.err() {
            return Err(err.clone());
        }
        if sid_len == SENTINEL {
            break;
        }
        let sid = dec.unmarshal_string(sid_len as usize);
        let start_offset = dec.unmarshal_u64();
        let end_offset = dec.unmarshal_u64();
        let label_count = dec.unmarshal_u32();
        let mut label_ordinals = Vec::with_capacity(label_count as usize);
        for _ in 0..label_count {
            label_ordinals.push(dec.unmarshal_u32());
        }
        if let Some(err) = dec.err() {
            return Err(err.clone());
        }
        series.push(MetaSeries {
            sid,
            start_offset,
            end_offset,
            labels: label_ordinals,
        });
    }

    let min_timestamp = dec.unmarshal_u64() as i64;
    let max_timestamp = dec.unmarshal_u64() as i64;
    if let Some(err) = dec.err() {
        return Err(err.clone());
    }

    let signature =
        std::str::from_utf8(dec.remaining()).map_err(|_| DecodeError::InvalidUtf8)?;
    if signature != SIGNATURE {
        return Err(DecodeError::BadSignature);
    }

    Ok(Metadata {
        min_timestamp,
        max_timestamp,
        series,
        labels,
    })
}

/// Codec for a segment's meta section. An interface seam so the binary
/// layout above can be swapped without touching callers — the engine
/// ships one implementation, [`BinaryMetaSerializer`].
pub trait MetaSerializer: Send + Sync {
    /// Serializes `meta` to its uncompressed wire form.
    fn marshal(&self, meta: &Metadata) -> Vec<u8>;
    /// Parses a buffer produced by `marshal`.
    fn unmarshal(&self, bytes: &[u8]) -> Result<Metadata, DecodeError>;
}

/// The layout documented on this module.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryMetaSerializer;

impl MetaSerializer for BinaryMetaSerializer {
    fn marshal(&self, meta: &Metadata) -> Vec<u8> {
        marshal_meta(meta)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<Metadata, DecodeError> {
        unmarshal_meta(bytes)
    }
}

/// Human-readable sidecar written alongside `data` as the `meta` file,
/// letting startup scan recover a segment's time bounds and counters
/// without mmapping or parsing `data` at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarMeta {
    #[serde(rename = "seriesCount")]
    pub series_count: i64,
    #[serde(rename = "dataPointsCount")]
    pub data_points_count: i64,
    #[serde(rename = "maxTimestamp")]
    pub max_timestamp: i64,
    #[serde(rename = "minTimestamp")]
    pub min_timestamp: i64,
}

/// Builds the `seg-<minTs>-<maxTs>` directory name for a segment's
/// bounds.
#[must_use]
pub fn segment_dir_name(min_ts: i64, max_ts: i64) -> String {
    format!("seg-{min_ts}-{max_ts}")
}

/// Returns `true` if `name` is a segment directory name (prefixed
/// `seg-`), as startup scan uses to decide which children to open.
#[must_use]
pub fn is_segment_dir_name(name: &str) -> bool {
    name.starts_with("seg-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        Metadata {
            min_timestamp: 100,
            max_timestamp: 900,
            series: vec![
                MetaSeries {
                    sid: "123/-/456".to_owned(),
                    start_offset: 0,
                    end_offset: 42,
                    labels: vec![0, 1],
                },
                MetaSeries {
                    sid: "789/-/012".to_owned(),
                    start_offset: 42,
                    end_offset: 84,
                    labels: vec![1],
                },
            ],
            labels: vec![
                SeriesWithLabel {
                    name: "__name__/-/cpu.busy".to_owned(),
                    sids: vec![0],
                },
                SeriesWithLabel {
                    name: "node/-/vm1".to_owned(),
                    sids: vec![0, 1],
                },
            ],
        }
    }

    #[test]
    fn round_trip() {
        let meta = sample();
        let bytes = marshal_meta(&meta);
        let got = unmarshal_meta(&bytes).unwrap();
        assert_eq!(meta, got);
    }

    #[test]
    fn tampered_signature_is_bad_signature() {
        let meta = sample();
        let mut bytes = marshal_meta(&meta);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(unmarshal_meta(&bytes), Err(DecodeError::BadSignature)));
    }

    #[test]
    fn truncated_buffer_is_invalid_size() {
        let meta = sample();
        let bytes = marshal_meta(&meta);
        let truncated = &bytes[..bytes.len() / 2];
        assert!(unmarshal_meta(truncated).is_err());
    }

    #[test]
    fn empty_meta_round_trips() {
        let meta = Metadata {
            min_timestamp: 0,
            max_timestamp: 0,
            series: Vec::new(),
            labels: Vec::new(),
        };
        let bytes = marshal_meta(&meta);
        assert_eq!(meta, unmarshal_meta(&bytes).unwrap());
    }

    #[test]
    fn segment_dir_naming() {
        assert_eq!("seg-100-200", segment_dir_name(100, 200));
        assert!(is_segment_dir_name("seg-100-200"));
        assert!(!is_segment_dir_name("other-dir"));
    }
}

//! Table of contents codec: dense frame list, index manifests, segment
//! catalog, reserved Merkle slot, trailing checksum.

use crate::codec::{Reader, Writer};
use crate::digest::hash_bytes;
use mv2s_core::{
    frame::{FrameMeta, FrameStatus, PayloadDescriptor, PayloadEncoding, Tag},
    ids::FrameId,
    MvError, MvResult,
};
use std::collections::BTreeMap;

/// Current TOC wire version.
pub const TOC_VERSION: u32 = 1;

/// Width in bytes of the reserved Merkle-root slot (all zero in v1).
pub const MERKLE_ROOT_WIDTH: usize = 32;

/// Which index lane a manifest/segment describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IndexKind {
    /// Lexical/structured-memory blob (FTS + relational tables).
    Lex = 0,
    /// Vector index blob.
    Vec = 1,
    /// Timeline index blob.
    Time = 2,
}

impl IndexKind {
    fn from_tag(tag: u8) -> MvResult<Self> {
        match tag {
            0 => Ok(Self::Lex),
            1 => Ok(Self::Vec),
            2 => Ok(Self::Time),
            other => Err(MvError::InvalidToc {
                reason: format!("unknown index kind tag {other}"),
            }),
        }
    }

    fn tag(self) -> u8 {
        self as u8
    }
}

/// Kind-specific manifest metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestMeta {
    /// Lex index: number of indexed documents.
    Lex {
        /// Document count in the lex blob.
        doc_count: u64,
    },
    /// Vector index: vector count, dimension, and similarity tag.
    Vec {
        /// Number of stored vectors.
        vector_count: u64,
        /// Vector dimension.
        dimension: u32,
        /// Similarity function tag (0=cosine, 1=dot, 2=l2).
        similarity: u8,
    },
    /// Timeline index: number of entries.
    Time {
        /// Entry count in the timeline blob.
        entry_count: u64,
    },
}

/// Location, checksum, and kind-specific metadata of one embedded index blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexManifest {
    /// Absolute byte offset of the blob in the data region.
    pub bytes_offset: u64,
    /// Length in bytes of the blob.
    pub bytes_length: u64,
    /// SHA-256 of the blob.
    pub checksum: [u8; 32],
    /// Kind-specific metadata.
    pub meta: ManifestMeta,
}

/// One entry in the segment catalog: a kind-tagged, offset-ordered,
/// non-overlapping data-region range backing an index manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Which index lane this segment belongs to.
    pub kind: IndexKind,
    /// Absolute start offset.
    pub offset: u64,
    /// Length in bytes.
    pub length: u64,
    /// SHA-256 of the segment bytes.
    pub checksum: [u8; 32],
}

/// Decoded table of contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Toc {
    /// Dense, commit-order frame list.
    pub frames: Vec<FrameMeta>,
    /// Lex index manifest, if one has been committed.
    pub lex_manifest: Option<IndexManifest>,
    /// Vector index manifest, if one has been committed.
    pub vec_manifest: Option<IndexManifest>,
    /// Timeline index manifest, if one has been committed.
    pub time_manifest: Option<IndexManifest>,
    /// Segment catalog, offset-ordered.
    pub segments: Vec<SegmentEntry>,
}

fn write_option_i64(w: &mut Writer, v: Option<i64>) {
    w.presence(v.is_some());
    if let Some(x) = v {
        w.i64(x);
    }
}

fn read_option_i64(r: &mut Reader) -> MvResult<Option<i64>> {
    Ok(if r.presence()? { Some(r.i64()?) } else { None })
}

fn write_option_u32(w: &mut Writer, v: Option<u32>) {
    w.presence(v.is_some());
    if let Some(x) = v {
        w.u32(x);
    }
}

fn read_option_u32(r: &mut Reader) -> MvResult<Option<u32>> {
    Ok(if r.presence()? { Some(r.u32()?) } else { None })
}

fn write_option_str(w: &mut Writer, v: &Option<String>) {
    w.presence(v.is_some());
    if let Some(x) = v {
        w.str_lp(x);
    }
}

fn read_option_str(r: &mut Reader) -> MvResult<Option<String>> {
    Ok(if r.presence()? { Some(r.str_lp()?) } else { None })
}

fn write_option_frame_id(w: &mut Writer, v: Option<FrameId>) {
    w.presence(v.is_some());
    if let Some(x) = v {
        w.u64(x.0);
    }
}

fn read_option_frame_id(r: &mut Reader) -> MvResult<Option<FrameId>> {
    Ok(if r.presence()? {
        Some(FrameId(r.u64()?))
    } else {
        None
    })
}

fn write_option_digest(w: &mut Writer, v: Option<[u8; 32]>) {
    w.presence(v.is_some());
    if let Some(x) = v {
        w.raw(&x);
    }
}

fn read_option_digest(r: &mut Reader) -> MvResult<Option<[u8; 32]>> {
    Ok(if r.presence()? { Some(r.digest32()?) } else { None })
}

fn write_option_u64(w: &mut Writer, v: Option<u64>) {
    w.presence(v.is_some());
    if let Some(x) = v {
        w.u64(x);
    }
}

fn read_option_u64(r: &mut Reader) -> MvResult<Option<u64>> {
    Ok(if r.presence()? { Some(r.u64()?) } else { None })
}

fn write_payload(w: &mut Writer, p: &PayloadDescriptor) {
    w.u64(p.payload_offset);
    w.u64(p.payload_length);
    w.u8(p.encoding.tag());
    write_option_u64(w, p.canonical_length);
    write_option_digest(w, p.canonical_digest);
    write_option_digest(w, p.stored_digest);
}

fn read_payload(r: &mut Reader) -> MvResult<PayloadDescriptor> {
    let payload_offset = r.u64()?;
    let payload_length = r.u64()?;
    let tag = r.u8()?;
    let encoding = PayloadEncoding::from_tag(tag).ok_or_else(|| MvError::InvalidToc {
        reason: format!("unknown payload encoding tag {tag}"),
    })?;
    let canonical_length = read_option_u64(r)?;
    let canonical_digest = read_option_digest(r)?;
    let stored_digest = read_option_digest(r)?;
    let payload = PayloadDescriptor {
        payload_offset,
        payload_length,
        encoding,
        canonical_length,
        canonical_digest,
        stored_digest,
    };
    payload
        .validate()
        .map_err(|reason| MvError::InvalidToc { reason })?;
    Ok(payload)
}

fn write_frame(w: &mut Writer, f: &FrameMeta) {
    w.u64(f.id.0);
    w.i64(f.captured_at_ms);
    write_option_i64(w, f.anchor_at_ms);
    write_option_str(w, &f.kind);
    write_option_str(w, &f.track);
    write_option_str(w, &f.uri);
    write_option_str(w, &f.title);
    write_option_str(w, &f.search_text);

    w.u32(f.tags.len() as u32);
    for t in &f.tags {
        w.str_lp(&t.key);
        w.str_lp(&t.value);
    }

    w.u32(f.labels.len() as u32);
    for l in &f.labels {
        w.str_lp(l);
    }

    w.u32(f.content_dates.len() as u32);
    for d in &f.content_dates {
        w.i64(*d);
    }

    write_option_str(w, &f.role);
    write_option_frame_id(w, f.parent_id);
    write_option_u32(w, f.chunk_index);
    write_option_u32(w, f.chunk_count);
    w.presence(f.chunk_manifest.is_some());
    if let Some(m) = &f.chunk_manifest {
        w.bytes_lp(m);
    }

    w.u8(match f.status {
        FrameStatus::Active => 0,
        FrameStatus::Deleted => 1,
    });
    write_option_frame_id(w, f.supersedes);
    write_option_frame_id(w, f.superseded_by);

    w.u32(f.metadata.len() as u32);
    for (k, v) in &f.metadata {
        w.str_lp(k);
        w.str_lp(v);
    }

    write_payload(w, &f.payload);
}

fn read_frame(r: &mut Reader) -> MvResult<FrameMeta> {
    let id = FrameId(r.u64()?);
    let captured_at_ms = r.i64()?;
    let anchor_at_ms = read_option_i64(r)?;
    let kind = read_option_str(r)?;
    let track = read_option_str(r)?;
    let uri = read_option_str(r)?;
    let title = read_option_str(r)?;
    let search_text = read_option_str(r)?;

    let tag_count = r.u32()? as usize;
    let mut tags = Vec::with_capacity(tag_count);
    for _ in 0..tag_count {
        let key = r.str_lp()?;
        let value = r.str_lp()?;
        tags.push(Tag { key, value });
    }

    let label_count = r.u32()? as usize;
    let mut labels = Vec::with_capacity(label_count);
    for _ in 0..label_count {
        labels.push(r.str_lp()?);
    }

    let date_count = r.u32()? as usize;
    let mut content_dates = Vec::with_capacity(date_count);
    for _ in 0..date_count {
        content_dates.push(r.i64()?);
    }

    let role = read_option_str(r)?;
    let parent_id = read_option_frame_id(r)?;
    let chunk_index = read_option_u32(r)?;
    let chunk_count = read_option_u32(r)?;
    let chunk_manifest = if r.presence()? {
        Some(r.bytes_lp()?)
    } else {
        None
    };

    let status = match r.u8()? {
        0 => FrameStatus::Active,
        1 => FrameStatus::Deleted,
        other => {
            return Err(MvError::InvalidToc {
                reason: format!("unknown frame status tag {other}"),
            })
        }
    };
    let supersedes = read_option_frame_id(r)?;
    let superseded_by = read_option_frame_id(r)?;

    let meta_count = r.u32()? as usize;
    let mut metadata = BTreeMap::new();
    for _ in 0..meta_count {
        let k = r.str_lp()?;
        let v = r.str_lp()?;
        metadata.insert(k, v);
    }

    let payload = read_payload(r)?;

    Ok(FrameMeta {
        id,
        captured_at_ms,
        anchor_at_ms,
        kind,
        track,
        uri,
        title,
        search_text,
        tags,
        labels,
        content_dates,
        role,
        parent_id,
        chunk_index,
        chunk_count,
        chunk_manifest,
        status,
        supersedes,
        superseded_by,
        metadata,
        payload,
    })
}

fn write_manifest(w: &mut Writer, m: &Option<IndexManifest>) {
    w.presence(m.is_some());
    let Some(m) = m else { return };
    w.u64(m.bytes_offset);
    w.u64(m.bytes_length);
    w.raw(&m.checksum);
    match &m.meta {
        ManifestMeta::Lex { doc_count } => {
            w.u8(0);
            w.u64(*doc_count);
        }
        ManifestMeta::Vec {
            vector_count,
            dimension,
            similarity,
        } => {
            w.u8(1);
            w.u64(*vector_count);
            w.u32(*dimension);
            w.u8(*similarity);
        }
        ManifestMeta::Time { entry_count } => {
            w.u8(2);
            w.u64(*entry_count);
        }
    }
}

fn read_manifest(r: &mut Reader) -> MvResult<Option<IndexManifest>> {
    if !r.presence()? {
        return Ok(None);
    }
    let bytes_offset = r.u64()?;
    let bytes_length = r.u64()?;
    let checksum = r.digest32()?;
    let meta = match r.u8()? {
        0 => ManifestMeta::Lex {
            doc_count: r.u64()?,
        },
        1 => ManifestMeta::Vec {
            vector_count: r.u64()?,
            dimension: r.u32()?,
            similarity: r.u8()?,
        },
        2 => ManifestMeta::Time {
            entry_count: r.u64()?,
        },
        other => {
            return Err(MvError::InvalidToc {
                reason: format!("unknown manifest meta tag {other}"),
            })
        }
    };
    Ok(Some(IndexManifest {
        bytes_offset,
        bytes_length,
        checksum,
        meta,
    }))
}

impl Toc {
    fn encode_body(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.u32(TOC_VERSION);

        w.u32(self.frames.len() as u32);
        for f in &self.frames {
            write_frame(&mut w, f);
        }

        write_manifest(&mut w, &self.lex_manifest);
        write_manifest(&mut w, &self.vec_manifest);
        write_manifest(&mut w, &self.time_manifest);

        w.u32(self.segments.len() as u32);
        for s in &self.segments {
            w.u8(s.kind.tag());
            w.u64(s.offset);
            w.u64(s.length);
            w.raw(&s.checksum);
        }

        w.raw(&[0u8; MERKLE_ROOT_WIDTH]);
        w.into_bytes()
    }

    /// Encode the TOC plus its trailing 32-byte checksum.
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let checksum = hash_bytes(&body);
        let mut out = body;
        out.extend_from_slice(&checksum);
        out
    }

    /// Decode and checksum-verify a TOC blob, then validate frame-data-range
    /// invariants against `wal_region_end` and `footer_offset`.
    pub fn decode(bytes: &[u8], wal_region_end: u64, footer_offset: u64) -> MvResult<Self> {
        if bytes.len() < 32 {
            return Err(MvError::InvalidToc {
                reason: "truncated toc".to_string(),
            });
        }
        let (body, stored_checksum) = bytes.split_at(bytes.len() - 32);
        let expected = hash_bytes(body);
        if expected.as_slice() != stored_checksum {
            return Err(MvError::ChecksumMismatch {
                scope: "toc".to_string(),
            });
        }

        let mut r = Reader::new(body);
        let version = r.u32()?;
        if version != TOC_VERSION {
            return Err(MvError::InvalidToc {
                reason: format!("unsupported toc_version {version}"),
            });
        }

        let frame_count = r.u32()? as usize;
        let mut frames = Vec::with_capacity(frame_count);
        for i in 0..frame_count {
            let f = read_frame(&mut r)?;
            if f.id.0 != i as u64 {
                return Err(MvError::InvalidToc {
                    reason: format!("dense id violation: slot {i} holds frame id {}", f.id.0),
                });
            }
            frames.push(f);
        }

        let lex_manifest = read_manifest(&mut r)?;
        let vec_manifest = read_manifest(&mut r)?;
        let time_manifest = read_manifest(&mut r)?;

        let segment_count = r.u32()? as usize;
        let mut segments = Vec::with_capacity(segment_count);
        for _ in 0..segment_count {
            let kind = IndexKind::from_tag(r.u8()?)?;
            let offset = r.u64()?;
            let length = r.u64()?;
            let checksum = r.digest32()?;
            segments.push(SegmentEntry {
                kind,
                offset,
                length,
                checksum,
            });
        }
        r.raw(MERKLE_ROOT_WIDTH)?;

        let toc = Toc {
            frames,
            lex_manifest,
            vec_manifest,
            time_manifest,
            segments,
        };
        toc.validate_ranges(wal_region_end, footer_offset)?;
        Ok(toc)
    }

    /// Validate that every frame payload range lies within
    /// `[wal_region_end, footer_offset]` and that segments are
    /// offset-ordered and non-overlapping.
    pub fn validate_ranges(&self, wal_region_end: u64, footer_offset: u64) -> MvResult<()> {
        for f in &self.frames {
            let start = f.payload.payload_offset;
            let end = start + f.payload.payload_length;
            if start < wal_region_end || end > footer_offset {
                return Err(MvError::InvalidToc {
                    reason: format!(
                        "frame {} payload range [{},{}) outside data region [{},{})",
                        f.id.0, start, end, wal_region_end, footer_offset
                    ),
                });
            }
        }

        let mut last_end: Option<u64> = None;
        for s in &self.segments {
            if let Some(prev) = last_end {
                if s.offset < prev {
                    return Err(MvError::InvalidToc {
                        reason: "segment catalog is not offset-ordered/non-overlapping"
                            .to_string(),
                    });
                }
            }
            last_end = Some(s.offset + s.length);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mv2s_core::frame::{FrameStatus, PayloadDescriptor, PayloadEncoding};

    fn sample_frame(id: u64, offset: u64) -> FrameMeta {
        FrameMeta {
            id: FrameId(id),
            captured_at_ms: 1000,
            anchor_at_ms: None,
            kind: Some("video".to_string()),
            track: None,
            uri: None,
            title: Some("clip".to_string()),
            search_text: None,
            tags: vec![Tag {
                key: "k".to_string(),
                value: "v".to_string(),
            }],
            labels: vec!["l1".to_string()],
            content_dates: vec![1, 2, 3],
            role: None,
            parent_id: None,
            chunk_index: None,
            chunk_count: None,
            chunk_manifest: None,
            status: FrameStatus::Active,
            supersedes: None,
            superseded_by: None,
            metadata: BTreeMap::new(),
            payload: PayloadDescriptor {
                payload_offset: offset,
                payload_length: 16,
                encoding: PayloadEncoding::Plain,
                canonical_length: None,
                canonical_digest: Some([1u8; 32]),
                stored_digest: Some([1u8; 32]),
            },
        }
    }

    #[test]
    fn round_trips_empty_toc() {
        let toc = Toc {
            frames: vec![],
            lex_manifest: None,
            vec_manifest: None,
            time_manifest: None,
            segments: vec![],
        };
        let bytes = toc.encode();
        let decoded = Toc::decode(&bytes, 8192, 1_000_000).unwrap();
        assert_eq!(decoded, toc);
    }

    #[test]
    fn round_trips_with_frames_and_manifests() {
        let toc = Toc {
            frames: vec![sample_frame(0, 10_000), sample_frame(1, 10_100)],
            lex_manifest: Some(IndexManifest {
                bytes_offset: 20_000,
                bytes_length: 500,
                checksum: [2u8; 32],
                meta: ManifestMeta::Lex { doc_count: 2 },
            }),
            vec_manifest: Some(IndexManifest {
                bytes_offset: 20_500,
                bytes_length: 300,
                checksum: [3u8; 32],
                meta: ManifestMeta::Vec {
                    vector_count: 2,
                    dimension: 384,
                    similarity: 0,
                },
            }),
            time_manifest: None,
            segments: vec![SegmentEntry {
                kind: IndexKind::Lex,
                offset: 20_000,
                length: 500,
                checksum: [2u8; 32],
            }],
        };
        let bytes = toc.encode();
        let decoded = Toc::decode(&bytes, 8192, 1_000_000).unwrap();
        assert_eq!(decoded, toc);
    }

    #[test]
    fn dense_id_violation_rejected() {
        let toc = Toc {
            frames: vec![sample_frame(1, 10_000)],
            lex_manifest: None,
            vec_manifest: None,
            time_manifest: None,
            segments: vec![],
        };
        let bytes = toc.encode();
        assert!(Toc::decode(&bytes, 8192, 1_000_000).is_err());
    }

    #[test]
    fn out_of_range_payload_rejected() {
        let toc = Toc {
            frames: vec![sample_frame(0, 100)],
            lex_manifest: None,
            vec_manifest: None,
            time_manifest: None,
            segments: vec![],
        };
        let bytes = toc.encode();
        assert!(Toc::decode(&bytes, 8192, 1_000_000).is_err());
    }

    #[test]
    fn checksum_tamper_detected() {
        let toc = Toc {
            frames: vec![sample_frame(0, 10_000)],
            lex_manifest: None,
            vec_manifest: None,
            time_manifest: None,
            segments: vec![],
        };
        let mut bytes = toc.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(Toc::decode(&bytes, 8192, 1_000_000).is_err());
    }
}

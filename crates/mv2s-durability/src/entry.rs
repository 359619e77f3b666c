//! Opcode-tagged WAL entry payloads: `putFrame` / `deleteFrame` /
//! `supersedeFrame` / `putEmbedding`.

use mv2s_core::{
    frame::{FrameMeta, FrameStatus, PayloadDescriptor, PayloadEncoding, Tag},
    ids::FrameId,
    MvError, MvResult,
};
use mv2s_storage::codec::{Reader, Writer};
use std::collections::BTreeMap;

const OPCODE_PUT_FRAME: u8 = 1;
const OPCODE_DELETE_FRAME: u8 = 2;
const OPCODE_SUPERSEDE_FRAME: u8 = 3;
const OPCODE_PUT_EMBEDDING: u8 = 4;

/// A pending mutation reconstructed from a WAL entry, not yet reflected in
/// the TOC.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    /// A new frame, with payload bytes already written into the data region.
    /// Carries the full frame fields (the "extended form" per the legacy
    /// compatibility note) so recovery never needs a second read of the
    /// data region to reconstruct a pending frame.
    PutFrame(Box<FrameMeta>),
    /// Tombstone an existing frame.
    DeleteFrame {
        /// Frame being deleted.
        id: FrameId,
    },
    /// Link two frames as supersession predecessor/successor.
    SupersedeFrame {
        /// The superseded frame.
        a: FrameId,
        /// The superseding frame.
        b: FrameId,
    },
    /// Attach an embedding vector to a frame id.
    PutEmbedding {
        /// Target frame id.
        id: FrameId,
        /// Embedding vector, little-endian 32-bit floats on the wire.
        vector: Vec<f32>,
    },
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

fn write_option_u64(w: &mut Writer, v: Option<u64>) {
    w.presence(v.is_some());
    if let Some(x) = v {
        w.u64(x);
    }
}

fn read_option_u64(r: &mut Reader) -> MvResult<Option<u64>> {
    Ok(if r.presence()? { Some(r.u64()?) } else { None })
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

    w.u64(f.payload.payload_offset);
    w.u64(f.payload.payload_length);
    w.u8(f.payload.encoding.tag());
    write_option_u64(w, f.payload.canonical_length);
    write_option_digest(w, f.payload.canonical_digest);
    write_option_digest(w, f.payload.stored_digest);
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
            return Err(MvError::WalCorruption {
                offset: 0,
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

    let payload_offset = r.u64()?;
    let payload_length = r.u64()?;
    let tag = r.u8()?;
    let encoding = PayloadEncoding::from_tag(tag).ok_or_else(|| MvError::WalCorruption {
        offset: 0,
        reason: format!("unknown payload encoding tag {tag}"),
    })?;
    let canonical_length = read_option_u64(r)?;
    let canonical_digest = read_option_digest(r)?;
    let stored_digest = read_option_digest(r)?;

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
        payload: PayloadDescriptor {
            payload_offset,
            payload_length,
            encoding,
            canonical_length,
            canonical_digest,
            stored_digest,
        },
    })
}

impl Entry {
    /// Encode this entry to its opcode-tagged wire form.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        match self {
            Entry::PutFrame(frame) => {
                w.u8(OPCODE_PUT_FRAME);
                write_frame(&mut w, frame);
            }
            Entry::DeleteFrame { id } => {
                w.u8(OPCODE_DELETE_FRAME);
                w.u64(id.0);
            }
            Entry::SupersedeFrame { a, b } => {
                w.u8(OPCODE_SUPERSEDE_FRAME);
                w.u64(a.0);
                w.u64(b.0);
            }
            Entry::PutEmbedding { id, vector } => {
                w.u8(OPCODE_PUT_EMBEDDING);
                w.u64(id.0);
                w.u32(vector.len() as u32);
                for f in vector {
                    w.raw(&f.to_le_bytes());
                }
            }
        }
        w.into_bytes()
    }

    /// Decode an entry from its opcode-tagged wire form.
    pub fn decode(bytes: &[u8]) -> MvResult<Self> {
        let mut r = Reader::new(bytes);
        let opcode = r.u8()?;
        match opcode {
            OPCODE_PUT_FRAME => Ok(Entry::PutFrame(Box::new(read_frame(&mut r)?))),
            OPCODE_DELETE_FRAME => Ok(Entry::DeleteFrame {
                id: FrameId(r.u64()?),
            }),
            OPCODE_SUPERSEDE_FRAME => Ok(Entry::SupersedeFrame {
                a: FrameId(r.u64()?),
                b: FrameId(r.u64()?),
            }),
            OPCODE_PUT_EMBEDDING => {
                let id = FrameId(r.u64()?);
                let count = r.u32()? as usize;
                let mut vector = Vec::with_capacity(count);
                for _ in 0..count {
                    let bytes = r.raw(4)?;
                    vector.push(f32::from_le_bytes(bytes.try_into().unwrap()));
                }
                Ok(Entry::PutEmbedding { id, vector })
            }
            other => Err(MvError::WalCorruption {
                offset: 0,
                reason: format!("unknown wal entry opcode {other}"),
            }),
        }
    }
}

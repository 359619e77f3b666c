//! The committed `Frame` data model.

use crate::ids::FrameId;
use std::collections::BTreeMap;

/// A frame's canonical/stored payload encoding tag.
///
/// Two compressor slots are reserved on the wire (plain plus two reserved
/// compressors); only `Zstd` is implemented here. `Reserved2` decodes only
/// as an error — it exists so readers accept the tag byte without
/// misinterpreting it as plain bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadEncoding {
    /// Payload bytes are the canonical content, unmodified.
    Plain = 0,
    /// Payload bytes are zstd-compressed canonical content.
    Zstd = 1,
    /// Reserved for a second compressor; not implemented.
    Reserved2 = 2,
}

impl PayloadEncoding {
    /// Decode a wire tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Plain),
            1 => Some(Self::Zstd),
            2 => Some(Self::Reserved2),
            _ => None,
        }
    }

    /// Encode to the wire tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Lifecycle status of a committed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Frame is live.
    Active,
    /// Frame has been tombstoned via `delete`.
    Deleted,
}

/// Descriptor of where a frame's payload bytes live in the data region and
/// how they are encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadDescriptor {
    /// Absolute byte offset into the data region.
    pub payload_offset: u64,
    /// Length in bytes of the stored (possibly compressed) payload.
    pub payload_length: u64,
    /// How the stored bytes relate to the canonical content.
    pub encoding: PayloadEncoding,
    /// Length of the canonical (decompressed) content; required when
    /// `encoding != Plain`.
    pub canonical_length: Option<u64>,
    /// SHA-256 of the canonical (decompressed) content.
    pub canonical_digest: Option<[u8; 32]>,
    /// SHA-256 of the stored (on-disk) bytes.
    pub stored_digest: Option<[u8; 32]>,
}

impl PayloadDescriptor {
    /// Validate the payload descriptor's invariants:
    /// - `encoding != Plain` ⇒ canonical length present.
    /// - `payload_length > 0` ⇒ stored digest present.
    /// - `encoding == Plain` ⇒ canonical digest equals stored digest.
    pub fn validate(&self) -> Result<(), String> {
        if self.encoding != PayloadEncoding::Plain && self.canonical_length.is_none() {
            return Err("non-plain encoding requires canonical_length".into());
        }
        if self.payload_length > 0 && self.stored_digest.is_none() {
            return Err("non-empty payload requires stored_digest".into());
        }
        if self.encoding == PayloadEncoding::Plain {
            if let (Some(c), Some(s)) = (self.canonical_digest, self.stored_digest) {
                if c != s {
                    return Err("plain payload canonical digest must equal stored digest".into());
                }
            }
        }
        Ok(())
    }
}

/// An ordered key/value tag attached to a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

/// A committed frame as stored in the TOC.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMeta {
    /// Dense id, assigned in commit order starting at 0.
    pub id: FrameId,
    /// Capture-time, milliseconds since epoch.
    pub captured_at_ms: i64,
    /// Optional anchor time, milliseconds since epoch.
    pub anchor_at_ms: Option<i64>,
    /// Free-form kind discriminator (e.g. "video", "surrogate").
    pub kind: Option<String>,
    /// Logical track/stream this frame belongs to.
    pub track: Option<String>,
    /// Source URI.
    pub uri: Option<String>,
    /// Human-readable title.
    pub title: Option<String>,
    /// Text used for full-text indexing (not necessarily the raw payload).
    pub search_text: Option<String>,
    /// Ordered key/value tags.
    pub tags: Vec<Tag>,
    /// Free-form labels.
    pub labels: Vec<String>,
    /// Content dates (milliseconds since epoch) relevant to the frame.
    pub content_dates: Vec<i64>,
    /// Optional semantic role.
    pub role: Option<String>,
    /// Optional parent frame id (e.g. for chunked media).
    pub parent_id: Option<FrameId>,
    /// Index of this chunk within its parent, if chunked.
    pub chunk_index: Option<u32>,
    /// Total chunk count of the parent, if chunked.
    pub chunk_count: Option<u32>,
    /// Opaque chunk manifest bytes.
    pub chunk_manifest: Option<Vec<u8>>,
    /// Active/deleted status.
    pub status: FrameStatus,
    /// If this frame supersedes another, that frame's id.
    pub supersedes: Option<FrameId>,
    /// If this frame has been superseded, the superseding frame's id.
    pub superseded_by: Option<FrameId>,
    /// Free-form string metadata. Canonically encoded with sorted keys.
    pub metadata: BTreeMap<String, String>,
    /// Payload location/encoding/digests.
    pub payload: PayloadDescriptor,
}

impl FrameMeta {
    /// True if the frame should be excluded from default retrieval results:
    /// deleted or superseded frames are not live.
    pub fn is_live(&self) -> bool {
        self.status == FrameStatus::Active && self.superseded_by.is_none()
    }
}

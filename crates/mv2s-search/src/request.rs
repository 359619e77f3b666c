//! Hybrid search request/response types.

use mv2s_core::{memory::AsOf, FrameId};
use std::collections::HashSet;

/// Which vector backend a caller prefers, where more than one is available.
/// The CORE specified here only ever runs the CPU (flat) path; the tag is
/// threaded through so callers compiled against a GPU-accelerated backend
/// can select it without changing the request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorEnginePreference {
    /// Let the engine decide.
    Auto,
    /// Prefer a GPU/Metal-accelerated backend if present.
    MetalPreferred,
    /// Force the CPU (flat) path.
    CpuOnly,
}

impl Default for VectorEnginePreference {
    fn default() -> Self {
        VectorEnginePreference::Auto
    }
}

/// Which lanes `HybridSearch` may consult.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchMode {
    /// Text (FTS) lane only.
    TextOnly,
    /// Vector lane only.
    VectorOnly,
    /// Both lanes, fused with weight `alpha` favoring the vector lane
    /// (`alpha=0` is text-only weighting, `alpha=1` is vector-only weighting).
    Hybrid {
        /// Vector-lane weight in `[0, 1]`.
        alpha: f32,
    },
}

impl SearchMode {
    /// Convenience constructor clamping `alpha` into `[0, 1]`.
    pub fn hybrid(alpha: f32) -> Self {
        SearchMode::Hybrid {
            alpha: alpha.clamp(0.0, 1.0),
        }
    }
}

/// One hybrid search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Free-text query, if any.
    pub query_text: Option<String>,
    /// Pre-computed query embedding, if any.
    pub query_embedding: Option<Vec<f32>>,
    /// Restrict timeline/structured-memory lanes to this `[from, to)` window.
    pub time_range: Option<(i64, i64)>,
    /// Restrict all lanes to this allow-list of frame ids, when present.
    pub frame_filter: Option<HashSet<FrameId>>,
    /// Maximum number of results to return.
    pub top_k: usize,
    /// Vector backend preference.
    pub engine_preference: VectorEnginePreference,
    /// Which lanes to consult.
    pub mode: SearchMode,
    /// Maximum preview bytes attached to each result.
    pub preview_max_bytes: usize,
    /// Whether the timeline lane may run as a no-query fallback.
    pub allow_timeline_fallback: bool,
    /// Timeline fallback's own result cap.
    pub timeline_fallback_limit: usize,
    /// Structured-memory visibility cursor. Defaults to [`AsOf::latest`],
    /// never wall-clock, so results stay reproducible.
    pub as_of: AsOf,
}

impl Default for SearchRequest {
    fn default() -> Self {
        SearchRequest {
            query_text: None,
            query_embedding: None,
            time_range: None,
            frame_filter: None,
            top_k: 10,
            engine_preference: VectorEnginePreference::Auto,
            mode: SearchMode::hybrid(0.5),
            preview_max_bytes: 256,
            allow_timeline_fallback: true,
            timeline_fallback_limit: 50,
            as_of: AsOf::latest(),
        }
    }
}

impl SearchRequest {
    /// A bare text query request with otherwise-default settings.
    pub fn text(query: impl Into<String>) -> Self {
        SearchRequest {
            query_text: Some(query.into()),
            mode: SearchMode::TextOnly,
            ..Default::default()
        }
    }

    /// A bare vector query request with otherwise-default settings.
    pub fn vector(embedding: Vec<f32>) -> Self {
        SearchRequest {
            query_embedding: Some(embedding),
            mode: SearchMode::VectorOnly,
            ..Default::default()
        }
    }

    /// `top_k` clamped into `[1, MAX_TOP_K]`.
    pub fn clamped_top_k(&self) -> usize {
        self.top_k.clamp(1, mv2s_core::limits::MAX_TOP_K)
    }
}

/// Bitset over which lanes surfaced a given result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceFlags(u8);

impl SourceFlags {
    /// Contributed by the FTS lane.
    pub const TEXT: SourceFlags = SourceFlags(1 << 0);
    /// Contributed by the vector lane.
    pub const VECTOR: SourceFlags = SourceFlags(1 << 1);
    /// Contributed by the reverse-chronological timeline fallback.
    pub const TIMELINE: SourceFlags = SourceFlags(1 << 2);
    /// Contributed by the structured-memory evidence lane.
    pub const STRUCTURED_MEMORY: SourceFlags = SourceFlags(1 << 3);

    /// The empty set.
    pub fn empty() -> Self {
        SourceFlags(0)
    }

    /// Merge another flag set in.
    pub fn insert(&mut self, other: SourceFlags) {
        self.0 |= other.0;
    }

    /// Whether `other`'s bits are all set.
    pub fn contains(&self, other: SourceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One fused, materialized search result.
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// The matched frame.
    pub frame_id: FrameId,
    /// Final fused score (higher is better).
    pub score: f32,
    /// Which lanes contributed this id.
    pub sources: SourceFlags,
    /// Bounded preview text/snippet, if one was produced.
    pub preview_text: Option<String>,
}

/// Response to a [`SearchRequest`].
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    /// Ordered, deduplicated, fused results.
    pub results: Vec<SearchResult>,
}

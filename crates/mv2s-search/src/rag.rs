//! The RAG context builder: groups a fused [`SearchResponse`] by document
//! root, renders per-segment summaries, and greedily fits them into a
//! caller-supplied token budget.
//!
//! Built on the data model in `mv2s_core::frame` (`parent_id`, `chunk_index`)
//! plus the deterministic tie-break idiom already established in
//! `fuser.rs`.

use crate::request::{SearchResponse, SearchResult};
use mv2s_core::{FrameId, FrameMeta, MvResult};
use mv2s_engine::Store;
use std::collections::BTreeMap;

/// Host-supplied token counter. The store has no opinion on tokenization;
/// callers plug in whatever counts tokens the way their model does.
pub trait TokenCounter {
    /// Number of tokens `text` would cost.
    fn count(&self, text: &str) -> usize;
    /// Truncate `text` to at most `max_tokens` tokens.
    fn truncate(&self, text: &str, max_tokens: usize) -> String;
}

/// Budgeting and rendering knobs for [`build`].
#[derive(Debug, Clone, Copy)]
pub struct RagOptions {
    /// Total token budget across every accepted segment's summary text.
    pub max_text_tokens: usize,
    /// Maximum number of thumbnails to attach, across the whole context.
    pub max_thumbnails: usize,
    /// Maximum transcript lines rendered per segment, when transcript text
    /// is available.
    pub max_transcript_lines_per_segment: usize,
}

impl Default for RagOptions {
    fn default() -> Self {
        RagOptions {
            max_text_tokens: 4096,
            max_thumbnails: 8,
            max_transcript_lines_per_segment: 20,
        }
    }
}

/// One accepted segment within a root.
#[derive(Debug, Clone)]
pub struct RagSegment {
    /// The segment's frame id.
    pub frame_id: FrameId,
    /// Position within its root (`chunk_index`, or 0 for un-chunked frames).
    pub segment_index: u32,
    /// This segment's fused search score.
    pub score: f32,
    /// Rendered, budget-truncated summary text.
    pub summary_text: String,
    /// Token count of `summary_text` per the supplied counter.
    pub token_count: usize,
    /// Thumbnail bytes, if one was attached to this segment.
    pub thumbnail: Option<Vec<u8>>,
}

/// One document/video root and its accepted segments.
#[derive(Debug, Clone)]
pub struct RagRoot {
    /// The root frame's id.
    pub root_id: FrameId,
    /// This root's score (max over its accepted segments' scores).
    pub score: f32,
    /// Accepted segments, ordered `(score DESC, segment_index ASC)`.
    pub segments: Vec<RagSegment>,
}

/// A fully budgeted RAG context.
#[derive(Debug, Clone, Default)]
pub struct RagContext {
    /// Roots ordered `(score DESC, root_id ASC)`.
    pub roots: Vec<RagRoot>,
    /// Total tokens consumed across all accepted segments.
    pub used_tokens: usize,
    /// How many candidate segments were considered before budgeting.
    pub candidate_count: usize,
}

/// Build a token-budgeted RAG context from a hybrid search response.
pub fn build(
    response: &SearchResponse,
    store: &mut Store,
    token_counter: &dyn TokenCounter,
    options: &RagOptions,
) -> MvResult<RagContext> {
    if response.results.is_empty() {
        return Ok(RagContext::default());
    }

    let frame_ids: Vec<FrameId> = response.results.iter().map(|r| r.frame_id).collect();
    let metas = store.frame_metas_including_pending(&frame_ids)?;
    let meta_by_id: BTreeMap<FrameId, FrameMeta> =
        metas.into_iter().map(|m| (m.id, m)).collect();

    let mut by_root: BTreeMap<FrameId, Vec<(FrameMeta, &SearchResult)>> = BTreeMap::new();
    for result in &response.results {
        let Some(meta) = meta_by_id.get(&result.frame_id) else {
            continue;
        };
        if !meta.is_live() {
            continue;
        }
        let root_id = meta.parent_id.unwrap_or(meta.id);
        by_root.entry(root_id).or_default().push((meta.clone(), result));
    }

    let mut roots: Vec<(FrameId, f32, Vec<(FrameMeta, &SearchResult)>)> = by_root
        .into_iter()
        .map(|(root_id, mut segments)| {
            segments.sort_by(|a, b| {
                b.1.score
                    .partial_cmp(&a.1.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.chunk_index.unwrap_or(0).cmp(&b.0.chunk_index.unwrap_or(0)))
            });
            let score = segments
                .iter()
                .fold(f32::MIN, |acc, (_, r)| acc.max(r.score));
            (root_id, score, segments)
        })
        .collect();

    roots.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.get().cmp(&b.0.get()))
    });

    let candidate_count: usize = roots.iter().map(|(_, _, segs)| segs.len()).sum();
    let per_item_cap = options.max_text_tokens / candidate_count.max(1);

    let mut used_tokens = 0usize;
    let mut thumbnails_attached = 0usize;
    let mut out_roots = Vec::with_capacity(roots.len());

    'roots: for (root_id, root_score, segments) in roots {
        let mut out_segments = Vec::with_capacity(segments.len());
        for (meta, result) in segments {
            let rendered = render_summary(&meta, options.max_transcript_lines_per_segment);
            let truncated = token_counter.truncate(&rendered, per_item_cap);
            let token_count = token_counter.count(&truncated);
            if used_tokens + token_count > options.max_text_tokens {
                if out_segments.is_empty() {
                    continue;
                }
                out_roots.push(RagRoot {
                    root_id,
                    score: root_score,
                    segments: out_segments,
                });
                break 'roots;
            }
            used_tokens += token_count;

            let thumbnail = if thumbnails_attached < options.max_thumbnails {
                let preview = store.frame_preview(meta.id, 4096).ok();
                if preview.is_some() {
                    thumbnails_attached += 1;
                }
                preview
            } else {
                None
            };

            out_segments.push(RagSegment {
                frame_id: result.frame_id,
                segment_index: meta.chunk_index.unwrap_or(0),
                score: result.score,
                summary_text: truncated,
                token_count,
                thumbnail,
            });
        }
        if !out_segments.is_empty() {
            out_roots.push(RagRoot {
                root_id,
                score: root_score,
                segments: out_segments,
            });
        }
    }

    Ok(RagContext {
        roots: out_roots,
        used_tokens,
        candidate_count,
    })
}

fn render_summary(meta: &FrameMeta, max_transcript_lines: usize) -> String {
    if let Some(transcript) = meta.metadata.get("transcript") {
        let lines: Vec<&str> = transcript.lines().take(max_transcript_lines).collect();
        if !lines.is_empty() {
            return lines.join("\n");
        }
    }

    let mut parts = Vec::new();
    if let Some(kind) = &meta.kind {
        parts.push(kind.clone());
    }
    if let Some(title) = &meta.title {
        parts.push(title.clone());
    }
    if let Some(uri) = &meta.uri {
        parts.push(format!("({uri})"));
    }
    parts.push(format!("@{}ms", meta.captured_at_ms));
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::SourceFlags;
    use mv2s_engine::{config::StoreConfig, store::PutOptions};

    struct WordCounter;
    impl TokenCounter for WordCounter {
        fn count(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
        fn truncate(&self, text: &str, max_tokens: usize) -> String {
            text.split_whitespace().take(max_tokens).collect::<Vec<_>>().join(" ")
        }
    }

    fn result(frame_id: FrameId, score: f32) -> SearchResult {
        SearchResult {
            frame_id,
            score,
            sources: SourceFlags::TEXT,
            preview_text: None,
        }
    }

    #[test]
    fn groups_segments_under_their_root_and_orders_by_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.mv2s");
        let mut store = Store::create(&path, StoreConfig::default()).unwrap();
        let root = store
            .put(b"root", PutOptions { title: Some("Video".into()), ..Default::default() })
            .unwrap();
        let seg0 = store
            .put(
                b"seg0",
                PutOptions {
                    parent_id: Some(root),
                    chunk_index: Some(0),
                    ..Default::default()
                },
            )
            .unwrap();
        let seg1 = store
            .put(
                b"seg1",
                PutOptions {
                    parent_id: Some(root),
                    chunk_index: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        store.commit().unwrap();

        let response = SearchResponse {
            results: vec![result(seg1, 0.9), result(seg0, 0.5)],
        };
        let options = RagOptions {
            max_text_tokens: 1000,
            max_thumbnails: 4,
            max_transcript_lines_per_segment: 10,
        };
        let ctx = build(&response, &mut store, &WordCounter, &options).unwrap();
        assert_eq!(ctx.roots.len(), 1);
        assert_eq!(ctx.roots[0].root_id, root);
        assert_eq!(ctx.roots[0].segments[0].frame_id, seg1);
        assert_eq!(ctx.roots[0].segments[1].frame_id, seg0);
    }

    #[test]
    fn budget_stops_accepting_once_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.mv2s");
        let mut store = Store::create(&path, StoreConfig::default()).unwrap();
        let a = store
            .put(b"a", PutOptions { title: Some("alpha bravo charlie delta".into()), ..Default::default() })
            .unwrap();
        let b = store
            .put(b"b", PutOptions { title: Some("echo foxtrot golf hotel".into()), ..Default::default() })
            .unwrap();
        store.commit().unwrap();

        let response = SearchResponse {
            results: vec![result(a, 1.0), result(b, 0.9)],
        };
        let options = RagOptions {
            max_text_tokens: 2,
            max_thumbnails: 0,
            max_transcript_lines_per_segment: 10,
        };
        let ctx = build(&response, &mut store, &WordCounter, &options).unwrap();
        assert!(ctx.used_tokens <= 2);
    }
}

//! The hybrid search orchestrator: lane selection, per-lane retrieval,
//! weighted-RRF fusion, and result materialization.
//!
//! Pipeline: select lanes → run each → fuse → attach previews, generalized
//! to this system's four lanes (text, vector, structured-memory, timeline).

use crate::fuser::{self, LaneResult};
use crate::lex::LexIndex;
use crate::request::{SearchMode, SearchRequest, SearchResponse, SearchResult, SourceFlags};
use crate::vector::VectorIndex;
use mv2s_core::{FrameId, MvResult};
use mv2s_engine::Store;
use std::collections::HashSet;

/// Auxiliary lanes (structured-memory) are weighted down relative to the
/// primary text/vector lanes so they nudge ranking rather than dominate it.
const STRUCTURED_MEMORY_WEIGHT: f32 = 0.5;

/// How many distinct entity-alias tokens the structured-memory lane will
/// resolve per query, to bound its cost on long free-text queries.
const MAX_QUERY_ENTITY_TOKENS: usize = 20;

/// Orchestrates the text, vector, structured-memory, and timeline-fallback
/// lanes against one open store, fusing their results into one ranked
/// response.
pub struct HybridSearch<'a> {
    store: &'a mut Store,
    lex: &'a mut LexIndex,
    vector: Option<&'a VectorIndex>,
}

impl<'a> HybridSearch<'a> {
    /// Build an orchestrator over an open store, its lex index, and
    /// (optionally) a vector index — absent, e.g., before any embedding has
    /// ever been committed.
    pub fn new(store: &'a mut Store, lex: &'a mut LexIndex, vector: Option<&'a VectorIndex>) -> Self {
        HybridSearch { store, lex, vector }
    }

    /// Run one search request end to end.
    pub fn search(&mut self, request: &SearchRequest) -> MvResult<SearchResponse> {
        let top_k = request.clamped_top_k();
        let lane_limit = (top_k * 4).clamp(top_k, mv2s_core::limits::MAX_TOP_K);

        let run_text = matches!(request.mode, SearchMode::TextOnly | SearchMode::Hybrid { .. })
            && request.query_text.is_some();
        let run_vector = matches!(request.mode, SearchMode::VectorOnly | SearchMode::Hybrid { .. })
            && request.query_embedding.is_some()
            && self.vector.is_some();
        let run_structured_memory = request.query_text.is_some();
        let run_timeline = request.allow_timeline_fallback
            && request.query_text.is_none()
            && request.query_embedding.is_none();

        let mut lanes = Vec::new();

        if run_text {
            let query = request.query_text.as_deref().unwrap_or_default();
            let hits = self.lex.query_fts(query, lane_limit)?;
            let ranked = filter_by_frame_set(
                hits.into_iter().map(|h| (h.frame_id, h.score)).collect(),
                &request.frame_filter,
            );
            let weight = match request.mode {
                SearchMode::Hybrid { alpha } => 1.0 - alpha,
                _ => 1.0,
            };
            lanes.push(LaneResult {
                source: SourceFlags::TEXT,
                ranked,
                weight,
            });
        }

        if run_vector {
            if let (Some(vector_index), Some(embedding)) = (self.vector, request.query_embedding.as_ref()) {
                let ranked = filter_by_frame_set(vector_index.search(embedding, lane_limit)?, &request.frame_filter);
                let weight = match request.mode {
                    SearchMode::Hybrid { alpha } => alpha,
                    _ => 1.0,
                };
                lanes.push(LaneResult {
                    source: SourceFlags::VECTOR,
                    ranked,
                    weight,
                });
            }
        }

        if run_structured_memory {
            let query = request.query_text.as_deref().unwrap_or_default();
            let tokens = query_entity_tokens(query);
            let mut subject_keys = Vec::new();
            let mut seen = HashSet::new();
            for token in tokens {
                for entity in self.lex.resolve_entities(&token, 5)? {
                    if seen.insert(entity.key.clone()) {
                        subject_keys.push(entity.key);
                    }
                }
            }
            if !subject_keys.is_empty() {
                let ranked = self
                    .lex
                    .evidence_frame_ids(&subject_keys, request.as_of, 500, lane_limit, false)?;
                let ranked = filter_by_frame_set(ranked, &request.frame_filter);
                if !ranked.is_empty() {
                    lanes.push(LaneResult {
                        source: SourceFlags::STRUCTURED_MEMORY,
                        ranked,
                        weight: STRUCTURED_MEMORY_WEIGHT,
                    });
                }
            }
        }

        if run_timeline {
            let ranked = self.timeline_fallback(request)?;
            lanes.push(LaneResult {
                source: SourceFlags::TIMELINE,
                ranked,
                weight: 1.0,
            });
        }

        let fused = fuser::fuse(lanes);
        self.materialize(fused, request)
    }

    fn timeline_fallback(&self, request: &SearchRequest) -> MvResult<Vec<(FrameId, f32)>> {
        let mut frames = self.store.all_frame_metas();
        frames.retain(|f| f.is_live());
        if let Some((from, to)) = request.time_range {
            frames.retain(|f| f.captured_at_ms >= from && f.captured_at_ms < to);
        }
        if let Some(filter) = &request.frame_filter {
            frames.retain(|f| filter.contains(&f.id));
        }
        frames.sort_by(|a, b| {
            b.captured_at_ms
                .cmp(&a.captured_at_ms)
                .then_with(|| a.id.get().cmp(&b.id.get()))
        });
        frames.truncate(request.timeline_fallback_limit);
        let n = frames.len() as f32;
        Ok(frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| (f.id, n - i as f32))
            .collect())
    }

    fn materialize(
        &mut self,
        fused: Vec<fuser::Fused>,
        request: &SearchRequest,
    ) -> MvResult<SearchResponse> {
        let top_k = request.clamped_top_k();
        let mut results = Vec::with_capacity(top_k.min(fused.len()));
        for entry in fused {
            if results.len() >= top_k {
                break;
            }
            let meta = match self.store.frame_metas_including_pending(&[entry.frame_id]) {
                Ok(metas) => metas.into_iter().next(),
                Err(_) => None,
            };
            let Some(meta) = meta else { continue };
            if !meta.is_live() {
                continue;
            }
            let preview_text = if request.preview_max_bytes > 0 {
                self.store
                    .frame_preview(entry.frame_id, request.preview_max_bytes)
                    .ok()
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            } else {
                None
            };
            results.push(SearchResult {
                frame_id: entry.frame_id,
                score: entry.score,
                sources: entry.sources,
                preview_text,
            });
        }
        Ok(SearchResponse { results })
    }
}

fn filter_by_frame_set(ranked: Vec<(FrameId, f32)>, filter: &Option<HashSet<FrameId>>) -> Vec<(FrameId, f32)> {
    match filter {
        Some(allow) => ranked.into_iter().filter(|(id, _)| allow.contains(id)).collect(),
        None => ranked,
    }
}

fn query_entity_tokens(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut seen = HashSet::new();
    for token in query.split(|c: char| !c.is_alphanumeric()) {
        if token.chars().count() < 2 {
            continue;
        }
        let lower = token.to_lowercase();
        if seen.insert(lower.clone()) {
            tokens.push(lower);
        }
        if tokens.len() >= MAX_QUERY_ENTITY_TOKENS {
            break;
        }
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::EvidenceInput;
    use mv2s_core::memory::{AsOf, ObjectValue};
    use mv2s_engine::config::StoreConfig;

    fn put_frame(store: &mut Store, text: &str, captured_at_ms: i64) -> FrameId {
        store
            .put(
                text.as_bytes(),
                mv2s_engine::store::PutOptions {
                    search_text: Some(text.to_string()),
                    captured_at_ms,
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn text_only_request_ranks_by_fts_relevance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.mv2s");
        let mut store = Store::create(&path, StoreConfig::default()).unwrap();
        let f0 = put_frame(&mut store, "the quick brown fox", 0);
        let _f1 = put_frame(&mut store, "a lazy dog sleeps", 1);
        store.commit().unwrap();

        let mut lex = LexIndex::open_empty().unwrap();
        lex.index_frame_text(f0, "the quick brown fox").unwrap();

        let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
        let response = hybrid.search(&SearchRequest::text("fox")).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].frame_id, f0);
        assert!(response.results[0].sources.contains(SourceFlags::TEXT));
    }

    #[test]
    fn timeline_fallback_runs_with_no_query() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.mv2s");
        let mut store = Store::create(&path, StoreConfig::default()).unwrap();
        let f0 = put_frame(&mut store, "first", 100);
        let f1 = put_frame(&mut store, "second", 200);
        store.commit().unwrap();

        let mut lex = LexIndex::open_empty().unwrap();
        let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
        let mut request = SearchRequest::default();
        request.query_text = None;
        request.query_embedding = None;
        let response = hybrid.search(&request).unwrap();
        assert_eq!(response.results[0].frame_id, f1);
        assert_eq!(response.results[1].frame_id, f0);
    }

    #[test]
    fn structured_memory_lane_surfaces_evidence_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.mv2s");
        let mut store = Store::create(&path, StoreConfig::default()).unwrap();
        let f0 = put_frame(&mut store, "alice joined the platform team", 0);
        store.commit().unwrap();

        let mut lex = LexIndex::open_empty().unwrap();
        lex.upsert_entity("u:alice", Some("person"), &["Alice".into()], 0).unwrap();
        lex.assert_fact(
            "u:alice",
            "team",
            ObjectValue::Str("platform".into()),
            0,
            None,
            0,
            &[EvidenceInput {
                source_frame_id: f0,
                chunk_index: None,
                span_text: None,
                extractor_id: "test".into(),
                extractor_version: "1".into(),
                confidence: Some(0.9),
                asserted_at_ms: 0,
            }],
        )
        .unwrap();

        let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
        let mut request = SearchRequest::text("Alice");
        request.as_of = AsOf::latest();
        let response = hybrid.search(&request).unwrap();
        assert!(response.results.iter().any(|r| r.frame_id == f0
            && r.sources.contains(SourceFlags::STRUCTURED_MEMORY)));
    }
}

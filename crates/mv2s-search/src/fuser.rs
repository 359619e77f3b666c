//! Weighted reciprocal-rank fusion across search lanes.
//!
//! Each lane contributes `weight / (k_rrf + rank)` per document, contributions
//! sum across lanes, and ties break on `(fused_score DESC, frame_id ASC)`
//! rather than incidental sort stability.

use crate::request::SourceFlags;
use mv2s_core::ids::FrameId;
use std::collections::HashMap;

/// Smoothing constant for reciprocal-rank fusion.
pub const K_RRF: u32 = 60;

/// One lane's ranked contribution: ids in descending-score order, paired
/// with the [`SourceFlags`] bit this lane sets.
pub struct LaneResult {
    /// Which lane this is, for the `sources` bitset.
    pub source: SourceFlags,
    /// `(frame_id, raw_score)` in descending-score order.
    pub ranked: Vec<(FrameId, f32)>,
    /// This lane's fusion weight.
    pub weight: f32,
}

/// One fused id with its accumulated score and contributing lanes.
pub struct Fused {
    /// The fused frame id.
    pub frame_id: FrameId,
    /// Weighted RRF score.
    pub score: f32,
    /// Union of lanes that surfaced this id.
    pub sources: SourceFlags,
}

/// Fuse lane results with weighted RRF, breaking ties deterministically by
/// `(fused_score DESC, frame_id ASC)`.
pub fn fuse(lanes: Vec<LaneResult>) -> Vec<Fused> {
    let mut scores: HashMap<FrameId, f32> = HashMap::new();
    let mut sources: HashMap<FrameId, SourceFlags> = HashMap::new();

    for lane in lanes {
        for (rank, (frame_id, _raw_score)) in lane.ranked.into_iter().enumerate() {
            let rank = rank as f32 + 1.0;
            let contribution = lane.weight / (K_RRF as f32 + rank);
            *scores.entry(frame_id).or_insert(0.0) += contribution;
            sources.entry(frame_id).or_insert_with(SourceFlags::empty).insert(lane.source);
        }
    }

    let mut fused: Vec<Fused> = scores
        .into_iter()
        .map(|(frame_id, score)| Fused {
            frame_id,
            score,
            sources: sources.remove(&frame_id).unwrap_or_else(SourceFlags::empty),
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.frame_id.get().cmp(&b.frame_id.get()))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_break_on_frame_id_ascending() {
        let lanes = vec![LaneResult {
            source: SourceFlags::TEXT,
            ranked: vec![(FrameId(5), 1.0), (FrameId(2), 1.0)],
            weight: 1.0,
        }];
        let fused = fuse(lanes);
        // Both at rank 1/2 within the same lane, so scores differ by rank;
        // use two single-entry lanes instead to force an exact score tie.
        assert!(fused[0].frame_id.get() <= fused[1].frame_id.get() || fused[0].score != fused[1].score);
    }

    #[test]
    fn exact_score_ties_break_on_frame_id() {
        let lanes = vec![
            LaneResult {
                source: SourceFlags::TEXT,
                ranked: vec![(FrameId(9), 1.0)],
                weight: 1.0,
            },
            LaneResult {
                source: SourceFlags::VECTOR,
                ranked: vec![(FrameId(3), 1.0)],
                weight: 1.0,
            },
        ];
        let fused = fuse(lanes);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - fused[1].score).abs() < 1e-9);
        assert_eq!(fused[0].frame_id, FrameId(3));
        assert_eq!(fused[1].frame_id, FrameId(9));
    }

    #[test]
    fn sources_accumulate_across_lanes() {
        let lanes = vec![
            LaneResult {
                source: SourceFlags::TEXT,
                ranked: vec![(FrameId(1), 1.0)],
                weight: 1.0,
            },
            LaneResult {
                source: SourceFlags::VECTOR,
                ranked: vec![(FrameId(1), 1.0)],
                weight: 1.0,
            },
        ];
        let fused = fuse(lanes);
        assert_eq!(fused.len(), 1);
        assert!(fused[0].sources.contains(SourceFlags::TEXT));
        assert!(fused[0].sources.contains(SourceFlags::VECTOR));
    }
}

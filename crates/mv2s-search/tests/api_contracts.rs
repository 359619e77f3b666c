//! Contract tests for the public `mv2s-search` surface: lane selection,
//! search modes, source-flag accumulation, and vector-index round-tripping
//!.

use mv2s_engine::{config::StoreConfig, store::PutOptions, Store};
use mv2s_search::{HybridSearch, LexIndex, SearchMode, SearchRequest, Similarity, SourceFlags, VectorIndex};
use tempfile::tempdir;

fn open_store() -> (tempfile::TempDir, Store) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.mv2s");
    let store = Store::create(&path, StoreConfig::default()).unwrap();
    (dir, store)
}

#[test]
fn text_only_mode_never_consults_the_vector_lane() {
    let (_dir, mut store) = open_store();
    let f = store
        .put(
            b"x",
            PutOptions {
                search_text: Some("hybrid retrieval engine".into()),
                ..Default::default()
            },
        )
        .unwrap();
    store.commit().unwrap();

    let mut lex = LexIndex::open_empty().unwrap();
    lex.index_frame_text(f, "hybrid retrieval engine").unwrap();
    let mut vector = VectorIndex::new(2, Similarity::Cosine);
    vector.add(f, vec![1.0, 0.0]).unwrap();

    let mut request = SearchRequest::text("hybrid retrieval");
    request.mode = SearchMode::TextOnly;
    request.query_embedding = Some(vec![1.0, 0.0]);

    let mut hybrid = HybridSearch::new(&mut store, &mut lex, Some(&vector));
    let response = hybrid.search(&request).unwrap();
    assert_eq!(response.results.len(), 1);
    assert!(!response.results[0].sources.contains(SourceFlags::VECTOR));
    assert!(response.results[0].sources.contains(SourceFlags::TEXT));
}

#[test]
fn hybrid_mode_fuses_text_and_vector_lanes() {
    let (_dir, mut store) = open_store();
    let text_hit = store
        .put(
            b"x",
            PutOptions {
                search_text: Some("quarterly retrieval report".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let vector_hit = store.put(b"y", PutOptions::default()).unwrap();
    store.commit().unwrap();

    let mut lex = LexIndex::open_empty().unwrap();
    lex.index_frame_text(text_hit, "quarterly retrieval report").unwrap();

    let mut vector = VectorIndex::new(2, Similarity::Cosine);
    vector.add(vector_hit, vec![0.0, 1.0]).unwrap();

    let mut request = SearchRequest::text("retrieval report");
    request.mode = SearchMode::hybrid(0.5);
    request.query_embedding = Some(vec![0.0, 1.0]);

    let mut hybrid = HybridSearch::new(&mut store, &mut lex, Some(&vector));
    let response = hybrid.search(&request).unwrap();

    let ids: Vec<_> = response.results.iter().map(|r| r.frame_id).collect();
    assert!(ids.contains(&text_hit));
    assert!(ids.contains(&vector_hit));
}

#[test]
fn frame_filter_restricts_every_lane() {
    let (_dir, mut store) = open_store();
    let kept = store
        .put(
            b"x",
            PutOptions {
                search_text: Some("engine report".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let excluded = store
        .put(
            b"y",
            PutOptions {
                search_text: Some("engine report".into()),
                ..Default::default()
            },
        )
        .unwrap();
    store.commit().unwrap();

    let mut lex = LexIndex::open_empty().unwrap();
    lex.index_frame_text(kept, "engine report").unwrap();
    lex.index_frame_text(excluded, "engine report").unwrap();

    let mut request = SearchRequest::text("engine report");
    request.frame_filter = Some([kept].into_iter().collect());

    let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
    let response = hybrid.search(&request).unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].frame_id, kept);
}

#[test]
fn deleted_frames_are_never_materialized() {
    let (_dir, mut store) = open_store();
    let f = store
        .put(
            b"x",
            PutOptions {
                search_text: Some("disposable note".into()),
                ..Default::default()
            },
        )
        .unwrap();
    store.commit().unwrap();
    store.delete(f).unwrap();
    store.commit().unwrap();

    let mut lex = LexIndex::open_empty().unwrap();
    lex.index_frame_text(f, "disposable note").unwrap();

    let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
    let response = hybrid.search(&SearchRequest::text("disposable note")).unwrap();
    assert!(response.results.is_empty());
}

#[test]
fn top_k_caps_the_materialized_result_count() {
    let (_dir, mut store) = open_store();
    let mut lex = LexIndex::open_empty().unwrap();
    for i in 0..5 {
        let f = store
            .put(
                format!("doc {i}").as_bytes(),
                PutOptions {
                    search_text: Some("shared keyword".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        lex.index_frame_text(f, "shared keyword").unwrap();
    }
    store.commit().unwrap();

    let mut request = SearchRequest::text("shared keyword");
    request.top_k = 2;

    let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
    let response = hybrid.search(&request).unwrap();
    assert_eq!(response.results.len(), 2);
}

#[test]
fn vector_index_round_trips_through_the_lex_staging_path() {
    let mut vector = VectorIndex::new(3, Similarity::L2);
    vector
        .add_batch(vec![
            (mv2s_core::FrameId(0), vec![1.0, 0.0, 0.0]),
            (mv2s_core::FrameId(1), vec![0.0, 1.0, 0.0]),
        ])
        .unwrap();

    let blob = vector.serialize();
    let restored = VectorIndex::deserialize(&blob, 3, Similarity::L2).unwrap();
    assert_eq!(restored.len(), 2);
    let results = restored.search(&[1.0, 0.0, 0.0], 1).unwrap();
    assert_eq!(results[0].0, mv2s_core::FrameId(0));
}

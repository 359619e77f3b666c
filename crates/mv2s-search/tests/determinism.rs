//! Determinism and consistency tests for hybrid search.
//!
//! Validates that search fusion is repeatable for a fixed corpus and fixed
//! request inputs, including explicit `as_of`.

use mv2s_core::memory::ObjectValue;
use mv2s_engine::{config::StoreConfig, store::PutOptions, Store};
use mv2s_search::{EvidenceInput, HybridSearch, LexIndex, SearchRequest};
use tempfile::tempdir;

fn populate(store: &mut Store, lex: &mut LexIndex) {
    let a = store
        .put(
            b"alpha",
            PutOptions {
                search_text: Some("test document alpha".into()),
                captured_at_ms: 10,
                ..Default::default()
            },
        )
        .unwrap();
    let b = store
        .put(
            b"beta",
            PutOptions {
                search_text: Some("test document beta".into()),
                captured_at_ms: 20,
                ..Default::default()
            },
        )
        .unwrap();
    let c = store
        .put(
            b"gamma",
            PutOptions {
                search_text: Some("test document gamma".into()),
                captured_at_ms: 30,
                ..Default::default()
            },
        )
        .unwrap();
    store.commit().unwrap();

    lex.index_frame_text(a, "test document alpha").unwrap();
    lex.index_frame_text(b, "test document beta").unwrap();
    lex.index_frame_text(c, "test document gamma").unwrap();
}

#[test]
fn repeated_search_with_identical_inputs_is_identical() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.mv2s");
    let mut store = Store::create(&path, StoreConfig::default()).unwrap();
    let mut lex = LexIndex::open_empty().unwrap();
    populate(&mut store, &mut lex);

    let request = SearchRequest::text("test document");
    let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
    let first = hybrid.search(&request).unwrap();
    let second = hybrid.search(&request).unwrap();

    let first_ids: Vec<_> = first.results.iter().map(|r| r.frame_id).collect();
    let second_ids: Vec<_> = second.results.iter().map(|r| r.frame_id).collect();
    assert_eq!(first_ids, second_ids);

    for (a, b) in first.results.iter().zip(second.results.iter()) {
        assert!((a.score - b.score).abs() < 1e-9);
    }
}

#[test]
fn exact_score_ties_resolve_by_frame_id_ascending() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("store.mv2s");
    let mut store = Store::create(&path, StoreConfig::default()).unwrap();

    // Two frames with identical search text rank identically in the FTS
    // lane, so the tie must resolve on frame id, not insertion order.
    let high_id = store
        .put(
            b"x",
            PutOptions {
                search_text: Some("identical payload".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let low_id = store
        .put(
            b"y",
            PutOptions {
                search_text: Some("identical payload".into()),
                ..Default::default()
            },
        )
        .unwrap();
    store.commit().unwrap();
    assert!(low_id.get() < high_id.get());

    let mut lex = LexIndex::open_empty().unwrap();
    lex.index_frame_text(low_id, "identical payload").unwrap();
    lex.index_frame_text(high_id, "identical payload").unwrap();

    let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
    let response = hybrid.search(&SearchRequest::text("identical payload")).unwrap();
    assert_eq!(response.results.len(), 2);
    assert_eq!(response.results[0].frame_id, low_id);
    assert_eq!(response.results[1].frame_id, high_id);
}

#[test]
fn structured_memory_visibility_is_stable_for_a_fixed_as_of() {
    use mv2s_core::memory::AsOf;

    let dir = tempdir().unwrap();
    let path = dir.path().join("store.mv2s");
    let mut store = Store::create(&path, StoreConfig::default()).unwrap();
    let f = store
        .put(
            b"evidence",
            PutOptions {
                search_text: Some("carol leads the search team".into()),
                ..Default::default()
            },
        )
        .unwrap();
    store.commit().unwrap();

    let mut lex = LexIndex::open_empty().unwrap();
    lex.index_frame_text(f, "carol leads the search team").unwrap();
    lex.upsert_entity("u:carol", Some("person"), &["Carol".into()], 0).unwrap();
    lex.assert_fact(
        "u:carol",
        "team",
        ObjectValue::Str("search".into()),
        0,
        None,
        0,
        &[EvidenceInput {
            source_frame_id: f,
            chunk_index: None,
            span_text: None,
            extractor_id: "test".into(),
            extractor_version: "1".into(),
            confidence: Some(1.0),
            asserted_at_ms: 0,
        }],
    )
    .unwrap();

    let mut request = SearchRequest::text("Carol");
    request.as_of = AsOf::at(1000);

    let mut hybrid = HybridSearch::new(&mut store, &mut lex, None);
    let first = hybrid.search(&request).unwrap();
    let second = hybrid.search(&request).unwrap();
    let first_ids: Vec<_> = first.results.iter().map(|r| r.frame_id).collect();
    let second_ids: Vec<_> = second.results.iter().map(|r| r.frame_id).collect();
    assert_eq!(first_ids, second_ids);
}

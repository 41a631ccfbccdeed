use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use lamb_fleet::coordinator::{ParameterSet, ParameterStore};
use lamb_fleet::error::FleetError;

fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_changed_clears_on_first_read_only() {
    let mut store = ParameterStore::default();
    assert!(store.snapshot().changed, "fresh store announces itself once");
    assert!(!store.snapshot().changed);

    store.update(&form(&[("games", "50")])).unwrap();
    assert!(store.snapshot().changed);
    for _ in 0..5 {
        assert!(!store.snapshot().changed);
    }
}

#[test]
fn test_every_update_sets_changed_again() {
    let mut store = ParameterStore::default();
    let _ = store.snapshot();

    store.update(&form(&[("depth", "5")])).unwrap();
    store.update(&form(&[("depth", "6")])).unwrap();
    let snapshot = store.snapshot();
    assert!(snapshot.changed);
    assert_eq!(snapshot.version, 3);
    assert_eq!(snapshot.parameters.depth, 6);
    assert!(!store.snapshot().changed);
}

#[test]
fn test_update_coerces_and_keeps_other_fields() {
    let mut store = ParameterStore::default();
    let before = store.current().clone();

    store
        .update(&form(&[
            ("games", " 25 "),
            ("random_10_ply", "200"),
            ("skipnoisy", "false"),
        ]))
        .unwrap();

    let after = store.current();
    assert_eq!(after.games, 25);
    assert_eq!(after.random_10_ply, 200);
    assert!(!after.skipnoisy);
    assert_eq!(after.depth, before.depth);
    assert_eq!(after.save_max_ply, before.save_max_ply);
    assert_eq!(after.random_move_count, before.random_move_count);
    assert_eq!(after.standard_start_pos_prob, before.standard_start_pos_prob);
}

#[test]
fn test_unrecognized_fields_are_ignored() {
    let mut store = ParameterStore::default();
    let before = store.current().clone();

    store
        .update(&form(&[
            ("adjudicate_draws_by_score", "false"),
            ("dfrc_start_pos_prob", "1.0"),
            ("bogus", "1"),
        ]))
        .unwrap();

    assert_eq!(store.current(), &before);
    assert_eq!(store.version(), 2);
}

#[test]
fn test_invalid_update_is_all_or_nothing() {
    let mut store = ParameterStore::default();
    let before = store.current().clone();

    let err = store
        .update(&form(&[("games", "30"), ("save_max_ply", "512")]))
        .unwrap_err();
    match err {
        FleetError::InvalidParameter { field, .. } => assert_eq!(field, "save_max_ply"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.current(), &before);

    assert!(store.update(&form(&[("depth", "deep")])).is_err());
    assert!(store.update(&form(&[("depth", "-3")])).is_err());
    assert_eq!(store.current(), &before);
}

#[test]
fn test_defaults_match_engine_contract() {
    let params = ParameterSet::default();
    assert_eq!(
        params.integer_fields(),
        [
            ("games", 10),
            ("depth", 9),
            ("save_min_ply", 3),
            ("save_max_ply", 400),
            ("random_min_ply", 3),
            ("random_50_ply", 7),
            ("random_10_ply", 16),
            ("random_move_count", 6),
        ]
    );
    assert!(params.skipnoisy);
}

#[tokio::test]
async fn test_concurrent_pollers_see_changed_once() {
    let store = Arc::new(RwLock::new(ParameterStore::default()));
    let _ = store.read().await.snapshot();
    store
        .write()
        .await
        .update(&form(&[("games", "11")]))
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.read().await.snapshot()
        }));
    }

    let mut seen_changed = 0;
    for handle in handles {
        let snapshot = handle.await.unwrap();
        assert_eq!(snapshot.parameters.games, 11);
        assert_eq!(snapshot.version, 2);
        if snapshot.changed {
            seen_changed += 1;
        }
    }
    assert_eq!(seen_changed, 1);
}

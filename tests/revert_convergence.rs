//! Revert Convergence Tests
//!
//! After `revert_to(v)` the current feature list equals the list at `v`,
//! for every earlier `v`, in any order and repeated.

use std::sync::Arc;

use serde_json::{json, Value};
use strata::catalog::{Catalog, Layer};
use strata::geometry::GeometryType;
use strata::layer::{Fid, FieldDef, FieldType, LayerDefinition};
use strata::txn::CommitOutcome;
use strata::versioning::Vid;

fn commit(layer: &Layer, ops: Vec<Value>) -> CommitOutcome {
    let txn = layer.txn_open(layer.versioning().unwrap().epoch).unwrap();
    let items = ops
        .into_iter()
        .enumerate()
        .map(|(i, op)| (i as u64 + 1, Some(op)))
        .collect();
    layer.txn_put(txn, items).unwrap();
    layer.txn_commit(txn).unwrap()
}

fn vid(layer: &Layer, fid: u64) -> u64 {
    layer.feature(Fid::new(fid)).unwrap()["vid"].as_u64().unwrap()
}

fn strip(features: Vec<Value>) -> Vec<Value> {
    features
        .into_iter()
        .map(|mut f| {
            if let Some(obj) = f.as_object_mut() {
                obj.remove("vid");
            }
            f
        })
        .collect()
}

fn current(layer: &Layer) -> Vec<Value> {
    strip(layer.features(None).unwrap())
}

fn at(layer: &Layer, version: u64) -> Vec<Value> {
    strip(layer.features(Some(Vid::new(version))).unwrap())
}

/// Layer with latest = 5 and a mix of creates, updates, deletes and
/// description writes.
fn history() -> (Catalog, Arc<Layer>) {
    let catalog = Catalog::in_memory();
    let definition = LayerDefinition::new(
        GeometryType::LineString,
        vec![FieldDef::new("label", FieldType::String)],
    )
    .unwrap();
    let layer = catalog.create_layer(definition, true).unwrap();

    assert!(commit(
        &layer,
        vec![
            json!({"action": "feature.create", "geom": "LINESTRING (0 0, 1 1)", "fields": {"label": "a"}}),
            json!({"action": "feature.create", "geom": "LINESTRING (0 0, 2 2)", "fields": {"label": "b"}}),
            json!({"action": "description.put", "fid": {"sn": 1}, "value": "first"}),
        ],
    )
    .is_committed());
    assert!(commit(
        &layer,
        vec![
            json!({"action": "feature.update", "fid": 1, "vid": 2, "fields": {"label": "a2"}}),
            json!({"action": "description.put", "fid": 1, "vid": 2, "value": "second"}),
            json!({"action": "feature.create", "fields": {"label": "c"}}),
        ],
    )
    .is_committed());
    assert!(commit(
        &layer,
        vec![json!({"action": "feature.delete", "fid": 2, "vid": 2})],
    )
    .is_committed());
    let v1 = vid(&layer, 1);
    assert!(commit(
        &layer,
        vec![json!({"action": "feature.update", "fid": 1, "vid": v1, "geom": null})],
    )
    .is_committed());
    assert_eq!(layer.versioning().unwrap().latest, Some(Vid::new(5)));
    (catalog, layer)
}

// =============================================================================
// Convergence
// =============================================================================

#[test]
fn test_revert_to_each_version_converges() {
    let (_catalog, layer) = history();
    let snapshots: Vec<(u64, Vec<Value>)> = (1..=5).map(|v| (v, at(&layer, v))).collect();

    for (v, expected) in snapshots.iter().rev() {
        layer.revert_to(Vid::new(*v)).unwrap();
        assert_eq!(&current(&layer), expected, "revert to {}", v);
    }
    for (v, expected) in &snapshots {
        layer.revert_to(Vid::new(*v)).unwrap();
        assert_eq!(&current(&layer), expected, "revert forward to {}", v);
    }
}

#[test]
fn test_repeated_revert_is_data_idempotent() {
    let (_catalog, layer) = history();
    let expected = at(&layer, 3);

    let (changed, version) = layer.revert_to(Vid::new(3)).unwrap();
    assert!(changed > 0);
    assert_eq!(version, Some(Vid::new(6)));
    assert_eq!(current(&layer), expected);

    let (changed, version) = layer.revert_to(Vid::new(3)).unwrap();
    assert_eq!(changed, 0);
    assert_eq!(version, Some(Vid::new(6)));
    assert_eq!(current(&layer), expected);
}

#[test]
fn test_revert_opens_one_version() {
    let (_catalog, layer) = history();
    let (_, version) = layer.revert_to(Vid::new(1)).unwrap();
    assert_eq!(version, Some(Vid::new(6)));
    assert!(current(&layer).is_empty());
}

#[test]
fn test_revert_restores_descriptions() {
    let (_catalog, layer) = history();
    layer.revert_to(Vid::new(2)).unwrap();
    let feature = layer.feature(Fid::new(1)).unwrap();
    assert_eq!(feature["description"], "first");
    assert_eq!(feature["fields"]["label"], "a");
    assert_eq!(feature["geom"], "LINESTRING (0 0, 1 1)");
}

#[test]
fn test_revert_is_recorded_history() {
    let (_catalog, layer) = history();
    let before = at(&layer, 5);
    layer.revert_to(Vid::new(2)).unwrap();
    assert_eq!(at(&layer, 5), before);

    let epoch = layer.versioning().unwrap().epoch;
    let entries = layer
        .changes(epoch, Vid::new(5), None, None, 100)
        .unwrap()
        .entries;
    assert!(!entries.is_empty());
}

// =============================================================================
// Revert Inside a Transaction
// =============================================================================

#[test]
fn test_revert_action_shares_commit_version() {
    let (_catalog, layer) = history();
    let outcome = commit(
        &layer,
        vec![
            json!({"action": "revert", "tid": 2}),
            json!({"action": "feature.create", "fields": {"label": "after revert"}}),
        ],
    );
    assert_eq!(outcome, CommitOutcome::Committed { version: Some(Vid::new(6)) });
    let labels: Vec<_> = current(&layer)
        .iter()
        .map(|f| f["fields"]["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, vec!["a", "b", "after revert"]);
}

#[test]
fn test_revert_beyond_latest_is_rejected() {
    let (_catalog, layer) = history();
    let err = layer.revert_to(Vid::new(9)).unwrap_err();
    assert_eq!(err.status_code(), 422);

    let outcome = commit(&layer, vec![json!({"action": "revert", "tid": 9})]);
    let CommitOutcome::Errors { errors } = outcome else {
        panic!("expected errors");
    };
    assert_eq!(errors[0].1.error, "revert.invalid");
}

#[test]
fn test_revert_requires_versioning() {
    let catalog = Catalog::in_memory();
    let definition = LayerDefinition::new(GeometryType::Point, vec![]).unwrap();
    let layer = catalog.create_layer(definition, false).unwrap();
    let err = layer.revert_to(Vid::new(1)).unwrap_err();
    assert_eq!(err.code(), "versioning.required");
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::json_merge_patch::*;
use serde_json::json;

#[test]
pub fn test_merge_patch() {
    println!("Testing merge_patch()...");
    let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}, "l": [1, 2]});
    merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}, "l": [3]}));
    assert_eq!(target, json!({"a": "z", "c": {"d": "e"}, "l": [3]}));
}

#[test]
pub fn test_is_empty_value() {
    println!("Testing is_empty_value()...");
    assert!(is_empty_value(&json!(null)));
    assert!(is_empty_value(&json!("")));
    assert!(is_empty_value(&json!([])));
    assert!(is_empty_value(&json!({"a": {}, "b": null})));
    assert!(!is_empty_value(&json!(0)));
    assert!(!is_empty_value(&json!(false)));
    assert!(!is_empty_value(&json!({"a": [1]})));
}

#[test]
pub fn test_field_scoped_patch_ignores_fields_desired_does_not_name() {
    println!("Testing field_scoped_patch() ignores foreign fields...");
    let observed = json!({
        "metadata": {"name": "x", "uid": "u", "resourceVersion": "7"},
        "spec": {"replicas": 3, "revisionHistoryLimit": 10},
        "status": {"replicas": 3},
    });
    let desired = json!({"metadata": {"name": "x"}, "spec": {"replicas": 3}});
    assert_eq!(field_scoped_patch(&observed, &desired), None);
}

#[test]
pub fn test_field_scoped_patch_only_carries_changed_fields() {
    println!("Testing field_scoped_patch() carries only the drift...");
    let observed = json!({"data": {"a": "1", "b": "2"}, "metadata": {"labels": {"x": "y"}}});
    let desired = json!({"data": {"a": "1", "b": "3"}, "metadata": {"labels": {"x": "y"}}});
    assert_eq!(field_scoped_patch(&observed, &desired), Some(json!({"data": {"b": "3"}})));
}

#[test]
pub fn test_field_scoped_patch_replaces_lists_whole() {
    println!("Testing field_scoped_patch() on lists...");
    let observed = json!({"containers": [{"name": "a", "image": "i:1", "terminationMessagePath": "/dev/log"}]});
    let unchanged = json!({"containers": [{"name": "a", "image": "i:1"}]});
    assert_eq!(field_scoped_patch(&observed, &unchanged), None);

    let changed = json!({"containers": [{"name": "a", "image": "i:2"}]});
    assert_eq!(field_scoped_patch(&observed, &changed), Some(changed.clone()));
}

#[test]
pub fn test_field_scoped_patch_explicit_null_removes_owned_field() {
    println!("Testing field_scoped_patch() with explicit null...");
    let observed = json!({"containers": [{"name": "a", "args": ["--wsrep-new-cluster"]}]});
    let desired = json!({"containers": [{"name": "a", "args": null}]});
    assert_eq!(field_scoped_patch(&observed, &desired), Some(desired.clone()));

    let already_absent = json!({"containers": [{"name": "a"}]});
    assert_eq!(field_scoped_patch(&already_absent, &desired), None);
}

#[test]
pub fn test_field_scoped_patch_treats_empty_as_absent() {
    println!("Testing field_scoped_patch() with empty values...");
    let observed = json!({"data": {"user.cnf": ""}});
    let desired = json!({"data": {"user.cnf": ""}, "metadata": {"annotations": {}}});
    assert_eq!(field_scoped_patch(&observed, &desired), None);
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use serde_json::{Map, Value};

/// Applies a JSON merge patch (RFC 7386) to target in place.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    match patch {
        Value::Object(patch_map) => {
            if !target.is_object() {
                *target = Value::Object(Map::new());
            }
            if let Value::Object(target_map) = target {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

/// The API server drops null, empty lists, empty maps and empty strings on
/// storage, so all of them read back as an absent field.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(is_empty_value),
        _ => false,
    }
}

/// Computes the merge patch that moves the fields named by desired to their
/// desired values inside observed.
///
/// Only the keys present in desired are compared. Anything observed carries
/// beyond that (server defaults, status, fields other writers own) is left
/// alone. Lists are compared element-wise with the same rule but are patched
/// as a whole, since merge patch cannot address list elements. An explicit
/// null in desired marks a field the caller owns and wants absent.
///
/// Returns None when observed already agrees with desired.
pub fn field_scoped_patch(observed: &Value, desired: &Value) -> Option<Value> {
    diff_value(Some(observed), desired)
}

fn diff_value(observed: Option<&Value>, desired: &Value) -> Option<Value> {
    match (desired, observed) {
        (Value::Object(desired_map), Some(Value::Object(observed_map))) => {
            let mut patch = Map::new();
            for (key, desired_value) in desired_map {
                if let Some(value) = diff_value(observed_map.get(key), desired_value) {
                    patch.insert(key.clone(), value);
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        (Value::Array(desired_items), Some(Value::Array(observed_items))) => {
            let differs = observed_items.len() != desired_items.len()
                || observed_items
                    .iter()
                    .zip(desired_items)
                    .any(|(o, d)| diff_value(Some(o), d).is_some());
            if differs {
                Some(desired.clone())
            } else {
                None
            }
        }
        _ => {
            let observed_empty = observed.map_or(true, is_empty_value);
            if is_empty_value(desired) && observed_empty {
                None
            } else if observed == Some(desired) {
                None
            } else {
                Some(desired.clone())
            }
        }
    }
}

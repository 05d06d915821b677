// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::api_method::*;
use kube::api::DynamicObject;

/// ResourceBuilder describes how to converge one child object of a custom resource K.
///
/// make builds the desired object from scratch. update receives the observed
/// object, folds in what the API server owns and returns the merge patch that
/// brings the fields the controller owns in line, or None when nothing needs
/// to change.
pub trait ResourceBuilder<K, T, E> {
    fn get_request(cr: &K) -> KubeGetRequest;

    fn make(cr: &K, state: &T) -> Result<DynamicObject, E>;

    fn update(cr: &K, state: &T, obj: DynamicObject) -> Result<Option<serde_json::Value>, E>;

    fn state_after_create(cr: &K, obj: DynamicObject, state: T) -> Result<(T, Option<KubeAPIRequest>), E>;

    fn state_after_update(cr: &K, obj: DynamicObject, state: T) -> Result<(T, Option<KubeAPIRequest>), E>;
}

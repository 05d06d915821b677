// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::api_method::*;

/// Reconciler is a state machine driven by the shim layer.
///
/// reconcile_core never talks to the API server itself: each call consumes
/// the response to the previous request and returns the next local state
/// together with the next request, if any. The shim keeps calling it until
/// reconcile_done or reconcile_error holds.
pub trait Reconciler<R, T> {
    fn reconcile_init_state(&self) -> T;
    fn reconcile_core(&self, cr: &R, resp_o: Option<KubeAPIResponse>, state: T) -> (T, Option<KubeAPIRequest>);
    fn reconcile_done(&self, state: &T) -> bool;
    fn reconcile_error(&self, state: &T) -> bool;

    fn reconcile_error_message(&self, _state: &T) -> String {
        "reconcile_core reported an error".to_string()
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::controllers::mariadb_controller::exec::{phase_engine, resource::*};
use crate::controllers::mariadb_controller::trusted::{exec_types::*, step::*};
use crate::kubernetes_api_objects::{api_method::*, error::APIError};
use crate::reconciler::exec::{reconciler::*, resource_builder::ResourceBuilder};
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::ApiResource;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

pub struct MariaDBReconciler {}

impl Reconciler<MariaDBCluster, MariaDBReconcileState> for MariaDBReconciler {
    fn reconcile_init_state(&self) -> MariaDBReconcileState {
        reconcile_init_state()
    }

    fn reconcile_core(&self, mdb: &MariaDBCluster, resp_o: Option<KubeAPIResponse>, state: MariaDBReconcileState) -> (MariaDBReconcileState, Option<KubeAPIRequest>) {
        reconcile_core(mdb, resp_o, state)
    }

    fn reconcile_done(&self, state: &MariaDBReconcileState) -> bool {
        reconcile_done(state)
    }

    fn reconcile_error(&self, state: &MariaDBReconcileState) -> bool {
        reconcile_error(state)
    }

    fn reconcile_error_message(&self, state: &MariaDBReconcileState) -> String {
        match &state.error {
            Some(err) => err.to_string(),
            None => format!("reconcile failed at {:?}", state.reconcile_step),
        }
    }
}

impl Default for MariaDBReconciler {
    fn default() -> MariaDBReconciler {
        MariaDBReconciler {}
    }
}

pub fn reconcile_init_state() -> MariaDBReconcileState {
    MariaDBReconcileState {
        reconcile_step: MariaDBReconcileStep::Init,
        status: None,
        outcomes: Vec::new(),
        error: None,
    }
}

pub fn reconcile_done(state: &MariaDBReconcileState) -> bool {
    matches!(state.reconcile_step, MariaDBReconcileStep::Done)
}

pub fn reconcile_error(state: &MariaDBReconcileState) -> bool {
    matches!(state.reconcile_step, MariaDBReconcileStep::Error)
}

fn cluster_key(mdb: &MariaDBCluster) -> String {
    format!("{}/{}", mdb.namespace().unwrap_or_default(), mdb.name_any())
}

fn error_state(state: MariaDBReconcileState, err: ReconcileError) -> (MariaDBReconcileState, Option<KubeAPIRequest>) {
    let state_prime = MariaDBReconcileState {
        reconcile_step: MariaDBReconcileStep::Error,
        error: Some(err),
        ..state
    };
    (state_prime, None)
}

/// One pass: observe the server workload, let the phase engine settle the
/// status and persist it if it moved, then converge every child object to
/// the desired shape for that phase, one request at a time.
pub fn reconcile_core(mdb: &MariaDBCluster, resp_o: Option<KubeAPIResponse>, state: MariaDBReconcileState) -> (MariaDBReconcileState, Option<KubeAPIRequest>) {
    match state.reconcile_step {
        MariaDBReconcileStep::Init => {
            if mdb.spec.paused {
                info!(cluster = %cluster_key(mdb), "cluster is paused, skipping");
                let state_prime = MariaDBReconcileState {
                    reconcile_step: MariaDBReconcileStep::Done,
                    ..state
                };
                return (state_prime, None);
            }
            if let Err(err) = mdb.state_validation() {
                return error_state(state, err);
            }
            let req_o = KubeAPIRequest::GetRequest(StatefulSetBuilder::get_request(mdb));
            let state_prime = MariaDBReconcileState {
                reconcile_step: MariaDBReconcileStep::AfterGetStatefulSet,
                ..state
            };
            (state_prime, Some(req_o))
        }
        MariaDBReconcileStep::AfterGetStatefulSet => {
            let key = StatefulSetBuilder::get_request(mdb).key();
            let observed = match resp_o.and_then(KubeAPIResponse::into_get_response) {
                Some(KubeGetResponse { res: Ok(obj) }) => match unmarshal::<StatefulSet>(obj) {
                    Ok(sts) => Some(sts),
                    Err(err) => return error_state(state, err),
                },
                Some(KubeGetResponse { res: Err(APIError::ObjectNotFound) }) => None,
                Some(KubeGetResponse { res: Err(error) }) => return error_state(state, ReconcileError::Api { key, error }),
                None => return error_state(state, ReconcileError::UnexpectedResponse(key)),
            };
            let current = mdb.status_or_default();
            let next_status = phase_engine::next(mdb, observed.as_ref());
            if next_status == current {
                return begin_converge(mdb, MariaDBReconcileState {
                    status: Some(current),
                    ..state
                });
            }
            if next_status.phase != current.phase {
                info!(cluster = %cluster_key(mdb), from = %current.phase, to = %next_status.phase, "phase transition");
            }
            let req_o = KubeAPIRequest::PatchStatusRequest(KubePatchRequest {
                api_resource: ApiResource::erase::<MariaDBCluster>(&()),
                name: mdb.name_any(),
                namespace: mdb.namespace().unwrap_or_default(),
                patch: json!({
                    "metadata": { "resourceVersion": mdb.metadata.resource_version },
                    "status": next_status,
                }),
            });
            let state_prime = MariaDBReconcileState {
                reconcile_step: MariaDBReconcileStep::AfterPatchStatus,
                status: Some(next_status),
                ..state
            };
            (state_prime, Some(req_o))
        }
        MariaDBReconcileStep::AfterPatchStatus => {
            let key = format!("MariaDBCluster/{}", cluster_key(mdb));
            match resp_o.and_then(KubeAPIResponse::into_patch_status_response) {
                Some(KubePatchResponse { res: Ok(_) }) => begin_converge(mdb, state),
                // A Conflict lands here too: the queue retries the whole pass against a fresh read.
                Some(KubePatchResponse { res: Err(error) }) => error_state(state, ReconcileError::Api { key, error }),
                None => error_state(state, ReconcileError::UnexpectedResponse(key)),
            }
        }
        MariaDBReconcileStep::AfterKRequestStep(_, resource) => match resource {
            SubResource::ServiceAccount => reconcile_helper::<ServiceAccountBuilder>(mdb, resp_o, state),
            SubResource::Role => reconcile_helper::<RoleBuilder>(mdb, resp_o, state),
            SubResource::RoleBinding => reconcile_helper::<RoleBindingBuilder>(mdb, resp_o, state),
            SubResource::SnapshotPersistentVolumeClaim => reconcile_helper::<SnapshotPersistentVolumeClaimBuilder>(mdb, resp_o, state),
            SubResource::ServerConfigMap => reconcile_helper::<ServerConfigMapBuilder>(mdb, resp_o, state),
            SubResource::StatefulSet => reconcile_helper::<StatefulSetBuilder>(mdb, resp_o, state),
            SubResource::HeadlessService => reconcile_helper::<HeadlessServiceBuilder>(mdb, resp_o, state),
            SubResource::ClientService => reconcile_helper::<ClientServiceBuilder>(mdb, resp_o, state),
            SubResource::ProxyDeployment => reconcile_helper::<ProxyDeploymentBuilder>(mdb, resp_o, state),
        },
        _ => (state, None),
    }
}

// Children are converged in this order; optional ones are skipped when the
// cluster does not ask for them.
const SUB_RESOURCE_ORDER: [SubResource; 9] = [
    SubResource::ServiceAccount,
    SubResource::Role,
    SubResource::RoleBinding,
    SubResource::SnapshotPersistentVolumeClaim,
    SubResource::ServerConfigMap,
    SubResource::StatefulSet,
    SubResource::HeadlessService,
    SubResource::ClientService,
    SubResource::ProxyDeployment,
];

fn sub_resource_enabled(mdb: &MariaDBCluster, sub_resource: SubResource) -> bool {
    match sub_resource {
        SubResource::SnapshotPersistentVolumeClaim => mdb.spec.storages.snapshot.is_some(),
        SubResource::ProxyDeployment => mdb.spec.proxy,
        _ => true,
    }
}

pub fn next_sub_resource(mdb: &MariaDBCluster, sub_resource: Option<SubResource>) -> Option<SubResource> {
    let start = match sub_resource {
        Some(current) => SUB_RESOURCE_ORDER.iter().position(|r| *r == current)? + 1,
        None => 0,
    };
    SUB_RESOURCE_ORDER[start..]
        .iter()
        .copied()
        .find(|r| sub_resource_enabled(mdb, *r))
}

fn get_request(mdb: &MariaDBCluster, sub_resource: SubResource) -> KubeGetRequest {
    match sub_resource {
        SubResource::ServiceAccount => ServiceAccountBuilder::get_request(mdb),
        SubResource::Role => RoleBuilder::get_request(mdb),
        SubResource::RoleBinding => RoleBindingBuilder::get_request(mdb),
        SubResource::SnapshotPersistentVolumeClaim => SnapshotPersistentVolumeClaimBuilder::get_request(mdb),
        SubResource::ServerConfigMap => ServerConfigMapBuilder::get_request(mdb),
        SubResource::StatefulSet => StatefulSetBuilder::get_request(mdb),
        SubResource::HeadlessService => HeadlessServiceBuilder::get_request(mdb),
        SubResource::ClientService => ClientServiceBuilder::get_request(mdb),
        SubResource::ProxyDeployment => ProxyDeploymentBuilder::get_request(mdb),
    }
}

fn step_to(mdb: &MariaDBCluster, state: MariaDBReconcileState, next: Option<SubResource>) -> (MariaDBReconcileState, Option<KubeAPIRequest>) {
    match next {
        Some(sub_resource) => {
            let req_o = KubeAPIRequest::GetRequest(get_request(mdb, sub_resource));
            let state_prime = MariaDBReconcileState {
                reconcile_step: MariaDBReconcileStep::AfterKRequestStep(ActionKind::Get, sub_resource),
                ..state
            };
            (state_prime, Some(req_o))
        }
        None => {
            let state_prime = MariaDBReconcileState {
                reconcile_step: MariaDBReconcileStep::Done,
                ..state
            };
            (state_prime, None)
        }
    }
}

fn begin_converge(mdb: &MariaDBCluster, state: MariaDBReconcileState) -> (MariaDBReconcileState, Option<KubeAPIRequest>) {
    step_to(mdb, state, next_sub_resource(mdb, None))
}

/// Records how sub_resource converged and moves on to the next child.
pub fn state_after_converged(mdb: &MariaDBCluster, state: MariaDBReconcileState, sub_resource: SubResource, outcome: ConvergeOutcome) -> (MariaDBReconcileState, Option<KubeAPIRequest>) {
    debug!(cluster = %cluster_key(mdb), resource = ?sub_resource, outcome = ?outcome, "converged");
    let mut outcomes = state.outcomes;
    outcomes.push((sub_resource, outcome));
    let state_prime = MariaDBReconcileState {
        outcomes,
        ..state
    };
    step_to(mdb, state_prime, next_sub_resource(mdb, Some(sub_resource)))
}

pub fn reconcile_helper<Builder>(mdb: &MariaDBCluster, resp_o: Option<KubeAPIResponse>, state: MariaDBReconcileState) -> (MariaDBReconcileState, Option<KubeAPIRequest>)
where
    Builder: ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError>,
{
    let (action, sub_resource) = match state.reconcile_step {
        MariaDBReconcileStep::AfterKRequestStep(action, sub_resource) => (action, sub_resource),
        _ => return error_state(state, ReconcileError::UnexpectedResponse("reconcile_helper".to_string())),
    };
    let get_req = Builder::get_request(mdb);
    let key = get_req.key();
    let resp = match resp_o {
        Some(resp) => resp,
        None => return error_state(state, ReconcileError::UnexpectedResponse(key)),
    };
    match action {
        ActionKind::Get => match resp.into_get_response() {
            Some(KubeGetResponse { res: Ok(obj) }) => match Builder::update(mdb, &state, obj) {
                Ok(Some(patch)) => {
                    let req_o = KubeAPIRequest::PatchRequest(KubePatchRequest {
                        api_resource: get_req.api_resource,
                        name: get_req.name,
                        namespace: get_req.namespace,
                        patch,
                    });
                    let state_prime = MariaDBReconcileState {
                        reconcile_step: MariaDBReconcileStep::AfterKRequestStep(ActionKind::Patch, sub_resource),
                        ..state
                    };
                    (state_prime, Some(req_o))
                }
                Ok(None) => state_after_converged(mdb, state, sub_resource, ConvergeOutcome::NoChange),
                Err(err) => error_state(state, err),
            },
            Some(KubeGetResponse { res: Err(APIError::ObjectNotFound) }) => match Builder::make(mdb, &state) {
                Ok(obj) => {
                    let req_o = KubeAPIRequest::CreateRequest(KubeCreateRequest {
                        api_resource: get_req.api_resource,
                        namespace: get_req.namespace,
                        obj,
                    });
                    let state_prime = MariaDBReconcileState {
                        reconcile_step: MariaDBReconcileStep::AfterKRequestStep(ActionKind::Create, sub_resource),
                        ..state
                    };
                    (state_prime, Some(req_o))
                }
                Err(err) => error_state(state, err),
            },
            Some(KubeGetResponse { res: Err(error) }) => error_state(state, ReconcileError::Api { key, error }),
            None => error_state(state, ReconcileError::UnexpectedResponse(key)),
        },
        ActionKind::Create => match resp.into_create_response() {
            Some(KubeCreateResponse { res: Ok(obj) }) => match Builder::state_after_create(mdb, obj, state.clone()) {
                Ok(res) => res,
                Err(err) => error_state(state, err),
            },
            Some(KubeCreateResponse { res: Err(error) }) => error_state(state, ReconcileError::Api { key, error }),
            None => error_state(state, ReconcileError::UnexpectedResponse(key)),
        },
        ActionKind::Patch => match resp.into_patch_response() {
            Some(KubePatchResponse { res: Ok(obj) }) => match Builder::state_after_update(mdb, obj, state.clone()) {
                Ok(res) => res,
                Err(err) => error_state(state, err),
            },
            Some(KubePatchResponse { res: Err(error) }) => error_state(state, ReconcileError::Api { key, error }),
            None => error_state(state, ReconcileError::UnexpectedResponse(key)),
        },
    }
}

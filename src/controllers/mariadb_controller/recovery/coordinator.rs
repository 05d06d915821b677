// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::controllers::mariadb_controller::recovery::RecoveryError;
use crate::controllers::mariadb_controller::trusted::exec_types::*;
use crate::kubernetes_api_objects::{api_method::*, error::APIError};
use crate::shim_layer::controller_runtime::ApiServerShim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::api::ApiResource;
use serde_json::json;
use tracing::{debug, info, warn};

/// Bound on read-merge-patch attempts against a status that keeps moving.
pub const MAX_CONFLICT_RETRIES: usize = 10;

/// Inserts or replaces the report of hostname. An unchanged state leaves the
/// existing report (and its timestamp) alone; returns whether anything changed.
pub fn upsert_report(status: &mut MariaDBClusterStatus, hostname: &str, state: &GaleraState, now: Time) -> bool {
    match status.recovery_reports.iter_mut().find(|r| r.hostname == hostname) {
        Some(report) if report.state == *state => false,
        Some(report) => {
            report.state = state.clone();
            report.reported = Some(now);
            true
        }
        None => {
            status.recovery_reports.push(ReplicaReport {
                hostname: hostname.to_string(),
                reported: Some(now),
                state: state.clone(),
            });
            true
        }
    }
}

/// Release is safe once every desired replica has reported and all of them
/// agree on the same known position. A single replica has nobody to agree with.
pub fn quorum_reached(reports: &[ReplicaReport], desired_replicas: i32) -> bool {
    if desired_replicas <= 1 {
        return true;
    }
    if reports.len() != desired_replicas as usize {
        return false;
    }
    match reports.first() {
        Some(first) => reports
            .iter()
            .all(|r| r.state.seq_no >= 0 && r.state.seq_no == first.state.seq_no),
        None => false,
    }
}

/// The replica to reseed the cluster from: the highest known position, ties
/// going to the lowest hostname. Replicas with an unknown position never win.
pub fn select_bootstrap_from(reports: &[ReplicaReport]) -> Option<String> {
    reports
        .iter()
        .filter(|r| r.state.seq_no >= 0)
        .max_by(|a, b| {
            a.state
                .seq_no
                .cmp(&b.state.seq_no)
                .then_with(|| b.hostname.cmp(&a.hostname))
        })
        .map(|r| r.hostname.clone())
}

/// A replica may only mark itself safe to bootstrap when it belongs to the
/// same replication group as everyone else and holds the agreed position.
pub fn check_promotable(local: &GaleraState, reports: &[ReplicaReport]) -> Result<(), RecoveryError> {
    if local.seq_no < 0 {
        return Err(RecoveryError::NotSafeToBootstrap(format!(
            "local position is unknown (seqno {})",
            local.seq_no
        )));
    }
    for report in reports {
        if report.state.uuid != local.uuid {
            return Err(RecoveryError::UuidMismatch {
                expected: local.uuid.clone(),
                recovered: report.state.uuid.clone(),
            });
        }
        if report.state.seq_no > local.seq_no {
            return Err(RecoveryError::NotSafeToBootstrap(format!(
                "{} is ahead with seqno {} > {}",
                report.hostname, report.state.seq_no, local.seq_no
            )));
        }
    }
    Ok(())
}

/// Reads the cluster, lets mutate edit its status and writes the status back
/// guarded by the resource version just read. A Conflict means someone else
/// wrote in between, so the whole read-merge-patch round starts over.
///
/// mutate returns false when there is nothing to write.
pub async fn patch_status_with_retry<S, F>(shim: &S, namespace: &str, name: &str, mut mutate: F) -> Result<MariaDBCluster, RecoveryError>
where
    S: ApiServerShim,
    F: FnMut(&mut MariaDBClusterStatus) -> bool,
{
    let api_resource = ApiResource::erase::<MariaDBCluster>(&());
    for attempt in 1..=MAX_CONFLICT_RETRIES {
        let get_resp = shim
            .handle(KubeAPIRequest::GetRequest(KubeGetRequest {
                api_resource: api_resource.clone(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }))
            .await;
        let cluster = match get_resp.into_get_response() {
            Some(KubeGetResponse { res: Ok(obj) }) => obj
                .try_parse::<MariaDBCluster>()
                .map_err(|err| RecoveryError::Api(APIError::Other(err.to_string())))?,
            Some(KubeGetResponse { res: Err(err) }) => return Err(RecoveryError::Api(err)),
            None => return Err(RecoveryError::Api(APIError::Other("unexpected response to get".to_string()))),
        };
        let mut status = cluster.status_or_default();
        if !mutate(&mut status) {
            return Ok(cluster);
        }
        let patch = json!({
            "metadata": { "resourceVersion": cluster.metadata.resource_version },
            "status": status,
        });
        let patch_resp = shim
            .handle(KubeAPIRequest::PatchStatusRequest(KubePatchRequest {
                api_resource: api_resource.clone(),
                name: name.to_string(),
                namespace: namespace.to_string(),
                patch,
            }))
            .await;
        match patch_resp.into_patch_status_response() {
            Some(KubePatchResponse { res: Ok(obj) }) => {
                return obj
                    .try_parse::<MariaDBCluster>()
                    .map_err(|err| RecoveryError::Api(APIError::Other(err.to_string())));
            }
            Some(KubePatchResponse { res: Err(APIError::Conflict(msg)) }) => {
                debug!(cluster = %format!("{}/{}", namespace, name), attempt, "status conflict: {}", msg);
            }
            Some(KubePatchResponse { res: Err(err) }) => return Err(RecoveryError::Api(err)),
            None => return Err(RecoveryError::Api(APIError::Other("unexpected response to patch".to_string()))),
        }
    }
    warn!(cluster = %format!("{}/{}", namespace, name), "giving up after {} conflicting status writes", MAX_CONFLICT_RETRIES);
    Err(RecoveryError::ConflictRetriesExhausted)
}

/// Records the local state of hostname in the cluster status and returns the
/// cluster as it stands afterwards. Outside of recovery nothing is written:
/// reports are dropped when recovery ends and a late one must not bring them back.
pub async fn report<S: ApiServerShim>(shim: &S, namespace: &str, name: &str, hostname: &str, state: &GaleraState) -> Result<MariaDBCluster, RecoveryError> {
    let cluster = patch_status_with_retry(shim, namespace, name, |status| {
        status.phase.is_recovering() && upsert_report(status, hostname, state, Time(Utc::now()))
    })
    .await?;
    info!(cluster = %format!("{}/{}", namespace, name), hostname, seqno = state.seq_no, "reported local state");
    Ok(cluster)
}

pub async fn set_stage<S: ApiServerShim>(shim: &S, namespace: &str, name: &str, stage: &str) -> Result<MariaDBCluster, RecoveryError> {
    patch_status_with_retry(shim, namespace, name, |status| {
        if status.stage == stage {
            false
        } else {
            status.stage = stage.to_string();
            true
        }
    })
    .await
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::controllers::mariadb_controller::exec::resource::make_stateful_set_name;
use crate::controllers::mariadb_controller::recovery::coordinator::{quorum_reached, select_bootstrap_from};
use crate::controllers::mariadb_controller::trusted::{exec_types::*, phase::Phase};
use k8s_openapi::api::apps::v1::StatefulSet;

/// The workload has rolled out its latest spec and every replica it should
/// run is current and ready.
pub fn is_stateful_set_ready(sts: &StatefulSet) -> bool {
    let (spec, status) = match (sts.spec.as_ref(), sts.status.as_ref()) {
        (Some(spec), Some(status)) => (spec, status),
        _ => return false,
    };
    let desired = spec.replicas.unwrap_or(1);
    let generation = sts.metadata.generation.unwrap_or(0);
    status.observed_generation.unwrap_or(0) >= generation
        && status.replicas == desired
        && status.current_replicas.unwrap_or(0) == desired
        && status.ready_replicas.unwrap_or(0) == desired
        && status.current_revision.is_some()
        && status.current_revision == status.update_revision
}

pub fn observed_generation(sts: &StatefulSet) -> i64 {
    sts.status
        .as_ref()
        .and_then(|status| status.observed_generation)
        .unwrap_or(0)
}

/// Whether the workload controller has acted on a spec newer than the
/// watermark recorded at the last phase change.
pub fn is_stateful_set_updated(status: &MariaDBClusterStatus, sts: &StatefulSet) -> bool {
    observed_generation(sts) > status.stateful_set_observed_generation
}

/// The workload controller has acted on the latest spec and every pod runs
/// the same revision, so no rolling update is taking pods down.
fn is_rollout_settled(sts: &StatefulSet) -> bool {
    match sts.status.as_ref() {
        Some(status) => {
            status.observed_generation.unwrap_or(0) >= sts.metadata.generation.unwrap_or(0)
                && status.current_revision == status.update_revision
        }
        None => false,
    }
}

/// No replica is ready although no rollout accounts for it.
fn has_lost_all_replicas(sts: &StatefulSet) -> bool {
    match sts.status.as_ref() {
        Some(status) => status.ready_replicas.unwrap_or(0) == 0 && is_rollout_settled(sts),
        None => false,
    }
}

fn enter(status: &MariaDBClusterStatus, phase: Phase, sts: &StatefulSet) -> MariaDBClusterStatus {
    MariaDBClusterStatus {
        phase,
        stateful_set_observed_generation: observed_generation(sts),
        ..status.clone()
    }
}

/// Computes the status for this pass from the persisted status and the
/// observed server workload. Pure; the caller persists the result.
///
/// Without a workload observation nothing is known to be ready, so every
/// phase other than Empty stays where it is.
pub fn next(mdb: &MariaDBCluster, sts: Option<&StatefulSet>) -> MariaDBClusterStatus {
    let status = mdb.status_or_default();
    let replicas = mdb.spec.replicas;
    if status.phase == Phase::Empty {
        return MariaDBClusterStatus {
            phase: Phase::BootstrapFirst,
            ..status
        };
    }
    let sts = match sts {
        Some(sts) => sts,
        None => return status,
    };
    let ready = is_stateful_set_ready(sts);
    let advanced = ready && is_stateful_set_updated(&status, sts);
    match status.phase {
        // A single member also restarts without the new-cluster flag before
        // it counts as operational.
        Phase::BootstrapFirst if ready => enter(&status, Phase::BootstrapFirstRestart, sts),
        Phase::BootstrapFirstRestart if advanced => {
            if replicas > 1 {
                enter(&status, Phase::BootstrapSecond, sts)
            } else {
                enter(&status, Phase::Operational, sts)
            }
        }
        Phase::BootstrapSecond if advanced => {
            if replicas > 2 {
                enter(&status, Phase::BootstrapThird, sts)
            } else {
                enter(&status, Phase::Operational, sts)
            }
        }
        Phase::BootstrapThird if advanced => enter(&status, Phase::Operational, sts),
        Phase::Operational if has_lost_all_replicas(sts) => MariaDBClusterStatus {
            recovery_reports: Vec::new(),
            bootstrap_from: None,
            stage: String::new(),
            ..enter(&status, Phase::Recovery, sts)
        },
        Phase::Recovery if quorum_reached(&status.recovery_reports, replicas) => {
            let bootstrap_from = select_bootstrap_from(&status.recovery_reports)
                .unwrap_or_else(|| format!("{}-0", make_stateful_set_name(mdb)));
            MariaDBClusterStatus {
                bootstrap_from: Some(bootstrap_from),
                ..enter(&status, Phase::RecoveryReleaseAll, sts)
            }
        }
        Phase::RecoveryReleaseAll if ready => MariaDBClusterStatus {
            recovery_reports: Vec::new(),
            bootstrap_from: None,
            stage: String::new(),
            ..enter(&status, Phase::Operational, sts)
        },
        _ => status,
    }
}

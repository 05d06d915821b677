// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::error::APIError;
use thiserror::Error;

pub mod controller_runtime;
pub mod leader_election;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),
    #[error("api error: {0}")]
    ApiError(#[source] APIError),
    #[error("shim layer error: {0}")]
    ShimLayerError(String),
    #[error("reconcile_core error: {0}")]
    ReconcileCoreError(String),
    #[error("leader election lost")]
    LeaderElectionLost,
}

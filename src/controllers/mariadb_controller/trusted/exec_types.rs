// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::controllers::mariadb_controller::trusted::{phase::Phase, step::*};
use crate::kubernetes_api_objects::error::APIError;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "components.dsg.dk",
    version = "v1alpha1",
    kind = "MariaDBCluster",
    plural = "mariadbclusters",
    shortname = "mdbc",
    namespaced,
    status = "MariaDBClusterStatus"
)]
#[kube(printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#)]
#[kube(printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#)]
#[kube(printcolumn = r#"{"name":"Bootstrap From","type":"string","jsonPath":".status.bootstrapFrom"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBClusterSpec {
    /// Server version, used as the tag of the mariadb image.
    pub version: String,
    /// A paused cluster is left alone by the controller.
    #[serde(default)]
    pub paused: bool,
    pub replicas: i32,
    pub storages: MariaDBClusterStorages,
    /// Appended to the server configuration as user.cnf.
    #[serde(default)]
    pub server_config: String,
    /// Puts a proxy deployment in front of the servers and points the client service at it.
    #[serde(default)]
    pub proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBClusterStorages {
    pub data: StorageSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<StorageSpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
    pub init_size: String,
}

// Status fields are serialized even when empty so that a status patch
// carrying the whole struct clears what the new status no longer has.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MariaDBClusterStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub stage: String,
    /// Generation of the server StatefulSet observed when the phase last changed.
    #[serde(default)]
    pub stateful_set_observed_generation: i64,
    #[serde(default)]
    pub bootstrap_from: Option<String>,
    #[serde(default)]
    pub recovery_reports: Vec<ReplicaReport>,
}

/// Stage a bootstrap source publishes once its state file is marked safe to bootstrap.
pub const STAGE_PRIMARY_RECOVERED: &str = "PrimaryRecovered";

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaReport {
    pub hostname: String,
    #[serde(default)]
    pub reported: Option<Time>,
    pub state: GaleraState,
}

/// GaleraState is what a replica knows about its last committed position,
/// read from grastate.dat in its data directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GaleraState {
    pub version: String,
    pub uuid: String,
    /// -1 when the replica did not shut down cleanly and the position is unknown.
    pub seq_no: i64,
    pub safe_to_bootstrap: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("invalid cluster spec: {0}")]
    Validation(String),
    #[error("{key}: {error}")]
    Api { key: String, error: APIError },
    #[error("object misses {0}")]
    MissingObjectKey(&'static str),
    #[error("failed to marshal object: {0}")]
    Marshal(String),
    #[error("unexpected response for {0}")]
    UnexpectedResponse(String),
}

impl From<serde_json::Error> for ReconcileError {
    fn from(err: serde_json::Error) -> ReconcileError {
        ReconcileError::Marshal(err.to_string())
    }
}

// MariaDBReconcileState describes the local state with which the reconcile functions makes decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct MariaDBReconcileState {
    // reconcile_step, like a program counter, is used to track the progress of reconcile_core
    pub reconcile_step: MariaDBReconcileStep,
    // status the phase engine settled on in this round; the desired children follow its phase
    pub status: Option<MariaDBClusterStatus>,
    pub outcomes: Vec<(SubResource, ConvergeOutcome)>,
    pub error: Option<ReconcileError>,
}

impl MariaDBCluster {
    pub fn status_or_default(&self) -> MariaDBClusterStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Checks the parts of the cluster spec the desired objects are built from.
    pub fn state_validation(&self) -> Result<(), ReconcileError> {
        let spec = &self.spec;
        if spec.replicas < 1 {
            return Err(ReconcileError::Validation(format!(
                "replicas must be at least 1, got {}",
                spec.replicas
            )));
        }
        if spec.version.trim().is_empty() {
            return Err(ReconcileError::Validation("version must not be empty".to_string()));
        }
        validate_quantity("storages.data.initSize", &spec.storages.data.init_size)?;
        if let Some(snapshot) = &spec.storages.snapshot {
            validate_quantity("storages.snapshot.initSize", &snapshot.init_size)?;
        }
        Ok(())
    }
}

fn validate_quantity(field: &str, value: &str) -> Result<(), ReconcileError> {
    let quantity = Regex::new(r"^[0-9]+(\.[0-9]+)?([KMGTPE]i|[mkMGTPE]|[eE][0-9]+)?$")
        .map_err(|err| ReconcileError::Validation(err.to_string()))?;
    if quantity.is_match(value) {
        Ok(())
    } else {
        Err(ReconcileError::Validation(format!("{} is not a valid quantity: {:?}", field, value)))
    }
}

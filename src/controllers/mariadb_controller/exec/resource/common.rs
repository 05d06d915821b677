// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::controllers::mariadb_controller::trusted::{exec_types::*, phase::Phase};
use crate::kubernetes_api_objects::api_method::KubeGetRequest;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{ApiResource, DynamicObject};
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;

pub const CLUSTER_NAME_LABEL: &str = "mariadbcluster.components.dsg.dk/cluster-name";
pub const ROLE_LABEL: &str = "mariadbcluster.components.dsg.dk/role";
pub const SERVER_ROLE: &str = "server";
pub const PROXY_ROLE: &str = "proxy";
pub const CLIENT_ROLE: &str = "client";

pub const AGENT_IMAGE: &str = "goblain/mdbc:dev";
pub const PROXY_IMAGE: &str = "proxysql/proxysql:2.0.12";

pub const MYSQL_PORT: i32 = 3306;
pub const WSREP_PORT: i32 = 4567;
pub const IST_PORT: i32 = 4568;
pub const SST_PORT: i32 = 4444;

pub const DATA_VOLUME: &str = "data";
pub const CONFIG_VOLUME: &str = "config";
pub const DATA_DIR: &str = "/var/lib/mysql";
pub const CONFIG_DIR: &str = "/etc/mysql/conf.d";
pub const OPERATOR_CNF: &str = "operator.cnf";
pub const USER_CNF: &str = "user.cnf";

pub fn make_server_name(mdb: &MariaDBCluster) -> String {
    format!("{}-server", mdb.name_any())
}

pub fn make_proxy_name(mdb: &MariaDBCluster) -> String {
    format!("{}-proxy", mdb.name_any())
}

pub fn make_client_service_name(mdb: &MariaDBCluster) -> String {
    mdb.name_any()
}

pub fn make_snapshot_name(mdb: &MariaDBCluster) -> String {
    format!("{}-snapshot", mdb.name_any())
}

pub fn make_labels(mdb: &MariaDBCluster, role: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), mdb.name_any()),
        (ROLE_LABEL.to_string(), role.to_string()),
    ])
}

pub fn make_server_labels(mdb: &MariaDBCluster) -> BTreeMap<String, String> {
    make_labels(mdb, SERVER_ROLE)
}

pub fn make_proxy_labels(mdb: &MariaDBCluster) -> BTreeMap<String, String> {
    make_labels(mdb, PROXY_ROLE)
}

pub fn make_owner_references(mdb: &MariaDBCluster) -> Result<Vec<OwnerReference>, ReconcileError> {
    let owner = mdb
        .controller_owner_ref(&())
        .ok_or(ReconcileError::MissingObjectKey("metadata.uid"))?;
    Ok(vec![owner])
}

pub fn make_metadata(mdb: &MariaDBCluster, name: String, labels: BTreeMap<String, String>) -> Result<ObjectMeta, ReconcileError> {
    Ok(ObjectMeta {
        name: Some(name),
        namespace: mdb.namespace(),
        labels: Some(labels),
        owner_references: Some(make_owner_references(mdb)?),
        ..ObjectMeta::default()
    })
}

/// The phase the desired children are built for: the status settled on in
/// this round, or the persisted one before the phase engine has run.
pub fn desired_phase(mdb: &MariaDBCluster, state: &MariaDBReconcileState) -> Phase {
    match &state.status {
        Some(status) => status.phase,
        None => mdb.status_or_default().phase,
    }
}

pub fn make_get_request<K: Resource<DynamicType = ()>>(mdb: &MariaDBCluster, name: String) -> KubeGetRequest {
    KubeGetRequest {
        api_resource: ApiResource::erase::<K>(&()),
        name,
        namespace: mdb.namespace().unwrap_or_default(),
    }
}

/// Folds the fields the API server (or other writers) own into desired
/// metadata: identity and version tokens, timestamps, and any labels or
/// annotations the controller does not set itself.
pub fn merge_object_meta(found: &ObjectMeta, desired: ObjectMeta) -> ObjectMeta {
    let mut labels = found.labels.clone().unwrap_or_default();
    labels.extend(desired.labels.unwrap_or_default());
    let mut annotations = found.annotations.clone().unwrap_or_default();
    annotations.extend(desired.annotations.unwrap_or_default());
    ObjectMeta {
        labels: if labels.is_empty() { None } else { Some(labels) },
        annotations: if annotations.is_empty() { None } else { Some(annotations) },
        uid: found.uid.clone(),
        resource_version: found.resource_version.clone(),
        generation: found.generation,
        creation_timestamp: found.creation_timestamp.clone(),
        finalizers: found.finalizers.clone(),
        ..desired
    }
}

pub fn marshal<K: Serialize>(obj: &K) -> Result<DynamicObject, ReconcileError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub fn unmarshal<K: DeserializeOwned>(obj: DynamicObject) -> Result<K, ReconcileError> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Patch for the fields of merged that differ from found, or None.
pub fn make_patch<K: Serialize>(found: &DynamicObject, merged: &K) -> Result<Option<serde_json::Value>, ReconcileError> {
    let found_value = serde_json::to_value(found)?;
    let merged_value = serde_json::to_value(merged)?;
    Ok(crate::kubernetes_api_objects::json_merge_patch::field_scoped_patch(&found_value, &merged_value))
}

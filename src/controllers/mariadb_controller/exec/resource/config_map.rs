// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, phase::Phase, step::*};
use crate::kubernetes_api_objects::api_method::*;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub struct ServerConfigMapBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for ServerConfigMapBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<ConfigMap>(mdb, make_server_config_map_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_server_config_map(mdb, desired_phase(mdb, state))?)
    }

    fn update(mdb: &MariaDBCluster, state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<ConfigMap>(obj.clone())?;
        make_patch(&obj, &update_server_config_map(mdb, desired_phase(mdb, state), &found)?)
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<ConfigMap>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ServerConfigMap, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<ConfigMap>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ServerConfigMap, ConvergeOutcome::Applied))
    }
}

pub fn make_server_config_map_name(mdb: &MariaDBCluster) -> String {
    make_server_name(mdb)
}

/// Peer addresses a server joins at startup, through the headless service.
///
/// While bootstrapping only the members that already run are listed, so a
/// joining member never waits for a peer that does not exist yet.
pub fn make_wsrep_endpoints(mdb: &MariaDBCluster, phase: Phase) -> Vec<String> {
    let server_name = make_server_name(mdb);
    let members = match phase {
        Phase::BootstrapFirst | Phase::BootstrapFirstRestart => 0,
        Phase::BootstrapSecond => 1,
        Phase::BootstrapThird => 2,
        _ => mdb.spec.replicas.max(0),
    };
    (0..members)
        .map(|i| format!("{}-{}.{}", server_name, i, server_name))
        .collect()
}

pub fn make_operator_cnf(mdb: &MariaDBCluster, phase: Phase) -> String {
    [
        "[mysqld]".to_string(),
        "binlog_format=ROW".to_string(),
        "default_storage_engine=InnoDB".to_string(),
        "innodb_autoinc_lock_mode=2".to_string(),
        "bind-address=0.0.0.0".to_string(),
        String::new(),
        "[galera]".to_string(),
        "wsrep_on=ON".to_string(),
        "wsrep_provider=/usr/lib/galera/libgalera_smm.so".to_string(),
        format!("wsrep_cluster_name={}", mdb.name_any()),
        format!("wsrep_cluster_address=gcomm://{}", make_wsrep_endpoints(mdb, phase).join(",")),
        "wsrep_sst_method=rsync".to_string(),
    ]
    .join("\n")
        + "\n"
}

pub fn make_server_config_map(mdb: &MariaDBCluster, phase: Phase) -> Result<ConfigMap, ReconcileError> {
    Ok(ConfigMap {
        metadata: make_metadata(mdb, make_server_config_map_name(mdb), make_server_labels(mdb))?,
        data: Some(BTreeMap::from([
            (OPERATOR_CNF.to_string(), make_operator_cnf(mdb, phase)),
            (USER_CNF.to_string(), mdb.spec.server_config.clone()),
        ])),
        ..ConfigMap::default()
    })
}

pub fn update_server_config_map(mdb: &MariaDBCluster, phase: Phase, found: &ConfigMap) -> Result<ConfigMap, ReconcileError> {
    let made = make_server_config_map(mdb, phase)?;
    Ok(ConfigMap {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        data: made.data,
        ..found.clone()
    })
}

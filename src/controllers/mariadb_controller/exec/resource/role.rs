// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, step::*};
use crate::kubernetes_api_objects::api_method::*;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role};
use kube::api::DynamicObject;
use kube::Resource;

pub struct RoleBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for RoleBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<Role>(mdb, make_role_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, _state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_role(mdb)?)
    }

    fn update(mdb: &MariaDBCluster, _state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<Role>(obj.clone())?;
        make_patch(&obj, &update_role(mdb, &found)?)
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Role>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::Role, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Role>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::Role, ConvergeOutcome::Applied))
    }
}

pub fn make_role_name(mdb: &MariaDBCluster) -> String {
    make_server_name(mdb)
}

/// The replica agent reads its cluster and writes recovery reports into its status.
pub fn make_role(mdb: &MariaDBCluster) -> Result<Role, ReconcileError> {
    let plural = MariaDBCluster::plural(&()).to_string();
    Ok(Role {
        metadata: make_metadata(mdb, make_role_name(mdb), make_server_labels(mdb))?,
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![MariaDBCluster::group(&()).to_string()]),
            resources: Some(vec![plural.clone(), format!("{}/status", plural)]),
            verbs: vec![
                "get".to_string(),
                "list".to_string(),
                "watch".to_string(),
                "patch".to_string(),
                "update".to_string(),
            ],
            ..PolicyRule::default()
        }]),
    })
}

pub fn update_role(mdb: &MariaDBCluster, found: &Role) -> Result<Role, ReconcileError> {
    let made = make_role(mdb)?;
    Ok(Role {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        rules: made.rules,
    })
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use super::{role::make_role_name, service_account::make_service_account_name};
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, step::*};
use crate::kubernetes_api_objects::api_method::*;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use kube::api::DynamicObject;
use kube::ResourceExt;

pub struct RoleBindingBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for RoleBindingBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<RoleBinding>(mdb, make_role_binding_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, _state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_role_binding(mdb)?)
    }

    fn update(mdb: &MariaDBCluster, _state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<RoleBinding>(obj.clone())?;
        make_patch(&obj, &update_role_binding(mdb, &found)?)
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<RoleBinding>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::RoleBinding, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<RoleBinding>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::RoleBinding, ConvergeOutcome::Applied))
    }
}

pub fn make_role_binding_name(mdb: &MariaDBCluster) -> String {
    make_server_name(mdb)
}

pub fn make_role_binding(mdb: &MariaDBCluster) -> Result<RoleBinding, ReconcileError> {
    Ok(RoleBinding {
        metadata: make_metadata(mdb, make_role_binding_name(mdb), make_server_labels(mdb))?,
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: make_role_name(mdb),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: make_service_account_name(mdb),
            namespace: mdb.namespace(),
            ..Subject::default()
        }]),
    })
}

// roleRef cannot change once the binding exists, so only metadata and subjects are updated.
pub fn update_role_binding(mdb: &MariaDBCluster, found: &RoleBinding) -> Result<RoleBinding, ReconcileError> {
    let made = make_role_binding(mdb)?;
    Ok(RoleBinding {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        role_ref: found.role_ref.clone(),
        subjects: made.subjects,
    })
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, step::*};
use crate::kubernetes_api_objects::api_method::*;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::DynamicObject;

pub struct ServiceAccountBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for ServiceAccountBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<ServiceAccount>(mdb, make_service_account_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, _state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_service_account(mdb)?)
    }

    fn update(mdb: &MariaDBCluster, _state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<ServiceAccount>(obj.clone())?;
        make_patch(&obj, &update_service_account(mdb, &found)?)
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<ServiceAccount>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ServiceAccount, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<ServiceAccount>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ServiceAccount, ConvergeOutcome::Applied))
    }
}

pub fn make_service_account_name(mdb: &MariaDBCluster) -> String {
    make_server_name(mdb)
}

pub fn make_service_account(mdb: &MariaDBCluster) -> Result<ServiceAccount, ReconcileError> {
    Ok(ServiceAccount {
        metadata: make_metadata(mdb, make_service_account_name(mdb), make_server_labels(mdb))?,
        ..ServiceAccount::default()
    })
}

pub fn update_service_account(mdb: &MariaDBCluster, found: &ServiceAccount) -> Result<ServiceAccount, ReconcileError> {
    let made = make_service_account(mdb)?;
    Ok(ServiceAccount {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        ..found.clone()
    })
}

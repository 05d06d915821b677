// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, step::*};
use crate::kubernetes_api_objects::api_method::*;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::DynamicObject;
use std::collections::BTreeMap;

pub struct SnapshotPersistentVolumeClaimBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for SnapshotPersistentVolumeClaimBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<PersistentVolumeClaim>(mdb, make_snapshot_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, _state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_snapshot_pvc(mdb)?)
    }

    fn update(mdb: &MariaDBCluster, _state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<PersistentVolumeClaim>(obj.clone())?;
        make_patch(&obj, &update_snapshot_pvc(mdb, &found)?)
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<PersistentVolumeClaim>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::SnapshotPersistentVolumeClaim, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<PersistentVolumeClaim>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::SnapshotPersistentVolumeClaim, ConvergeOutcome::Applied))
    }
}

pub fn make_claim_spec(storage: &StorageSpec, access_mode: &str) -> PersistentVolumeClaimSpec {
    PersistentVolumeClaimSpec {
        access_modes: Some(vec![access_mode.to_string()]),
        storage_class_name: storage.storage_class_name.clone(),
        resources: Some(ResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(storage.init_size.clone()),
            )])),
            ..ResourceRequirements::default()
        }),
        ..PersistentVolumeClaimSpec::default()
    }
}

pub fn make_snapshot_pvc(mdb: &MariaDBCluster) -> Result<PersistentVolumeClaim, ReconcileError> {
    let storage = mdb
        .spec
        .storages
        .snapshot
        .as_ref()
        .ok_or_else(|| ReconcileError::Validation("storages.snapshot is not set".to_string()))?;
    Ok(PersistentVolumeClaim {
        metadata: make_metadata(mdb, make_snapshot_name(mdb), make_server_labels(mdb))?,
        spec: Some(make_claim_spec(storage, "ReadWriteMany")),
        status: None,
    })
}

// The bound volume and the claim status are written by the volume controller.
pub fn update_snapshot_pvc(mdb: &MariaDBCluster, found: &PersistentVolumeClaim) -> Result<PersistentVolumeClaim, ReconcileError> {
    let made = make_snapshot_pvc(mdb)?;
    let mut spec = made.spec;
    if let (Some(spec), Some(found_spec)) = (spec.as_mut(), found.spec.as_ref()) {
        spec.volume_name = found_spec.volume_name.clone();
        spec.volume_mode = found_spec.volume_mode.clone();
    }
    Ok(PersistentVolumeClaim {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        spec,
        status: found.status.clone(),
    })
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use super::service::make_headless_service_name;
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, step::*};
use crate::kubernetes_api_objects::api_method::*;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::DynamicObject;

pub const PROXY_REPLICAS: i32 = 2;

pub struct ProxyDeploymentBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for ProxyDeploymentBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<Deployment>(mdb, make_proxy_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, _state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_proxy_deployment(mdb)?)
    }

    fn update(mdb: &MariaDBCluster, _state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<Deployment>(obj.clone())?;
        make_patch(&obj, &update_proxy_deployment(mdb, &found)?)
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Deployment>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ProxyDeployment, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Deployment>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ProxyDeployment, ConvergeOutcome::Applied))
    }
}

pub fn make_proxy_deployment(mdb: &MariaDBCluster) -> Result<Deployment, ReconcileError> {
    let labels = make_proxy_labels(mdb);
    Ok(Deployment {
        metadata: make_metadata(mdb, make_proxy_name(mdb), labels.clone())?,
        spec: Some(DeploymentSpec {
            replicas: Some(PROXY_REPLICAS),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "proxysql".to_string(),
                        image: Some(PROXY_IMAGE.to_string()),
                        env: Some(vec![EnvVar {
                            name: "MYSQL_BACKEND_SERVICE".to_string(),
                            value: Some(make_headless_service_name(mdb)),
                            ..EnvVar::default()
                        }]),
                        ports: Some(vec![ContainerPort {
                            name: Some("mysql".to_string()),
                            container_port: MYSQL_PORT,
                            protocol: Some("TCP".to_string()),
                            ..ContainerPort::default()
                        }]),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        status: None,
    })
}

pub fn update_proxy_deployment(mdb: &MariaDBCluster, found: &Deployment) -> Result<Deployment, ReconcileError> {
    let made = make_proxy_deployment(mdb)?;
    Ok(Deployment {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        spec: made.spec,
        status: found.status.clone(),
    })
}

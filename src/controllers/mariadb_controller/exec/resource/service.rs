// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, step::*};
use crate::kubernetes_api_objects::api_method::*;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use std::collections::BTreeMap;

pub const TOLERATE_UNREADY_ANNOTATION: &str = "service.alpha.kubernetes.io/tolerate-unready-endpoints";

pub struct HeadlessServiceBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for HeadlessServiceBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<Service>(mdb, make_headless_service_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, _state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_headless_service(mdb)?)
    }

    fn update(mdb: &MariaDBCluster, _state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<Service>(obj.clone())?;
        make_patch(&obj, &update_service(&found, make_headless_service(mdb)?))
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Service>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::HeadlessService, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Service>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::HeadlessService, ConvergeOutcome::Applied))
    }
}

pub struct ClientServiceBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for ClientServiceBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<Service>(mdb, make_client_service_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, _state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        marshal(&make_client_service(mdb)?)
    }

    fn update(mdb: &MariaDBCluster, _state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<serde_json::Value>, ReconcileError> {
        let found = unmarshal::<Service>(obj.clone())?;
        make_patch(&obj, &update_service(&found, make_client_service(mdb)?))
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Service>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ClientService, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<Service>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::ClientService, ConvergeOutcome::Applied))
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..ServicePort::default()
    }
}

pub fn make_headless_service_name(mdb: &MariaDBCluster) -> String {
    make_server_name(mdb)
}

/// Gives every server a stable DNS name, published before the server is
/// ready so members can find each other while the cluster forms.
pub fn make_headless_service(mdb: &MariaDBCluster) -> Result<Service, ReconcileError> {
    let mut metadata = make_metadata(mdb, make_headless_service_name(mdb), make_server_labels(mdb))?;
    metadata.annotations = Some(BTreeMap::from([(
        TOLERATE_UNREADY_ANNOTATION.to_string(),
        "true".to_string(),
    )]));
    Ok(Service {
        metadata,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(make_server_labels(mdb)),
            ports: Some(vec![
                service_port("mysql", MYSQL_PORT),
                service_port("wsrep", WSREP_PORT),
            ]),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

/// The address clients connect to; it fronts the proxy when there is one.
pub fn make_client_service(mdb: &MariaDBCluster) -> Result<Service, ReconcileError> {
    let selector = if mdb.spec.proxy {
        make_proxy_labels(mdb)
    } else {
        make_server_labels(mdb)
    };
    Ok(Service {
        metadata: make_metadata(mdb, make_client_service_name(mdb), make_labels(mdb, CLIENT_ROLE))?,
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector),
            ports: Some(vec![service_port("mysql", MYSQL_PORT)]),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

// The allocated cluster IPs are immutable and owned by the API server.
pub fn update_service(found: &Service, made: Service) -> Service {
    let mut spec = made.spec;
    if let (Some(spec), Some(found_spec)) = (spec.as_mut(), found.spec.as_ref()) {
        spec.cluster_ip = found_spec.cluster_ip.clone().or(spec.cluster_ip.take());
        spec.cluster_ips = found_spec.cluster_ips.clone();
    }
    Service {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        spec,
        status: found.status.clone(),
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::*;
use crate::controllers::mariadb_controller::exec::reconciler::reconcile_init_state;
use crate::controllers::mariadb_controller::exec::resource::*;
use crate::controllers::mariadb_controller::trusted::phase::Phase;
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;
use std::collections::BTreeMap;

fn server_container(sts: &StatefulSet) -> k8s_openapi::api::core::v1::Container {
    sts.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0].clone()
}

#[test]
pub fn test_make_wsrep_endpoints() {
    println!("Testing make_wsrep_endpoints()...");
    let mdb = make_cluster("mdb", 3);
    assert!(make_wsrep_endpoints(&mdb, Phase::BootstrapFirst).is_empty());
    assert!(make_wsrep_endpoints(&mdb, Phase::BootstrapFirstRestart).is_empty());
    assert_eq!(make_wsrep_endpoints(&mdb, Phase::BootstrapSecond), vec!["mdb-server-0.mdb-server".to_string()]);
    assert_eq!(make_wsrep_endpoints(&mdb, Phase::BootstrapThird).len(), 2);
    assert_eq!(
        make_wsrep_endpoints(&mdb, Phase::Operational),
        vec![
            "mdb-server-0.mdb-server".to_string(),
            "mdb-server-1.mdb-server".to_string(),
            "mdb-server-2.mdb-server".to_string(),
        ]
    );
}

#[test]
pub fn test_make_operator_cnf() {
    println!("Testing make_operator_cnf()...");
    let mdb = make_cluster("mdb", 2);
    let cnf = make_operator_cnf(&mdb, Phase::Operational);
    assert!(cnf.starts_with("[mysqld]\n"));
    assert!(cnf.contains("\nwsrep_cluster_name=mdb\n"));
    assert!(cnf.contains("\nwsrep_cluster_address=gcomm://mdb-server-0.mdb-server,mdb-server-1.mdb-server\n"));

    let cnf = make_operator_cnf(&mdb, Phase::BootstrapFirst);
    assert!(cnf.contains("\nwsrep_cluster_address=gcomm://\n"));
}

#[test]
pub fn test_make_server_config_map_carries_user_config() {
    println!("Testing make_server_config_map()...");
    let mut mdb = make_cluster("mdb", 3);
    mdb.spec.server_config = "[mysqld]\nmax_connections=500\n".to_string();
    let cm = make_server_config_map(&mdb, Phase::Operational).unwrap();
    assert_eq!(cm.metadata.name, Some("mdb-server".to_string()));
    let data = cm.data.unwrap();
    assert_eq!(data.get(USER_CNF), Some(&mdb.spec.server_config));
    assert!(data.contains_key(OPERATOR_CNF));
    let owners = cm.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].uid, "mdb-uid");
    assert_eq!(owners[0].controller, Some(true));
}

#[test]
pub fn test_owner_reference_requires_uid() {
    println!("Testing make_metadata() without uid...");
    let mut mdb = make_cluster("mdb", 3);
    mdb.metadata.uid = None;
    assert_eq!(
        make_server_config_map(&mdb, Phase::Operational).unwrap_err(),
        ReconcileError::MissingObjectKey("metadata.uid")
    );
}

#[test]
pub fn test_make_stateful_set_follows_phase() {
    println!("Testing make_stateful_set() across phases...");
    let mdb = make_cluster("mdb", 3);

    let sts = make_stateful_set(&mdb, Phase::BootstrapFirst).unwrap();
    assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(1));
    let container = server_container(&sts);
    assert_eq!(container.image, Some("mariadb:10.4".to_string()));
    assert_eq!(container.args, Some(vec!["--wsrep-new-cluster".to_string()]));
    assert!(container.command.is_none());
    assert!(container.readiness_probe.is_some());

    let sts = make_stateful_set(&mdb, Phase::BootstrapSecond).unwrap();
    assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(2));
    assert!(server_container(&sts).args.is_none());

    let sts = make_stateful_set(&mdb, Phase::Recovery).unwrap();
    assert_eq!(sts.spec.as_ref().unwrap().replicas, Some(3));
    let container = server_container(&sts);
    assert!(container.liveness_probe.is_some());
    assert!(container.readiness_probe.is_some());
    assert_eq!(
        sts.spec.unwrap().template,
        make_stateful_set(&mdb, Phase::Operational).unwrap().spec.unwrap().template
    );

    let sts = make_stateful_set(&mdb, Phase::RecoverSeqNo).unwrap();
    assert_eq!(
        server_container(&sts).command,
        Some(vec!["mysqld".to_string(), "--wsrep-recover".to_string()])
    );
}

#[test]
pub fn test_make_stateful_set_wires_agent_and_storage() {
    println!("Testing make_stateful_set() pod template...");
    let mdb = make_cluster("mdb", 3);
    let sts = make_stateful_set(&mdb, Phase::Operational).unwrap();
    let spec = sts.spec.unwrap();
    assert_eq!(spec.service_name, "mdb-server");
    assert_eq!(spec.pod_management_policy, Some("Parallel".to_string()));
    assert_eq!(spec.selector.match_labels, Some(make_server_labels(&mdb)));

    let claims = spec.volume_claim_templates.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].metadata.name, Some(DATA_VOLUME.to_string()));

    let pod = spec.template.spec.unwrap();
    let init = &pod.init_containers.unwrap()[0];
    assert_eq!(init.image, Some(AGENT_IMAGE.to_string()));
    assert_eq!(init.command, Some(vec!["/mdbc".to_string(), "init".to_string()]));
    let env: Vec<(String, Option<String>)> = init.env.clone().unwrap().into_iter().map(|e| (e.name, e.value)).collect();
    assert!(env.contains(&("MARIADBCLUSTER_NAME".to_string(), Some("mdb".to_string()))));
    assert!(env.contains(&("MARIADBCLUSTER_NAMESPACE".to_string(), Some("default".to_string()))));
    let volumes = pod.volumes.unwrap();
    assert_eq!(volumes[0].config_map.as_ref().unwrap().name, Some("mdb-server".to_string()));
}

#[test]
pub fn test_stateful_set_builder_spells_out_phase_owned_fields() {
    println!("Testing StatefulSetBuilder::make() null placeholders...");
    let mdb = with_status(make_cluster("mdb", 3), status_in(Phase::Operational, 4));
    let obj = StatefulSetBuilder::make(&mdb, &reconcile_init_state()).unwrap();
    let container = obj.data.pointer("/spec/template/spec/containers/0").unwrap();
    assert_eq!(container.get("args"), Some(&Value::Null));
    assert_eq!(container.get("command"), Some(&Value::Null));
    assert!(container.get("readinessProbe").unwrap().is_object());
}

#[test]
pub fn test_update_stateful_set_keeps_claim_templates_and_foreign_metadata() {
    println!("Testing update_stateful_set()...");
    let mdb = make_cluster("mdb", 3);
    let mut found = make_stateful_set(&make_cluster("mdb", 3), Phase::BootstrapFirst).unwrap();
    found.metadata.resource_version = Some("12".to_string());
    found.metadata.labels.as_mut().unwrap().insert("team".to_string(), "db".to_string());
    if let Some(spec) = found.spec.as_mut() {
        spec.volume_claim_templates.as_mut().unwrap()[0].metadata.annotations =
            Some(BTreeMap::from([("kept".to_string(), "yes".to_string())]));
        spec.template.metadata = Some(ObjectMeta {
            annotations: Some(BTreeMap::from([("kubectl.kubernetes.io/restartedAt".to_string(), "now".to_string())])),
            ..spec.template.metadata.clone().unwrap()
        });
    }

    let mut bigger = mdb.clone();
    bigger.spec.storages.data.init_size = "5Gi".to_string();
    let updated = update_stateful_set(&bigger, Phase::Operational, &found).unwrap();
    assert_eq!(updated.metadata.resource_version, Some("12".to_string()));
    assert_eq!(updated.metadata.labels.as_ref().unwrap().get("team"), Some(&"db".to_string()));
    let spec = updated.spec.unwrap();
    assert_eq!(spec.replicas, Some(3));
    assert_eq!(spec.volume_claim_templates, found.spec.as_ref().unwrap().volume_claim_templates);
    let annotations = spec.template.metadata.unwrap().annotations.unwrap();
    assert!(annotations.contains_key("kubectl.kubernetes.io/restartedAt"));
}

#[test]
pub fn test_client_service_selector_follows_proxy() {
    println!("Testing make_client_service()...");
    let mut mdb = make_cluster("mdb", 3);
    let svc = make_client_service(&mdb).unwrap();
    assert_eq!(svc.metadata.name, Some("mdb".to_string()));
    assert_eq!(svc.spec.unwrap().selector, Some(make_server_labels(&mdb)));

    mdb.spec.proxy = true;
    let svc = make_client_service(&mdb).unwrap();
    assert_eq!(svc.spec.unwrap().selector, Some(make_proxy_labels(&mdb)));
}

#[test]
pub fn test_headless_service_publishes_unready_servers() {
    println!("Testing make_headless_service()...");
    let mdb = make_cluster("mdb", 3);
    let svc = make_headless_service(&mdb).unwrap();
    let spec = svc.spec.unwrap();
    assert_eq!(spec.cluster_ip, Some("None".to_string()));
    assert_eq!(spec.publish_not_ready_addresses, Some(true));
    assert_eq!(
        svc.metadata.annotations.unwrap().get(TOLERATE_UNREADY_ANNOTATION),
        Some(&"true".to_string())
    );
}

#[test]
pub fn test_update_service_keeps_allocated_cluster_ip() {
    println!("Testing update_service()...");
    let mdb = make_cluster("mdb", 3);
    let mut found = make_client_service(&mdb).unwrap();
    found.spec.as_mut().unwrap().cluster_ip = Some("10.0.0.7".to_string());
    found.spec.as_mut().unwrap().cluster_ips = Some(vec!["10.0.0.7".to_string()]);
    let updated = update_service(&found, make_client_service(&mdb).unwrap());
    let spec = updated.spec.unwrap();
    assert_eq!(spec.cluster_ip, Some("10.0.0.7".to_string()));
    assert_eq!(spec.cluster_ips, Some(vec!["10.0.0.7".to_string()]));
}

#[test]
pub fn test_make_snapshot_pvc() {
    println!("Testing make_snapshot_pvc()...");
    let mut mdb = make_cluster("mdb", 3);
    assert!(make_snapshot_pvc(&mdb).is_err());
    mdb.spec.storages.snapshot = Some(StorageSpec {
        storage_class_name: Some("nfs".to_string()),
        init_size: "10Gi".to_string(),
    });
    let pvc = make_snapshot_pvc(&mdb).unwrap();
    assert_eq!(pvc.metadata.name, Some("mdb-snapshot".to_string()));
    let spec = pvc.spec.unwrap();
    assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_string()]));
    assert_eq!(spec.storage_class_name, Some("nfs".to_string()));
}

#[test]
pub fn test_merge_object_meta() {
    println!("Testing merge_object_meta()...");
    let found = ObjectMeta {
        name: Some("x".to_string()),
        uid: Some("u".to_string()),
        resource_version: Some("3".to_string()),
        labels: Some(BTreeMap::from([
            ("foreign".to_string(), "1".to_string()),
            (ROLE_LABEL.to_string(), "old".to_string()),
        ])),
        ..ObjectMeta::default()
    };
    let desired = ObjectMeta {
        name: Some("x".to_string()),
        labels: Some(BTreeMap::from([(ROLE_LABEL.to_string(), SERVER_ROLE.to_string())])),
        ..ObjectMeta::default()
    };
    let merged = merge_object_meta(&found, desired);
    assert_eq!(merged.uid, Some("u".to_string()));
    assert_eq!(merged.resource_version, Some("3".to_string()));
    let labels = merged.labels.unwrap();
    assert_eq!(labels.get("foreign"), Some(&"1".to_string()));
    assert_eq!(labels.get(ROLE_LABEL), Some(&SERVER_ROLE.to_string()));
}

#[test]
pub fn test_state_validation() {
    println!("Testing state_validation()...");
    assert!(make_cluster("mdb", 3).state_validation().is_ok());

    let mut mdb = make_cluster("mdb", 0);
    assert!(matches!(mdb.state_validation(), Err(ReconcileError::Validation(_))));

    mdb.spec.replicas = 3;
    mdb.spec.version = " ".to_string();
    assert!(mdb.state_validation().is_err());

    let mut mdb = make_cluster("mdb", 3);
    mdb.spec.storages.data.init_size = "lots".to_string();
    assert!(mdb.state_validation().is_err());
    mdb.spec.storages.data.init_size = "500Mi".to_string();
    assert!(mdb.state_validation().is_ok());
}

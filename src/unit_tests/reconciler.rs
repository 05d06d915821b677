// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::*;
use crate::controllers::mariadb_controller::exec::reconciler::*;
use crate::controllers::mariadb_controller::exec::resource::*;
use crate::controllers::mariadb_controller::trusted::{phase::Phase, step::*};
use crate::executable_model::api_server::ExecutableApiServer;
use crate::kubernetes_api_objects::{api_method::*, error::APIError};
use crate::shim_layer::{controller_runtime::reconcile_with, Error};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Service};
use kube::api::ApiResource;
use serde_json::{json, Value};

async fn reconcile(api: &ExecutableApiServer) -> Result<Option<MariaDBReconcileState>, Error> {
    reconcile_with::<MariaDBCluster, _, _, _>(&MariaDBReconciler::default(), api, "default", "mdb").await
}

fn patch_cluster(api: &ExecutableApiServer, patch: Value) {
    let resp = api.handle_sync(KubeAPIRequest::PatchRequest(KubePatchRequest {
        api_resource: ApiResource::erase::<MariaDBCluster>(&()),
        name: "mdb".to_string(),
        namespace: "default".to_string(),
        patch,
    }));
    assert!(resp.into_patch_response().unwrap().res.is_ok());
}

fn cluster_status(api: &ExecutableApiServer) -> MariaDBClusterStatus {
    api.get::<MariaDBCluster>("default", "mdb").unwrap().status_or_default()
}

fn server_args(api: &ExecutableApiServer) -> Option<Vec<String>> {
    let sts = api.get::<StatefulSet>("default", "mdb-server").unwrap();
    sts.spec.unwrap().template.spec.unwrap().containers[0].args.clone()
}

fn stateful_set_replicas(api: &ExecutableApiServer) -> Option<i32> {
    api.get::<StatefulSet>("default", "mdb-server").unwrap().spec.unwrap().replicas
}

fn operator_cnf(api: &ExecutableApiServer) -> String {
    api.get::<ConfigMap>("default", "mdb-server").unwrap().data.unwrap()[OPERATOR_CNF].clone()
}

fn write_keys(api: &ExecutableApiServer) -> Vec<String> {
    api.writes().iter().map(KubeAPIRequest::key).collect()
}

#[test]
pub fn test_next_sub_resource() {
    println!("Testing next_sub_resource()...");
    let mut mdb = make_cluster("mdb", 3);
    assert_eq!(next_sub_resource(&mdb, None), Some(SubResource::ServiceAccount));
    assert_eq!(next_sub_resource(&mdb, Some(SubResource::RoleBinding)), Some(SubResource::ServerConfigMap));
    assert_eq!(next_sub_resource(&mdb, Some(SubResource::ClientService)), None);

    mdb.spec.storages.snapshot = Some(mdb.spec.storages.data.clone());
    mdb.spec.proxy = true;
    assert_eq!(
        next_sub_resource(&mdb, Some(SubResource::RoleBinding)),
        Some(SubResource::SnapshotPersistentVolumeClaim)
    );
    assert_eq!(next_sub_resource(&mdb, Some(SubResource::ClientService)), Some(SubResource::ProxyDeployment));
}

#[test]
pub fn test_reconcile_core_reads_stateful_set_first() {
    println!("Testing reconcile_core() from the init state...");
    let mdb = make_cluster("mdb", 3);
    let (state, req_o) = reconcile_core(&mdb, None, reconcile_init_state());
    assert_eq!(state.reconcile_step, MariaDBReconcileStep::AfterGetStatefulSet);
    match req_o {
        Some(KubeAPIRequest::GetRequest(req)) => assert_eq!(req.key(), "StatefulSet/default/mdb-server"),
        other => panic!("unexpected request {:?}", other),
    }
}

#[test]
pub fn test_reconcile_core_fails_without_response() {
    println!("Testing reconcile_core() without a response...");
    let mdb = make_cluster("mdb", 3);
    let state = MariaDBReconcileState {
        reconcile_step: MariaDBReconcileStep::AfterGetStatefulSet,
        ..reconcile_init_state()
    };
    let (state, req_o) = reconcile_core(&mdb, None, state);
    assert!(reconcile_error(&state));
    assert!(req_o.is_none());
}

#[tokio::test]
pub async fn test_first_pass_creates_children_and_starts_bootstrap() {
    println!("Testing the first reconcile pass...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();

    let state = reconcile(&api).await.unwrap().unwrap();
    assert!(reconcile_done(&state));
    assert_eq!(
        state.outcomes,
        vec![
            (SubResource::ServiceAccount, ConvergeOutcome::Created),
            (SubResource::Role, ConvergeOutcome::Created),
            (SubResource::RoleBinding, ConvergeOutcome::Created),
            (SubResource::ServerConfigMap, ConvergeOutcome::Created),
            (SubResource::StatefulSet, ConvergeOutcome::Created),
            (SubResource::HeadlessService, ConvergeOutcome::Created),
            (SubResource::ClientService, ConvergeOutcome::Created),
        ]
    );
    // the status is persisted before any child is touched
    assert_eq!(write_keys(&api)[0], "MariaDBCluster/default/mdb");
    assert_eq!(api.write_count(), 8);
    assert_eq!(cluster_status(&api).phase, Phase::BootstrapFirst);
    assert_eq!(stateful_set_replicas(&api), Some(1));
    assert_eq!(server_args(&api), Some(vec!["--wsrep-new-cluster".to_string()]));
    assert!(operator_cnf(&api).contains("wsrep_cluster_address=gcomm://\n"));
}

#[tokio::test]
pub async fn test_second_pass_without_changes_writes_nothing() {
    println!("Testing reconcile idempotence...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();
    reconcile(&api).await.unwrap();
    api.clear_writes();

    let state = reconcile(&api).await.unwrap().unwrap();
    assert_eq!(api.write_count(), 0);
    assert!(state.outcomes.iter().all(|(_, outcome)| *outcome == ConvergeOutcome::NoChange));
    assert_eq!(state.outcomes.len(), 7);
}

#[tokio::test]
pub async fn test_bootstrap_walks_through_every_phase() {
    println!("Testing a three replica bootstrap end to end...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();
    reconcile(&api).await.unwrap();

    api.roll_out_stateful_set("default", "mdb-server").unwrap();
    reconcile(&api).await.unwrap();
    assert_eq!(cluster_status(&api), status_in(Phase::BootstrapFirstRestart, 1));
    assert_eq!(server_args(&api), None);
    assert_eq!(stateful_set_replicas(&api), Some(1));

    // not rolled out yet: the phase holds and nothing is written
    api.clear_writes();
    reconcile(&api).await.unwrap();
    assert_eq!(api.write_count(), 0);
    assert_eq!(cluster_status(&api).phase, Phase::BootstrapFirstRestart);

    api.roll_out_stateful_set("default", "mdb-server").unwrap();
    reconcile(&api).await.unwrap();
    assert_eq!(cluster_status(&api), status_in(Phase::BootstrapSecond, 2));
    assert_eq!(stateful_set_replicas(&api), Some(2));
    assert!(operator_cnf(&api).contains("gcomm://mdb-server-0.mdb-server\n"));

    api.roll_out_stateful_set("default", "mdb-server").unwrap();
    reconcile(&api).await.unwrap();
    assert_eq!(cluster_status(&api), status_in(Phase::BootstrapThird, 3));
    assert_eq!(stateful_set_replicas(&api), Some(3));

    api.roll_out_stateful_set("default", "mdb-server").unwrap();
    reconcile(&api).await.unwrap();
    assert_eq!(cluster_status(&api), status_in(Phase::Operational, 4));
    assert!(operator_cnf(&api)
        .contains("gcomm://mdb-server-0.mdb-server,mdb-server-1.mdb-server,mdb-server-2.mdb-server\n"));

    api.clear_writes();
    api.roll_out_stateful_set("default", "mdb-server").unwrap();
    reconcile(&api).await.unwrap();
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
pub async fn test_total_loss_moves_to_recovery_without_rolling_pods() {
    println!("Testing the operational to recovery transition...");
    let api = ExecutableApiServer::new();
    api.insert(&with_status(make_cluster("mdb", 3), status_in(Phase::Operational, 1))).unwrap();
    reconcile(&api).await.unwrap();
    api.roll_out_stateful_set("default", "mdb-server").unwrap();
    reconcile(&api).await.unwrap();
    assert_eq!(cluster_status(&api).phase, Phase::Operational);

    let before = api.get::<StatefulSet>("default", "mdb-server").unwrap();
    api.set_stateful_set_replicas("default", "mdb-server", 1, 3, 0).unwrap();
    reconcile(&api).await.unwrap();
    assert_eq!(cluster_status(&api), status_in(Phase::Recovery, 1));
    let after = api.get::<StatefulSet>("default", "mdb-server").unwrap();
    assert_eq!(after.metadata.generation, before.metadata.generation);
    let container = after.spec.unwrap().template.spec.unwrap().containers[0].clone();
    assert!(container.readiness_probe.is_some());
    assert!(container.liveness_probe.is_some());
}

#[tokio::test]
pub async fn test_user_config_change_patches_only_the_config_map() {
    println!("Testing a minimal config map patch...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();
    reconcile(&api).await.unwrap();

    patch_cluster(&api, json!({"spec": {"serverConfig": "[mysqld]\nmax_connections=500\n"}}));
    api.clear_writes();
    let state = reconcile(&api).await.unwrap().unwrap();
    let writes = api.writes();
    assert_eq!(writes.len(), 1);
    match &writes[0] {
        KubeAPIRequest::PatchRequest(req) => {
            assert_eq!(req.key(), "ConfigMap/default/mdb-server");
            assert_eq!(req.patch, json!({"data": {"user.cnf": "[mysqld]\nmax_connections=500\n"}}));
        }
        other => panic!("unexpected write {:?}", other),
    }
    assert!(state.outcomes.contains(&(SubResource::ServerConfigMap, ConvergeOutcome::Applied)));
}

#[tokio::test]
pub async fn test_foreign_labels_on_children_are_left_alone() {
    println!("Testing children keep labels other writers set...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();
    reconcile(&api).await.unwrap();

    let resp = api.handle_sync(KubeAPIRequest::PatchRequest(KubePatchRequest {
        api_resource: ApiResource::erase::<Service>(&()),
        name: "mdb".to_string(),
        namespace: "default".to_string(),
        patch: json!({"metadata": {"labels": {"team": "db"}}}),
    }));
    assert!(resp.into_patch_response().unwrap().res.is_ok());
    api.clear_writes();

    reconcile(&api).await.unwrap();
    assert_eq!(api.write_count(), 0);
    let svc = api.get::<Service>("default", "mdb").unwrap();
    assert_eq!(svc.metadata.labels.unwrap().get("team"), Some(&"db".to_string()));
}

#[tokio::test]
pub async fn test_enabling_proxy_switches_client_service() {
    println!("Testing the proxy toggle...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();
    reconcile(&api).await.unwrap();

    patch_cluster(&api, json!({"spec": {"proxy": true}}));
    let state = reconcile(&api).await.unwrap().unwrap();
    assert!(state.outcomes.contains(&(SubResource::ClientService, ConvergeOutcome::Applied)));
    assert!(state.outcomes.contains(&(SubResource::ProxyDeployment, ConvergeOutcome::Created)));

    let mdb = api.get::<MariaDBCluster>("default", "mdb").unwrap();
    let svc = api.get::<Service>("default", "mdb").unwrap();
    assert_eq!(svc.spec.unwrap().selector, Some(make_proxy_labels(&mdb)));
    let deployment = api.get::<Deployment>("default", "mdb-proxy").unwrap();
    assert_eq!(deployment.spec.unwrap().replicas, Some(PROXY_REPLICAS));
}

#[tokio::test]
pub async fn test_snapshot_storage_creates_claim() {
    println!("Testing the snapshot claim...");
    let api = ExecutableApiServer::new();
    let mut mdb = make_cluster("mdb", 3);
    mdb.spec.storages.snapshot = Some(StorageSpec {
        storage_class_name: None,
        init_size: "2Gi".to_string(),
    });
    api.insert(&mdb).unwrap();
    let state = reconcile(&api).await.unwrap().unwrap();
    assert!(state
        .outcomes
        .contains(&(SubResource::SnapshotPersistentVolumeClaim, ConvergeOutcome::Created)));
    assert!(api.get::<PersistentVolumeClaim>("default", "mdb-snapshot").is_some());
}

#[tokio::test]
pub async fn test_paused_cluster_is_left_alone() {
    println!("Testing a paused cluster...");
    let api = ExecutableApiServer::new();
    let mut mdb = make_cluster("mdb", 3);
    mdb.spec.paused = true;
    api.insert(&mdb).unwrap();

    let state = reconcile(&api).await.unwrap().unwrap();
    assert!(reconcile_done(&state));
    assert_eq!(api.write_count(), 0);
    assert!(api.get::<StatefulSet>("default", "mdb-server").is_none());
}

#[tokio::test]
pub async fn test_invalid_spec_fails_the_pass() {
    println!("Testing an invalid cluster spec...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 0)).unwrap();

    match reconcile(&api).await {
        Err(Error::ReconcileCoreError(msg)) => assert!(msg.contains("replicas")),
        other => panic!("unexpected result {:?}", other.map(|_| ())),
    }
    assert_eq!(api.write_count(), 0);
}

#[tokio::test]
pub async fn test_status_conflict_fails_the_pass_and_retry_succeeds() {
    println!("Testing a conflicting status write...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();
    api.inject_write_error(APIError::Conflict("the object has been modified".to_string()));

    assert!(reconcile(&api).await.is_err());
    assert_eq!(cluster_status(&api).phase, Phase::Empty);
    assert!(api.get::<StatefulSet>("default", "mdb-server").is_none());

    reconcile(&api).await.unwrap();
    assert_eq!(cluster_status(&api).phase, Phase::BootstrapFirst);
}

#[tokio::test]
pub async fn test_stale_resource_version_is_rejected() {
    println!("Testing a status write guarded by a stale resourceVersion...");
    let api = ExecutableApiServer::new();
    api.insert(&make_cluster("mdb", 3)).unwrap();
    let stale = api.get::<MariaDBCluster>("default", "mdb").unwrap();
    patch_cluster(&api, json!({"spec": {"serverConfig": "x"}}));

    let (state, _) = reconcile_core(&stale, None, reconcile_init_state());
    let get_resp = KubeAPIResponse::GetResponse(KubeGetResponse { res: Err(APIError::ObjectNotFound) });
    let (state, req_o) = reconcile_core(&stale, Some(get_resp), state);
    assert_eq!(state.reconcile_step, MariaDBReconcileStep::AfterPatchStatus);
    let resp = api.handle_sync(req_o.unwrap());
    let (state, req_o) = reconcile_core(&stale, Some(resp), state);
    assert!(reconcile_error(&state));
    assert!(req_o.is_none());
    assert!(matches!(
        state.error,
        Some(ReconcileError::Api { error: APIError::Conflict(_), .. })
    ));
}

#[tokio::test]
pub async fn test_missing_cluster_ends_the_pass() {
    println!("Testing a deleted cluster...");
    let api = ExecutableApiServer::new();
    assert!(reconcile(&api).await.unwrap().is_none());
}

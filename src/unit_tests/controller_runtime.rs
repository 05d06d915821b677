// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::*;
use crate::config::ControllerConfig;
use crate::controllers::mariadb_controller::exec::resource::CLUSTER_NAME_LABEL;
use crate::executable_model::api_server::ExecutableApiServer;
use crate::shim_layer::controller_runtime::*;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn context(api: ExecutableApiServer) -> Arc<Data<ExecutableApiServer>> {
    let config = ControllerConfig::from_lookup(|name: &str| match name {
        "MDBC_IDENTITY" => Some("mdbc-test".to_string()),
        _ => None,
    })
    .unwrap();
    Arc::new(Data::new(api, &config))
}

#[test]
pub fn test_object_key() {
    println!("Testing object_key()...");
    assert_eq!(object_key(&make_cluster("mdb", 3)), Some("default/mdb".to_string()));
    let mut mdb = make_cluster("mdb", 3);
    mdb.metadata.namespace = None;
    assert_eq!(object_key(&mdb), None);
}

#[test]
pub fn test_stateful_set_owner_ref() {
    println!("Testing stateful_set_owner_ref()...");
    let mut sts = stateful_set(1, 1, 3, 3);
    assert_eq!(stateful_set_owner_ref(&sts), None);
    sts.metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), "mdb".to_string())]));
    assert_eq!(stateful_set_owner_ref(&sts), Some(ObjectRef::new("mdb").within("default")));
}

#[test]
pub fn test_spec_and_status_hash() {
    println!("Testing spec_and_status_hash()...");
    let mdb = make_cluster("mdb", 3);
    let original = spec_and_status_hash(&mdb);
    assert!(original.is_some());

    let mut relabeled = mdb.clone();
    relabeled.metadata.labels = Some(BTreeMap::from([("team".to_string(), "db".to_string())]));
    relabeled.metadata.resource_version = Some("42".to_string());
    assert_eq!(spec_and_status_hash(&relabeled), original);

    let mut scaled = mdb.clone();
    scaled.spec.replicas = 5;
    assert_ne!(spec_and_status_hash(&scaled), original);

    let progressed = with_status(scaled.clone(), status_in(Phase::BootstrapFirst, 0));
    assert_ne!(spec_and_status_hash(&progressed), spec_and_status_hash(&scaled));
}

#[test]
pub fn test_reconcile_backoff_doubles_up_to_the_cap() {
    println!("Testing ReconcileBackoff::next_delay()...");
    let backoff = ReconcileBackoff::new(Duration::from_millis(5), Duration::from_millis(50));
    let delays: Vec<Duration> = (0..6).map(|_| backoff.next_delay("default/mdb")).collect();
    assert_eq!(
        delays,
        [5, 10, 20, 40, 50, 50].iter().map(|ms| Duration::from_millis(*ms)).collect::<Vec<_>>()
    );
    assert_eq!(backoff.failures("default/mdb"), 6);

    // keys back off independently
    assert_eq!(backoff.next_delay("default/other"), Duration::from_millis(5));

    backoff.reset("default/mdb");
    assert_eq!(backoff.failures("default/mdb"), 0);
    assert_eq!(backoff.next_delay("default/mdb"), Duration::from_millis(5));

    for _ in 0..100 {
        backoff.next_delay("default/stuck");
    }
    assert_eq!(backoff.next_delay("default/stuck"), Duration::from_millis(50));
}

#[tokio::test]
pub async fn test_reconcile_success_resets_backoff() {
    println!("Testing reconcile() on a successful pass...");
    let api = ExecutableApiServer::new();
    let mdb = make_cluster("mdb", 3);
    api.insert(&mdb).unwrap();
    let ctx = context(api);
    ctx.backoff.next_delay("default/mdb");
    assert_eq!(ctx.backoff.failures("default/mdb"), 1);

    let action = reconcile(Arc::new(mdb), ctx.clone()).await.unwrap();
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    assert_eq!(ctx.backoff.failures("default/mdb"), 0);
    assert!(ctx.shim.write_count() > 0);
}

#[tokio::test]
pub async fn test_failed_reconcile_backs_off() {
    println!("Testing error_policy() after a failed pass...");
    let api = ExecutableApiServer::new();
    let mdb = Arc::new(make_cluster("mdb", 0));
    api.insert(&*mdb).unwrap();
    let ctx = context(api);

    let err = reconcile(mdb.clone(), ctx.clone()).await.unwrap_err();
    assert_eq!(error_policy(mdb.clone(), &err, ctx.clone()), Action::requeue(Duration::from_millis(5)));
    assert_eq!(error_policy(mdb.clone(), &err, ctx.clone()), Action::requeue(Duration::from_millis(10)));
    assert_eq!(ctx.backoff.failures("default/mdb"), 2);
}

#[tokio::test]
pub async fn test_reconcile_deleted_cluster_awaits_change() {
    println!("Testing reconcile() on a deleted cluster...");
    let ctx = context(ExecutableApiServer::new());
    ctx.backoff.next_delay("default/mdb");

    let action = reconcile(Arc::new(make_cluster("mdb", 3)), ctx.clone()).await.unwrap();
    assert_eq!(action, Action::await_change());
    assert_eq!(ctx.backoff.failures("default/mdb"), 0);
    assert_eq!(ctx.shim.write_count(), 0);

    let mut unscoped = make_cluster("mdb", 3);
    unscoped.metadata.namespace = None;
    assert!(reconcile(Arc::new(unscoped), ctx).await.is_err());
}

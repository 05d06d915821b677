use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, AttachParams, DeleteParams, DynamicObject, ListParams, Patch, PatchParams},
    core::GroupVersionKind,
    discovery::{ApiResource, Discovery},
    Client,
};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::common::{apply, get_output_and_err, Error};

const CLUSTER_NAME_LABEL: &str = "mariadbcluster.components.dsg.dk/cluster-name";
const ROLE_LABEL: &str = "mariadbcluster.components.dsg.dk/role";

fn mariadb_cluster(replicas: i32) -> String {
    [
        "apiVersion: components.dsg.dk/v1alpha1",
        "kind: MariaDBCluster",
        "metadata:",
        "  name: mariadb",
        "  namespace: default",
        "spec:",
        "  version: \"10.4\"",
        format!("  replicas: {}", replicas).as_str(),
        "  storages:",
        "    data:",
        "      initSize: 1Gi",
        "  serverConfig: |",
        "    [mysqld]",
        "    max_connections=200",
    ]
    .join("\n")
}

fn mariadb_api(client: Client) -> Api<DynamicObject> {
    let gvk = GroupVersionKind::gvk("components.dsg.dk", "v1alpha1", "MariaDBCluster");
    let ar = ApiResource::from_gvk_with_plural(&gvk, "mariadbclusters");
    Api::default_namespaced_with(client, &ar)
}

async fn check_crd(client: Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client);
    match crds.get("mariadbclusters.components.dsg.dk").await {
        Err(e) => {
            println!("No CRD found, create one before run the e2e test!\n");
            Err(Error::CRDGetFailed(e))
        }
        Ok(_) => {
            println!("CRD found, continue to run the e2e test!\n");
            Ok(())
        }
    }
}

async fn current_phase(client: Client, name: &str) -> Result<String, Error> {
    let mdb = mariadb_api(client).get(name).await?;
    Ok(mdb
        .data
        .pointer("/status/phase")
        .and_then(|phase| phase.as_str())
        .unwrap_or("")
        .to_string())
}

async fn wsrep_cluster_size(pods: &Api<Pod>, pod_name: &str) -> Result<String, Error> {
    let attached = pods
        .exec(
            pod_name,
            vec!["mysql", "-uroot", "-N", "-B", "-e", "SHOW STATUS LIKE 'wsrep_cluster_size'"],
            &AttachParams::default().container("mariadb").stderr(true),
        )
        .await?;
    let (out, err) = get_output_and_err(attached).await;
    if !err.is_empty() {
        println!("mysql in {} reported: {}", pod_name, err);
        return Err(Error::ExecFailed(pod_name.to_string()));
    }
    Ok(out.split_whitespace().last().unwrap_or("").to_string())
}

/// Waits until the cluster is Operational with replicas members that all
/// agree on the Galera cluster size.
async fn wait_for_operational(client: Client, name: &str, replicas: i32, timeout: Duration) -> Result<(), Error> {
    let sts_name = format!("{}-server", name);
    let start = Instant::now();
    loop {
        sleep(Duration::from_secs(5)).await;
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }

        let phase = current_phase(client.clone(), name).await?;
        if phase != "Operational" {
            println!("Cluster is in phase {:?}, continue to wait!\n", phase);
            continue;
        }

        let sts_api: Api<StatefulSet> = Api::default_namespaced(client.clone());
        let sts = match sts_api.get(&sts_name).await {
            Err(_) => {
                println!("No statefulset found, continue to wait!\n");
                continue;
            }
            Ok(sts) => sts,
        };
        if sts.spec.and_then(|spec| spec.replicas) != Some(replicas) {
            println!("Statefulset spec is not consistent with mariadb cluster spec! e2e_test failed!\n");
            return Err(Error::MariaDBStsFailed);
        }
        if sts.status.and_then(|status| status.ready_replicas) != Some(replicas) {
            println!("Statefulset is not ready! Continue to wait!\n");
            continue;
        }

        let cm_api: Api<ConfigMap> = Api::default_namespaced(client.clone());
        let cm = cm_api.get(&sts_name).await?;
        let endpoints = cm
            .data
            .and_then(|data| data.get("operator.cnf").cloned())
            .unwrap_or_default();
        for i in 0..replicas {
            if !endpoints.contains(&format!("{}-{}.{}", sts_name, i, sts_name)) {
                println!("operator.cnf misses replica {}! e2e_test failed!\n", i);
                return Err(Error::MariaDBConfigMapFailed);
            }
        }

        let pods: Api<Pod> = Api::default_namespaced(client.clone());
        let lp = ListParams::default().labels(&format!("{}={},{}=server", CLUSTER_NAME_LABEL, name, ROLE_LABEL));
        let pod_list = pods.list(&lp).await?;
        if pod_list.items.len() != replicas as usize {
            println!("Pods are not ready! Continue to wait!\n");
            continue;
        }
        let mut pods_ready = true;
        for p in pod_list {
            let pod_name = p.metadata.name.unwrap_or_default();
            let running = p
                .status
                .as_ref()
                .map(|status| {
                    status.phase.as_deref() == Some("Running")
                        && status
                            .container_statuses
                            .as_ref()
                            .is_some_and(|statuses| statuses.iter().all(|s| s.ready))
                })
                .unwrap_or(false);
            if !running {
                println!("Pod {} is not ready! Continue to wait!\n", pod_name);
                pods_ready = false;
                break;
            }
            let size = wsrep_cluster_size(&pods, &pod_name).await?;
            if size != replicas.to_string() {
                println!("{} sees a cluster of size {}! Continue to wait!\n", pod_name, size);
                pods_ready = false;
                break;
            }
        }
        if pods_ready {
            return Ok(());
        }
    }
}

async fn wait_for_phase(client: Client, name: &str, expected: &[&str], timeout: Duration) -> Result<String, Error> {
    let start = Instant::now();
    loop {
        sleep(Duration::from_secs(2)).await;
        if start.elapsed() > timeout {
            return Err(Error::Timeout);
        }
        let phase = current_phase(client.clone(), name).await?;
        if expected.contains(&phase.as_str()) {
            return Ok(phase);
        }
        println!("Cluster is in phase {:?}, waiting for one of {:?}\n", phase, expected);
    }
}

pub async fn desired_state_test(client: Client, mariadb_name: &str) -> Result<(), Error> {
    wait_for_operational(client, mariadb_name, 3, Duration::from_secs(1200)).await?;
    println!("Desired state test passed.");
    Ok(())
}

pub async fn scaling_test(client: Client, mariadb_name: &str) -> Result<(), Error> {
    let mdb_api = mariadb_api(client.clone());
    mdb_api
        .patch(mariadb_name, &PatchParams::default(), &Patch::Merge(json!({"spec": {"replicas": 5}})))
        .await?;
    wait_for_operational(client.clone(), mariadb_name, 5, Duration::from_secs(600)).await?;

    mdb_api
        .patch(mariadb_name, &PatchParams::default(), &Patch::Merge(json!({"spec": {"replicas": 3}})))
        .await?;
    wait_for_operational(client, mariadb_name, 3, Duration::from_secs(600)).await?;
    println!("Scaling test passed.");
    Ok(())
}

pub async fn recovery_test(client: Client, mariadb_name: &str) -> Result<(), Error> {
    let pods: Api<Pod> = Api::default_namespaced(client.clone());
    let lp = ListParams::default().labels(&format!("{}={},{}=server", CLUSTER_NAME_LABEL, mariadb_name, ROLE_LABEL));
    pods.delete_collection(&DeleteParams::default().grace_period(0), &lp).await?;
    println!("Deleted every server pod of {}", mariadb_name);

    let phase = wait_for_phase(
        client.clone(),
        mariadb_name,
        &["Recovery", "RecoveryReleaseAll"],
        Duration::from_secs(300),
    )
    .await?;
    println!("Cluster entered {}", phase);
    wait_for_operational(client, mariadb_name, 3, Duration::from_secs(1200)).await?;
    println!("Recovery test passed.");
    Ok(())
}

async fn set_up(client: Client) -> Result<String, Error> {
    check_crd(client.clone()).await?;
    let discovery = Discovery::new(client.clone()).run().await?;
    apply(mariadb_cluster(3), client, &discovery).await
}

pub async fn mariadb_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let mariadb_name = set_up(client.clone()).await?;

    desired_state_test(client, &mariadb_name).await?;
    println!("E2e test passed.");
    Ok(())
}

pub async fn mariadb_scaling_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let mariadb_name = set_up(client.clone()).await?;

    desired_state_test(client.clone(), &mariadb_name).await?;
    scaling_test(client, &mariadb_name).await?;
    println!("E2e test passed.");
    Ok(())
}

pub async fn mariadb_recovery_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    let mariadb_name = set_up(client.clone()).await?;

    desired_state_test(client.clone(), &mariadb_name).await?;
    recovery_test(client, &mariadb_name).await?;
    println!("E2e test passed.");
    Ok(())
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::ControllerConfig;
use crate::controllers::mariadb_controller::exec::reconciler::MariaDBReconciler;
use crate::controllers::mariadb_controller::exec::resource::CLUSTER_NAME_LABEL;
use crate::controllers::mariadb_controller::trusted::exec_types::MariaDBCluster;
use crate::kubernetes_api_objects::{api_method::*, error::*};
use crate::reconciler::exec::reconciler::Reconciler;
use crate::shim_layer::Error;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::api::{Api, ApiResource, DynamicObject, Patch, PatchParams, PostParams};
use kube::runtime::{
    controller::{Action, Controller},
    reflector::{self, ObjectRef},
    watcher, WatchStreamExt,
};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

// The shim layer connects reconcile_core to the API server. reconcile_core
// only produces requests; an ApiServerShim executes them, either against a
// real cluster through kube-rs or against the in-memory model used in tests.
pub trait ApiServerShim {
    fn handle(&self, req: KubeAPIRequest) -> impl Future<Output = KubeAPIResponse> + Send;
}

impl<S: ApiServerShim + Send + Sync> ApiServerShim for Arc<S> {
    fn handle(&self, req: KubeAPIRequest) -> impl Future<Output = KubeAPIResponse> + Send {
        (**self).handle(req)
    }
}

#[derive(Clone)]
pub struct KubeClientShim {
    client: Client,
}

impl KubeClientShim {
    pub fn new(client: Client) -> KubeClientShim {
        KubeClientShim { client }
    }

    fn api(&self, namespace: &str, api_resource: &ApiResource) -> Api<DynamicObject> {
        Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, api_resource)
    }
}

impl ApiServerShim for KubeClientShim {
    async fn handle(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        match req {
            KubeAPIRequest::GetRequest(get_req) => {
                let res = self
                    .api(&get_req.namespace, &get_req.api_resource)
                    .get(&get_req.name)
                    .await
                    .map_err(|err| kube_error_to_api_error(&err));
                KubeAPIResponse::GetResponse(KubeGetResponse { res })
            }
            KubeAPIRequest::CreateRequest(create_req) => {
                let res = self
                    .api(&create_req.namespace, &create_req.api_resource)
                    .create(&PostParams::default(), &create_req.obj)
                    .await
                    .map_err(|err| kube_error_to_api_error(&err));
                KubeAPIResponse::CreateResponse(KubeCreateResponse { res })
            }
            KubeAPIRequest::PatchRequest(patch_req) => {
                let res = self
                    .api(&patch_req.namespace, &patch_req.api_resource)
                    .patch(&patch_req.name, &PatchParams::default(), &Patch::Merge(&patch_req.patch))
                    .await
                    .map_err(|err| kube_error_to_api_error(&err));
                KubeAPIResponse::PatchResponse(KubePatchResponse { res })
            }
            KubeAPIRequest::PatchStatusRequest(patch_req) => {
                let res = self
                    .api(&patch_req.namespace, &patch_req.api_resource)
                    .patch_status(&patch_req.name, &PatchParams::default(), &Patch::Merge(&patch_req.patch))
                    .await
                    .map_err(|err| kube_error_to_api_error(&err));
                KubeAPIResponse::PatchStatusResponse(KubePatchResponse { res })
            }
        }
    }
}

fn response_error(resp: &KubeAPIResponse) -> Option<&APIError> {
    match resp {
        KubeAPIResponse::GetResponse(KubeGetResponse { res })
        | KubeAPIResponse::CreateResponse(KubeCreateResponse { res })
        | KubeAPIResponse::PatchResponse(KubePatchResponse { res })
        | KubeAPIResponse::PatchStatusResponse(KubePatchResponse { res }) => res.as_ref().err(),
    }
}

fn request_verb(req: &KubeAPIRequest) -> &'static str {
    match req {
        KubeAPIRequest::GetRequest(_) => "Get",
        KubeAPIRequest::CreateRequest(_) => "Create",
        KubeAPIRequest::PatchRequest(_) => "Patch",
        KubeAPIRequest::PatchStatusRequest(_) => "PatchStatus",
    }
}

// reconcile_with implements one reconcile pass by repeatedly invoking reconcile_core.
// It first reads the custom resource, then starts from reconcile_init_state and
// feeds each state returned by reconcile_core back into it together with the
// response to the request it asked for. The loop ends when the reconciler reports
// the pass is done (Ok(Some(state))) or failed (Err). A custom resource that no
// longer exists ends the pass with Ok(None).
pub async fn reconcile_with<K, T, R, S>(reconciler: &R, shim: &S, namespace: &str, name: &str) -> Result<Option<T>, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned + Clone + Debug,
    R: Reconciler<K, T>,
    S: ApiServerShim,
{
    let cr_key = format!("{}/{}/{}", K::kind(&()), namespace, name);
    let get_resp = shim
        .handle(KubeAPIRequest::GetRequest(KubeGetRequest {
            api_resource: ApiResource::erase::<K>(&()),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }))
        .await;
    let cr = match get_resp.into_get_response() {
        Some(KubeGetResponse { res: Ok(obj) }) => obj
            .try_parse::<K>()
            .map_err(|err| Error::ShimLayerError(format!("failed to parse {}: {}", cr_key, err)))?,
        Some(KubeGetResponse { res: Err(APIError::ObjectNotFound) }) => {
            info!(resource = %cr_key, "custom resource not found, end reconcile");
            return Ok(None);
        }
        Some(KubeGetResponse { res: Err(err) }) => return Err(Error::ApiError(err)),
        None => return Err(Error::ShimLayerError(format!("unexpected response to get {}", cr_key))),
    };

    let mut state = reconciler.reconcile_init_state();
    let mut resp_o: Option<KubeAPIResponse> = None;
    loop {
        if reconciler.reconcile_done(&state) {
            debug!(resource = %cr_key, "reconcile done");
            break;
        }
        if reconciler.reconcile_error(&state) {
            return Err(Error::ReconcileCoreError(reconciler.reconcile_error_message(&state)));
        }
        let (state_prime, req_o) = reconciler.reconcile_core(&cr, resp_o.take(), state);
        state = state_prime;
        if let Some(req) = req_o {
            let (verb, key, is_write) = (request_verb(&req), req.key(), req.is_write());
            let resp = shim.handle(req).await;
            match response_error(&resp) {
                None if is_write => info!(resource = %cr_key, "{} {} done", verb, key),
                None => debug!(resource = %cr_key, "{} {} done", verb, key),
                Some(APIError::ObjectNotFound) if !is_write => debug!(resource = %cr_key, "{} {}: not found", verb, key),
                Some(err) => warn!(resource = %cr_key, "{} {} failed with error: {}", verb, key, err),
            }
            resp_o = Some(resp);
        }
    }
    Ok(Some(state))
}

pub fn object_key<K: ResourceExt>(obj: &K) -> Option<String> {
    Some(format!("{}/{}", obj.namespace()?, obj.meta().name.as_ref()?))
}

/// The cluster a server StatefulSet belongs to, read from its cluster-name label.
pub fn stateful_set_owner_ref(sts: &StatefulSet) -> Option<ObjectRef<MariaDBCluster>> {
    let cluster_name = sts.labels().get(CLUSTER_NAME_LABEL)?;
    Some(ObjectRef::new(cluster_name).within(&sts.namespace()?))
}

/// Hashes the parts of a cluster a pass acts on. Updates that leave both
/// spec and status alone, such as label edits, hash the same and do not
/// trigger a pass.
pub fn spec_and_status_hash(mdb: &MariaDBCluster) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(&mdb.spec).ok()?.hash(&mut hasher);
    serde_json::to_string(&mdb.status).ok()?.hash(&mut hasher);
    Some(hasher.finish())
}

/// Capped exponential requeue delay per cluster key. Every failed pass
/// doubles the delay from base_delay up to max_delay, and a clean pass
/// resets it.
#[derive(Debug)]
pub struct ReconcileBackoff {
    base_delay: Duration,
    max_delay: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ReconcileBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> ReconcileBackoff {
        ReconcileBackoff {
            base_delay,
            max_delay,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn lock_failures(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records one more failure for key and returns how long to wait before retrying it.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.lock_failures();
        let count = failures.entry(key.to_string()).or_insert(0);
        let delay = 2u32
            .checked_pow(*count)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay));
        *count = count.saturating_add(1);
        delay
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.lock_failures().get(key).copied().unwrap_or(0)
    }

    pub fn reset(&self, key: &str) {
        self.lock_failures().remove(key);
    }
}

// Data is passed to reconcile and error_policy by the kube-rs controller.
// It carries the shim that talks to the API server and the per-key backoff.
// The semaphore bounds how many clusters are reconciled at once; the
// controller itself never runs two passes for the same cluster concurrently.
pub struct Data<S> {
    pub shim: S,
    pub reconciler: MariaDBReconciler,
    pub requeue_after: Duration,
    pub backoff: ReconcileBackoff,
    passes: Semaphore,
}

impl<S> Data<S> {
    pub fn new(shim: S, config: &ControllerConfig) -> Data<S> {
        Data {
            shim,
            reconciler: MariaDBReconciler::default(),
            requeue_after: config.requeue_after,
            backoff: ReconcileBackoff::new(config.base_backoff, config.max_backoff),
            passes: Semaphore::new(config.workers),
        }
    }
}

// reconcile is the function registered with the kube-rs controller. A clean
// pass resets the cluster's backoff and schedules the periodic resync; a
// cluster that no longer exists waits for the next change.
pub async fn reconcile<S: ApiServerShim + Send + Sync>(mdb: Arc<MariaDBCluster>, ctx: Arc<Data<S>>) -> Result<Action, Error> {
    let namespace = mdb
        .namespace()
        .ok_or_else(|| Error::ShimLayerError("cluster misses \".metadata.namespace\"".to_string()))?;
    let name = mdb.name_any();
    let key = format!("{}/{}", namespace, name);
    let _permit = ctx
        .passes
        .acquire()
        .await
        .map_err(|err| Error::ShimLayerError(format!("reconcile slots closed: {}", err)))?;
    match reconcile_with::<MariaDBCluster, _, _, _>(&ctx.reconciler, &ctx.shim, &namespace, &name).await? {
        Some(_) => {
            ctx.backoff.reset(&key);
            Ok(Action::requeue(ctx.requeue_after))
        }
        None => {
            ctx.backoff.reset(&key);
            Ok(Action::await_change())
        }
    }
}

// error_policy requeues a failed cluster after its backoff delay.
pub fn error_policy<S>(mdb: Arc<MariaDBCluster>, error: &Error, ctx: Arc<Data<S>>) -> Action {
    let key = object_key(&*mdb).unwrap_or_else(|| mdb.name_any());
    let delay = ctx.backoff.next_delay(&key);
    warn!(cluster = %key, failures = ctx.backoff.failures(&key), ?delay, "reconcile failed: {}", error);
    Action::requeue(delay)
}

// run_controller builds the kube-rs controller: cluster events pass the
// spec/status change filter, and events on labelled StatefulSets map back to
// their cluster. It only returns if the controller stream ends.
pub async fn run_controller(client: Client, config: ControllerConfig) -> Result<(), Error> {
    let (reader, writer) = reflector::store::<MariaDBCluster>();
    let clusters = reflector::reflector(
        writer,
        watcher(Api::<MariaDBCluster>::all(client.clone()), watcher::Config::default()).default_backoff(),
    )
    .applied_objects()
    .predicate_filter(spec_and_status_hash);
    let stateful_sets = Api::<StatefulSet>::all(client.clone());
    let ctx = Arc::new(Data::new(KubeClientShim::new(client), &config));

    info!(workers = config.workers, "starting controller");
    Controller::for_stream(clusters, reader)
        .watches(
            stateful_sets,
            watcher::Config::default().labels(CLUSTER_NAME_LABEL),
            |sts| stateful_set_owner_ref(&sts),
        )
        .run(reconcile::<KubeClientShim>, error_policy::<KubeClientShim>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(cluster = %obj, "reconciled"),
                Err(err) => warn!("controller error: {}", err),
            }
        })
        .await;
    info!("controller terminated");
    Err(Error::ShimLayerError("controller stream ended".to_string()))
}

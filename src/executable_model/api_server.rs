// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::executable_model::api_server_state::{ApiServerState, KubeObjectRef};
use crate::kubernetes_api_objects::{api_method::*, error::APIError, json_merge_patch::merge_patch};
use crate::shim_layer::controller_runtime::ApiServerShim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::Utc;
use kube::api::DynamicObject;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

// The executable API server model stands in for a real API server when
// driving the reconciler and the recovery agent in tests. It keeps the
// behavior the controller depends on: resource versions and optimistic
// concurrency on merge patches, generation bumps on spec changes, the status
// subresource split, null pruning on storage and StatefulSet immutability.

const STATEFUL_SET_IMMUTABLE_FIELDS: [&str; 4] = [
    "/spec/selector",
    "/spec/serviceName",
    "/spec/volumeClaimTemplates",
    "/spec/podManagementPolicy",
];

fn object_ref(kind: &str, namespace: &str, name: &str) -> KubeObjectRef {
    KubeObjectRef {
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

fn to_value(obj: &DynamicObject) -> Result<Value, APIError> {
    serde_json::to_value(obj).map_err(|err| APIError::BadRequest(err.to_string()))
}

fn from_value(value: Value) -> Result<DynamicObject, APIError> {
    serde_json::from_value(value).map_err(|err| APIError::BadRequest(err.to_string()))
}

// Stored objects never carry explicit nulls.
fn prune_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(prune_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(prune_nulls),
        _ => {}
    }
}

pub fn handle_get_request(req: &KubeGetRequest, s: &ApiServerState) -> KubeGetResponse {
    let key = object_ref(&req.api_resource.kind, &req.namespace, &req.name);
    match s.resources.get(&key) {
        Some(obj) => KubeGetResponse { res: Ok(obj.clone()) },
        None => KubeGetResponse { res: Err(APIError::ObjectNotFound) },
    }
}

fn create_request_admission_check(req: &KubeCreateRequest, s: &ApiServerState) -> Option<APIError> {
    match &req.obj.metadata.name {
        None => Some(APIError::Invalid("metadata.name: Required value".to_string())),
        Some(_) if req.obj.metadata.namespace.as_ref().is_some_and(|ns| ns != &req.namespace) => Some(APIError::BadRequest(
            "the namespace of the provided object does not match the namespace sent on the request".to_string(),
        )),
        Some(name) if s.resources.contains_key(&object_ref(&req.api_resource.kind, &req.namespace, name)) => {
            Some(APIError::ObjectAlreadyExists)
        }
        Some(_) => None,
    }
}

fn store_new_object(key: KubeObjectRef, obj: &DynamicObject, keep_status: bool, s: &mut ApiServerState) -> Result<DynamicObject, APIError> {
    let mut value = to_value(obj)?;
    prune_nulls(&mut value);
    if let Value::Object(map) = &mut value {
        if !keep_status {
            map.remove("status");
        }
    }
    let mut created = from_value(value)?;
    created.metadata.namespace = Some(key.namespace.clone());
    created.metadata.uid = Some(format!("uid-{}", s.uid_counter));
    created.metadata.resource_version = Some(s.resource_version_counter.to_string());
    created.metadata.creation_timestamp = Some(Time(Utc::now()));
    created.metadata.deletion_timestamp = None;
    created.metadata.generation = created.data.get("spec").map(|_| 1);
    s.resources.insert(key, created.clone());
    s.uid_counter += 1;
    s.resource_version_counter += 1;
    Ok(created)
}

pub fn handle_create_request(req: &KubeCreateRequest, s: &mut ApiServerState) -> KubeCreateResponse {
    if let Some(err) = create_request_admission_check(req, s) {
        return KubeCreateResponse { res: Err(err) };
    }
    let name = req.obj.metadata.name.clone().unwrap_or_default();
    let key = object_ref(&req.api_resource.kind, &req.namespace, &name);
    KubeCreateResponse { res: store_new_object(key, &req.obj, false, s) }
}

fn patch_admission_check(req: &KubePatchRequest, current: &Value) -> Option<APIError> {
    if let Some(rv) = req.patch.pointer("/metadata/resourceVersion") {
        if current.pointer("/metadata/resourceVersion") != Some(rv) {
            return Some(APIError::Conflict(format!(
                "the object {} has been modified; please apply your changes to the latest version and try again",
                req.key()
            )));
        }
    }
    for field in ["name", "namespace", "uid"] {
        let path = format!("/metadata/{}", field);
        if let Some(value) = req.patch.pointer(&path) {
            if current.pointer(&path) != Some(value) {
                return Some(APIError::BadRequest(format!("metadata.{} cannot be changed by a patch", field)));
            }
        }
    }
    None
}

// A patch to the main resource never touches status, and a patch to the
// status subresource touches nothing but status.
fn scope_patch(patch: &Value, status_only: bool) -> Value {
    match patch {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| (key.as_str() == "status") == status_only)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        _ => Value::Object(serde_json::Map::new()),
    }
}

fn transition_validity_check(kind: &str, old: &Value, new: &Value) -> Option<APIError> {
    if kind == "StatefulSet" && STATEFUL_SET_IMMUTABLE_FIELDS.iter().any(|path| old.pointer(path) != new.pointer(path)) {
        return Some(APIError::Invalid(
            "spec: Forbidden: updates to statefulset spec for fields other than 'replicas', 'ordinals', 'template', \
             'updateStrategy', 'persistentVolumeClaimRetentionPolicy' and 'minReadySeconds' are forbidden"
                .to_string(),
        ));
    }
    None
}

fn handle_merge_patch(req: &KubePatchRequest, s: &mut ApiServerState, status_only: bool) -> Result<DynamicObject, APIError> {
    let key = object_ref(&req.api_resource.kind, &req.namespace, &req.name);
    let current = s.resources.get(&key).cloned().ok_or(APIError::ObjectNotFound)?;
    let current_value = to_value(&current)?;
    if let Some(err) = patch_admission_check(req, &current_value) {
        return Err(err);
    }
    let mut updated_value = current_value.clone();
    merge_patch(&mut updated_value, &scope_patch(&req.patch, status_only));
    prune_nulls(&mut updated_value);
    if updated_value == current_value {
        return Ok(current);
    }
    if let Some(err) = transition_validity_check(&req.api_resource.kind, &current_value, &updated_value) {
        return Err(err);
    }
    let mut updated = from_value(updated_value)?;
    if current.data.get("spec") != updated.data.get("spec") {
        updated.metadata.generation = current.metadata.generation.map(|generation| generation + 1);
    }
    updated.metadata.resource_version = Some(s.resource_version_counter.to_string());
    s.resources.insert(key, updated.clone());
    s.resource_version_counter += 1;
    Ok(updated)
}

pub fn handle_patch_request(req: &KubePatchRequest, s: &mut ApiServerState) -> KubePatchResponse {
    KubePatchResponse { res: handle_merge_patch(req, s, false) }
}

pub fn handle_patch_status_request(req: &KubePatchRequest, s: &mut ApiServerState) -> KubePatchResponse {
    KubePatchResponse { res: handle_merge_patch(req, s, true) }
}

pub fn handle_request(req: &KubeAPIRequest, s: &mut ApiServerState) -> KubeAPIResponse {
    match req {
        KubeAPIRequest::GetRequest(get_req) => KubeAPIResponse::GetResponse(handle_get_request(get_req, s)),
        KubeAPIRequest::CreateRequest(create_req) => KubeAPIResponse::CreateResponse(handle_create_request(create_req, s)),
        KubeAPIRequest::PatchRequest(patch_req) => KubeAPIResponse::PatchResponse(handle_patch_request(patch_req, s)),
        KubeAPIRequest::PatchStatusRequest(patch_req) => {
            KubeAPIResponse::PatchStatusResponse(handle_patch_status_request(patch_req, s))
        }
    }
}

fn error_response(req: &KubeAPIRequest, err: APIError) -> KubeAPIResponse {
    match req {
        KubeAPIRequest::GetRequest(_) => KubeAPIResponse::GetResponse(KubeGetResponse { res: Err(err) }),
        KubeAPIRequest::CreateRequest(_) => KubeAPIResponse::CreateResponse(KubeCreateResponse { res: Err(err) }),
        KubeAPIRequest::PatchRequest(_) => KubeAPIResponse::PatchResponse(KubePatchResponse { res: Err(err) }),
        KubeAPIRequest::PatchStatusRequest(_) => KubeAPIResponse::PatchStatusResponse(KubePatchResponse { res: Err(err) }),
    }
}

/// An in-memory API server that implements ApiServerShim.
///
/// Every write request is recorded (whether or not it changed anything) so
/// tests can assert on exactly what the controller sent. Errors queued with
/// inject_write_error are returned, in order, by the next write requests.
#[derive(Debug, Default)]
pub struct ExecutableApiServer {
    state: Mutex<ApiServerState>,
    writes: Mutex<Vec<KubeAPIRequest>>,
    injected_errors: Mutex<VecDeque<APIError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ExecutableApiServer {
    pub fn new() -> ExecutableApiServer {
        ExecutableApiServer::default()
    }

    pub fn handle_sync(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        if req.is_write() {
            lock(&self.writes).push(req.clone());
            if let Some(err) = lock(&self.injected_errors).pop_front() {
                return error_response(&req, err);
            }
        }
        handle_request(&req, &mut lock(&self.state))
    }

    pub fn inject_write_error(&self, err: APIError) {
        lock(&self.injected_errors).push_back(err);
    }

    pub fn writes(&self) -> Vec<KubeAPIRequest> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    /// Stores obj as is, status included, the way another client would have created it.
    pub fn insert<K>(&self, obj: &K) -> Result<DynamicObject, APIError>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let namespace = obj.meta().namespace.clone().unwrap_or_else(|| "default".to_string());
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| APIError::Invalid("metadata.name: Required value".to_string()))?;
        let dynamic = from_value(serde_json::to_value(obj).map_err(|err| APIError::BadRequest(err.to_string()))?)?;
        let mut s = lock(&self.state);
        let key = object_ref(&K::kind(&()), &namespace, &name);
        if s.resources.contains_key(&key) {
            return Err(APIError::ObjectAlreadyExists);
        }
        store_new_object(key, &dynamic, true, &mut s)
    }

    pub fn get<K>(&self, namespace: &str, name: &str) -> Option<K>
    where
        K: Resource<DynamicType = ()> + DeserializeOwned,
    {
        let s = lock(&self.state);
        let obj = s.resources.get(&object_ref(&K::kind(&()), namespace, name))?;
        serde_json::from_value(serde_json::to_value(obj).ok()?).ok()
    }

    pub fn remove<K>(&self, namespace: &str, name: &str) -> Option<DynamicObject>
    where
        K: Resource<DynamicType = ()>,
    {
        let mut s = lock(&self.state);
        let removed = s.resources.remove(&object_ref(&K::kind(&()), namespace, name));
        s.resource_version_counter += 1;
        removed
    }

    /// Replaces the status of a stored object, as the owning controller would.
    pub fn set_status<K>(&self, namespace: &str, name: &str, status: Value) -> Result<DynamicObject, APIError>
    where
        K: Resource<DynamicType = ()>,
    {
        let mut s = lock(&self.state);
        let rv = s.resource_version_counter.to_string();
        let obj = s
            .resources
            .get_mut(&object_ref(&K::kind(&()), namespace, name))
            .ok_or(APIError::ObjectNotFound)?;
        obj.data["status"] = status;
        obj.metadata.resource_version = Some(rv);
        let updated = obj.clone();
        s.resource_version_counter += 1;
        Ok(updated)
    }

    /// Plays the StatefulSet controller: marks the current generation of the
    /// StatefulSet as fully rolled out with every desired replica ready.
    pub fn roll_out_stateful_set(&self, namespace: &str, name: &str) -> Result<DynamicObject, APIError> {
        let (generation, replicas) = {
            let s = lock(&self.state);
            let sts = s
                .resources
                .get(&object_ref("StatefulSet", namespace, name))
                .ok_or(APIError::ObjectNotFound)?;
            let replicas = sts.data.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
            (sts.metadata.generation.unwrap_or(1), replicas)
        };
        self.set_stateful_set_replicas(namespace, name, generation, replicas, replicas)
    }

    /// Sets the StatefulSet status to observedGeneration with ready out of
    /// replicas pods up, all running the current revision.
    pub fn set_stateful_set_replicas(
        &self,
        namespace: &str,
        name: &str,
        observed_generation: i64,
        replicas: i64,
        ready: i64,
    ) -> Result<DynamicObject, APIError> {
        let revision = format!("{}-rev-{}", name, observed_generation);
        self.set_status::<k8s_openapi::api::apps::v1::StatefulSet>(
            namespace,
            name,
            json!({
                "observedGeneration": observed_generation,
                "replicas": replicas,
                "readyReplicas": ready,
                "currentReplicas": replicas,
                "updatedReplicas": replicas,
                "availableReplicas": ready,
                "currentRevision": revision,
                "updateRevision": revision,
            }),
        )
    }
}

impl ApiServerShim for ExecutableApiServer {
    async fn handle(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        self.handle_sync(req)
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::error::APIError;
use kube::api::{ApiResource, DynamicObject};

/// KubeAPIRequest represents the requests the reconcile core hands to the shim layer.
///
/// Objects travel as DynamicObject so a single request type covers every kind;
/// the api_resource carried by each request is what the shim uses to
/// instantiate a kube::Api for the right group/version/kind.
#[derive(Debug, Clone)]
pub enum KubeAPIRequest {
    GetRequest(KubeGetRequest),
    CreateRequest(KubeCreateRequest),
    PatchRequest(KubePatchRequest),
    PatchStatusRequest(KubePatchRequest),
}

/// KubeGetRequest has the name as the parameter of Api.get(), and namespace to instantiate an Api.
#[derive(Debug, Clone)]
pub struct KubeGetRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
}

impl KubeGetRequest {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.api_resource.kind, self.namespace, self.name)
    }
}

/// KubeCreateRequest has the obj as the parameter of Api.create().
#[derive(Debug, Clone)]
pub struct KubeCreateRequest {
    pub api_resource: ApiResource,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeCreateRequest {
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.api_resource.kind,
            self.namespace,
            self.obj.metadata.name.as_deref().unwrap_or("")
        )
    }
}

/// KubePatchRequest carries a JSON merge patch for Api.patch() or Api.patch_status().
///
/// When the patch sets metadata.resourceVersion the API server rejects it
/// with a Conflict if the stored object moved on in the meantime.
#[derive(Debug, Clone)]
pub struct KubePatchRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
    pub patch: serde_json::Value,
}

impl KubePatchRequest {
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.api_resource.kind, self.namespace, self.name)
    }
}

impl KubeAPIRequest {
    pub fn key(&self) -> String {
        match self {
            KubeAPIRequest::GetRequest(req) => req.key(),
            KubeAPIRequest::CreateRequest(req) => req.key(),
            KubeAPIRequest::PatchRequest(req) | KubeAPIRequest::PatchStatusRequest(req) => req.key(),
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, KubeAPIRequest::GetRequest(_))
    }
}

/// KubeAPIResponse wraps around the results returned by the methods of kube::api::Api.
#[derive(Debug, Clone)]
pub enum KubeAPIResponse {
    GetResponse(KubeGetResponse),
    CreateResponse(KubeCreateResponse),
    PatchResponse(KubePatchResponse),
    PatchStatusResponse(KubePatchResponse),
}

#[derive(Debug, Clone)]
pub struct KubeGetResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Debug, Clone)]
pub struct KubeCreateResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Debug, Clone)]
pub struct KubePatchResponse {
    pub res: Result<DynamicObject, APIError>,
}

impl KubeAPIResponse {
    pub fn into_get_response(self) -> Option<KubeGetResponse> {
        match self {
            KubeAPIResponse::GetResponse(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn into_create_response(self) -> Option<KubeCreateResponse> {
        match self {
            KubeAPIResponse::CreateResponse(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn into_patch_response(self) -> Option<KubePatchResponse> {
        match self {
            KubeAPIResponse::PatchResponse(resp) => Some(resp),
            _ => None,
        }
    }

    pub fn into_patch_status_response(self) -> Option<KubePatchResponse> {
        match self {
            KubeAPIResponse::PatchStatusResponse(resp) => Some(resp),
            _ => None,
        }
    }
}

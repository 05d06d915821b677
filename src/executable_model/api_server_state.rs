// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::api::DynamicObject;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct KubeObjectRef {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for KubeObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

// The "state" of the executable API server model: every stored object plus
// the counters used to hand out uids and resource versions.
#[derive(Debug)]
pub struct ApiServerState {
    pub resources: BTreeMap<KubeObjectRef, DynamicObject>,
    pub uid_counter: i64,
    pub resource_version_counter: i64,
}

impl ApiServerState {
    pub fn new() -> ApiServerState {
        ApiServerState {
            resources: BTreeMap::new(),
            uid_counter: 0,
            resource_version_counter: 0,
        }
    }
}

impl Default for ApiServerState {
    fn default() -> ApiServerState {
        ApiServerState::new()
    }
}

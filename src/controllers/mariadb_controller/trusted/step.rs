// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MariaDBReconcileStep {
    Init,
    AfterGetStatefulSet,
    AfterPatchStatus,
    AfterKRequestStep(ActionKind, SubResource),
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubResource {
    ServiceAccount,
    Role,
    RoleBinding,
    SnapshotPersistentVolumeClaim,
    ServerConfigMap,
    StatefulSet,
    HeadlessService,
    ClientService,
    ProxyDeployment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Get,
    Create,
    Patch,
}

/// What converging a single child object amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeOutcome {
    Created,
    Applied,
    NoChange,
}

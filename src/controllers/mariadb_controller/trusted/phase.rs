// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase is the lifecycle position of a cluster, persisted in its status.
///
/// The bootstrap phases grow a fresh cluster one member at a time: the first
/// member starts a new replication group, restarts as an ordinary member, and
/// then the second and third members join it. Recovery gathers the last
/// committed position from every replica before releasing them to restart
/// from the most advanced one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum Phase {
    #[default]
    #[serde(rename = "")]
    Empty,
    BootstrapFirst,
    BootstrapFirstRestart,
    BootstrapSecond,
    BootstrapThird,
    Operational,
    Recovery,
    RecoverSeqNo,
    RecoveryReleaseAll,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Empty => "",
            Phase::BootstrapFirst => "BootstrapFirst",
            Phase::BootstrapFirstRestart => "BootstrapFirstRestart",
            Phase::BootstrapSecond => "BootstrapSecond",
            Phase::BootstrapThird => "BootstrapThird",
            Phase::Operational => "Operational",
            Phase::Recovery => "Recovery",
            Phase::RecoverSeqNo => "RecoverSeqNo",
            Phase::RecoveryReleaseAll => "RecoveryReleaseAll",
        }
    }

    pub fn is_recovering(&self) -> bool {
        matches!(self, Phase::Recovery | Phase::RecoverSeqNo | Phase::RecoveryReleaseAll)
    }

    /// Number of server replicas the workload runs while in this phase.
    pub fn replicas(&self, desired: i32) -> i32 {
        match self {
            Phase::BootstrapFirst | Phase::BootstrapFirstRestart => 1,
            Phase::BootstrapSecond => 2,
            Phase::BootstrapThird => 3,
            _ => desired,
        }
    }

    /// Overrides the image entrypoint when Some.
    pub fn server_command(&self) -> Option<Vec<String>> {
        match self {
            Phase::RecoverSeqNo => Some(vec!["mysqld".to_string(), "--wsrep-recover".to_string()]),
            _ => None,
        }
    }

    pub fn server_args(&self) -> Option<Vec<String>> {
        match self {
            Phase::BootstrapFirst => Some(vec!["--wsrep-new-cluster".to_string()]),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Phase::Empty {
            write!(f, "<empty>")
        } else {
            write!(f, "{}", self.as_str())
        }
    }
}

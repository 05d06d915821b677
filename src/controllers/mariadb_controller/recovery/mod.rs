// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod agent;
pub mod coordinator;
pub mod grastate;

use crate::kubernetes_api_objects::error::APIError;
use thiserror::Error;

/// Errors of the replica-side recovery protocol.
///
/// A replica that cannot establish its own data state must not guess, so
/// only failures talking to the API server or reading the volume are
/// retried; everything else ends the agent process.
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("state file {0} is missing")]
    StateFileMissing(String),
    #[error("failed to read state file: {0}")]
    StateFileIo(#[source] std::io::Error),
    #[error("malformed state file: no valid {0} field")]
    MalformedStateFile(&'static str),
    #[error("cluster uuid mismatch: expected {expected}, recovered {recovered}")]
    UuidMismatch { expected: String, recovered: String },
    #[error("position recovery failed: {0}")]
    RecoverFailed(String),
    #[error("api error: {0}")]
    Api(#[source] APIError),
    #[error("status kept changing underneath, gave up retrying")]
    ConflictRetriesExhausted,
    #[error("recovery did not finish before the deadline")]
    Timeout,
    #[error("not safe to bootstrap: {0}")]
    NotSafeToBootstrap(String),
}

impl RecoveryError {
    /// Errors a later attempt may not hit again, as opposed to corrupt or
    /// inconsistent local data.
    pub fn is_retryable(&self) -> bool {
        match self {
            RecoveryError::Api(err) => err.is_transient(),
            RecoveryError::StateFileIo(_) | RecoveryError::ConflictRetriesExhausted => true,
            _ => false,
        }
    }
}

// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::error::ErrorResponse;
use thiserror::Error;

/// APIError is the closed set of failures the reconcile core reasons about.
///
/// kube-rs reports API server failures as an `ErrorResponse` whose `reason`
/// follows the Kubernetes `StatusReason` strings; everything else (transport
/// failures, serialization errors) ends up in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum APIError {
    #[error("object not found")]
    ObjectNotFound,
    #[error("object already exists")]
    ObjectAlreadyExists,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("timeout")]
    Timeout,
    #[error("server timeout")]
    ServerTimeout,
    #[error("{0}")]
    Other(String),
}

impl APIError {
    /// Errors that may go away by retrying the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            APIError::Conflict(_)
                | APIError::InternalError(_)
                | APIError::Timeout
                | APIError::ServerTimeout
                | APIError::Other(_)
        )
    }
}

pub fn kube_error_to_api_error(error: &kube::Error) -> APIError {
    match error {
        kube::Error::Api(ErrorResponse { reason, message, .. }) => match reason.as_str() {
            "NotFound" => APIError::ObjectNotFound,
            "AlreadyExists" => APIError::ObjectAlreadyExists,
            "Conflict" => APIError::Conflict(message.clone()),
            "BadRequest" => APIError::BadRequest(message.clone()),
            "Invalid" => APIError::Invalid(message.clone()),
            "InternalError" => APIError::InternalError(message.clone()),
            "Timeout" => APIError::Timeout,
            "ServerTimeout" => APIError::ServerTimeout,
            _ => APIError::Other(format!("{}: {}", reason, message)),
        },
        _ => APIError::Other(error.to_string()),
    }
}

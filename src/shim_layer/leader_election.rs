// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::LeaderElectionConfig;
use crate::shim_layer::Error;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use k8s_openapi::chrono::{DateTime, Duration as ChronoDuration, Utc};
use kube::api::{Api, PostParams};
use kube::Client;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// The lease spec identity should write, or None while someone else holds
/// an unexpired lease.
pub fn next_lease_spec(current: Option<&LeaseSpec>, identity: &str, lease_duration: Duration, now: DateTime<Utc>) -> Option<LeaseSpec> {
    let duration_seconds = i32::try_from(lease_duration.as_secs()).unwrap_or(i32::MAX);
    let acquired = |transitions: i32| LeaseSpec {
        holder_identity: Some(identity.to_string()),
        acquire_time: Some(MicroTime(now)),
        renew_time: Some(MicroTime(now)),
        lease_duration_seconds: Some(duration_seconds),
        lease_transitions: Some(transitions),
        ..LeaseSpec::default()
    };
    let spec = match current {
        Some(spec) => spec,
        None => return Some(acquired(0)),
    };
    let holder = spec.holder_identity.as_deref().unwrap_or("");
    if holder == identity {
        return Some(LeaseSpec {
            renew_time: Some(MicroTime(now)),
            lease_duration_seconds: Some(duration_seconds),
            ..spec.clone()
        });
    }
    let expired = match (&spec.renew_time, spec.lease_duration_seconds) {
        (Some(renew_time), Some(seconds)) => renew_time.0 + ChronoDuration::seconds(i64::from(seconds)) < now,
        _ => true,
    };
    if holder.is_empty() || expired {
        Some(acquired(spec.lease_transitions.unwrap_or(0) + 1))
    } else {
        None
    }
}

/// LeaderGate lets exactly one controller process reconcile at a time.
pub struct LeaderGate {
    api: Api<Lease>,
    config: LeaderElectionConfig,
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

impl LeaderGate {
    pub fn new(client: Client, config: LeaderElectionConfig) -> LeaderGate {
        LeaderGate {
            api: Api::namespaced(client, &config.lease_namespace),
            config,
        }
    }

    /// One attempt to take or keep the lease; Ok(false) means another holder has it.
    async fn try_acquire_or_renew(&self) -> Result<bool, kube::Error> {
        let name = &self.config.lease_name;
        let existing = self.api.get_opt(name).await?;
        let now = Utc::now();
        let res = match existing {
            None => {
                let lease = Lease {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(self.config.lease_namespace.clone()),
                        ..ObjectMeta::default()
                    },
                    spec: next_lease_spec(None, &self.config.identity, self.config.lease_duration, now),
                };
                self.api.create(&PostParams::default(), &lease).await
            }
            Some(lease) => match next_lease_spec(lease.spec.as_ref(), &self.config.identity, self.config.lease_duration, now) {
                None => return Ok(false),
                // resourceVersion from the read guards against a racing candidate
                Some(spec) => {
                    let updated = Lease {
                        spec: Some(spec),
                        ..lease
                    };
                    self.api.replace(name, &PostParams::default(), &updated).await
                }
            },
        };
        match res {
            Ok(_) => Ok(true),
            // 409 covers both a lost create race and a stale resourceVersion
            Err(err) if is_conflict(&err) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn acquire(&self) {
        info!(identity = %self.config.identity, lease = %self.config.lease_name, "waiting for leadership");
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.config.identity, "became leader");
                    return;
                }
                Ok(false) => debug!("lease is held by another instance"),
                Err(err) => warn!("failed to acquire lease: {}", err),
            }
            sleep(self.config.retry_period).await;
        }
    }

    /// Keeps renewing and returns once the lease could not be renewed within the deadline.
    async fn renew_until_lost(&self) -> Error {
        loop {
            sleep(self.config.retry_period).await;
            let renewal = timeout(self.config.renew_deadline, async {
                loop {
                    match self.try_acquire_or_renew().await {
                        Ok(held) => return held,
                        Err(err) => warn!("failed to renew lease: {}", err),
                    }
                    sleep(self.config.retry_period).await;
                }
            })
            .await;
            match renewal {
                Ok(true) => debug!("renewed lease"),
                Ok(false) => return Error::LeaderElectionLost,
                Err(_) => return Error::LeaderElectionLost,
            }
        }
    }

    /// Runs controller while this process holds the lease. Losing the lease
    /// ends the run with LeaderElectionLost; the caller is expected to exit.
    pub async fn run<F>(self, controller: F) -> Result<(), Error>
    where
        F: Future<Output = Result<(), Error>>,
    {
        self.acquire().await;
        tokio::select! {
            res = controller => res,
            err = self.renew_until_lost() => {
                error!(identity = %self.config.identity, "lost leadership");
                Err(err)
            }
        }
    }
}

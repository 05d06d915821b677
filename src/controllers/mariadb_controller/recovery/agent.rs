// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::AgentConfig;
use crate::controllers::mariadb_controller::recovery::{coordinator::*, grastate::*, RecoveryError};
use crate::controllers::mariadb_controller::trusted::{exec_types::*, phase::Phase};
use crate::kubernetes_api_objects::api_method::*;
use crate::kubernetes_api_objects::error::APIError;
use crate::shim_layer::controller_runtime::ApiServerShim;
use kube::api::ApiResource;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{info, warn};

/// LocalEngine is the database engine on the replica's own volume.
pub trait LocalEngine {
    fn read_state_file(&self) -> impl Future<Output = Result<String, RecoveryError>> + Send;
    fn write_state_file(&self, content: String) -> impl Future<Output = Result<(), RecoveryError>> + Send;
    /// Runs the engine in recovery-only mode and returns everything it logged.
    fn recover_position(&self) -> impl Future<Output = Result<String, RecoveryError>> + Send;
}

pub struct MysqldEngine {
    pub state_file: PathBuf,
    pub recover_command: Vec<String>,
    pub recover_timeout: Duration,
}

impl MysqldEngine {
    pub fn from_config(config: &AgentConfig) -> MysqldEngine {
        MysqldEngine {
            state_file: config.state_file.clone(),
            recover_command: config.recover_command.clone(),
            recover_timeout: config.recover_timeout,
        }
    }
}

impl LocalEngine for MysqldEngine {
    async fn read_state_file(&self) -> Result<String, RecoveryError> {
        tokio::fs::read_to_string(&self.state_file).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                RecoveryError::StateFileMissing(self.state_file.display().to_string())
            } else {
                RecoveryError::StateFileIo(err)
            }
        })
    }

    async fn write_state_file(&self, content: String) -> Result<(), RecoveryError> {
        tokio::fs::write(&self.state_file, content)
            .await
            .map_err(RecoveryError::StateFileIo)
    }

    async fn recover_position(&self) -> Result<String, RecoveryError> {
        let (program, args) = self
            .recover_command
            .split_first()
            .ok_or_else(|| RecoveryError::RecoverFailed("empty recover command".to_string()))?;
        let run = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = timeout(self.recover_timeout, run)
            .await
            .map_err(|_| RecoveryError::RecoverFailed(format!("{} did not finish within {:?}", program, self.recover_timeout)))?
            .map_err(|err| RecoveryError::RecoverFailed(format!("failed to run {}: {}", program, err)))?;
        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(log)
    }
}

/// Reads the local position, recovering it first when the engine did not
/// shut down cleanly.
pub async fn extract_local_state<E: LocalEngine>(engine: &E) -> Result<GaleraState, RecoveryError> {
    let content = engine.read_state_file().await?;
    let mut state = parse_grastate(&content)?;
    if state.seq_no < 0 {
        info!(uuid = %state.uuid, "position unknown after unclean shutdown, recovering it");
        let output = engine.recover_position().await?;
        let (uuid, seq_no) = parse_recovered_position(&output)
            .ok_or_else(|| RecoveryError::RecoverFailed("no recovered position in engine output".to_string()))?;
        if uuid != state.uuid {
            return Err(RecoveryError::UuidMismatch {
                expected: state.uuid,
                recovered: uuid,
            });
        }
        if seq_no < 0 {
            return Err(RecoveryError::RecoverFailed(format!("recovered position {} is still unknown", seq_no)));
        }
        state.seq_no = seq_no;
    }
    Ok(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStep {
    Reporting,
    SelfPromoting,
    Waiting,
    Rejoining,
}

/// Where a replica goes next given the cluster status it just saw.
pub fn decide_step(cluster: &MariaDBCluster, hostname: &str) -> AgentStep {
    let status = cluster.status_or_default();
    match status.phase {
        Phase::Recovery => AgentStep::Waiting,
        Phase::RecoveryReleaseAll => {
            let primary_recovered = status.stage == STAGE_PRIMARY_RECOVERED;
            match status.bootstrap_from.as_deref() {
                Some(primary) if primary == hostname && !primary_recovered => AgentStep::SelfPromoting,
                Some(_) if !primary_recovered => AgentStep::Waiting,
                _ => AgentStep::Rejoining,
            }
        }
        _ => AgentStep::Rejoining,
    }
}

/// ReplicaAgent runs before the server container of every replica and keeps
/// it in stasis while the cluster recovers.
pub struct ReplicaAgent<S, E> {
    shim: S,
    engine: E,
    config: AgentConfig,
}

impl<S: ApiServerShim, E: LocalEngine> ReplicaAgent<S, E> {
    pub fn new(shim: S, engine: E, config: AgentConfig) -> ReplicaAgent<S, E> {
        ReplicaAgent { shim, engine, config }
    }

    async fn get_cluster(&self) -> Result<MariaDBCluster, RecoveryError> {
        let resp = self
            .shim
            .handle(KubeAPIRequest::GetRequest(KubeGetRequest {
                api_resource: ApiResource::erase::<MariaDBCluster>(&()),
                name: self.config.cluster_name.clone(),
                namespace: self.config.namespace.clone(),
            }))
            .await;
        match resp.into_get_response() {
            Some(KubeGetResponse { res: Ok(obj) }) => obj
                .try_parse::<MariaDBCluster>()
                .map_err(|err| RecoveryError::Api(APIError::Other(err.to_string()))),
            Some(KubeGetResponse { res: Err(err) }) => Err(RecoveryError::Api(err)),
            None => Err(RecoveryError::Api(APIError::Other("unexpected response to get".to_string()))),
        }
    }

    async fn report_local(&self, state: &GaleraState) -> Result<MariaDBCluster, RecoveryError> {
        report(&self.shim, &self.config.namespace, &self.config.cluster_name, &self.config.hostname, state).await
    }

    /// Returns once the replica may start its server, or with the reason it
    /// must not. Retryable failures start the attempt over after the poll
    /// interval until the deadline passes.
    pub async fn run(&self) -> Result<AgentStep, RecoveryError> {
        let deadline = Instant::now() + self.config.deadline;
        loop {
            let err = match timeout_at(deadline, self.attempt()).await {
                Err(_) => return Err(RecoveryError::Timeout),
                Ok(Ok(step)) => return Ok(step),
                Ok(Err(err)) if !err.is_retryable() => return Err(err),
                Ok(Err(err)) => err,
            };
            warn!(hostname = %self.config.hostname, "recovery attempt failed, retrying: {}", err);
            if timeout_at(deadline, sleep(self.config.poll_interval)).await.is_err() {
                return Err(RecoveryError::Timeout);
            }
        }
    }

    async fn attempt(&self) -> Result<AgentStep, RecoveryError> {
        let cluster = self.get_cluster().await?;
        let phase = cluster.status_or_default().phase;
        if !phase.is_recovering() {
            info!(phase = %phase, "cluster is not recovering, nothing to do");
            return Ok(AgentStep::Rejoining);
        }
        self.recover().await
    }

    async fn recover(&self) -> Result<AgentStep, RecoveryError> {
        let hostname = self.config.hostname.as_str();
        let local = extract_local_state(&self.engine).await?;
        let mut step = AgentStep::Reporting;
        loop {
            info!(hostname, step = ?step, "recovery");
            step = match step {
                AgentStep::Reporting => decide_step(&self.report_local(&local).await?, hostname),
                AgentStep::Waiting => {
                    sleep(self.config.poll_interval).await;
                    decide_step(&self.report_local(&local).await?, hostname)
                }
                AgentStep::SelfPromoting => {
                    let cluster = self.get_cluster().await?;
                    if decide_step(&cluster, hostname) != AgentStep::SelfPromoting {
                        warn!(hostname, "no longer the bootstrap source, re-evaluating");
                        decide_step(&cluster, hostname)
                    } else {
                        check_promotable(&local, &cluster.status_or_default().recovery_reports)?;
                        let content = self.engine.read_state_file().await?;
                        self.engine.write_state_file(mark_safe_to_bootstrap(&content)).await?;
                        set_stage(&self.shim, &self.config.namespace, &self.config.cluster_name, STAGE_PRIMARY_RECOVERED).await?;
                        info!(hostname, seqno = local.seq_no, "marked safe to bootstrap, reseeding the cluster");
                        AgentStep::Rejoining
                    }
                }
                AgentStep::Rejoining => return Ok(AgentStep::Rejoining),
            };
        }
    }
}

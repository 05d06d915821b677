// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use rand::{distributions::Alphanumeric, Rng};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("environment variable {name} has invalid value {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match lookup(name) {
        None => Ok(Duration::from_secs(default)),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<String, ConfigError> {
    lookup(name)
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingEnv(name))
}

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    pub lease_name: String,
    pub lease_namespace: String,
    pub identity: String,
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub leader_election: LeaderElectionConfig,
    /// Resync interval after a successful pass.
    pub requeue_after: Duration,
    /// Upper bound on clusters reconciled at once.
    pub workers: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl ControllerConfig {
    pub fn from_env() -> Result<ControllerConfig, ConfigError> {
        ControllerConfig::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<ControllerConfig, ConfigError> {
        let identity = match lookup("MDBC_IDENTITY") {
            Some(identity) if !identity.is_empty() => identity,
            _ => {
                let host = lookup("HOSTNAME").unwrap_or_else(|| "mdbc".to_string());
                let suffix: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(5)
                    .map(char::from)
                    .collect();
                format!("{}_{}", host, suffix.to_lowercase())
            }
        };
        let workers = match lookup("MDBC_WORKERS") {
            None => 1,
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => return Err(ConfigError::InvalidEnv { name: "MDBC_WORKERS", value }),
            },
        };
        let config = ControllerConfig {
            leader_election: LeaderElectionConfig {
                lease_name: lookup("MDBC_LEASE_NAME").unwrap_or_else(|| "mariadb-operator".to_string()),
                lease_namespace: lookup("MDBC_LEASE_NAMESPACE").unwrap_or_else(|| "kube-system".to_string()),
                identity,
                lease_duration: seconds(&lookup, "MDBC_LEASE_DURATION_SECONDS", 15)?,
                renew_deadline: seconds(&lookup, "MDBC_RENEW_DEADLINE_SECONDS", 10)?,
                retry_period: seconds(&lookup, "MDBC_RETRY_PERIOD_SECONDS", 2)?,
            },
            requeue_after: seconds(&lookup, "MDBC_REQUEUE_SECONDS", 60)?,
            workers,
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_secs(1000),
        };
        let election = &config.leader_election;
        if election.renew_deadline >= election.lease_duration {
            return Err(ConfigError::InvalidEnv {
                name: "MDBC_RENEW_DEADLINE_SECONDS",
                value: election.renew_deadline.as_secs().to_string(),
            });
        }
        Ok(config)
    }
}

/// Settings of the replica agent, which runs as the init container of every server pod.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub cluster_name: String,
    pub namespace: String,
    pub hostname: String,
    pub state_file: PathBuf,
    pub poll_interval: Duration,
    pub deadline: Duration,
    pub recover_timeout: Duration,
    pub recover_command: Vec<String>,
}

impl AgentConfig {
    pub fn from_env() -> Result<AgentConfig, ConfigError> {
        AgentConfig::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<AgentConfig, ConfigError> {
        Ok(AgentConfig {
            cluster_name: required(&lookup, "MARIADBCLUSTER_NAME")?,
            namespace: required(&lookup, "MARIADBCLUSTER_NAMESPACE")?,
            hostname: required(&lookup, "HOSTNAME")?,
            state_file: lookup("MDBC_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/mysql/grastate.dat")),
            poll_interval: seconds(&lookup, "MDBC_POLL_SECONDS", 5)?,
            deadline: seconds(&lookup, "MDBC_RECOVERY_DEADLINE_SECONDS", 3600)?,
            recover_timeout: seconds(&lookup, "MDBC_RECOVER_TIMEOUT_SECONDS", 120)?,
            recover_command: lookup("MDBC_RECOVER_COMMAND")
                .map(|cmd| cmd.split_whitespace().map(str::to_string).collect())
                .unwrap_or_else(|| {
                    vec![
                        "mysqld".to_string(),
                        "--wsrep-recover".to_string(),
                        "--log-error=/dev/stderr".to_string(),
                    ]
                }),
        })
    }
}

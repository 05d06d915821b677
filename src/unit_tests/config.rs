// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::*;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    move |name: &str| vars.get(name).cloned()
}

#[test]
pub fn test_controller_config_defaults() {
    println!("Testing ControllerConfig::from_lookup() defaults...");
    let config = ControllerConfig::from_lookup(lookup_from(&[("HOSTNAME", "mdbc-7f9")])).unwrap();
    assert_eq!(config.workers, 1);
    assert_eq!(config.requeue_after, Duration::from_secs(60));
    assert_eq!(config.base_backoff, Duration::from_millis(5));
    assert_eq!(config.max_backoff, Duration::from_secs(1000));
    let election = config.leader_election;
    assert_eq!(election.lease_name, "mariadb-operator");
    assert_eq!(election.lease_namespace, "kube-system");
    assert_eq!(election.lease_duration, Duration::from_secs(15));
    assert_eq!(election.renew_deadline, Duration::from_secs(10));
    assert_eq!(election.retry_period, Duration::from_secs(2));
    assert!(election.identity.starts_with("mdbc-7f9_"));
    assert_eq!(election.identity.len(), "mdbc-7f9_".len() + 5);
}

#[test]
pub fn test_controller_config_overrides() {
    println!("Testing ControllerConfig::from_lookup() overrides...");
    let config = ControllerConfig::from_lookup(lookup_from(&[
        ("MDBC_IDENTITY", "replica-a"),
        ("MDBC_WORKERS", "4"),
        ("MDBC_LEASE_NAMESPACE", "databases"),
        ("MDBC_REQUEUE_SECONDS", "30"),
    ]))
    .unwrap();
    assert_eq!(config.leader_election.identity, "replica-a");
    assert_eq!(config.leader_election.lease_namespace, "databases");
    assert_eq!(config.workers, 4);
    assert_eq!(config.requeue_after, Duration::from_secs(30));
}

#[test]
pub fn test_controller_config_rejects_invalid_values() {
    println!("Testing ControllerConfig::from_lookup() validation...");
    assert_eq!(
        ControllerConfig::from_lookup(lookup_from(&[("MDBC_WORKERS", "0")])).unwrap_err(),
        ConfigError::InvalidEnv {
            name: "MDBC_WORKERS",
            value: "0".to_string()
        }
    );
    assert!(ControllerConfig::from_lookup(lookup_from(&[("MDBC_LEASE_DURATION_SECONDS", "soon")])).is_err());
    assert!(ControllerConfig::from_lookup(lookup_from(&[
        ("MDBC_LEASE_DURATION_SECONDS", "10"),
        ("MDBC_RENEW_DEADLINE_SECONDS", "10"),
    ]))
    .is_err());
}

#[test]
pub fn test_agent_config() {
    println!("Testing AgentConfig::from_lookup()...");
    let config = AgentConfig::from_lookup(lookup_from(&[
        ("MARIADBCLUSTER_NAME", "mdb"),
        ("MARIADBCLUSTER_NAMESPACE", "default"),
        ("HOSTNAME", "mdb-server-1"),
        ("MDBC_RECOVER_COMMAND", "mysqld --wsrep-recover --user=mysql"),
    ]))
    .unwrap();
    assert_eq!(config.cluster_name, "mdb");
    assert_eq!(config.hostname, "mdb-server-1");
    assert_eq!(config.state_file, PathBuf::from("/var/lib/mysql/grastate.dat"));
    assert_eq!(config.poll_interval, Duration::from_secs(5));
    assert_eq!(config.deadline, Duration::from_secs(3600));
    assert_eq!(
        config.recover_command,
        vec!["mysqld".to_string(), "--wsrep-recover".to_string(), "--user=mysql".to_string()]
    );
}

#[test]
pub fn test_agent_config_requires_identity() {
    println!("Testing AgentConfig::from_lookup() without required variables...");
    assert_eq!(
        AgentConfig::from_lookup(lookup_from(&[("MARIADBCLUSTER_NAME", "mdb"), ("HOSTNAME", "mdb-server-1")]))
            .unwrap_err(),
        ConfigError::MissingEnv("MARIADBCLUSTER_NAMESPACE")
    );
    assert_eq!(
        AgentConfig::from_lookup(lookup_from(&[
            ("MARIADBCLUSTER_NAME", ""),
            ("MARIADBCLUSTER_NAMESPACE", "default"),
            ("HOSTNAME", "mdb-server-1"),
        ]))
        .unwrap_err(),
        ConfigError::MissingEnv("MARIADBCLUSTER_NAME")
    );
}

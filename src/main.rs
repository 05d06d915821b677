// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use kube::{Client, CustomResourceExt};
use mariadb_controller::config::{AgentConfig, ControllerConfig};
use mariadb_controller::controllers::mariadb_controller::recovery::agent::{MysqldEngine, ReplicaAgent};
use mariadb_controller::controllers::mariadb_controller::trusted::exec_types::MariaDBCluster;
use mariadb_controller::shim_layer::controller_runtime::{run_controller, KubeClientShim};
use mariadb_controller::shim_layer::leader_election::LeaderGate;
use mariadb_controller::shim_layer::Error;
use std::env;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).map(String::as_str).unwrap_or_default();

    if cmd == "export" {
        println!("{}", serde_yaml::to_string(&MariaDBCluster::crd())?);
    } else if cmd == "run" {
        exit_on_signal();
        info!("running mariadb-controller");
        let config = ControllerConfig::from_env()?;
        let client = Client::try_default().await?;
        let gate = LeaderGate::new(client.clone(), config.leader_election.clone());
        match gate.run(run_controller(client, config)).await {
            Err(Error::LeaderElectionLost) => {
                error!("leader election lost, exiting");
                std::process::exit(1);
            }
            res => res?,
        }
        info!("controller terminated");
    } else if cmd == "init" {
        exit_on_signal();
        let config = AgentConfig::from_env()?;
        info!(cluster = %config.cluster_name, hostname = %config.hostname, "running recovery agent");
        let client = Client::try_default().await?;
        let engine = MysqldEngine::from_config(&config);
        let agent = ReplicaAgent::new(KubeClientShim::new(client), engine, config);
        match agent.run().await {
            Ok(step) => info!(?step, "replica released to start mariadb"),
            Err(err) => {
                error!("recovery failed: {}", err);
                std::process::exit(1);
            }
        }
    } else {
        warn!("wrong command; please use \"export\", \"run\" or \"init\"");
    }
    Ok(())
}

// SIGINT or SIGTERM ends the process right away with a non-zero code.
fn exit_on_signal() {
    tokio::spawn(async {
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => terminate,
            Err(err) => {
                warn!("failed to install SIGTERM handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = terminate.recv() => {},
        }
        info!("received termination signal, exiting");
        std::process::exit(1);
    });
}

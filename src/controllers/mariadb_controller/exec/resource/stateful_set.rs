// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::common::*;
use super::config_map::make_server_config_map_name;
use super::persistent_volume_claim::make_claim_spec;
use super::service_account::make_service_account_name;
use crate::controllers::mariadb_controller::exec::reconciler::state_after_converged;
use crate::controllers::mariadb_controller::trusted::{exec_types::*, phase::Phase, step::*};
use crate::kubernetes_api_objects::{api_method::*, json_merge_patch::field_scoped_patch};
use crate::reconciler::exec::resource_builder::ResourceBuilder;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, ExecAction, PersistentVolumeClaim,
    PodSpec, PodTemplateSpec, Probe, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::warn;

pub struct StatefulSetBuilder {}

impl ResourceBuilder<MariaDBCluster, MariaDBReconcileState, ReconcileError> for StatefulSetBuilder {
    fn get_request(mdb: &MariaDBCluster) -> KubeGetRequest {
        make_get_request::<StatefulSet>(mdb, make_stateful_set_name(mdb))
    }

    fn make(mdb: &MariaDBCluster, state: &MariaDBReconcileState) -> Result<DynamicObject, ReconcileError> {
        let sts = make_stateful_set(mdb, desired_phase(mdb, state))?;
        Ok(serde_json::from_value(stateful_set_to_value(&sts)?)?)
    }

    fn update(mdb: &MariaDBCluster, state: &MariaDBReconcileState, obj: DynamicObject) -> Result<Option<Value>, ReconcileError> {
        let found = unmarshal::<StatefulSet>(obj.clone())?;
        let merged = update_stateful_set(mdb, desired_phase(mdb, state), &found)?;
        Ok(field_scoped_patch(&serde_json::to_value(&obj)?, &stateful_set_to_value(&merged)?))
    }

    fn state_after_create(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<StatefulSet>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::StatefulSet, ConvergeOutcome::Created))
    }

    fn state_after_update(mdb: &MariaDBCluster, obj: DynamicObject, state: MariaDBReconcileState) -> Result<(MariaDBReconcileState, Option<KubeAPIRequest>), ReconcileError> {
        unmarshal::<StatefulSet>(obj)?;
        Ok(state_after_converged(mdb, state, SubResource::StatefulSet, ConvergeOutcome::Applied))
    }
}

// Container fields that come and go with the phase. They are spelled out as
// null when unset so that dropping one shows up as drift.
const PHASE_OWNED_CONTAINER_FIELDS: [&str; 5] = ["command", "args", "livenessProbe", "readinessProbe", "resources"];

fn stateful_set_to_value(sts: &StatefulSet) -> Result<Value, ReconcileError> {
    let mut value = serde_json::to_value(sts)?;
    if let Some(containers) = value
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    {
        for container in containers.iter_mut().filter_map(Value::as_object_mut) {
            for field in PHASE_OWNED_CONTAINER_FIELDS {
                container.entry(field).or_insert(Value::Null);
            }
        }
    }
    Ok(value)
}

pub fn make_stateful_set_name(mdb: &MariaDBCluster) -> String {
    make_server_name(mdb)
}

pub fn make_stateful_set(mdb: &MariaDBCluster, phase: Phase) -> Result<StatefulSet, ReconcileError> {
    let name = make_stateful_set_name(mdb);
    let labels = make_server_labels(mdb);
    Ok(StatefulSet {
        metadata: make_metadata(mdb, name.clone(), labels.clone())?,
        spec: Some(StatefulSetSpec {
            replicas: Some(phase.replicas(mdb.spec.replicas)),
            service_name: name,
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..LabelSelector::default()
            },
            pod_management_policy: Some("Parallel".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                ..StatefulSetUpdateStrategy::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(make_server_pod_spec(mdb, phase)),
            },
            volume_claim_templates: Some(vec![make_data_claim_template(mdb)]),
            ..StatefulSetSpec::default()
        }),
        status: None,
    })
}

fn make_data_claim_template(mdb: &MariaDBCluster) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(DATA_VOLUME.to_string()),
            labels: Some(make_server_labels(mdb)),
            ..ObjectMeta::default()
        },
        spec: Some(make_claim_spec(&mdb.spec.storages.data, "ReadWriteOnce")),
        status: None,
    }
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..EnvVar::default()
    }
}

fn volume_mount(name: &str, mount_path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: mount_path.to_string(),
        sub_path: sub_path.map(str::to_string),
        ..VolumeMount::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        container_port: port,
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

fn exec_probe(command: Vec<String>, initial_delay: i32, period: i32, timeout: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(command),
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        timeout_seconds: Some(timeout),
        ..Probe::default()
    }
}

pub fn make_server_pod_spec(mdb: &MariaDBCluster, phase: Phase) -> PodSpec {
    // Identical in every phase. A template change rolls the pods, and the
    // probes never see replicas held in the init agent.
    let liveness_probe = exec_probe(vec!["mysqladmin".to_string(), "ping".to_string()], 30, 5, 2);
    let readiness_probe = exec_probe(
        vec![
            "bash".to_string(),
            "-c".to_string(),
            "mysql --skip-column-names -B -e \"select variable_value from information_schema.global_status where variable_name='wsrep_local_state_comment'\" | grep -q Synced".to_string(),
        ],
        10,
        2,
        2,
    );
    PodSpec {
        service_account_name: Some(make_service_account_name(mdb)),
        init_containers: Some(vec![Container {
            name: "init".to_string(),
            image: Some(AGENT_IMAGE.to_string()),
            image_pull_policy: Some("Always".to_string()),
            command: Some(vec!["/mdbc".to_string(), "init".to_string()]),
            env: Some(vec![
                env_var("MARIADBCLUSTER_NAME", mdb.name_any()),
                env_var("MARIADBCLUSTER_NAMESPACE", mdb.namespace().unwrap_or_default()),
            ]),
            volume_mounts: Some(vec![
                volume_mount(CONFIG_VOLUME, CONFIG_DIR, None),
                volume_mount(DATA_VOLUME, DATA_DIR, None),
            ]),
            ..Container::default()
        }]),
        containers: vec![Container {
            name: "mariadb".to_string(),
            image: Some(format!("mariadb:{}", mdb.spec.version)),
            command: phase.server_command(),
            args: phase.server_args(),
            env: Some(vec![
                env_var("MYSQL_ALLOW_EMPTY_PASSWORD", "yes".to_string()),
                env_var("MYSQL_INITDB_SKIP_TZINFO", "yes".to_string()),
            ]),
            ports: Some(vec![
                container_port("mysql", MYSQL_PORT),
                container_port("wsrep", WSREP_PORT),
                container_port("ist", IST_PORT),
                container_port("sst", SST_PORT),
            ]),
            volume_mounts: Some(vec![
                volume_mount(CONFIG_VOLUME, &format!("{}/{}", CONFIG_DIR, OPERATOR_CNF), Some(OPERATOR_CNF)),
                volume_mount(CONFIG_VOLUME, &format!("{}/{}", CONFIG_DIR, USER_CNF), Some(USER_CNF)),
                volume_mount(DATA_VOLUME, DATA_DIR, None),
            ]),
            liveness_probe: Some(liveness_probe),
            readiness_probe: Some(readiness_probe),
            resources: mdb.spec.resources.clone(),
            ..Container::default()
        }],
        volumes: Some(vec![Volume {
            name: CONFIG_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(make_server_config_map_name(mdb)),
                ..ConfigMapVolumeSource::default()
            }),
            ..Volume::default()
        }]),
        ..PodSpec::default()
    }
}

fn claim_templates_match(found: &[PersistentVolumeClaim], made: &[PersistentVolumeClaim]) -> bool {
    found.len() == made.len()
        && found.iter().zip(made).all(|(f, m)| {
            let (f_spec, m_spec) = (f.spec.clone().unwrap_or_default(), m.spec.clone().unwrap_or_default());
            f.metadata.name == m.metadata.name
                && f_spec.access_modes == m_spec.access_modes
                && f_spec.storage_class_name == m_spec.storage_class_name
                && f_spec.resources.and_then(|r| r.requests).and_then(|r| r.get("storage").cloned())
                    == m_spec.resources.and_then(|r| r.requests).and_then(|r| r.get("storage").cloned())
        })
}

pub fn update_stateful_set(mdb: &MariaDBCluster, phase: Phase, found: &StatefulSet) -> Result<StatefulSet, ReconcileError> {
    let made = make_stateful_set(mdb, phase)?;
    let mut spec = made.spec;
    if let (Some(spec), Some(found_spec)) = (spec.as_mut(), found.spec.as_ref()) {
        // Claim templates are immutable once the StatefulSet exists.
        let found_templates = found_spec.volume_claim_templates.clone().unwrap_or_default();
        if !claim_templates_match(&found_templates, spec.volume_claim_templates.as_deref().unwrap_or_default()) {
            warn!(
                statefulset = %make_stateful_set_name(mdb),
                "volume claim templates differ from the cluster storage spec and cannot be changed in place"
            );
        }
        spec.volume_claim_templates = found_spec.volume_claim_templates.clone();
        // Annotations on the pod template (restarts triggered by hand, for one) are not ours.
        if let (Some(template_meta), Some(found_meta)) =
            (spec.template.metadata.as_mut(), found_spec.template.metadata.as_ref())
        {
            *template_meta = merge_object_meta(found_meta, template_meta.clone());
        }
    }
    Ok(StatefulSet {
        metadata: merge_object_meta(&found.metadata, made.metadata),
        spec,
        status: found.status.clone(),
    })
}

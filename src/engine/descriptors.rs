//! Kubernetes object descriptors built from a step [`Spec`].
//!
//! The pod keeps every container idle so that the step script can be
//! executed later through the exec subresource.

use super::spec::{ContainerSpec, Spec, NAME_LABEL, SCRIPT_ENV_VAR};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, EnvVarSource, LocalObjectReference, Pod, PodSpec, Secret,
    SecretKeySelector, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Key of the docker config document inside a pull secret.
pub const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

const DOCKER_CONFIG_SECRET_TYPE: &str = "kubernetes.io/dockerconfigjson";
const IDLE_COMMAND: &str = "tail -f /dev/null";

/// Build the pod running all containers of the spec.
pub fn to_pod(spec: &Spec) -> Pod {
    let mut labels = spec.pod_spec.labels.clone();
    labels.insert(NAME_LABEL.to_string(), spec.pod_spec.name.clone());

    let image_pull_secrets = spec.pull_secret.as_ref().map(|secret| {
        vec![LocalObjectReference {
            name: Some(secret.name.clone()),
        }]
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.pod_spec.name.clone()),
            namespace: Some(spec.pod_spec.namespace.clone()),
            labels: Some(labels),
            annotations: non_empty(&spec.pod_spec.annotations),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: spec
                .containers
                .iter()
                .map(|c| to_container(spec, c))
                .collect(),
            restart_policy: Some("Never".to_string()),
            node_selector: non_empty(&spec.pod_spec.node_selector),
            service_account_name: spec.pod_spec.service_account_name.clone(),
            image_pull_secrets,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn to_container(spec: &Spec, container: &ContainerSpec) -> Container {
    let mut env: Vec<EnvVar> = container
        .environment
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect();

    env.push(EnvVar {
        name: SCRIPT_ENV_VAR.to_string(),
        value: Some(container.script.clone()),
        value_from: None,
    });

    for secret in &container.secrets {
        env.push(EnvVar {
            name: secret.env.clone(),
            value: None,
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: Some(spec.pod_spec.name.clone()),
                    key: secret.key.clone(),
                    optional: None,
                }),
                ..Default::default()
            }),
        });
    }

    Container {
        name: container.id.clone(),
        image: Some(container.image.clone()),
        image_pull_policy: container.pull_policy.clone(),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
        args: Some(vec![IDLE_COMMAND.to_string()]),
        working_dir: container.working_dir.clone(),
        env: Some(env),
        security_context: container.privileged.then(|| SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the opaque secret holding the step's secret environment.
pub fn to_secret(spec: &Spec) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(spec.pod_spec.name.clone()),
            namespace: Some(spec.pod_spec.namespace.clone()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(spec.secrets.clone()),
        ..Default::default()
    }
}

/// Build the registry credential secret, if the spec carries one.
pub fn to_docker_config_secret(spec: &Spec) -> Option<Secret> {
    let pull_secret = spec.pull_secret.as_ref()?;

    let mut data = BTreeMap::new();
    data.insert(DOCKER_CONFIG_KEY.to_string(), pull_secret.data.clone());

    Some(Secret {
        metadata: ObjectMeta {
            name: Some(pull_secret.name.clone()),
            namespace: Some(spec.pod_spec.namespace.clone()),
            ..Default::default()
        },
        type_: Some(DOCKER_CONFIG_SECRET_TYPE.to_string()),
        string_data: Some(data),
        ..Default::default()
    })
}

fn non_empty(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

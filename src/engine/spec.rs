//! Step execution request and result types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carrying the pod name, used to filter list and watch requests.
pub const NAME_LABEL: &str = "io.rustci.name";

/// Environment variable holding the step script inside each container.
pub const SCRIPT_ENV_VAR: &str = "RUSTCI_SCRIPT";

/// Full execution request for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub pod_spec: PodSpec,
    #[serde(default)]
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub pull_secret: Option<PullSecret>,
    /// Secret material stored in the environment secret, keyed by secret name.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub service_account_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container name; also the id a [`Step`] refers to.
    pub id: String,
    pub image: String,
    #[serde(default)]
    pub pull_policy: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Environment variables sourced from the environment secret.
    #[serde(default)]
    pub secrets: Vec<SecretEnv>,
    #[serde(default)]
    pub script: String,
}

/// Maps an environment variable to a key of the environment secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretEnv {
    pub env: String,
    pub key: String,
}

/// Registry credentials stored as a docker config secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullSecret {
    pub name: String,
    /// Docker config JSON document.
    pub data: String,
}

/// One container of the pod to execute the step script in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Terminal result of running a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub exited: bool,
    pub exit_code: i32,
    pub oom_killed: bool,
}

impl Spec {
    pub fn name(&self) -> &str {
        &self.pod_spec.name
    }

    pub fn namespace(&self) -> &str {
        &self.pod_spec.namespace
    }

    /// Label selector matching only this run's pod.
    pub fn label_selector(&self) -> String {
        format!("{}={}", NAME_LABEL, self.pod_spec.name)
    }

    pub fn container(&self, id: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.id == id)
    }

    /// Fill in the namespace when the request left it empty.
    pub fn with_default_namespace(mut self, namespace: &str) -> Self {
        if self.pod_spec.namespace.trim().is_empty() {
            self.pod_spec.namespace = namespace.to_string();
        }
        self
    }
}

impl State {
    pub fn is_success(&self) -> bool {
        self.exited && self.exit_code == 0
    }
}

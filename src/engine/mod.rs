//! Kubernetes step engine
//!
//! This module runs one pipeline step inside a pod:
//! - Provisioning of the pod and its secrets
//! - Waiting for the pod to reach the running phase
//! - Executing the step script and streaming its output
//! - Best-effort teardown of everything that was created

pub mod client;
pub mod descriptors;
pub mod executor;
pub mod output;
pub mod provisioner;
pub mod readiness;
pub mod spec;
pub mod teardown;

pub use client::{ClusterClient, KubeClusterClient, PodSnapshot};
pub use output::{shared, LineWriter, Output};
pub use spec::{ContainerSpec, PodSpec, PullSecret, SecretEnv, Spec, State, Step};

use crate::config::EngineConfig;
use crate::error::{CombinedError, EngineError, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle operations exposed to the pipeline runner.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Create the resources backing the spec.
    async fn setup(&self, ctx: &CancellationToken, spec: &Spec) -> Result<()>;

    /// Wait for the pod and execute the step, writing its output to `output`.
    async fn run(
        &self,
        ctx: &CancellationToken,
        spec: &Spec,
        step: &Step,
        output: Output,
    ) -> Result<State>;

    /// Delete the resources backing the spec, reporting every failure.
    ///
    /// Cleanup is attempted in full even when `ctx` is already cancelled.
    async fn destroy(
        &self,
        ctx: &CancellationToken,
        spec: &Spec,
    ) -> std::result::Result<(), CombinedError>;
}

/// Behavior switches for [`Kubernetes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Fail the readiness wait when the pod terminates before running.
    pub fail_on_terminal_phase: bool,
}

impl From<&EngineConfig> for EngineOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            fail_on_terminal_phase: config.fail_on_terminal_phase,
        }
    }
}

/// Kubernetes pipeline engine.
pub struct Kubernetes<C = KubeClusterClient> {
    client: C,
    options: EngineOptions,
}

impl Kubernetes<KubeClusterClient> {
    /// Out-of-cluster engine using the given kubeconfig.
    pub async fn from_kubeconfig(path: &std::path::Path) -> Result<Self> {
        let client = KubeClusterClient::from_kubeconfig(path).await?;
        Ok(Self::with_client(client, EngineOptions::default()))
    }

    /// In-cluster engine using the pod's service account.
    pub fn in_cluster() -> Result<Self> {
        let client = KubeClusterClient::in_cluster()?;
        Ok(Self::with_client(client, EngineOptions::default()))
    }

    /// Engine using kube's default config inference.
    pub async fn try_default() -> Result<Self> {
        let client = KubeClusterClient::try_default().await?;
        Ok(Self::with_client(client, EngineOptions::default()))
    }

    /// Engine configured from the environment-derived [`EngineConfig`].
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let client = if let Some(path) = &config.kubeconfig {
            KubeClusterClient::from_kubeconfig(path).await?
        } else if config.in_cluster {
            KubeClusterClient::in_cluster()?
        } else {
            KubeClusterClient::try_default().await?
        };
        Ok(Self::with_client(client, EngineOptions::from(config)))
    }
}

impl<C: ClusterClient> Kubernetes<C> {
    pub fn with_client(client: C, options: EngineOptions) -> Self {
        Self { client, options }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl<C: ClusterClient> Engine for Kubernetes<C> {
    async fn setup(&self, ctx: &CancellationToken, spec: &Spec) -> Result<()> {
        info!("Setting up pod {}/{}", spec.namespace(), spec.name());
        provisioner::setup(&self.client, ctx, spec).await
    }

    async fn run(
        &self,
        ctx: &CancellationToken,
        spec: &Spec,
        step: &Step,
        output: Output,
    ) -> Result<State> {
        if spec.container(&step.id).is_none() {
            return Err(EngineError::Validation(format!(
                "Step {} does not match any container of pod {}",
                step.id,
                spec.name()
            )));
        }

        debug!("Waiting for pod {}/{}", spec.namespace(), spec.name());
        readiness::wait_for_ready(
            &self.client,
            ctx,
            spec,
            self.options.fail_on_terminal_phase,
        )
        .await?;

        executor::start(&self.client, ctx, spec, step, output).await
    }

    async fn destroy(
        &self,
        _ctx: &CancellationToken,
        spec: &Spec,
    ) -> std::result::Result<(), CombinedError> {
        info!("Destroying pod {}/{}", spec.namespace(), spec.name());
        teardown::destroy(&self.client, spec).await
    }
}

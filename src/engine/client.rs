//! Cluster capability set used by the engine, and its `kube` implementation.

use super::output::LineWriter;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{AttachParams, DeleteParams, ListParams, PostParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Point-in-time list of pods together with the list's resource version.
#[derive(Debug, Clone, Default)]
pub struct PodSnapshot {
    pub pods: Vec<Pod>,
    pub resource_version: String,
}

/// Remote operations the engine needs from the orchestration platform.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()>;

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// Delete a pod; `grace_period` of `Some(0)` requests immediate termination.
    async fn delete_pod(&self, namespace: &str, name: &str, grace_period: Option<u32>)
        -> Result<()>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<PodSnapshot>;

    /// Subscribe to pod changes after `resource_version`.
    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<Pod>>>>;

    /// Run `command` in a container, forwarding its output until it exits.
    ///
    /// Returns [`EngineError::ExitStatus`] when the process exits non-zero.
    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdout: &mut LineWriter,
        stderr: &mut LineWriter,
    ) -> Result<()>;
}

/// [`ClusterClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from a kubeconfig file (out-of-cluster).
    pub async fn from_kubeconfig(path: &Path) -> Result<Self> {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            EngineError::Config(format!(
                "Failed to read kubeconfig {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| EngineError::Config(format!("Invalid kubeconfig: {}", e)))?;
        Ok(Self::new(Client::try_from(config)?))
    }

    /// Build a client from the service account mounted into the pod.
    pub fn in_cluster() -> Result<Self> {
        let config = Config::incluster().map_err(|e| {
            EngineError::Config(format!("Failed to load in-cluster config: {}", e))
        })?;
        Ok(Self::new(Client::try_from(config)?))
    }

    /// Build a client using kube's default config inference.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await?;
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        Api::<ConfigMap>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period: Option<u32>,
    ) -> Result<()> {
        let params = DeleteParams {
            grace_period_seconds: grace_period,
            ..Default::default()
        };
        self.pods(namespace).delete(name, &params).await?;
        Ok(())
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<PodSnapshot> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(PodSnapshot {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            pods: list.items,
        })
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<Pod>>>> {
        let pods = self.pods(namespace);
        let stream = pods
            .watch(&WatchParams::default().labels(label_selector), resource_version)
            .await?;
        Ok(stream.map_err(EngineError::from).boxed())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
        stdout: &mut LineWriter,
        stderr: &mut LineWriter,
    ) -> Result<()> {
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let mut attached = self
            .pods(namespace)
            .exec(pod, command.to_vec(), &params)
            .await?;

        let status = attached.take_status();
        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();

        tokio::try_join!(pump(stdout_reader, stdout), pump(stderr_reader, stderr))?;

        let status = match status {
            Some(status) => status.await,
            None => None,
        };

        attached
            .join()
            .await
            .map_err(|e| EngineError::Exec(e.to_string()))?;

        classify_status(status)
    }
}

async fn pump<R>(reader: Option<R>, sink: &mut LineWriter) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut buf = [0u8; 4096];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        sink.write(&buf[..n]).await?;
    }
}

/// Map the exec status object onto the engine's result shape.
pub(crate) fn classify_status(status: Option<Status>) -> Result<()> {
    let Some(status) = status else {
        return Err(EngineError::Exec(
            "exec stream closed without a status".to_string(),
        ));
    };

    if status.status.as_deref() == Some("Success") {
        return Ok(());
    }

    if status.reason.as_deref() == Some("NonZeroExitCode") {
        let code = status
            .details
            .as_ref()
            .and_then(|d| d.causes.as_ref())
            .and_then(|causes| {
                causes
                    .iter()
                    .find(|c| c.reason.as_deref() == Some("ExitCode"))
            })
            .and_then(|cause| cause.message.as_deref())
            .and_then(|message| message.trim().parse::<i32>().ok());

        if let Some(code) = code {
            debug!("Remote process exited with code {}", code);
            return Err(EngineError::ExitStatus(code));
        }
    }

    Err(EngineError::Exec(
        status
            .message
            .unwrap_or_else(|| "exec failed without a message".to_string()),
    ))
}

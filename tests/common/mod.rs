//! In-memory cluster used by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{Pod, PodStatus, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::WatchEvent;
use kube::core::ErrorResponse;
use rustci_kube_engine::engine::{
    ClusterClient, ContainerSpec, LineWriter, PodSnapshot, PodSpec, PullSecret, Spec, Step,
};
use rustci_kube_engine::{EngineError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type WatchSender = UnboundedSender<Result<WatchEvent<Pod>>>;

type Key = (String, String);

/// How the fake exec call ends.
#[derive(Debug, Clone)]
pub enum ExecOutcome {
    Success,
    Exit(i32),
    Transport(String),
    /// Never returns; only cancellation ends the call.
    Hang,
}

#[derive(Debug, Clone)]
pub struct ExecScript {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub outcome: ExecOutcome,
}

impl Default for ExecScript {
    fn default() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            outcome: ExecOutcome::Success,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecCall {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub command: Vec<String>,
}

#[derive(Default)]
struct ClusterState {
    secrets: BTreeMap<Key, Secret>,
    pods: BTreeMap<Key, Pod>,
    config_maps: BTreeSet<Key>,
    failures: HashMap<String, (u16, String)>,
    calls: Vec<String>,
    pod_grace_periods: Vec<Option<u32>>,
    watch_streams: VecDeque<UnboundedReceiver<Result<WatchEvent<Pod>>>>,
    watch_calls: usize,
    list_calls: usize,
    exec_script: ExecScript,
    exec_calls: Vec<ExecCall>,
}

/// Cloneable handle to a shared in-memory cluster.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

pub fn api_error(code: u16, reason: &str) -> EngineError {
    EngineError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    }))
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of `operation` fail with the given API status.
    pub fn fail_on(&self, operation: &str, code: u16, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation.to_string(), (code, reason.to_string()));
    }

    /// Queue a watch stream; each `watch_pods` call consumes one.
    pub fn watch_channel(&self) -> WatchSender {
        let (tx, rx) = unbounded_channel();
        self.state.lock().unwrap().watch_streams.push_back(rx);
        tx
    }

    pub fn set_exec_script(&self, script: ExecScript) {
        self.state.lock().unwrap().exec_script = script;
    }

    /// Store a pod directly, bypassing `create_pod`.
    pub fn insert_pod(&self, namespace: &str, pod: Pod) {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.state
            .lock()
            .unwrap()
            .pods
            .insert((namespace.to_string(), name), pod);
    }

    pub fn insert_config_map(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .config_maps
            .insert((namespace.to_string(), name.to_string()));
    }

    pub fn secret_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .secrets
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .pods
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let state = self.state.lock().unwrap();
        state
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.secrets.len() + state.pods.len() + state.config_maps.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn pod_grace_periods(&self) -> Vec<Option<u32>> {
        self.state.lock().unwrap().pod_grace_periods.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    pub fn watch_calls(&self) -> usize {
        self.state.lock().unwrap().watch_calls
    }

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.state.lock().unwrap().exec_calls.clone()
    }

    fn begin(&self, operation: &str, target: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", operation, target));
        match state.failures.get(operation) {
            Some((code, reason)) => Err(api_error(*code, reason)),
            None => Ok(()),
        }
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let Some((label, value)) = selector.split_once('=') else {
        return false;
    };
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(label))
        .map(|v| v == value)
        .unwrap_or(false)
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        self.begin("create_secret", &format!("{}/{}", namespace, name))?;
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, &name);
        if state.secrets.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.secrets.insert(k, secret.clone());
        Ok(())
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<()> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.begin("create_pod", &format!("{}/{}", namespace, name))?;
        let mut state = self.state.lock().unwrap();
        let k = key(namespace, &name);
        if state.pods.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists"));
        }
        state.pods.insert(k, pod.clone());
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        self.begin("delete_secret", &format!("{}/{}", namespace, name))?;
        match self.state.lock().unwrap().secrets.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        self.begin("delete_config_map", &format!("{}/{}", namespace, name))?;
        if self
            .state
            .lock()
            .unwrap()
            .config_maps
            .remove(&key(namespace, name))
        {
            Ok(())
        } else {
            Err(api_error(404, "NotFound"))
        }
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period: Option<u32>,
    ) -> Result<()> {
        self.state.lock().unwrap().pod_grace_periods.push(grace_period);
        self.begin("delete_pod", &format!("{}/{}", namespace, name))?;
        match self.state.lock().unwrap().pods.remove(&key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(api_error(404, "NotFound")),
        }
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<PodSnapshot> {
        self.begin("list_pods", &format!("{}?{}", namespace, label_selector))?;
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        let pods = state
            .pods
            .iter()
            .filter(|((ns, _), pod)| ns == namespace && matches_selector(pod, label_selector))
            .map(|(_, pod)| pod.clone())
            .collect();
        // Every list observes a newer resource version.
        Ok(PodSnapshot {
            pods,
            resource_version: state.list_calls.to_string(),
        })
    }

    async fn watch_pods(
        &self,
        namespace: &str,
        label_selector: &str,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<Pod>>>> {
        self.begin(
            "watch_pods",
            &format!("{}?{}@{}", namespace, label_selector, resource_version),
        )?;
        let mut state = self.state.lock().unwrap();
        state.watch_calls += 1;
        match state.watch_streams.pop_front() {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Ok(stream::pending().boxed()),
        }
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
        self.begin("exec", &format!("{}/{}/{}", namespace, pod, container))?;
        let script = {
            let mut state = self.state.lock().unwrap();
            state.exec_calls.push(ExecCall {
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                container: container.to_string(),
                command: command.to_vec(),
            });
            state.exec_script.clone()
        };

        // Deliver output in small chunks to exercise line buffering.
        for chunk in script.stdout.chunks(3) {
            stdout.write(chunk).await?;
        }
        for chunk in script.stderr.chunks(3) {
            stderr.write(chunk).await?;
        }

        match script.outcome {
            ExecOutcome::Success => Ok(()),
            ExecOutcome::Exit(code) => Err(EngineError::ExitStatus(code)),
            ExecOutcome::Transport(message) => Err(EngineError::Exec(message)),
            ExecOutcome::Hang => futures::future::pending().await,
        }
    }
}

/// Pod object with the given phase, as reported by the API server.
pub fn pod_in_phase(spec: &Spec, phase: &str) -> Pod {
    let mut labels = BTreeMap::new();
    labels.insert(
        rustci_kube_engine::engine::spec::NAME_LABEL.to_string(),
        spec.name().to_string(),
    );
    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name().to_string()),
            namespace: Some(spec.namespace().to_string()),
            labels: Some(labels),
            resource_version: Some("2".to_string()),
            ..Default::default()
        },
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn create_test_spec(name: &str, namespace: &str) -> Spec {
    Spec {
        pod_spec: PodSpec {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        },
        containers: vec![ContainerSpec {
            id: "step0".to_string(),
            image: "alpine:3".to_string(),
            script: "echo hello".to_string(),
            ..Default::default()
        }],
        pull_secret: None,
        secrets: BTreeMap::new(),
    }
}

pub fn with_pull_secret(mut spec: Spec) -> Spec {
    spec.pull_secret = Some(PullSecret {
        name: format!("{}-pull", spec.name()),
        data: r#"{"auths":{"registry.example.com":{"auth":"dXNlcjpwYXNz"}}}"#.to_string(),
    });
    spec
}

pub fn create_test_step() -> Step {
    Step {
        id: "step0".to_string(),
        name: "build".to_string(),
    }
}

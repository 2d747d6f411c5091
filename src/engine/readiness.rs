//! Waiting for the step pod to become runnable.
//!
//! The wait lists the pods matching the run label to get a consistent
//! baseline, checks a precondition against that snapshot, replays the listed
//! pods as `Added` events, and then watches from the snapshot's resource
//! version. This catches transitions that happen between creating the pod and
//! subscribing to its changes. When the watch ends or its resource version
//! expires, the whole sequence starts again from a fresh list.

use super::client::{ClusterClient, PodSnapshot};
use super::spec::Spec;
use crate::error::{EngineError, Result};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::WatchEvent;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const PHASE_RUNNING: &str = "Running";
pub const PHASE_SUCCEEDED: &str = "Succeeded";
pub const PHASE_FAILED: &str = "Failed";

/// Status code of a watch whose resource version is no longer retained.
const WATCH_EXPIRED: u16 = 410;

/// Block until `condition` accepts an event for the spec's pod.
///
/// Returns `Ok(())` without watching when the pod is absent from the list.
/// A watch that closes cleanly or expires (`410 Gone`) goes back to the list
/// step. Other watch error events and stream failures are fatal.
pub async fn wait_for<C, F>(
    client: &C,
    ctx: &CancellationToken,
    spec: &Spec,
    mut condition: F,
) -> Result<()>
where
    C: ClusterClient + ?Sized,
    F: FnMut(&WatchEvent<Pod>) -> Result<bool> + Send,
{
    let namespace = spec.namespace();
    let label = spec.label_selector();

    loop {
        let snapshot = tokio::select! {
            _ = ctx.cancelled() => return Err(EngineError::Cancelled),
            snapshot = client.list_pods(namespace, &label) => snapshot?,
        };

        if !contains_pod(&snapshot, spec.name()) {
            info!(
                "Pod {}/{} no longer exists, nothing to wait for",
                namespace,
                spec.name()
            );
            return Ok(());
        }

        let resource_version = snapshot.resource_version;
        for pod in snapshot.pods {
            if condition(&WatchEvent::Added(pod))? {
                return Ok(());
            }
        }

        debug!(
            "Watching pods with {} from resource version {}",
            label, resource_version
        );
        let mut stream = tokio::select! {
            _ = ctx.cancelled() => return Err(EngineError::Cancelled),
            stream = client.watch_pods(namespace, &label, &resource_version) => stream?,
        };

        loop {
            let next = tokio::select! {
                _ = ctx.cancelled() => return Err(EngineError::Cancelled),
                next = stream.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(EngineError::Watch(e.to_string())),
                None => {
                    warn!("Watch stream for {} closed, listing pods again", label);
                    break;
                }
            };

            match &event {
                WatchEvent::Bookmark(_) => continue,
                WatchEvent::Error(e) if e.code == WATCH_EXPIRED => {
                    warn!(
                        "Watch for {} expired at resource version {}, listing pods again",
                        label, resource_version
                    );
                    break;
                }
                WatchEvent::Error(e) => {
                    return Err(EngineError::Watch(format!(
                        "{} ({}): {}",
                        e.reason, e.code, e.message
                    )));
                }
                _ => {}
            }

            if condition(&event)? {
                return Ok(());
            }
        }
    }
}

/// Block until the spec's pod reports phase `Running`.
///
/// With `fail_on_terminal_phase` a pod that ends up `Failed` or `Succeeded`
/// without ever running fails the wait instead of blocking until cancelled.
pub async fn wait_for_ready<C>(
    client: &C,
    ctx: &CancellationToken,
    spec: &Spec,
    fail_on_terminal_phase: bool,
) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    let name = spec.name().to_string();
    wait_for(client, ctx, spec, |event| {
        is_ready(event, &name, fail_on_terminal_phase)
    })
    .await?;
    info!("Pod {}/{} is running", spec.namespace(), name);
    Ok(())
}

/// Readiness predicate applied to each observed event.
pub fn is_ready(event: &WatchEvent<Pod>, name: &str, fail_on_terminal_phase: bool) -> Result<bool> {
    let pod = match event {
        WatchEvent::Added(pod) | WatchEvent::Modified(pod) => pod,
        _ => return Ok(false),
    };
    if pod.metadata.name.as_deref() != Some(name) {
        return Ok(false);
    }

    match pod_phase(pod) {
        Some(PHASE_RUNNING) => Ok(true),
        Some(phase @ (PHASE_FAILED | PHASE_SUCCEEDED)) if fail_on_terminal_phase => {
            Err(EngineError::PodTerminated {
                name: name.to_string(),
                phase: phase.to_string(),
            })
        }
        phase => {
            debug!("Pod {} in phase {:?}, still waiting", name, phase);
            Ok(false)
        }
    }
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|s| s.phase.as_deref())
}

fn contains_pod(snapshot: &PodSnapshot, name: &str) -> bool {
    snapshot
        .pods
        .iter()
        .any(|pod| pod.metadata.name.as_deref() == Some(name))
}

//! Best-effort removal of every object a step run created.

use super::client::ClusterClient;
use super::spec::Spec;
use crate::error::{CombinedError, Result};
use tracing::{debug, info, warn};

/// Grace period requested for the pod: terminate immediately.
pub const POD_GRACE_PERIOD_SECONDS: u32 = 0;

/// Delete the pull secret, environment secret, config map and pod.
///
/// Every deletion is attempted. Objects that are already gone count as
/// deleted; all other failures are collected into the returned error.
pub async fn destroy<C>(client: &C, spec: &Spec) -> std::result::Result<(), CombinedError>
where
    C: ClusterClient + ?Sized,
{
    let namespace = spec.namespace();
    let name = spec.name();
    let mut errors = CombinedError::new();

    if let Some(pull_secret) = &spec.pull_secret {
        record(
            &mut errors,
            "secret",
            &pull_secret.name,
            client.delete_secret(namespace, &pull_secret.name).await,
        );
    }

    record(
        &mut errors,
        "secret",
        name,
        client.delete_secret(namespace, name).await,
    );

    record(
        &mut errors,
        "config map",
        name,
        client.delete_config_map(namespace, name).await,
    );

    record(
        &mut errors,
        "pod",
        name,
        client
            .delete_pod(namespace, name, Some(POD_GRACE_PERIOD_SECONDS))
            .await,
    );

    if errors.is_empty() {
        info!("Destroyed resources of {}/{}", namespace, name);
    } else {
        warn!(
            "Destroying resources of {}/{} failed: {}",
            namespace, name, errors
        );
    }
    errors.into_result()
}

fn record(errors: &mut CombinedError, kind: &str, name: &str, result: Result<()>) {
    match result {
        Ok(()) => debug!("Deleted {} {}", kind, name),
        Err(e) if e.is_not_found() => debug!("{} {} already deleted", kind, name),
        Err(e) => {
            warn!("Failed to delete {} {}: {}", kind, name, e);
            errors.push(e);
        }
    }
}

//! Creating the objects backing a step run.

use super::client::ClusterClient;
use super::descriptors::{to_docker_config_secret, to_pod, to_secret};
use super::spec::Spec;
use crate::error::{EngineError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Create the pull secret (if any), the environment secret and the pod.
///
/// Stops at the first failure without removing what was already created.
pub async fn setup<C>(client: &C, ctx: &CancellationToken, spec: &Spec) -> Result<()>
where
    C: ClusterClient + ?Sized,
{
    let namespace = spec.namespace();

    if let Some(pull_secret) = to_docker_config_secret(spec) {
        ensure_not_cancelled(ctx)?;
        client.create_secret(namespace, &pull_secret).await?;
        debug!(
            "Created pull secret {:?} in {}",
            pull_secret.metadata.name, namespace
        );
    }

    ensure_not_cancelled(ctx)?;
    client.create_secret(namespace, &to_secret(spec)).await?;
    debug!("Created secret {} in {}", spec.name(), namespace);

    ensure_not_cancelled(ctx)?;
    client.create_pod(namespace, &to_pod(spec)).await?;

    info!("Created pod {}/{}", namespace, spec.name());
    Ok(())
}

fn ensure_not_cancelled(ctx: &CancellationToken) -> Result<()> {
    if ctx.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

//! Executing the step script inside the running container.

use super::client::ClusterClient;
use super::output::{LineWriter, Output};
use super::spec::{Spec, State, Step, SCRIPT_ENV_VAR};
use crate::error::{EngineError, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Command run through exec; the script itself travels in an env variable.
pub fn script_command() -> Vec<String> {
    vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("echo \"${}\" | sh", SCRIPT_ENV_VAR),
    ]
}

/// Execute the step's script and build its terminal [`State`].
///
/// A non-zero exit of the remote process is reported through
/// `State::exit_code`; every other failure is returned as an error.
pub async fn start<C>(
    client: &C,
    ctx: &CancellationToken,
    spec: &Spec,
    step: &Step,
    output: Output,
) -> Result<State>
where
    C: ClusterClient + ?Sized,
{
    let mut stdout = LineWriter::new(output.clone());
    let mut stderr = LineWriter::new(output);
    let command = script_command();

    debug!(
        "Executing step {} in container {} of pod {}/{}",
        step.name,
        step.id,
        spec.namespace(),
        spec.name()
    );

    let result = tokio::select! {
        _ = ctx.cancelled() => Err(EngineError::Cancelled),
        result = client.exec(
            spec.namespace(),
            spec.name(),
            &step.id,
            &command,
            &mut stdout,
            &mut stderr,
        ) => result,
    };

    if let Err(e) = stdout.flush().await {
        warn!("Failed to flush stdout of step {}: {}", step.id, e);
    }
    if let Err(e) = stderr.flush().await {
        warn!("Failed to flush stderr of step {}: {}", step.id, e);
    }

    let state = state_from_result(result)?;
    info!(
        "Step {} finished with exit code {}",
        step.id, state.exit_code
    );
    Ok(state)
}

/// Classify the exec outcome.
pub fn state_from_result(result: Result<()>) -> Result<State> {
    let mut state = State {
        exited: true,
        exit_code: 0,
        oom_killed: false,
    };
    match result {
        Ok(()) => Ok(state),
        Err(EngineError::ExitStatus(code)) => {
            state.exit_code = code;
            Ok(state)
        }
        Err(e) => Err(e),
    }
}

use anyhow::{bail, Context};
use dotenv::dotenv;
use rustci_kube_engine::engine::{shared, Engine, Kubernetes, Spec, State, Step};
use rustci_kube_engine::EngineConfig;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Step request file: the pod to provision and the steps to run in it.
#[derive(Debug, Deserialize)]
struct StepRequest {
    spec: Spec,
    steps: Vec<Step>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::init().context("invalid engine configuration")?;

    let path: std::path::PathBuf = match std::env::args().nth(1) {
        Some(arg) => arg.into(),
        None => match &config.step_file {
            Some(path) => path.clone(),
            None => bail!("usage: rustci-kube-engine <step-file> (or set RUSTCI_STEP_FILE)"),
        },
    };

    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read step file {}", path.display()))?;
    let request: StepRequest = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse step file {}", path.display()))?;
    let spec = request.spec.with_default_namespace(&config.default_namespace);

    let engine = Kubernetes::from_config(&config)
        .await
        .context("failed to create Kubernetes client")?;

    let ctx = CancellationToken::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling step");
                ctx.cancel();
            }
        });
    }
    if let Some(timeout) = config.step_timeout {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("Step timeout of {:?} exceeded, cancelling", timeout);
            ctx.cancel();
        });
    }

    let outcome = execute(&engine, &ctx, &spec, &request.steps).await;

    if let Err(e) = engine.destroy(&ctx, &spec).await {
        error!("Cleanup incomplete: {}", e);
    }

    let state = outcome?;
    println!("{}", serde_json::to_string(&state)?);
    if !state.is_success() {
        std::process::exit(state.exit_code.clamp(1, 255));
    }
    Ok(())
}

async fn execute(
    engine: &Kubernetes,
    ctx: &CancellationToken,
    spec: &Spec,
    steps: &[Step],
) -> anyhow::Result<State> {
    engine
        .setup(ctx, spec)
        .await
        .with_context(|| format!("failed to set up pod {}", spec.name()))?;

    let output = shared(tokio::io::stdout());
    let mut last = State {
        exited: true,
        ..Default::default()
    };
    for step in steps {
        info!("Running step {} ({})", step.name, step.id);
        last = engine
            .run(ctx, spec, step, output.clone())
            .await
            .with_context(|| format!("step {} failed", step.id))?;
        if !last.is_success() {
            warn!("Step {} exited with code {}", step.id, last.exit_code);
            break;
        }
    }
    Ok(last)
}

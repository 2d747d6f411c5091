use crate::error::{EngineError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the engine binary, read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub kubeconfig: Option<PathBuf>,
    pub in_cluster: bool,
    pub default_namespace: String,
    pub fail_on_terminal_phase: bool,
    pub step_timeout: Option<Duration>,
    pub step_file: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            in_cluster: false,
            default_namespace: "default".to_string(),
            fail_on_terminal_phase: false,
            step_timeout: None,
            step_file: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn init() -> Result<EngineConfig> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<EngineConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = EngineConfig::default();

        let kubeconfig = lookup("KUBECONFIG")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        let in_cluster = parse_bool("RUSTCI_IN_CLUSTER", lookup("RUSTCI_IN_CLUSTER"))?
            .unwrap_or(defaults.in_cluster);
        let default_namespace = lookup("RUSTCI_NAMESPACE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.default_namespace);
        let fail_on_terminal_phase = parse_bool(
            "RUSTCI_FAIL_ON_TERMINAL_PHASE",
            lookup("RUSTCI_FAIL_ON_TERMINAL_PHASE"),
        )?
        .unwrap_or(defaults.fail_on_terminal_phase);

        let step_timeout = match lookup("RUSTCI_STEP_TIMEOUT") {
            Some(raw) => {
                let secs = raw.trim().parse::<u64>().map_err(|_| {
                    EngineError::Config(format!(
                        "RUSTCI_STEP_TIMEOUT must be a number of seconds, got '{}'",
                        raw
                    ))
                })?;
                if secs == 0 {
                    return Err(EngineError::Config(
                        "RUSTCI_STEP_TIMEOUT must be greater than 0".to_string(),
                    ));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let step_file = lookup("RUSTCI_STEP_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        if in_cluster && kubeconfig.is_some() {
            return Err(EngineError::Config(
                "KUBECONFIG and RUSTCI_IN_CLUSTER are mutually exclusive".to_string(),
            ));
        }

        Ok(EngineConfig {
            kubeconfig,
            in_cluster,
            default_namespace,
            fail_on_terminal_phase,
            step_timeout,
            step_file,
        })
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<Option<bool>> {
    let Some(raw) = value else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" | "" => Ok(Some(false)),
        _ => Err(EngineError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}

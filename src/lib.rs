//! RustCI Kubernetes engine - runs a single pipeline step in a pod
//!
//! This library provisions the pod backing a step, waits for it to run,
//! executes the step script through the exec subresource and tears the
//! resources down again.

pub mod config;
pub mod engine;
pub mod error;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{Engine, EngineOptions, Kubernetes, Spec, State, Step};
pub use error::{CombinedError, EngineError, Result};

use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Watch stream error: {0}")]
    Watch(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Pod {name} reached terminal phase {phase} before running")]
    PodTerminated { name: String, phase: String },

    /// The remote process exited with a non-zero status.
    #[error("Command terminated with exit code {0}")]
    ExitStatus(i32),

    #[error("Exec stream error: {0}")]
    Exec(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Returns true when the API server answered 404 for the request.
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }

    /// Returns true when the API server rejected a create because the object exists.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, EngineError::Kube(kube::Error::Api(resp)) if resp.code == 409)
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Validation(format!("YAML error: {}", err))
    }
}

/// Aggregate of independent failures collected during a best-effort operation.
///
/// An empty `CombinedError` is never surfaced as an error; use
/// [`CombinedError::into_result`] to turn the accumulator into a `Result`.
#[derive(Debug, Default)]
pub struct CombinedError {
    errors: Vec<EngineError>,
}

impl CombinedError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: EngineError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[EngineError] {
        &self.errors
    }

    pub fn into_result(self) -> std::result::Result<(), CombinedError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            1 => write!(f, "1 error occurred:\n\t* {}", self.errors[0]),
            n => {
                write!(f, "{} errors occurred:", n)?;
                for err in &self.errors {
                    write!(f, "\n\t* {}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for CombinedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .first()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

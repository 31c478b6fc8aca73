use thiserror::Error;

/// Errors that propagate synchronously out of the task layer.
///
/// Everything that happens while a run is in flight is reported through
/// [`crate::task::SearchEvent`] instead.
#[derive(Error, Debug)]
pub enum JobError {
    // Pre-flight
    #[error("no filter configuration path given")]
    MissingConfigPath,

    #[error("job {0} has been disposed")]
    Disposed(String),

    // Capture
    #[error("result capture already running for job {0}")]
    AlreadyCapturing(String),

    // Runtime
    #[error("engine failed to start: {0}")]
    EngineStart(String),
}

impl JobError {
    /// Whether this error was raised before any run state changed.
    pub fn is_preflight(&self) -> bool {
        matches!(self, Self::MissingConfigPath | Self::Disposed(_))
    }
}

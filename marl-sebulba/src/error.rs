//! Errors in the library.
use marl_core::MarlError;
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SebulbaError {
    /// The pipeline was stopped while waiting or before the call.
    #[error("Pipeline stopped")]
    PipelineStopped,

    /// The pipeline was used before `start()`.
    #[error("Pipeline not started")]
    PipelineNotStarted,

    /// A worker thread panicked.
    #[error("Thread {0} panicked")]
    ThreadPanicked(String),

    /// Invalid setup, raised before any thread starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Errors of the core library.
    #[error(transparent)]
    Marl(#[from] MarlError),
}

use thiserror::Error;

/// Failure taxonomy for build operations. Per-day failures inside a
/// batch never surface here; they travel as `day_error` chunks and the
/// batch itself still finishes.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider error: {0}")]
    Provider(#[from] anyhow::Error),

    /// The consumer went away (dropped the stream) before the work was
    /// done. Named so it is distinguishable from a genuine failure.
    #[error("cancelled")]
    Cancelled,
}

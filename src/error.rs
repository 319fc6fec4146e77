use thiserror::Error;

/// Pipeline-level failures. Per-photo extraction problems are recorded on the
/// photo row and never surface through this type; anything that does reach the
/// caller means the drain itself could not make progress safely.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The durability layer rejected a write. Photos already claimed stay in
    /// `processing` and are reset to `pending` at the next startup.
    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error("upload batch of {got} files exceeds the limit of {limit}")]
    CapacityExceeded { limit: usize, got: usize },
}

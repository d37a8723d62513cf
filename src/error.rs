/// Errors surfaced by configuration checks and the parallel reprojection driver.
/// Visibility queries never fail; they answer "visible" or "not visible".
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CullError {
    #[error("invalid reprojection parameters: {0}")]
    InvalidParams(String),

    #[error("renderer has no worker scratch planes; call prepare() first")]
    NotPrepared,

    #[error("worker id {worker} out of range (prepared for {workers} workers)")]
    WorkerOutOfRange { worker: usize, workers: usize },
}

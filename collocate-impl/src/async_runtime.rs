use crate::error::Result;

/// Runs CPU-bound work on the blocking pool so it cannot stall other
/// requests sharing the runtime.
pub async fn run_blocking<F, R>(work: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await?)
}

//! Running synchronous provider calls off the async scheduler
//!
//! Provider SDKs and CLIs block for seconds at a time. Each call is moved to
//! tokio's blocking pool so the runtime keeps servicing other sessions while
//! it waits.

use crate::error::{CloudError, Result};

/// Run a blocking provider call on the blocking thread pool and await it.
///
/// `operation` names the call in logs and in [`CloudError::Worker`] when the
/// worker thread panics or is cancelled by runtime shutdown.
pub async fn offload<T, F>(operation: &'static str, call: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tracing::trace!(operation, "offloading provider call");

    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| CloudError::Worker {
            operation: operation.to_string(),
            message: e.to_string(),
        })?
}

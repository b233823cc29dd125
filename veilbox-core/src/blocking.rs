//! Offloading CPU-heavy crypto off the async executor.

use crate::error::CoreResult;

/// Runs `f` on tokio's blocking pool.
///
/// Argon2id and X25519 operations go through here so the caller's event
/// loop keeps running while they compute.
pub(crate) async fn offload<T, F>(f: F) -> CoreResult<T>
where
    F: FnOnce() -> CoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

//! Task spawning abstraction.
//!
//! Core services spawn their background loops (event processing,
//! reconciliation, SSDP search, GENA renewal) through [`TaskSpawner`] instead
//! of calling `tokio::spawn` directly, so an embedding application can supply
//! its own runtime handle.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// # Example
///
/// ```ignore
/// let spawner = TokioSpawner::current();
/// spawner.spawn_until_cancelled(token.clone(), async move {
///     processor.run().await;
/// });
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Spawns a future that is dropped as soon as `token` is cancelled.
    fn spawn_until_cancelled<F>(&self, token: CancellationToken, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
        Self: Sized,
    {
        self.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = future => {}
            }
        });
    }
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

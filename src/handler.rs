//! The job handler seam
//!
//! The pacer treats jobs as opaque values and delegates all per-job work to a
//! [`JobHandler`]. Handlers run inside independent tokio tasks, many at once,
//! so they must be `Send + Sync` and safe to invoke concurrently.

use std::future::Future;

use async_trait::async_trait;
use eyre::Result;

/// Processes one job
///
/// Invoked once per dispatched job, from within that job's own task. A
/// returned error is forwarded to the error sink; it never stops dispatch.
#[async_trait]
pub trait JobHandler<J: Send + 'static>: Send + Sync {
    /// Handle a single job
    async fn handle(&self, job: J) -> Result<()>;
}

/// Adapter letting a plain async function serve as a [`JobHandler`]
///
/// Built with [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wrap an async function as a [`JobHandler`]
///
/// ```
/// use pacer::handler_fn;
///
/// let handler = handler_fn(|job: u64| async move {
///     tracing::debug!(job, "handled");
///     Ok::<(), eyre::Report>(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F> {
    FnHandler(f)
}

#[async_trait]
impl<J, F, Fut> JobHandler<J> for FnHandler<F>
where
    J: Send + 'static,
    F: Fn(J) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, job: J) -> Result<()> {
        (self.0)(job).await
    }
}

use crate::outcome::Reconciled;
use async_trait::async_trait;
use reaper_core::Resource;

/// Runs when an object carrying the handler's finalizer is being deleted
///
/// The runner removes the finalizer only on `Outcome::Done`; `Waiting` keeps
/// it in place, `Failed` is retried with backoff.
#[async_trait]
pub trait RemoveHandler<K: Resource>: Send + Sync {
    /// Finalizer this handler owns
    fn finalizer(&self) -> &str;

    async fn on_remove(&self, object: K) -> Reconciled<K>;
}

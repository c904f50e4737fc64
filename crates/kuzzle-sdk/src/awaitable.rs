//! Single-assignment result slot for one in-flight query.
//!
//! An [`AwaitableResult`] starts pending and is settled exactly once, either
//! resolved with a [`Response`] or rejected with a [`KuzzleError`]. Clones
//! share the same slot, so any number of tasks can await the outcome.

use std::{
    fmt,
    future::{Future, IntoFuture},
    pin::Pin,
    sync::Arc,
    time::Duration,
};

use tokio::sync::watch;
use tracing::debug;

use crate::{
    error::{KuzzleError, KuzzleResult},
    response::Response,
};

type Outcome = KuzzleResult<Response>;

/// Outcome of a query, awaitable by many tasks.
///
/// Settling never blocks: waiters are woken through a watch channel and
/// read the stored outcome themselves.
#[derive(Clone)]
pub struct AwaitableResult {
    slot: Arc<watch::Sender<Option<Outcome>>>,
}

impl AwaitableResult {
    /// Create a pending result.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Settle with a response. Returns `false` if already settled.
    pub fn resolve(&self, response: Response) -> bool {
        self.settle(Ok(response))
    }

    /// Settle with an error. Returns `false` if already settled.
    pub fn reject(&self, error: KuzzleError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Outcome) -> bool {
        let settled = self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        });
        if !settled {
            debug!("Ignoring settlement of an already settled query");
        }
        settled
    }

    /// Wait until the result is settled and return the outcome.
    pub async fn wait(&self) -> KuzzleResult<Response> {
        let mut rx = self.slot.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| Err(KuzzleError::internal("Query result dropped")))
    }

    /// Wait for the outcome, giving up after `duration`.
    ///
    /// A timeout leaves the result pending; other waiters are unaffected.
    pub async fn wait_timeout(&self, duration: Duration) -> KuzzleResult<Response> {
        tokio::time::timeout(duration, self.wait())
            .await
            .map_err(|_| KuzzleError::timeout(duration))?
    }

    /// Check if the result has been resolved or rejected.
    pub fn is_settled(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Check if the result has been rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(*self.slot.borrow(), Some(Err(_)))
    }

    /// The settled outcome, if any, without waiting.
    pub fn outcome(&self) -> Option<KuzzleResult<Response>> {
        self.slot.borrow().clone()
    }
}

impl Default for AwaitableResult {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AwaitableResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("AwaitableResult")
            .field("state", &state)
            .finish()
    }
}

impl IntoFuture for AwaitableResult {
    type Output = KuzzleResult<Response>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

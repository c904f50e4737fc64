//! Lock-free pending query management using `scc::HashMap`.
//!
//! This table tracks queries handed to the transport that still await a
//! response. Every entry leaves the table exactly once: taken when its
//! response arrives, or drained when the connection closes.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{
    awaitable::AwaitableResult,
    error::{KuzzleError, KuzzleResult},
    types::RequestId,
};

/// Default bound on the number of in-flight queries.
pub const DEFAULT_MAX_PENDING: usize = 1000;

/// One in-flight query.
#[derive(Clone, Debug)]
pub(crate) struct PendingQuery {
    pub(crate) result: AwaitableResult,
    /// Token the query was sent with.
    pub(crate) jwt: Option<String>,
}

impl PendingQuery {
    pub(crate) fn new(result: AwaitableResult, jwt: Option<String>) -> Self {
        Self { result, jwt }
    }
}

/// Lock-free table of pending queries keyed by request id.
///
/// Only the dispatcher mutates the table; callers get a read-only view.
///
/// ```compile_fail
/// let table = kuzzle_sdk::PendingQueryTable::default();
/// table.drain_all();
/// ```
pub struct PendingQueryTable {
    queries: scc::HashMap<RequestId, PendingQuery>,
    /// Slots held by inserted or in-progress entries, never above `max_pending`.
    reserved: AtomicUsize,
    max_pending: usize,
}

impl PendingQueryTable {
    /// Create a table holding at most `max_pending` queries.
    pub fn new(max_pending: usize) -> Self {
        Self {
            queries: scc::HashMap::new(),
            reserved: AtomicUsize::new(0),
            max_pending,
        }
    }

    /// Register a pending query.
    ///
    /// Fails with [`KuzzleError::CapacityExceeded`] when the table is full
    /// and with [`KuzzleError::DuplicateOperation`] when `id` is already
    /// pending; the existing entry is left untouched.
    pub(crate) fn insert(&self, id: RequestId, query: PendingQuery) -> KuzzleResult<()> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < self.max_pending).then_some(held + 1)
            })
            .map_err(|_| KuzzleError::capacity_exceeded("Too many pending queries"))?;

        self.queries.insert_sync(id, query).map_err(|(request_id, _)| {
            self.release(1);
            KuzzleError::DuplicateOperation { request_id }
        })
    }

    /// Remove and return the entry for `id`, if present.
    pub(crate) fn take(&self, id: &RequestId) -> Option<PendingQuery> {
        let (_, query) = self.queries.remove_sync(id)?;
        self.release(1);
        Some(query)
    }

    /// Remove and return every entry.
    pub(crate) fn drain_all(&self) -> Vec<(RequestId, PendingQuery)> {
        let mut drained = Vec::with_capacity(self.queries.len());
        self.queries.retain_sync(|id, query| {
            drained.push((id.clone(), query.clone()));
            false
        });
        self.release(drained.len());
        drained
    }

    fn release(&self, slots: usize) {
        self.reserved.fetch_sub(slots, Ordering::AcqRel);
    }

    /// Check if `id` is pending.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.queries.contains_sync(id)
    }

    /// Check if there's capacity for more queries.
    pub fn has_capacity(&self) -> bool {
        self.reserved.load(Ordering::Acquire) < self.max_pending
    }

    /// Get the current number of pending queries.
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl Default for PendingQueryTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}

//! Listener registry for SDK events.
//!
//! Two conditions are reported: an expired authentication token and a
//! response that matched no pending query. Listeners are plain closures;
//! registering one returns a [`ListenerId`] used to unregister it later.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use tracing::error;

use crate::response::Response;

/// Kind of event a listener subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The backend rejected a query because the authentication token expired.
    TokenExpired,
    /// A response arrived that matched no pending query.
    UnhandledResponse,
}

/// An event delivered to listeners.
#[derive(Clone, Debug)]
pub enum KuzzleEvent {
    TokenExpired,
    UnhandledResponse(Response),
}

impl KuzzleEvent {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TokenExpired => EventKind::TokenExpired,
            Self::UnhandledResponse(_) => EventKind::UnhandledResponse,
        }
    }
}

/// Handle identifying one registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Listener callback.
pub type Listener = Arc<dyn Fn(&KuzzleEvent) + Send + Sync>;

type ListenerList = RwLock<Vec<(ListenerId, Listener)>>;

/// Registry of event listeners.
#[derive(Default)]
pub struct EventNotifier {
    next_id: AtomicU64,
    token_expired: ListenerList,
    unhandled_response: ListenerList,
}

impl EventNotifier {
    /// Create an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    fn list(&self, kind: EventKind) -> &ListenerList {
        match kind {
            EventKind::TokenExpired => &self.token_expired,
            EventKind::UnhandledResponse => &self.unhandled_response,
        }
    }

    /// Register a listener for `kind`. Listeners run in registration order.
    pub fn register<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&KuzzleEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.list(kind).write().push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns `true` if it was registered for `kind`.
    pub fn unregister(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.list(kind).write();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Register a listener called when the authentication token expires.
    pub fn on_token_expired<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(EventKind::TokenExpired, move |_| listener())
    }

    /// Register a listener called with every unhandled response.
    pub fn on_unhandled_response<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.register(EventKind::UnhandledResponse, move |event| {
            if let KuzzleEvent::UnhandledResponse(response) = event {
                listener(response);
            }
        })
    }

    /// Invoke every listener registered for the event's kind.
    ///
    /// The listener list is snapshotted first, so listeners may register or
    /// unregister without deadlocking; such changes apply to the next
    /// trigger. A panicking listener is logged and skipped. Returns the
    /// number of listeners invoked.
    pub fn trigger(&self, event: &KuzzleEvent) -> usize {
        let kind = event.kind();
        let snapshot: Vec<(ListenerId, Listener)> = self.list(kind).read().clone();

        for (id, listener) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(?kind, listener = ?id, "Event listener panicked");
            }
        }
        snapshot.len()
    }

    /// Number of listeners registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.list(kind).read().len()
    }
}

impl fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventNotifier")
            .field("token_expired_count", &self.token_expired.read().len())
            .field(
                "unhandled_response_count",
                &self.unhandled_response.read().len(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_trigger_runs_in_registration_order() {
        let notifier = EventNotifier::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let calls = Arc::clone(&calls);
            notifier.on_token_expired(move || calls.lock().push(n));
        }

        assert_eq!(notifier.trigger(&KuzzleEvent::TokenExpired), 3);
        assert_eq!(*calls.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_conditions_are_independent() {
        let notifier = EventNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        notifier.on_token_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let invoked = notifier.trigger(&KuzzleEvent::UnhandledResponse(Response::default()));
        assert_eq!(invoked, 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister_by_handle() {
        let notifier = EventNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = notifier.on_token_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&hits);
        notifier.on_token_expired(move || {
            counter.fetch_add(10, Ordering::SeqCst);
        });

        assert!(notifier.unregister(EventKind::TokenExpired, id));
        assert!(!notifier.unregister(EventKind::TokenExpired, id));
        assert!(!notifier.unregister(EventKind::UnhandledResponse, id));

        notifier.trigger(&KuzzleEvent::TokenExpired);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert_eq!(notifier.listener_count(EventKind::TokenExpired), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let notifier = EventNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));

        notifier.on_token_expired(|| panic!("listener failure"));
        let counter = Arc::clone(&hits);
        notifier.on_token_expired(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(notifier.trigger(&KuzzleEvent::TokenExpired), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unhandled_response_payload() {
        let notifier = EventNotifier::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        notifier.on_unhandled_response(move |response| {
            *slot.lock() = response.request_id.clone();
        });

        let response = Response {
            request_id: Some("unknown".to_string()),
            ..Default::default()
        };
        notifier.trigger(&KuzzleEvent::UnhandledResponse(response));
        assert_eq!(seen.lock().as_deref(), Some("unknown"));
    }

    #[test]
    fn test_listener_may_register_during_trigger() {
        let notifier = Arc::new(EventNotifier::new());
        let inner = Arc::clone(&notifier);
        notifier.on_token_expired(move || {
            inner.on_token_expired(|| {});
        });

        assert_eq!(notifier.trigger(&KuzzleEvent::TokenExpired), 1);
        assert_eq!(notifier.listener_count(EventKind::TokenExpired), 2);
    }
}

//! Readiness registration.
//!
//! A [`Reactor`] hands out persistent watcher registrations: once armed, a
//! watcher keeps firing on every readiness event until it is cancelled. The
//! host event loop delivers each event by calling back into the
//! [`Negotiation`](super::Negotiation) that owns the watcher.

use tracing::trace;

/// Handle for one watcher registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Readiness a watcher waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

/// Event-loop collaborator for socket readiness.
pub trait Reactor<S: ?Sized> {
    /// Start watching `socket` for readability.
    fn on_readable(&mut self, socket: &S) -> WatcherId;

    /// Start watching `socket` for writability.
    fn on_writable(&mut self, socket: &S) -> WatcherId;

    /// Stop a watcher. Cancelling an unknown watcher is a no-op.
    fn cancel(&mut self, watcher: WatcherId);
}

/// Per-negotiation reactor used by the Tokio driver task.
///
/// A negotiation never holds more than one watcher, so this only remembers the
/// armed one; the driver awaits the matching readiness on the `TcpStream`.
#[derive(Debug, Default)]
pub struct TokioReactor {
    next_id: u64,
    armed: Option<(WatcherId, Interest)>,
}

impl TokioReactor {
    pub fn new() -> Self {
        Self::default()
    }

    /// The watcher currently armed, if any.
    pub fn armed(&self) -> Option<(WatcherId, Interest)> {
        self.armed
    }

    fn arm(&mut self, interest: Interest) -> WatcherId {
        self.next_id += 1;
        let id = WatcherId(self.next_id);
        if let Some((old, _)) = self.armed.replace((id, interest)) {
            trace!(old = old.as_u64(), "replacing armed watcher");
        }
        id
    }
}

impl<S: ?Sized> Reactor<S> for TokioReactor {
    fn on_readable(&mut self, _socket: &S) -> WatcherId {
        self.arm(Interest::Readable)
    }

    fn on_writable(&mut self, _socket: &S) -> WatcherId {
        self.arm(Interest::Writable)
    }

    fn cancel(&mut self, watcher: WatcherId) {
        if matches!(self.armed, Some((id, _)) if id == watcher) {
            self.armed = None;
        }
    }
}

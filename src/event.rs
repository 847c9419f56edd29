//! Events and the per-stream listener registry.
//!
//! Every occurrence on a stream is described by an [`Event`]. Listeners are
//! registered per [`EventKind`] and are invoked synchronously, in registration
//! order, from inside [`Engine::update`](crate::Engine::update).
//!
//! # Example
//!
//! ```no_run
//! use sockloop::{Engine, Event, EventKind};
//!
//! let mut engine = Engine::new();
//! let server = engine.new_stream();
//!
//! engine
//!     .add_listener(server, EventKind::Accept, |engine, _server, event| {
//!         if let Event::Accept { remote } = event {
//!             let _ = engine.write(*remote, b"welcome\n");
//!         }
//!     })
//!     .unwrap();
//! ```

use crate::Engine;
use crate::net::stream::StreamId;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Discriminant of an [`Event`], used as the registration key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Destroy,
    Accept,
    Listen,
    Connect,
    Close,
    Ready,
    Data,
    Line,
    Error,
    Timeout,
    Tick,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Destroy => "destroy",
            EventKind::Accept => "accept",
            EventKind::Listen => "listen",
            EventKind::Connect => "connect",
            EventKind::Close => "close",
            EventKind::Ready => "ready",
            EventKind::Data => "data",
            EventKind::Line => "line",
            EventKind::Error => "error",
            EventKind::Timeout => "timeout",
            EventKind::Tick => "tick",
        };

        f.write_str(name)
    }
}

/// One occurrence on a stream.
///
/// Borrowed payloads (`Data`, `Line`, `Error`) are only valid for the duration
/// of the listener call; copy them to keep them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event<'a> {
    /// Last event ever delivered for a stream; its id is invalid afterwards.
    Destroy,
    /// A connection was accepted on a listening stream. `remote` is the new,
    /// already connected stream.
    Accept { remote: StreamId },
    Listen,
    Connect,
    Close,
    /// The stream is connected and its outbound buffer is empty.
    Ready,
    /// Bytes received by the last read.
    Data(&'a [u8]),
    /// One complete line, terminator stripped.
    Line(&'a [u8]),
    Error(&'a str),
    Timeout,
    Tick,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Destroy => EventKind::Destroy,
            Event::Accept { .. } => EventKind::Accept,
            Event::Listen => EventKind::Listen,
            Event::Connect => EventKind::Connect,
            Event::Close => EventKind::Close,
            Event::Ready => EventKind::Ready,
            Event::Data(_) => EventKind::Data,
            Event::Line(_) => EventKind::Line,
            Event::Error(_) => EventKind::Error,
            Event::Timeout => EventKind::Timeout,
            Event::Tick => EventKind::Tick,
        }
    }
}

/// Receives events for the stream and kind it was registered on.
///
/// Implemented for every `FnMut(&mut Engine, StreamId, &Event<'_>)` closure;
/// implement it on a struct to keep typed state alongside the callback.
pub trait Listener {
    fn on_event(&mut self, engine: &mut Engine, stream: StreamId, event: &Event<'_>);
}

impl<F> Listener for F
where
    F: FnMut(&mut Engine, StreamId, &Event<'_>),
{
    fn on_event(&mut self, engine: &mut Engine, stream: StreamId, event: &Event<'_>) {
        self(engine, stream, event)
    }
}

/// Identifies a single registration, for [`Engine::remove_listener`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

pub(crate) type SharedListener = Rc<RefCell<dyn Listener>>;

/// Ordered registrations of one stream, grouped by kind.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<EventKind, Vec<(ListenerId, SharedListener)>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&mut self, kind: EventKind, id: ListenerId, listener: SharedListener) {
        self.entries.entry(kind).or_default().push((id, listener));
    }

    /// Removes the registration `id`; returns whether one was found.
    pub(crate) fn remove(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(listeners) = self.entries.get_mut(&kind) else {
            return false;
        };

        match listeners.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove_all(&mut self, kind: EventKind) {
        self.entries.remove(&kind);
    }

    pub(crate) fn has(&self, kind: EventKind) -> bool {
        self.entries
            .get(&kind)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    /// Stable copy of the registrations for `kind`, in registration order.
    pub(crate) fn snapshot(&self, kind: EventKind) -> Vec<SharedListener> {
        self.entries
            .get(&kind)
            .map(|listeners| listeners.iter().map(|(_, l)| Rc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Hands out registration ids, unique for the lifetime of an engine.
#[derive(Debug, Default)]
pub(crate) struct ListenerIds {
    next: u64,
}

impl ListenerIds {
    pub(crate) fn next(&mut self) -> ListenerId {
        self.next += 1;
        ListenerId(self.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ignore(_: &mut Engine, _: StreamId, _: &Event<'_>) {}

    fn noop() -> SharedListener {
        Rc::new(RefCell::new(ignore))
    }

    #[test]
    fn remove_targets_one_registration() {
        let mut ids = ListenerIds::default();
        let mut registry = Registry::new();
        let first = ids.next();
        let second = ids.next();
        registry.add(EventKind::Data, first, noop());
        registry.add(EventKind::Data, second, noop());

        assert!(registry.remove(EventKind::Data, first));
        assert_eq!(registry.snapshot(EventKind::Data).len(), 1);
        assert!(!registry.remove(EventKind::Data, first));
        assert!(!registry.remove(EventKind::Line, second));
        assert!(registry.has(EventKind::Data));
    }

    #[test]
    fn snapshot_is_stable_while_registry_changes() {
        let mut ids = ListenerIds::default();
        let mut registry = Registry::new();
        let only = ids.next();
        registry.add(EventKind::Tick, only, noop());

        let snapshot = registry.snapshot(EventKind::Tick);
        registry.remove_all(EventKind::Tick);

        assert_eq!(snapshot.len(), 1);
        assert!(!registry.has(EventKind::Tick));
    }

    #[test]
    fn event_kinds_match_variants() {
        let bytes = b"x";
        assert_eq!(Event::Data(bytes).kind(), EventKind::Data);
        assert_eq!(Event::Line(bytes).kind(), EventKind::Line);
        assert_eq!(Event::Error("boom").kind(), EventKind::Error);
        assert_eq!(EventKind::Timeout.to_string(), "timeout");
    }
}

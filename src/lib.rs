//! Single-threaded, callback-driven TCP socket engine.
//!
//! An [`Engine`] owns a set of non-blocking streams. The host creates streams,
//! attaches listeners for the [`Event`]s it cares about, opens them as servers
//! ([`Engine::listen`]) or clients ([`Engine::connect`]), and then calls
//! [`Engine::update`] in its own loop. Each update polls every socket once,
//! performs whatever I/O is ready, and runs the matching listeners inline.
//!
//! # Architecture
//!
//! - **Engine**: Stream registry and the update loop (poll, I/O, timeouts, ticks, teardown)
//! - **Stream**: One TCP endpoint with its state, buffers, and listeners
//! - **Event / Listener**: Tagged events and the callbacks registered for them
//! - **EngineBuilder**: Fluent builder for engine timing and the panic handler
//! - **ForeignDescriptor**: Host descriptors polled alongside the engine's sockets
//!
//! # Example
//!
//! ```no_run
//! use sockloop::{Engine, Event, EventKind};
//!
//! let mut engine = Engine::new();
//! let client = engine.new_stream();
//!
//! engine
//!     .add_listener(client, EventKind::Connect, |engine, stream, _| {
//!         let _ = engine.write(stream, b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n");
//!     })
//!     .unwrap();
//! engine
//!     .add_listener(client, EventKind::Line, |_, _, event| {
//!         if let Event::Line(line) = event {
//!             println!("{}", String::from_utf8_lossy(line));
//!         }
//!     })
//!     .unwrap();
//! engine.connect(client, "example.com", 80).unwrap();
//!
//! while engine.stream_count() > 0 {
//!     engine.update();
//! }
//! ```

mod builder;
mod error;
mod event;
mod net;
mod reactor;
mod timer;
mod utils;

pub use builder::EngineBuilder;
pub use error::{Error, Result};
pub use event::{Event, EventKind, Listener, ListenerId};
pub use net::stream::{State, StreamId};
pub use reactor::core::{
    DEFAULT_BACKLOG, DEFAULT_TICK_INTERVAL, DEFAULT_UPDATE_TIMEOUT, Engine, PanicHandler,
};
pub use reactor::foreign::{ForeignDescriptor, ForeignSet};

/// Crate version, also returned by [`Engine::version`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

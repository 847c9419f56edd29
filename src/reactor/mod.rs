//! Event-driven socket machinery under the engine.
//!
//! - [`core`]: The engine and its update loop
//! - [`poller`]: `poll(2)` readiness sets
//! - [`socket`]: Owned non-blocking socket handles
//! - [`io`]: Per-stream byte buffers
//! - [`foreign`]: Host descriptors polled alongside the engine's sockets

pub(crate) mod core;
pub(crate) mod foreign;
pub(crate) mod io;
pub(crate) mod poller;
pub(crate) mod socket;

//! Errors returned synchronously by the engine's stream API.
//!
//! Failures detected while the update loop drives a socket are not returned
//! from any call; they are delivered to listeners as [`Event::Error`].
//!
//! [`Event::Error`]: crate::Event::Error

use crate::net::stream::{State, StreamId};

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The stream was never created by this engine or has been destroyed.
    #[error("unknown or destroyed stream {0}")]
    UnknownStream(StreamId),

    #[error("stream {stream} is {actual}, operation requires {expected}")]
    InvalidState {
        stream: StreamId,
        expected: State,
        actual: State,
    },

    #[error("invalid address `{host}` port {port}")]
    InvalidAddress { host: String, port: u16 },

    #[error("could not resolve host `{host}`")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("could not create socket")]
    Socket(#[source] io::Error),

    #[error("could not bind socket to {address}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("could not listen on {address}")]
    Listen {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("could not connect to {address}")]
    Connect {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("could not set socket option")]
    SocketOption(#[source] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Streams: the engine's unit of connection, and the host-facing API over them.
//!
//! A stream starts [`State::Closed`] and unopened. It becomes a server with
//! [`Engine::listen`] or a client with [`Engine::connect`], or it is created
//! already connected when a listener accepts a peer. All calls below take the
//! [`StreamId`] handed out by the engine and fail with
//! [`Error::UnknownStream`] once the stream has been destroyed.

use crate::Engine;
use crate::error::{Error, Result};
use crate::event::{Event, EventKind, Listener, ListenerId, Registry};
use crate::net::utils::resolve;
use crate::reactor::core::DEFAULT_BACKLOG;
use crate::reactor::io::Buffer;
use crate::reactor::poller::Interest;
use crate::reactor::socket::Socket;
use crate::utils::slab::Key;

use std::cell::RefCell;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Handle to a stream owned by an [`Engine`].
///
/// Ids are never reused: a handle to a destroyed stream stays invalid even if
/// its slot is recycled.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub(crate) Key);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Connecting,
    Connected,
    Listening,
    /// Waiting to be torn down, after outbound data is flushed if the close
    /// was graceful.
    Closing,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Closed => "closed",
            State::Connecting => "connecting",
            State::Connected => "connected",
            State::Listening => "listening",
            State::Closing => "closing",
        };

        f.write_str(name)
    }
}

/// Event raised by an API call, delivered at the start of the next update.
#[derive(Debug)]
pub(crate) enum Notice {
    Listen,
    Error(String),
}

pub(crate) struct Stream {
    pub(crate) state: State,
    pub(crate) socket: Option<Socket>,
    pub(crate) inbound: Buffer,
    pub(crate) outbound: Buffer,
    pub(crate) listeners: Registry,
    pub(crate) notices: Vec<Notice>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) last_activity: Instant,
    pub(crate) bytes_sent: u64,
    pub(crate) bytes_received: u64,
    pub(crate) address: Option<IpAddr>,
    pub(crate) port: u16,
    pub(crate) no_delay: bool,
    pub(crate) connect_pending: bool,
    pub(crate) close_pending: bool,
    pub(crate) destroyed: bool,
}

impl Stream {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            state: State::Closed,
            socket: None,
            inbound: Buffer::new(),
            outbound: Buffer::new(),
            listeners: Registry::new(),
            notices: Vec::new(),
            timeout: None,
            last_activity: now,
            bytes_sent: 0,
            bytes_received: 0,
            address: None,
            port: 0,
            no_delay: false,
            connect_pending: false,
            close_pending: false,
            destroyed: false,
        }
    }

    pub(crate) fn accepted(socket: Socket, peer: SocketAddr, now: Instant) -> Self {
        Self {
            state: State::Connected,
            socket: Some(socket),
            address: Some(peer.ip()),
            port: peer.port(),
            ..Self::new(now)
        }
    }

    /// Descriptor and readiness interest for the next poll, if any.
    pub(crate) fn interest(&self) -> Option<(RawFd, Interest)> {
        if self.close_pending {
            return None;
        }
        let socket = self.socket.as_ref()?;

        let read = matches!(
            self.state,
            State::Connecting | State::Connected | State::Listening
        );
        let write = self.connect_pending
            || (!self.outbound.is_empty()
                && matches!(self.state, State::Connected | State::Closing));

        Some((
            socket.raw_fd(),
            Interest {
                read,
                write,
                priority: false,
            },
        ))
    }

    fn accepts_writes(&self) -> bool {
        !self.close_pending && self.state != State::Closing
    }
}

impl Engine {
    /// Creates an unopened stream.
    pub fn new_stream(&mut self) -> StreamId {
        let id = StreamId(self.streams.insert(Stream::new(Instant::now())));
        debug!(stream = %id, "stream created");

        id
    }

    fn stream_mut(&mut self, id: StreamId) -> Result<&mut Stream> {
        match self.streams.get_mut(id.0) {
            Some(stream) if !stream.destroyed => Ok(stream),
            _ => Err(Error::UnknownStream(id)),
        }
    }

    fn expect_unopened(&mut self, id: StreamId) -> Result<()> {
        let stream = self.stream_mut(id)?;

        if stream.state != State::Closed || stream.close_pending || stream.socket.is_some() {
            return Err(Error::InvalidState {
                stream: id,
                expected: State::Closed,
                actual: stream.state,
            });
        }

        Ok(())
    }

    /// Listens on every IPv4 interface with the default backlog.
    pub fn listen(&mut self, id: StreamId, port: u16) -> Result<()> {
        self.listen_on(id, "0.0.0.0", port, DEFAULT_BACKLOG)
    }

    /// Binds to `host:port` and starts listening.
    ///
    /// Port 0 picks an ephemeral port; [`port`](Self::port) reports the one
    /// actually bound. `Listen` is delivered on the next update. On error the
    /// stream is left unopened and no event is raised.
    pub fn listen_on(&mut self, id: StreamId, host: &str, port: u16, backlog: i32) -> Result<()> {
        self.expect_unopened(id)?;

        if host.is_empty() {
            return Err(Error::InvalidAddress {
                host: host.to_owned(),
                port,
            });
        }

        let address = resolve(host, port).map_err(|source| Error::Resolve {
            host: host.to_owned(),
            source,
        })?;

        let socket = Socket::new(&address).map_err(Error::Socket)?;
        socket.set_reuse_address().map_err(Error::SocketOption)?;
        socket
            .bind(&address)
            .map_err(|source| Error::Bind { address, source })?;
        socket
            .listen(backlog)
            .map_err(|source| Error::Listen { address, source })?;
        let local = socket.local_addr().unwrap_or(address);

        let stream = self.stream_mut(id)?;
        stream.socket = Some(socket);
        stream.state = State::Listening;
        stream.address = Some(local.ip());
        stream.port = local.port();
        stream.last_activity = Instant::now();
        stream.notices.push(Notice::Listen);

        debug!(stream = %id, address = %local, backlog, "listening");
        Ok(())
    }

    /// Starts a non-blocking connect to `host:port`.
    ///
    /// Host resolution is a blocking lookup. `Connect` fires once the
    /// handshake completes; data written before that is queued and sent after
    /// it. If resolution or the connect itself fails immediately, the error is
    /// returned and the stream is also torn down on the next update with
    /// `Error`, `Close` and `Destroy`.
    pub fn connect(&mut self, id: StreamId, host: &str, port: u16) -> Result<()> {
        self.expect_unopened(id)?;

        if host.is_empty() || port == 0 {
            return Err(Error::InvalidAddress {
                host: host.to_owned(),
                port,
            });
        }

        let address = match resolve(host, port) {
            Ok(address) => address,
            Err(source) => {
                self.abort_connect(id, format!("could not resolve host ({source})"));
                return Err(Error::Resolve {
                    host: host.to_owned(),
                    source,
                });
            }
        };

        let socket = Socket::new(&address).map_err(Error::Socket)?;
        if self.stream_mut(id)?.no_delay {
            socket.set_nodelay(true).map_err(Error::SocketOption)?;
        }

        if let Err(source) = socket.connect(&address) {
            self.abort_connect(id, format!("could not connect to server ({source})"));
            return Err(Error::Connect { address, source });
        }

        let stream = self.stream_mut(id)?;
        stream.socket = Some(socket);
        stream.state = State::Connecting;
        stream.connect_pending = true;
        stream.address = Some(address.ip());
        stream.port = address.port();
        stream.last_activity = Instant::now();

        debug!(stream = %id, %address, "connecting");
        Ok(())
    }

    fn abort_connect(&mut self, id: StreamId, message: String) {
        let Ok(stream) = self.stream_mut(id) else {
            return;
        };

        warn!(stream = %id, %message, "connect failed");
        stream.state = State::Closing;
        stream.outbound.clear();
        stream.notices.push(Notice::Error(message));
    }

    /// Queues `data` for sending.
    ///
    /// Accepted while unopened or connecting (sent once connected). Writes to
    /// a stream that is closing are dropped.
    pub fn write(&mut self, id: StreamId, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut(id)?;

        if !stream.accepts_writes() {
            trace!(stream = %id, bytes = data.len(), "dropping write to closing stream");
            return Ok(());
        }

        stream.outbound.extend_from_slice(data);
        Ok(())
    }

    /// Formats and queues text, e.g. `engine.writef(id, format_args!("{n}\n"))`.
    pub fn writef(&mut self, id: StreamId, args: fmt::Arguments<'_>) -> Result<()> {
        match args.as_str() {
            Some(text) => self.write(id, text.as_bytes()),
            None => self.write(id, fmt::format(args).as_bytes()),
        }
    }

    /// Closes once all queued data has been sent.
    ///
    /// A listening or unopened stream is closed immediately, as with
    /// [`close`](Self::close).
    pub fn end(&mut self, id: StreamId) -> Result<()> {
        let state = self.stream_mut(id)?.state;

        match state {
            State::Closing => Ok(()),
            State::Closed | State::Listening => self.close(id),
            State::Connecting | State::Connected => {
                self.stream_mut(id)?.state = State::Closing;
                debug!(stream = %id, "ending stream");
                Ok(())
            }
        }
    }

    /// Closes immediately, discarding queued data.
    ///
    /// The socket is released right away; `Close` and `Destroy` follow at the
    /// end of the current (or next) update. Closing twice is a no-op.
    pub fn close(&mut self, id: StreamId) -> Result<()> {
        let stream = self.stream_mut(id)?;
        if stream.close_pending {
            return Ok(());
        }

        stream.socket = None;
        stream.outbound.clear();
        stream.inbound.clear();
        stream.connect_pending = false;
        stream.notices.retain(|notice| !matches!(notice, Notice::Listen));
        stream.state = State::Closed;
        stream.close_pending = true;

        debug!(stream = %id, "closing stream");
        Ok(())
    }

    /// Sets the idle time after which `Timeout` fires; `None` or zero
    /// disables it. The idle clock restarts now.
    pub fn set_timeout(&mut self, id: StreamId, timeout: Option<Duration>) -> Result<()> {
        let stream = self.stream_mut(id)?;
        stream.timeout = timeout.filter(|timeout| !timeout.is_zero());
        stream.last_activity = Instant::now();

        Ok(())
    }

    /// Toggles `TCP_NODELAY`. Remembered and applied when the stream connects
    /// if it has no socket yet.
    pub fn set_no_delay(&mut self, id: StreamId, enabled: bool) -> Result<()> {
        let stream = self.stream_mut(id)?;
        stream.no_delay = enabled;

        match (&stream.socket, stream.state) {
            (Some(socket), State::Connecting | State::Connected) => {
                socket.set_nodelay(enabled).map_err(Error::SocketOption)
            }
            _ => Ok(()),
        }
    }

    /// Registers a closure for one kind of event on `id`.
    pub fn add_listener<F>(
        &mut self,
        id: StreamId,
        kind: EventKind,
        callback: F,
    ) -> Result<ListenerId>
    where
        F: FnMut(&mut Engine, StreamId, &Event<'_>) + 'static,
    {
        self.add_handler(id, kind, callback)
    }

    /// Registers any [`Listener`] for one kind of event on `id`.
    ///
    /// Listeners of the same kind run in registration order. A registration
    /// made while an event is being delivered takes effect from the next event.
    pub fn add_handler<L>(
        &mut self,
        id: StreamId,
        kind: EventKind,
        handler: L,
    ) -> Result<ListenerId>
    where
        L: Listener + 'static,
    {
        self.stream_mut(id)?;

        let listener = self.listener_ids.next();
        self.stream_mut(id)?
            .listeners
            .add(kind, listener, Rc::new(RefCell::new(handler)));

        trace!(stream = %id, %kind, ?listener, "listener added");
        Ok(listener)
    }

    /// Removes one registration. Returns `false` if it was already gone.
    pub fn remove_listener(
        &mut self,
        id: StreamId,
        kind: EventKind,
        listener: ListenerId,
    ) -> Result<bool> {
        Ok(self.stream_mut(id)?.listeners.remove(kind, listener))
    }

    pub fn remove_all_listeners(&mut self, id: StreamId, kind: EventKind) -> Result<()> {
        self.stream_mut(id)?.listeners.remove_all(kind);
        Ok(())
    }

    /// Current state, `None` once the stream is destroyed.
    pub fn state(&self, id: StreamId) -> Option<State> {
        self.streams.get(id.0).map(|stream| stream.state)
    }

    /// Peer address of a connected stream or bound address of a listener.
    pub fn address(&self, id: StreamId) -> Option<IpAddr> {
        self.streams.get(id.0).and_then(|stream| stream.address)
    }

    /// Peer or bound port; `Some(0)` while the stream is unopened.
    pub fn port(&self, id: StreamId) -> Option<u16> {
        self.streams.get(id.0).map(|stream| stream.port)
    }

    pub fn bytes_sent(&self, id: StreamId) -> Option<u64> {
        self.streams.get(id.0).map(|stream| stream.bytes_sent)
    }

    pub fn bytes_received(&self, id: StreamId) -> Option<u64> {
        self.streams.get(id.0).map(|stream| stream.bytes_received)
    }

    /// Underlying descriptor, while the stream owns a socket.
    pub fn raw_fd(&self, id: StreamId) -> Option<RawFd> {
        self.streams
            .get(id.0)
            .and_then(|stream| stream.socket.as_ref())
            .map(Socket::raw_fd)
    }
}

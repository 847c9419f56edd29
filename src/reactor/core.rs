use crate::VERSION;
use crate::builder::EngineBuilder;
use crate::event::{Event, EventKind, ListenerIds};
use crate::net::stream::{Notice, State, Stream, StreamId};
use crate::reactor::foreign::{ForeignDescriptor, ForeignDescriptors, ForeignSet};
use crate::reactor::poller::{Interest, PollSet, Readiness};
use crate::timer::{Ticker, unix_seconds};
use crate::utils::slab::Slab;

use std::io;
use std::mem;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_millis(1);
/// Backlog used by [`Engine::listen`].
pub const DEFAULT_BACKLOG: i32 = 511;

const READ_CHUNK: usize = 8 * 1024;
const MAX_READ_PER_PASS: usize = 256 * 1024;

/// Handler for fatal internal failures. See [`Engine::at_panic`].
pub type PanicHandler = Box<dyn Fn(&str)>;

#[derive(Clone, Copy, Debug)]
enum Source {
    Stream(StreamId),
    /// Set, position and set generation at poll time.
    Foreign(ForeignSet, usize, u64),
}

/// Single-threaded socket engine.
///
/// Owns every stream it creates. Nothing happens on a socket until the host
/// calls [`update`](Self::update), which polls all sockets once, performs the
/// non-blocking I/O, and delivers the resulting events to listeners.
///
/// # Example
/// ```no_run
/// use sockloop::{Engine, Event, EventKind};
///
/// let mut engine = Engine::new();
/// let server = engine.new_stream();
/// engine
///     .add_listener(server, EventKind::Accept, |engine, _, event| {
///         if let Event::Accept { remote } = *event {
///             engine
///                 .add_listener(remote, EventKind::Data, |engine, stream, event| {
///                     if let Event::Data(bytes) = event {
///                         let _ = engine.write(stream, bytes);
///                     }
///                 })
///                 .unwrap();
///         }
///     })
///     .unwrap();
/// engine.listen(server, 8000).unwrap();
///
/// loop {
///     engine.update();
/// }
/// ```
pub struct Engine {
    pub(crate) streams: Slab<Stream>,
    pub(crate) listener_ids: ListenerIds,
    foreign: ForeignDescriptors,
    poll_set: PollSet<Source>,
    ticker: Ticker,
    update_timeout: Duration,
    panic_handler: Option<PanicHandler>,
    updating: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with the default tick interval and update timeout.
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    pub(crate) fn with_config(
        tick_interval: Duration,
        update_timeout: Duration,
        panic_handler: Option<PanicHandler>,
    ) -> Self {
        debug!(?tick_interval, ?update_timeout, "engine initialised");

        Self {
            streams: Slab::new(),
            listener_ids: ListenerIds::default(),
            foreign: ForeignDescriptors::default(),
            poll_set: PollSet::new(),
            ticker: Ticker::new(tick_interval, Instant::now()),
            update_timeout,
            panic_handler,
            updating: false,
        }
    }

    pub fn version() -> &'static str {
        VERSION
    }

    /// Wall-clock time in seconds since the Unix epoch.
    pub fn time() -> f64 {
        unix_seconds()
    }

    /// Number of streams not yet destroyed, including unopened ones.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn set_tick_interval(&mut self, interval: Duration) {
        self.ticker.set_interval(interval);
    }

    pub fn set_update_timeout(&mut self, timeout: Duration) {
        self.update_timeout = timeout;
    }

    /// Installs the handler run on fatal internal failures and returns the
    /// previous one.
    ///
    /// The engine panics after the handler returns, so a handler that wants
    /// abort semantics should terminate the process itself.
    pub fn at_panic<F>(&mut self, handler: F) -> Option<PanicHandler>
    where
        F: Fn(&str) + 'static,
    {
        self.panic_handler.replace(Box::new(handler))
    }

    /// Replaces the descriptors polled for readability, returning the old set.
    pub fn set_read_fds(
        &mut self,
        descriptors: Vec<Box<dyn ForeignDescriptor>>,
    ) -> Vec<Box<dyn ForeignDescriptor>> {
        self.foreign.replace(ForeignSet::Read, descriptors)
    }

    /// Replaces the descriptors polled for writability, returning the old set.
    pub fn set_write_fds(
        &mut self,
        descriptors: Vec<Box<dyn ForeignDescriptor>>,
    ) -> Vec<Box<dyn ForeignDescriptor>> {
        self.foreign.replace(ForeignSet::Write, descriptors)
    }

    /// Replaces the descriptors polled for exceptional conditions, returning
    /// the old set.
    pub fn set_except_fds(
        &mut self,
        descriptors: Vec<Box<dyn ForeignDescriptor>>,
    ) -> Vec<Box<dyn ForeignDescriptor>> {
        self.foreign.replace(ForeignSet::Except, descriptors)
    }

    /// Closes every stream and delivers their `Close` and `Destroy` events.
    ///
    /// Called from a listener, the streams are closed immediately and the
    /// events follow in the reap phase of the running update.
    pub fn shutdown(&mut self) {
        debug!(streams = self.streams.len(), "engine shutting down");

        for key in self.streams.keys() {
            let _ = self.close(StreamId(key));
        }
        self.foreign.clear();

        if !self.updating {
            self.deliver_notices();
            self.reap();
        }
    }

    /// Runs one pass of the multiplexer.
    ///
    /// Blocks for at most the configured update timeout (less when a tick is
    /// due sooner). Must not be called from inside a listener; such calls are
    /// ignored.
    pub fn update(&mut self) {
        if self.updating {
            warn!("update called from inside a listener, ignoring");
            return;
        }
        self.updating = true;

        self.deliver_notices();

        let timeout = self
            .update_timeout
            .min(self.ticker.remaining(Instant::now()));
        let ready = self.poll(timeout);

        for (source, readiness) in &ready {
            if let Source::Stream(id) = *source {
                self.handle_stream(id, *readiness);
            }
        }

        for (source, readiness) in &ready {
            if let Source::Foreign(set, index, generation) = *source {
                self.run_foreign(set, index, generation, *readiness);
            }
        }

        let now = Instant::now();
        self.check_timeouts(now);
        self.tick(now);
        self.reap();

        self.updating = false;
    }

    /// Delivers `event` to every listener registered on `id` for its kind.
    ///
    /// Listeners are taken from a snapshot, so registrations made or removed
    /// during delivery only affect later events.
    pub(crate) fn emit(&mut self, id: StreamId, event: &Event<'_>) {
        let listeners = match self.streams.get(id.0) {
            Some(stream) => stream.listeners.snapshot(event.kind()),
            None => return,
        };

        for listener in listeners {
            let Ok(mut listener) = listener.try_borrow_mut() else {
                warn!(stream = %id, kind = %event.kind(), "listener is already running, skipping");
                continue;
            };

            listener.on_event(self, id, event);
        }
    }

    fn fatal(&self, message: &str) -> ! {
        error!(%message, "fatal engine failure");

        if let Some(handler) = &self.panic_handler {
            handler(message);
        }

        panic!("sockloop: {message}");
    }

    fn deliver_notices(&mut self) {
        for key in self.streams.keys() {
            let id = StreamId(key);
            let notices = match self.streams.get_mut(key) {
                Some(stream) => mem::take(&mut stream.notices),
                None => continue,
            };

            for notice in notices {
                match notice {
                    Notice::Listen => self.emit(id, &Event::Listen),
                    Notice::Error(message) => self.emit(id, &Event::Error(&message)),
                }
            }
        }
    }

    fn poll(&mut self, timeout: Duration) -> Vec<(Source, Readiness)> {
        self.poll_set.clear();

        for key in self.streams.keys() {
            if let Some((file_descriptor, interest)) =
                self.streams.get(key).and_then(Stream::interest)
            {
                self.poll_set
                    .register(file_descriptor, interest, Source::Stream(StreamId(key)));
            }
        }

        for (set, interest) in [
            (ForeignSet::Read, Interest::READ),
            (ForeignSet::Write, Interest::WRITE),
            (ForeignSet::Except, Interest::PRIORITY),
        ] {
            let generation = self.foreign.generation();
            for (index, descriptor) in self.foreign.set(set).iter().enumerate() {
                self.poll_set.register(
                    descriptor.raw_fd(),
                    interest,
                    Source::Foreign(set, index, generation),
                );
            }
        }

        trace!(descriptors = self.poll_set.len(), ?timeout, "polling");

        if let Err(error) = self.poll_set.wait(timeout) {
            self.fatal(&format!("readiness poll failed ({error})"));
        }

        self.poll_set.ready()
    }

    fn handle_stream(&mut self, id: StreamId, readiness: Readiness) {
        let Some(state) = self.open_state(id) else {
            return;
        };

        if readiness.readable || readiness.hangup {
            match state {
                State::Listening => self.accept_pending(id),
                State::Connected => self.read_available(id),
                _ => {}
            }
        }

        let connect_pending = self
            .streams
            .get(id.0)
            .is_some_and(|stream| stream.connect_pending && stream.socket.is_some());
        if connect_pending && (readiness.writable || readiness.error || readiness.hangup) {
            self.finish_connect(id);
        } else if readiness.writable {
            self.flush(id);
        }

        if readiness.error && self.open_state(id).is_some() {
            let error = self
                .streams
                .get(id.0)
                .and_then(|stream| stream.socket.as_ref())
                .and_then(|socket| socket.take_error().ok().flatten());
            self.fail(id, "socket error", error);
        }
    }

    /// State of a stream that still owns a socket and is not being closed.
    fn open_state(&self, id: StreamId) -> Option<State> {
        self.streams
            .get(id.0)
            .filter(|stream| !stream.close_pending && stream.socket.is_some())
            .map(|stream| stream.state)
    }

    fn accept_pending(&mut self, id: StreamId) {
        loop {
            let accepted = {
                let Some(stream) = self.streams.get_mut(id.0) else {
                    return;
                };
                if stream.state != State::Listening || stream.close_pending {
                    return;
                }
                let Some(socket) = stream.socket.as_ref() else {
                    return;
                };

                let accepted = socket.accept();
                stream.last_activity = Instant::now();
                accepted
            };

            match accepted {
                Ok(None) => return,
                Ok(Some((socket, peer))) => {
                    let remote =
                        StreamId(self.streams.insert(Stream::accepted(socket, peer, Instant::now())));
                    debug!(listener = %id, stream = %remote, %peer, "accepted connection");

                    self.emit(id, &Event::Accept { remote });
                    if self.open_state(remote) == Some(State::Connected) {
                        self.emit(remote, &Event::Ready);
                    }
                }
                Err(error) => {
                    let remote = StreamId(self.streams.insert(Stream::new(Instant::now())));

                    self.emit(id, &Event::Accept { remote });
                    self.fail(remote, "could not accept connection", Some(error));
                    return;
                }
            }
        }
    }

    fn read_available(&mut self, id: StreamId) {
        let mut received = Vec::new();
        let mut closed_by_peer = false;
        let mut failure = None;

        {
            let Some(socket) = self
                .streams
                .get(id.0)
                .and_then(|stream| stream.socket.as_ref())
            else {
                return;
            };

            let mut chunk = [0u8; READ_CHUNK];
            while received.len() < MAX_READ_PER_PASS {
                match socket.recv(&mut chunk) {
                    Ok(0) => {
                        closed_by_peer = true;
                        break;
                    }
                    Ok(read) => received.extend_from_slice(&chunk[..read]),
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }
        }

        if !received.is_empty() {
            if let Some(stream) = self.streams.get_mut(id.0) {
                stream.bytes_received += received.len() as u64;
                stream.last_activity = Instant::now();
            }
            trace!(stream = %id, bytes = received.len(), "received data");

            self.emit(id, &Event::Data(&received));
            self.frame_lines(id, &received);
        }

        if self.open_state(id) != Some(State::Connected) {
            return;
        }

        if let Some(error) = failure {
            self.fail(id, "could not read from socket", Some(error));
        } else if closed_by_peer {
            debug!(stream = %id, "peer closed connection");
            self.shut(id);
        }
    }

    fn frame_lines(&mut self, id: StreamId, received: &[u8]) {
        match self.streams.get_mut(id.0) {
            Some(stream)
                if stream.state == State::Connected
                    && !stream.close_pending
                    && stream.listeners.has(EventKind::Line) =>
            {
                stream.inbound.extend_from_slice(received);
            }
            _ => return,
        }

        loop {
            let line = match self.streams.get_mut(id.0) {
                Some(stream) if stream.state == State::Connected && !stream.close_pending => {
                    stream.inbound.take_line()
                }
                _ => None,
            };

            let Some(line) = line else {
                break;
            };

            self.emit(id, &Event::Line(&line));
        }
    }

    fn finish_connect(&mut self, id: StreamId) {
        let outcome = match self
            .streams
            .get(id.0)
            .and_then(|stream| stream.socket.as_ref())
        {
            Some(socket) => socket.take_error(),
            None => return,
        };

        let error = match outcome {
            Ok(None) => None,
            Ok(Some(error)) | Err(error) => Some(error),
        };

        if let Some(error) = error {
            self.fail(id, "could not connect to server", Some(error));
            return;
        }

        let (state, queued) = {
            let Some(stream) = self.streams.get_mut(id.0) else {
                return;
            };
            stream.connect_pending = false;
            stream.last_activity = Instant::now();
            if stream.state == State::Connecting {
                stream.state = State::Connected;
            }

            (stream.state, !stream.outbound.is_empty())
        };
        debug!(stream = %id, ?state, "connect completed");

        if state == State::Connected {
            self.emit(id, &Event::Connect);
            if !queued && self.open_state(id) == Some(State::Connected) {
                self.emit(id, &Event::Ready);
            }
        }

        self.flush(id);
    }

    /// Writes as much of the outbound buffer as the socket accepts. Fires
    /// `Ready` when a connected stream's buffer drains completely.
    fn flush(&mut self, id: StreamId) {
        let mut sent = 0usize;
        let mut failure = None;

        {
            let Some(stream) = self.streams.get_mut(id.0) else {
                return;
            };
            if stream.close_pending
                || stream.connect_pending
                || !matches!(stream.state, State::Connected | State::Closing)
            {
                return;
            }
            let Some(socket) = stream.socket.as_ref() else {
                return;
            };

            while !stream.outbound.is_empty() {
                match socket.send(stream.outbound.as_slice()) {
                    Ok(0) => break,
                    Ok(written) => {
                        stream.outbound.consume(written);
                        sent += written;
                    }
                    Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => {
                        failure = Some(error);
                        break;
                    }
                }
            }

            if sent > 0 {
                stream.bytes_sent += sent as u64;
                stream.last_activity = Instant::now();
            }
        }

        if let Some(error) = failure {
            self.fail(id, "could not write to socket", Some(error));
            return;
        }

        if sent == 0 {
            return;
        }
        trace!(stream = %id, bytes = sent, "sent data");

        let drained = self.streams.get(id.0).is_some_and(|stream| {
            stream.state == State::Connected && !stream.close_pending && stream.outbound.is_empty()
        });
        if drained {
            self.emit(id, &Event::Ready);
        }
    }

    /// Tears the stream down after a socket error and reports it.
    pub(crate) fn fail(&mut self, id: StreamId, what: &str, error: Option<io::Error>) {
        let message = match error {
            Some(error) => format!("{what} ({error})"),
            None => what.to_owned(),
        };
        warn!(stream = %id, %message, "stream error");

        self.shut(id);
        self.emit(id, &Event::Error(&message));
    }

    /// Releases the socket and leaves the stream `Closing`, to be reaped at the
    /// end of the pass.
    fn shut(&mut self, id: StreamId) {
        let Some(stream) = self.streams.get_mut(id.0) else {
            return;
        };

        stream.socket = None;
        stream.outbound.clear();
        stream.inbound.clear();
        stream.connect_pending = false;
        if !stream.close_pending {
            stream.state = State::Closing;
        }
    }

    fn run_foreign(
        &mut self,
        set: ForeignSet,
        index: usize,
        generation: u64,
        readiness: Readiness,
    ) {
        if generation != self.foreign.generation() {
            trace!(?set, index, "descriptor set replaced since poll, skipping");
            return;
        }

        let ready = match set {
            ForeignSet::Read => readiness.readable || readiness.hangup || readiness.error,
            ForeignSet::Write => readiness.writable || readiness.error,
            ForeignSet::Except => readiness.priority || readiness.error,
        };

        if !ready {
            return;
        }

        if let Some(descriptor) = self.foreign.set_mut(set).get_mut(index) {
            descriptor.on_ready();
        }
    }

    fn check_timeouts(&mut self, now: Instant) {
        for key in self.streams.keys() {
            let expired = match self.streams.get_mut(key) {
                Some(stream) if !stream.close_pending && stream.socket.is_some() => {
                    match stream.timeout {
                        Some(timeout) if now.duration_since(stream.last_activity) >= timeout => {
                            stream.last_activity = now;
                            true
                        }
                        _ => false,
                    }
                }
                _ => false,
            };

            if expired {
                let id = StreamId(key);
                debug!(stream = %id, "stream timed out");
                self.emit(id, &Event::Timeout);
            }
        }
    }

    fn tick(&mut self, now: Instant) {
        if !self.ticker.fire_expired(now) {
            return;
        }

        for key in self.streams.keys() {
            let live = self.streams.get(key).is_some_and(|stream| {
                let failed = stream.state == State::Closing && stream.socket.is_none();
                !stream.close_pending && !stream.destroyed && !failed
            });

            if live {
                self.emit(StreamId(key), &Event::Tick);
            }
        }
    }

    /// Finishes streams that are done: closed by the host, failed, or done
    /// flushing after `end`. Each gets `Close` then `Destroy` and is removed.
    fn reap(&mut self) {
        for key in self.streams.keys() {
            let done = match self.streams.get_mut(key) {
                Some(stream) if stream.notices.is_empty() && !stream.destroyed => {
                    let finished = stream.close_pending
                        || (stream.state == State::Closing
                            && (stream.socket.is_none() || stream.outbound.is_empty()));

                    if finished {
                        stream.socket = None;
                        stream.state = State::Closed;
                        stream.close_pending = true;
                    }
                    finished
                }
                _ => false,
            };

            if !done {
                continue;
            }

            let id = StreamId(key);
            debug!(stream = %id, "stream closed");
            self.emit(id, &Event::Close);

            if let Some(stream) = self.streams.get_mut(key) {
                stream.destroyed = true;
            }
            self.emit(id, &Event::Destroy);

            if let Some(mut stream) = self.streams.remove(key) {
                stream.listeners.clear();
            }
            debug!(stream = %id, "stream destroyed");
        }
    }
}

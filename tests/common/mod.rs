#![allow(dead_code)]

use sockloop::{Engine, EngineBuilder, Event, EventKind, StreamId};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

pub type Log = Rc<RefCell<Vec<String>>>;

pub const LIFECYCLE: &[EventKind] = &[
    EventKind::Connect,
    EventKind::Ready,
    EventKind::Error,
    EventKind::Close,
    EventKind::Destroy,
];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine() -> Engine {
    init_tracing();

    EngineBuilder::new()
        .update_timeout(Duration::from_millis(5))
        .tick_interval(Duration::from_secs(3600))
        .build()
}

/// Runs updates until `done` holds, failing the test after five seconds.
pub fn run_until(engine: &mut Engine, mut done: impl FnMut(&Engine) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !done(engine) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        engine.update();
    }
}

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn describe(event: &Event<'_>) -> String {
    match event {
        Event::Data(bytes) => format!("data:{}", String::from_utf8_lossy(bytes)),
        Event::Line(bytes) => format!("line:{}", String::from_utf8_lossy(bytes)),
        other => other.kind().to_string(),
    }
}

/// Appends a description of every `kinds` event on `stream` to `log`.
pub fn record(engine: &mut Engine, stream: StreamId, kinds: &[EventKind], log: &Log) {
    for &kind in kinds {
        let log = Rc::clone(log);
        engine
            .add_listener(stream, kind, move |_, _, event| {
                log.borrow_mut().push(describe(event))
            })
            .expect("register listener");
    }
}

pub fn entries(log: &Log) -> Vec<String> {
    log.borrow().clone()
}

mod common;

use common::{LIFECYCLE, entries, new_log, record, run_until};
use sockloop::{Error, EventKind, State};
use std::cell::Cell;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::rc::Rc;
use std::thread;

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

#[test]
fn refused_connection_reports_error_then_teardown() {
    let mut engine = common::engine();
    let client = engine.new_stream();
    let log = new_log();
    record(&mut engine, client, LIFECYCLE, &log);

    let port = closed_port();
    let _ = engine.connect(client, "127.0.0.1", port);

    run_until(&mut engine, |engine| engine.state(client).is_none());
    assert_eq!(entries(&log), ["error", "close", "destroy"]);
}

#[test]
fn unresolvable_host_fails_synchronously_and_tears_down() {
    let mut engine = common::engine();
    let client = engine.new_stream();
    let log = new_log();
    record(&mut engine, client, LIFECYCLE, &log);

    let result = engine.connect(client, "nonexistent.invalid", 80);
    assert!(matches!(result, Err(Error::Resolve { .. })));
    assert_eq!(engine.state(client), Some(State::Closing));

    run_until(&mut engine, |engine| engine.state(client).is_none());
    assert_eq!(entries(&log), ["error", "close", "destroy"]);
}

#[test]
fn writes_before_connect_are_sent_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut text = String::new();
        stream.read_to_string(&mut text).expect("read");
        text
    });

    let mut engine = common::engine();
    let client = engine.new_stream();
    let log = new_log();
    record(&mut engine, client, LIFECYCLE, &log);

    let sent_at_close = Rc::new(Cell::new(0));
    let sent = Rc::clone(&sent_at_close);
    engine
        .add_listener(client, EventKind::Close, move |engine, stream, _| {
            sent.set(engine.bytes_sent(stream).unwrap_or_default());
        })
        .unwrap();
    engine
        .add_listener(client, EventKind::Connect, |engine, stream, _| {
            engine.write(stream, b"three").unwrap();
            engine.end(stream).unwrap();
        })
        .unwrap();

    engine.write(client, b"one ").unwrap();
    engine.connect(client, "127.0.0.1", port).unwrap();
    engine.write(client, b"two ").unwrap();
    assert_eq!(engine.state(client), Some(State::Connecting));

    run_until(&mut engine, |engine| engine.state(client).is_none());
    assert_eq!(peer.join().unwrap(), "one two three");
    assert_eq!(entries(&log), ["connect", "close", "destroy"]);
    assert_eq!(sent_at_close.get(), 13);
}

#[test]
fn connect_without_queued_data_is_followed_by_ready() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    let peer = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut buffer = [0u8; 4];
        stream.read_exact(&mut buffer).expect("read");
        stream.write_all(b"pong").expect("write");
        buffer
    });

    let mut engine = common::engine();
    let client = engine.new_stream();
    let log = new_log();
    record(&mut engine, client, LIFECYCLE, &log);
    record(&mut engine, client, &[EventKind::Data], &log);
    engine.set_no_delay(client, true).unwrap();
    engine.connect(client, "127.0.0.1", port).unwrap();

    run_until(&mut engine, |engine| engine.state(client) == Some(State::Connected));
    engine.write(client, b"ping").unwrap();

    run_until(&mut engine, |_| log.borrow().iter().any(|entry| entry == "data:pong"));
    assert_eq!(&peer.join().unwrap(), b"ping");
    assert_eq!(entries(&log), ["connect", "ready", "ready", "data:pong"]);
    assert_eq!(engine.bytes_received(client), Some(4));

    engine.close(client).unwrap();
    engine.update();
    assert_eq!(engine.state(client), None);
}

#[test]
fn connect_requires_an_unopened_stream() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    engine.listen_on(server, "127.0.0.1", 0, 4).unwrap();

    assert!(matches!(
        engine.connect(server, "127.0.0.1", 80),
        Err(Error::InvalidState {
            expected: State::Closed,
            actual: State::Listening,
            ..
        })
    ));
}

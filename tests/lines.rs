mod common;

use common::{entries, new_log, record, run_until};
use sockloop::{Event, EventKind};
use std::io::Write;
use std::net::TcpStream;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

#[test]
fn lines_are_reassembled_across_reads() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    let log = new_log();

    let remote_log = Rc::clone(&log);
    engine
        .add_listener(server, EventKind::Accept, move |engine, _, event| {
            if let Event::Accept { remote } = *event {
                record(
                    engine,
                    remote,
                    &[EventKind::Line, EventKind::Close],
                    &remote_log,
                );
            }
        })
        .unwrap();
    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    let port = engine.port(server).unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.set_nodelay(true).expect("nodelay");
        for chunk in [&b"hel"[..], b"lo\nwor", b"ld\r\n\npartial"] {
            stream.write_all(chunk).expect("write");
            thread::sleep(Duration::from_millis(30));
        }
    });

    run_until(&mut engine, |_| log.borrow().last().map(String::as_str) == Some("close"));
    client.join().unwrap();

    assert_eq!(
        entries(&log),
        ["line:hello", "line:world", "line:", "close"]
    );
}

#[test]
fn data_is_delivered_before_lines() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    let log = new_log();

    let remote_log = Rc::clone(&log);
    engine
        .add_listener(server, EventKind::Accept, move |engine, _, event| {
            if let Event::Accept { remote } = *event {
                record(
                    engine,
                    remote,
                    &[EventKind::Line, EventKind::Data],
                    &remote_log,
                );
            }
        })
        .unwrap();
    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    let port = engine.port(server).unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    client.write_all(b"a\nb\n").expect("write");

    run_until(&mut engine, |_| log.borrow().len() == 3);
    assert_eq!(entries(&log), ["data:a\nb\n", "line:a", "line:b"]);
}

#[test]
fn closing_inside_data_suppresses_lines() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    let log = new_log();

    let remote_log = Rc::clone(&log);
    engine
        .add_listener(server, EventKind::Accept, move |engine, _, event| {
            if let Event::Accept { remote } = *event {
                engine
                    .add_listener(remote, EventKind::Data, |engine, stream, _| {
                        engine.close(stream).unwrap();
                    })
                    .unwrap();
                record(
                    engine,
                    remote,
                    &[EventKind::Line, EventKind::Close, EventKind::Destroy],
                    &remote_log,
                );
            }
        })
        .unwrap();
    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    let port = engine.port(server).unwrap();

    let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    client.write_all(b"a\nb\nc\n").expect("write");

    run_until(&mut engine, |engine| engine.stream_count() == 1 && !log.borrow().is_empty());
    assert_eq!(entries(&log), ["close", "destroy"]);
}

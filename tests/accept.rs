mod common;

use common::{LIFECYCLE, entries, new_log, record, run_until};
use sockloop::{Event, EventKind, State, StreamId};
use std::cell::RefCell;
use std::io::Read;
use std::net::{Ipv4Addr, TcpStream};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

#[test]
fn accepted_client_receives_greeting() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    let remotes: Rc<RefCell<Vec<StreamId>>> = Rc::new(RefCell::new(Vec::new()));
    let remote_log = new_log();

    let sink = Rc::clone(&remotes);
    let log = Rc::clone(&remote_log);
    engine
        .add_listener(server, EventKind::Accept, move |engine, _, event| {
            if let Event::Accept { remote } = *event {
                sink.borrow_mut().push(remote);
                record(engine, remote, LIFECYCLE, &log);
                engine.write(remote, b"hello\n").unwrap();
                engine.end(remote).unwrap();
            }
        })
        .unwrap();
    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    let port = engine.port(server).unwrap();

    let client = thread::spawn(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        let mut text = String::new();
        stream.read_to_string(&mut text).expect("read");
        text
    });

    run_until(&mut engine, |_| client.is_finished());
    assert_eq!(client.join().unwrap(), "hello\n");

    let remote = remotes.borrow()[0];
    run_until(&mut engine, |engine| engine.state(remote).is_none());
    assert_eq!(entries(&remote_log), ["close", "destroy"]);
    assert_eq!(engine.state(server), Some(State::Listening));
    assert_eq!(engine.stream_count(), 1);
}

#[test]
fn listen_event_follows_on_next_update() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    let log = new_log();
    record(&mut engine, server, &[EventKind::Listen], &log);

    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    assert!(entries(&log).is_empty());
    assert_eq!(engine.address(server), Some(Ipv4Addr::LOCALHOST.into()));

    engine.update();
    assert_eq!(entries(&log), ["listen"]);
}

#[test]
fn pending_connections_are_all_accepted() {
    const CLIENTS: usize = 5;

    let mut engine = common::engine();
    let server = engine.new_stream();
    let accepted = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&accepted);
    engine
        .add_listener(server, EventKind::Accept, move |engine, _, event| {
            if let Event::Accept { remote } = *event {
                sink.borrow_mut().push((engine.address(remote), engine.state(remote)));
            }
        })
        .unwrap();
    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    let port = engine.port(server).unwrap();

    let clients: Vec<TcpStream> = (0..CLIENTS)
        .map(|_| TcpStream::connect(("127.0.0.1", port)).expect("connect"))
        .collect();
    thread::sleep(Duration::from_millis(50));

    engine.update();
    assert_eq!(accepted.borrow().len(), CLIENTS);
    assert!(
        accepted
            .borrow()
            .iter()
            .all(|entry| *entry == (Some(Ipv4Addr::LOCALHOST.into()), Some(State::Connected)))
    );
    assert_eq!(engine.stream_count(), CLIENTS + 1);

    drop(clients);
}

#[test]
fn peer_disconnect_closes_without_error() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    let remote_log = new_log();

    let log = Rc::clone(&remote_log);
    engine
        .add_listener(server, EventKind::Accept, move |engine, _, event| {
            if let Event::Accept { remote } = *event {
                record(engine, remote, LIFECYCLE, &log);
            }
        })
        .unwrap();
    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    let port = engine.port(server).unwrap();

    drop(TcpStream::connect(("127.0.0.1", port)).expect("connect"));

    run_until(&mut engine, |engine| engine.stream_count() == 1 && !remote_log.borrow().is_empty());
    assert_eq!(entries(&remote_log), ["ready", "close", "destroy"]);
}

fn reset_on_drop(stream: &TcpStream) {
    let linger = libc::linger {
        l_onoff: 1,
        l_linger: 0,
    };
    let result = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_LINGER,
            &linger as *const libc::linger as *const libc::c_void,
            std::mem::size_of::<libc::linger>() as libc::socklen_t,
        )
    };
    assert_eq!(result, 0, "set SO_LINGER");
}

#[test]
fn peer_reset_reports_error_then_teardown() {
    let mut engine = common::engine();
    let server = engine.new_stream();
    let remotes: Rc<RefCell<Vec<StreamId>>> = Rc::new(RefCell::new(Vec::new()));
    let remote_log = new_log();

    let sink = Rc::clone(&remotes);
    let log = Rc::clone(&remote_log);
    engine
        .add_listener(server, EventKind::Accept, move |engine, _, event| {
            if let Event::Accept { remote } = *event {
                sink.borrow_mut().push(remote);
                record(
                    engine,
                    remote,
                    &[EventKind::Error, EventKind::Close, EventKind::Destroy],
                    &log,
                );
            }
        })
        .unwrap();
    engine.listen_on(server, "127.0.0.1", 0, 16).unwrap();
    let port = engine.port(server).unwrap();

    let client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
    run_until(&mut engine, |_| !remotes.borrow().is_empty());
    let remote = remotes.borrow()[0];

    reset_on_drop(&client);
    drop(client);
    thread::sleep(Duration::from_millis(20));
    engine.write(remote, &[b'x'; 64 * 1024]).unwrap();

    run_until(&mut engine, |engine| engine.state(remote).is_none());
    assert_eq!(entries(&remote_log), ["error", "close", "destroy"]);
}

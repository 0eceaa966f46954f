//! Executor integration tests over loopback TCP.
//!
//! Each test runs a real executor thread against a local server and
//! checks the host-visible event stream recorded by `MemoryBridge`.

mod common;

use std::io::Write;
use std::thread;
use std::time::Duration;

use common::{
    bind, closed_port, expect_bytes, has_log, spawn_echo_server, text_in, Harness, WAIT,
};
use sockbridge::encoding::TextEncoding;
use sockbridge::{Attribute, AttributeValue, Command, ConnectionId, EventName};

fn ready_state(h: &Harness, id: &ConnectionId) -> Option<i64> {
    h.bridge
        .attributes()
        .get(id, Attribute::ReadyState)
        .and_then(|v| v.as_int())
}

fn log_messages(h: &Harness, id: &ConnectionId) -> Vec<(String, String)> {
    h.bridge
        .events_for(id)
        .iter()
        .filter(|e| e.event == EventName::Log)
        .map(|e| {
            (
                e.level().unwrap_or_default().to_string(),
                e.text().unwrap_or_default(),
            )
        })
        .collect()
}

fn open_count(h: &Harness, id: &ConnectionId) -> usize {
    h.bridge
        .event_names(id)
        .iter()
        .filter(|e| **e == EventName::Open)
        .count()
}

#[test]
fn test_connect_to_closed_port_reports_failed_open() {
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", closed_port(), None)
        .expect("Should queue connect");

    assert!(h.bridge.wait_for_event(&id, EventName::Open, 1, WAIT));
    assert_eq!(h.bridge.event_names(&id), vec![EventName::Log, EventName::Open]);
    assert_eq!(ready_state(&h, &id), Some(2));
    assert_eq!(h.bridge.events_for(&id)[1].ready_state, Some(2));

    let logs = log_messages(&h, &id);
    assert_eq!(logs[0].0, "error");
    let reason = h
        .bridge
        .attributes()
        .get(&id, Attribute::Reason)
        .expect("Should record a reason");
    assert_eq!(reason, AttributeValue::Text(logs[0].1.clone()));
}

#[test]
fn test_echo_round_trip_and_close() {
    let (port, server) = spawn_echo_server();
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");

    assert!(h.bridge.wait_for_event(&id, EventName::Open, 1, WAIT));
    assert_eq!(ready_state(&h, &id), Some(1));

    assert!(h.connector.send(&id, "ping"));
    assert!(h
        .bridge
        .wait_for(WAIT, |events| text_in(events, &id) == "ping"));

    assert!(h.connector.close(&id));
    assert!(h.bridge.wait_for_event(&id, EventName::Close, 1, WAIT));
    assert_eq!(ready_state(&h, &id), Some(2));

    server.join().expect("echo server panicked");
    thread::sleep(Duration::from_millis(100));
    let names = h.bridge.event_names(&id);
    assert_eq!(names.first(), Some(&EventName::Open));
    assert_eq!(names.last(), Some(&EventName::Close));
    assert_eq!(names.iter().filter(|e| **e == EventName::Close).count(), 1);
}

#[test]
fn test_close_queued_behind_connect_sees_open_at_onopen() {
    let (port, server) = spawn_echo_server();
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");
    assert!(h.connector.close(&id));

    assert!(h.bridge.wait_for_event(&id, EventName::Close, 1, WAIT));
    server.join().expect("echo server panicked");

    let seen: Vec<(EventName, Option<i64>)> = h
        .bridge
        .events_for(&id)
        .iter()
        .map(|e| (e.event, e.ready_state))
        .collect();
    assert_eq!(
        seen,
        vec![(EventName::Open, Some(1)), (EventName::Close, Some(2))]
    );
}

#[test]
fn test_closed_id_is_never_reopened() {
    let (port, server) = spawn_echo_server();
    let (_live, live_port) = bind();
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");
    assert!(h.bridge.wait_for_event(&id, EventName::Open, 1, WAIT));
    h.connector.close(&id);
    assert!(h.bridge.wait_for_event(&id, EventName::Close, 1, WAIT));
    server.join().expect("echo server panicked");

    h.connector
        .connect(&id, "127.0.0.1", live_port, None)
        .expect("Should queue connect");
    assert!(h.bridge.wait_for(WAIT, |events| {
        has_log(
            events,
            &id,
            "error",
            "Connection tcp_0 is closed and cannot be reused; ignoring connect",
        )
    }));
    assert_eq!(open_count(&h, &id), 1);
    assert_eq!(ready_state(&h, &id), Some(2));
    assert_eq!(
        h.bridge.attributes().get(&id, Attribute::Port),
        Some(AttributeValue::Int(i64::from(port)))
    );
}

#[test]
fn test_failed_connect_id_is_never_retried() {
    let (_live, live_port) = bind();
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", closed_port(), None)
        .expect("Should queue connect");
    assert!(h.bridge.wait_for_event(&id, EventName::Open, 1, WAIT));

    h.handle.submitter().push(Command::Connect {
        connection_id: id.clone(),
        host: "127.0.0.1".to_string(),
        port: live_port,
        encoding: TextEncoding::utf8(),
    });
    assert!(h.bridge.wait_for(WAIT, |events| {
        has_log(
            events,
            &id,
            "error",
            "Connection tcp_0 is closed and cannot be reused; ignoring connect",
        )
    }));
    assert_eq!(open_count(&h, &id), 1);
    assert_eq!(ready_state(&h, &id), Some(2));
}

#[test]
fn test_peer_close_emits_message_then_single_close() {
    let (listener, port) = bind();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Should accept");
        stream.write_all(b"bye\r\n").expect("Should write");
    });

    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");

    assert!(h.bridge.wait_for_event(&id, EventName::Close, 1, WAIT));
    server.join().expect("server panicked");
    assert_eq!(h.bridge.received_text(&id), "bye\r\n");
    assert_eq!(ready_state(&h, &id), Some(2));

    // A late explicit close finds nothing to close.
    h.connector.close(&id);
    assert!(h.bridge.wait_for(WAIT, |events| {
        has_log(events, &id, "warn", "Connection already closed")
    }));

    let names = h.bridge.event_names(&id);
    assert_eq!(names[0], EventName::Open);
    assert_eq!(names.iter().filter(|e| **e == EventName::Close).count(), 1);
    let first_close = names
        .iter()
        .position(|e| *e == EventName::Close)
        .expect("Should have closed");
    assert!(names[..first_close].contains(&EventName::Message));
    assert!(!names[first_close..].contains(&EventName::Message));
}

#[test]
fn test_send_after_close_logs_ready_state() {
    let (port, server) = spawn_echo_server();
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");
    assert!(h.bridge.wait_for_event(&id, EventName::Open, 1, WAIT));

    h.connector.close(&id);
    assert!(h.bridge.wait_for_event(&id, EventName::Close, 1, WAIT));

    h.handle.submitter().push(Command::Send {
        connection_id: id.clone(),
        bytes: b"late".to_vec(),
    });
    assert!(h.bridge.wait_for(WAIT, |events| {
        has_log(
            events,
            &id,
            "error",
            "Unable to send content, socket readyState is: 2",
        )
    }));
    server.join().expect("echo server panicked");
}

#[test]
fn test_connector_refuses_send_before_open() {
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    assert!(!h.connector.send(&id, "early"));
    assert!(h.bridge.wait_for_event(&id, EventName::Log, 1, WAIT));
    assert_eq!(
        log_messages(&h, &id)[0],
        (
            "error".to_string(),
            "Unable to send content, socket readyState is: unknown".to_string()
        )
    );
}

#[test]
fn test_onopen_precedes_greeting() {
    let (listener, port) = bind();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Should accept");
        stream.write_all(b"220 ready\r\n").expect("Should write");
        thread::sleep(Duration::from_millis(200));
    });

    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");

    assert!(h.bridge.wait_for_event(&id, EventName::Message, 1, WAIT));
    assert_eq!(h.bridge.event_names(&id)[0], EventName::Open);
    assert_eq!(h.bridge.received_text(&id), "220 ready\r\n");
    server.join().expect("server panicked");
}

#[test]
fn test_multibyte_character_split_across_reads() {
    let (listener, port) = bind();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Should accept");
        stream.write_all(b"h\xC3").expect("Should write");
        stream.flush().expect("Should flush");
        thread::sleep(Duration::from_millis(100));
        stream.write_all(b"\xA9!").expect("Should write");
        thread::sleep(Duration::from_millis(100));
    });

    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");

    assert!(h.bridge.wait_for_event(&id, EventName::Close, 1, WAIT));
    assert_eq!(h.bridge.received_text(&id), "hé!");
    server.join().expect("server panicked");
}

#[test]
fn test_latin1_decode_and_utf16_encode() {
    let (listener, port) = bind();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Should accept");
        stream.write_all(&[b'c', b'a', b'f', 0xE9]).expect("Should write");
        expect_bytes(&mut stream, &[0xE9, b'!']);
    });

    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, Some("ISO-8859-1"))
        .expect("Should queue connect");

    assert!(h
        .bridge
        .wait_for(WAIT, |events| text_in(events, &id) == "café"));
    assert!(h.connector.send(&id, "é!"));
    server.join().expect("server panicked");

    let (listener, port) = bind();
    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Should accept");
        expect_bytes(&mut stream, &[b'o', 0, b'k', 0]);
    });
    let id = ConnectionId::from("tcp_1");
    h.connector
        .connect(&id, "127.0.0.1", port, Some("UTF-16LE"))
        .expect("Should queue connect");
    assert!(h.bridge.wait_for_event(&id, EventName::Open, 1, WAIT));
    assert!(h.connector.send(&id, "ok"));
    server.join().expect("server panicked");
}

#[test]
fn test_duplicate_connect_keeps_live_connection() {
    let (port, server) = spawn_echo_server();
    let h = Harness::start();
    let id = ConnectionId::from("tcp_0");
    h.connector
        .connect(&id, "127.0.0.1", port, None)
        .expect("Should queue connect");
    assert!(h.bridge.wait_for_event(&id, EventName::Open, 1, WAIT));

    h.handle.submitter().push(Command::Connect {
        connection_id: id.clone(),
        host: "127.0.0.1".to_string(),
        port: closed_port(),
        encoding: TextEncoding::utf8(),
    });
    assert!(h.bridge.wait_for_event(&id, EventName::Log, 1, WAIT));
    assert_eq!(log_messages(&h, &id)[0].0, "error");
    assert_eq!(ready_state(&h, &id), Some(1));

    assert!(h.connector.send(&id, "still here"));
    assert!(h
        .bridge
        .wait_for(WAIT, |events| text_in(events, &id) == "still here"));
    assert_eq!(open_count(&h, &id), 1);

    h.connector.close(&id);
    assert!(h.bridge.wait_for_event(&id, EventName::Close, 1, WAIT));
    server.join().expect("echo server panicked");
}

#[test]
fn test_many_connections_stay_isolated() {
    let servers: Vec<_> = (0..4).map(|_| spawn_echo_server()).collect();
    let h = Harness::start();

    let ids: Vec<ConnectionId> = servers
        .iter()
        .map(|(port, _)| {
            let id = h.connector.next_connection_id();
            h.connector
                .connect(&id, "127.0.0.1", *port, None)
                .expect("Should queue connect");
            id
        })
        .collect();

    for (i, id) in ids.iter().enumerate() {
        assert!(h.bridge.wait_for_event(id, EventName::Open, 1, WAIT));
        assert!(h.connector.send(id, &format!("conn-{i}")));
    }
    for (i, id) in ids.iter().enumerate() {
        let expected = format!("conn-{i}");
        assert!(h
            .bridge
            .wait_for(WAIT, |events| text_in(events, id) == expected));
        h.connector.close(id);
    }
    for id in &ids {
        assert!(h.bridge.wait_for_event(id, EventName::Close, 1, WAIT));
    }
    for (_, server) in servers {
        server.join().expect("echo server panicked");
    }
}

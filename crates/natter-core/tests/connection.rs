//! Connection tests against a scripted broker.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use natter_core::{ClientError, Connection, ConnectionState, JsonCodec, Message};
use serde::Serialize;

fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (calls.clone(), calls)
}

#[test]
fn test_publish_subscribe_round_trip() {
    let payload: &'static [u8] = b"\x00bin\r\nary\xff";

    let (url, broker) = common::spawn(move |broker| {
        let mut session = broker.accept();
        session.handshake();
        let sid = session.read_sub("updates");
        assert_eq!(session.read_line(), format!("PUB updates {}", payload.len()));
        let body = session.read_payload(payload.len());
        session.send_msg("updates", &sid, None, &body);
        session.drain();
        body
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();
    assert!(conn.is_connected());
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.server_info().unwrap().server_id, "MOCK");

    let received = Arc::new(Mutex::new(Vec::<Message>::new()));
    let sink = received.clone();
    let id = conn
        .subscribe("updates", move |msg, _| {
            sink.lock().unwrap().push(msg.clone());
            Ok(())
        })
        .unwrap();

    conn.publish("updates", payload, None).unwrap();
    assert_eq!(conn.wait(1).unwrap(), 1);
    assert!(conn.is_connected());

    {
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].subject, "updates");
        assert_eq!(received[0].sid, id);
        assert_eq!(received[0].reply, None);
        assert_eq!(&received[0].payload[..], payload);
    }

    let stats = conn.stats();
    assert_eq!(stats.messages_published, 1);
    assert_eq!(stats.messages_received, 1);

    conn.close();
    assert_eq!(broker.join().unwrap(), payload);
}

#[test]
fn test_message_for_removed_subscription_is_fatal() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        let sid = session.read_sub("a");
        assert_eq!(session.read_line(), format!("UNSUB {sid}"));
        session.send_msg("a", &sid, None, b"late");
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();
    let id = conn.subscribe("a", |_, _| Ok(())).unwrap();
    conn.unsubscribe(&id, None).unwrap();
    assert!(!conn.subscriptions().contains(&id));
    assert!(conn.subscriptions().snapshot().is_empty());

    match conn.wait(0) {
        Err(ClientError::UnknownSubscription(sid)) => assert_eq!(sid, id),
        other => panic!("Expected UnknownSubscription, got {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(matches!(conn.publish("a", b"x", None), Err(ClientError::NotConnected)));
    broker.join().unwrap();
}

#[test]
fn test_counted_unsubscribe_keeps_local_entry() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        let sid = session.read_sub("ticks");
        assert_eq!(session.read_line(), format!("UNSUB {sid} 2"));
        session.send_msg("ticks", &sid, None, b"1");
        session.send_msg("ticks", &sid, None, b"2");
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();
    let id = conn.subscribe("ticks", |_, _| Ok(())).unwrap();
    conn.unsubscribe(&id, Some(2)).unwrap();
    assert!(conn.subscriptions().contains(&id));
    assert_eq!(conn.wait(2).unwrap(), 2);

    conn.close();
    broker.join().unwrap();
}

#[test]
fn test_unsubscribe_unknown_id() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();
    assert!(matches!(
        conn.unsubscribe(&"nope".into(), None),
        Err(ClientError::UnknownSubscription(_))
    ));
    assert!(conn.is_connected());

    conn.close();
    broker.join().unwrap();
}

#[test]
fn test_request_reply() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();

        let sub = session.read_line();
        let fields: Vec<&str> = sub.split(' ').collect();
        assert_eq!(fields.len(), 3, "unexpected line {sub:?}");
        let (inbox, sid) = (fields[1].to_string(), fields[2].to_string());
        assert!(inbox.starts_with("_INBOX."));

        assert_eq!(session.read_line(), format!("UNSUB {sid} 1"));
        assert_eq!(session.read_line(), format!("PUB svc.time {inbox} 4"));
        assert_eq!(session.read_payload(4), b"now?");
        session.send_msg(&inbox, &sid, None, b"12:00");
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();

    let (calls, seen) = counter();
    let replied = conn
        .request("svc.time", b"now?", move |msg, _| {
            assert_eq!(&msg.payload[..], b"12:00");
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(replied);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(conn.subscriptions().is_empty());
    assert!(conn.subscriptions().snapshot().is_empty());
    assert!(conn.is_connected());

    conn.close();
    broker.join().unwrap();
}

#[test]
fn test_request_without_reply() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        session.read_line(); // SUB
        session.read_line(); // UNSUB
        session.read_line(); // PUB
        session.read_payload(2);
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();

    let (calls, seen) = counter();
    let replied = conn
        .request("svc.none", b"hi", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(!replied);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(conn.subscriptions().is_empty());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    broker.join().unwrap();
}

#[test]
fn test_request_delivers_other_messages_first() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        let events = session.read_sub("events");

        let sub = session.read_line();
        let fields: Vec<&str> = sub.split(' ').collect();
        let (inbox, sid) = (fields[1].to_string(), fields[2].to_string());
        assert_eq!(session.read_line(), format!("UNSUB {sid} 1"));
        assert_eq!(session.read_line(), format!("PUB svc.time {inbox} 4"));
        session.read_payload(4);

        session.send_msg("events", &events, None, b"1");
        session.send_msg(&inbox, &sid, None, b"12:00");
        session.send("PING\r\n");
        assert_eq!(session.read_line(), "PONG");
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();

    let (events, seen_events) = counter();
    conn.subscribe("events", move |_, _| {
        seen_events.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    let (replies, seen_replies) = counter();
    let replied = conn
        .request("svc.time", b"now?", move |msg, _| {
            assert_eq!(&msg.payload[..], b"12:00");
            seen_replies.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    assert!(replied);
    assert_eq!(replies.load(Ordering::SeqCst), 1);
    assert_eq!(events.load(Ordering::SeqCst), 1);
    assert_eq!(conn.subscriptions().len(), 1);
    assert!(conn.is_connected());

    // The broker's PING is answered without tripping over the inbox.
    assert_eq!(conn.wait(0).unwrap(), 0);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    broker.join().unwrap();
}

/// Subscribe to `a`, let the broker send `frame` on that sid, and return
/// what the dispatch loop made of it.
fn wait_on_frame(info: &'static str, frame: fn(&str) -> String) -> (Result<usize, ClientError>, Connection) {
    let (url, broker) = common::spawn(move |broker| {
        let mut session = broker.accept();
        session.handshake_with(info);
        let sid = session.read_sub("a");
        session.send(&frame(&sid));
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();
    conn.subscribe("a", |_, _| Ok(())).unwrap();
    let result = conn.wait(0);
    broker.join().unwrap();
    (result, conn)
}

#[test]
fn test_non_numeric_msg_length_is_fatal() {
    let (result, conn) = wait_on_frame(common::INFO, |sid| format!("MSG a {sid} x\r\n"));
    assert!(matches!(result, Err(ClientError::Protocol(_))), "got {result:?}");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn test_msg_with_too_many_fields_is_fatal() {
    let (result, conn) = wait_on_frame(common::INFO, |sid| format!("MSG a {sid} r extra 1\r\nx\r\n"));
    assert!(matches!(result, Err(ClientError::Protocol(_))), "got {result:?}");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn test_payload_without_crlf_is_fatal() {
    let (result, conn) = wait_on_frame(common::INFO, |sid| format!("MSG a {sid} 3\r\nabcXY"));
    assert!(matches!(result, Err(ClientError::Protocol(_))), "got {result:?}");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn test_msg_length_above_max_payload_is_fatal() {
    let (result, conn) = wait_on_frame(common::INFO, |sid| format!("MSG a {sid} 1048577\r\n"));
    assert!(matches!(result, Err(ClientError::Protocol(_))), "got {result:?}");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[test]
fn test_overflowing_msg_length_is_fatal() {
    let (result, conn) = wait_on_frame(r#"{"server_id":"OPEN"}"#, |sid| {
        format!("MSG a {sid} {}\r\n", usize::MAX)
    });
    assert!(matches!(result, Err(ClientError::Protocol(_))), "got {result:?}");
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

fn parse_sub(line: &str) -> (String, Option<String>) {
    let fields: Vec<&str> = line.split(' ').collect();
    match fields.as_slice() {
        ["SUB", subject, _sid] => (subject.to_string(), None),
        ["SUB", subject, queue, _sid] => (subject.to_string(), Some(queue.to_string())),
        _ => panic!("unexpected line {line:?}"),
    }
}

#[test]
fn test_reconnect_replays_registered_subjects() {
    let (url, broker) = common::spawn(|broker| {
        let mut first = broker.accept();
        first.handshake();
        let before = first.read_until_ping();
        drop(first);

        let mut second = broker.accept();
        second.handshake();
        let after = second.read_until_ping();
        second.drain();
        (before, after)
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();

    let orders = conn.subscribe("orders", |_, _| Ok(())).unwrap();
    let jobs = conn.queue_subscribe("jobs", "workers", |_, _| Ok(())).unwrap();
    let temp = conn.subscribe("temp", |_, _| Ok(())).unwrap();
    conn.unsubscribe(&temp, None).unwrap();
    conn.flush().unwrap();

    let resubscribed = conn.reconnect(true).unwrap();
    assert_eq!(resubscribed.len(), 2);
    assert_ne!(resubscribed["orders"], orders);
    assert_ne!(resubscribed["jobs"], jobs);
    assert!(!resubscribed.contains_key("temp"));
    assert!(!conn.subscriptions().contains(&orders));
    assert!(conn.subscriptions().contains(&resubscribed["orders"]));
    conn.flush().unwrap();

    let stats = conn.stats();
    assert_eq!(stats.reconnects, 1);
    assert_eq!(stats.pings_sent, 2);

    conn.close();
    let (before, after) = broker.join().unwrap();

    assert_eq!(before.len(), 4);
    assert_eq!(before[3], format!("UNSUB {temp}"));

    let replayed: Vec<_> = after.iter().map(|line| parse_sub(line)).collect();
    assert_eq!(
        replayed,
        vec![
            ("orders".to_string(), None),
            ("jobs".to_string(), Some("workers".to_string())),
        ]
    );
    assert!(after[0].ends_with(resubscribed["orders"].as_str()));
}

#[test]
fn test_ping_is_answered_and_info_updates() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        let sid = session.read_sub("events");
        session.send("PING\r\n");
        assert_eq!(session.read_line(), "PONG");
        session.send("INFO {\"server_id\":\"UPDATED\"}\r\n");
        session.send("+OK\r\n");
        session.send("-ERR 'Stale Connection'\r\n");
        session.send_msg("events", &sid, None, b"one");
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();
    conn.subscribe("events", |_, _| Ok(())).unwrap();

    // The broker hangs up after one message; EOF ends the loop normally.
    assert_eq!(conn.wait(0).unwrap(), 1);
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert_eq!(conn.server_info().unwrap().server_id, "UPDATED");
    assert_eq!(conn.stats().messages_received, 1);
    broker.join().unwrap();
}

#[test]
fn test_callback_errors_do_not_stop_dispatch() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        let sid = session.read_sub("work");
        session.send_msg("work", &sid, None, b"bad");
        session.send_msg("work", &sid, None, b"ok1");
        session.send_msg("work", &sid, None, b"ok2");
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();

    let (calls, seen) = counter();
    conn.subscribe("work", move |msg, _| {
        if &msg.payload[..] == b"bad" {
            return Err("cannot process".into());
        }
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();

    assert_eq!(conn.wait(3).unwrap(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(conn.stats().callback_errors, 1);
    assert!(conn.is_connected());

    conn.close();
    broker.join().unwrap();
}

#[test]
fn test_handler_replies_through_replier() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake();
        let sid = session.read_sub("svc.echo");
        session.send_msg("svc.echo", &sid, Some("_INBOX.r1"), b"ping");
        assert_eq!(session.read_line(), "PUB _INBOX.r1 4");
        let echoed = session.read_payload(4);
        session.drain();
        echoed
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();
    conn.subscribe("svc.echo", |msg, replier| {
        replier.respond(msg, &msg.payload)?;
        Ok(())
    })
    .unwrap();

    assert_eq!(conn.wait(1).unwrap(), 1);
    assert_eq!(conn.stats().messages_published, 1);

    conn.close();
    assert_eq!(broker.join().unwrap(), b"ping");
}

#[derive(Serialize)]
struct Reading {
    sensor: String,
    value: f64,
}

#[test]
fn test_publish_validation_and_encoding() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.handshake_with(r#"{"server_id":"SMALL","max_payload":64}"#);
        let line = session.read_line();
        let len: usize = line.rsplit(' ').next().unwrap().parse().unwrap();
        assert!(line.starts_with("PUB readings "));
        let body = session.read_payload(len);
        session.drain();
        body
    });

    let mut conn = Connection::new(common::options(&url));
    conn.connect().unwrap();

    assert!(matches!(
        conn.publish("bad subject", b"x", None),
        Err(ClientError::Protocol(_))
    ));
    assert!(matches!(
        conn.publish("big", &[0u8; 65], None),
        Err(ClientError::Protocol(_))
    ));
    assert!(conn.is_connected());

    let reading = Reading {
        sensor: "t1".into(),
        value: 21.5,
    };
    conn.publish_encoded::<JsonCodec, _>("readings", &reading, None)
        .unwrap();
    assert_eq!(conn.stats().messages_published, 1);

    conn.close();
    let body = broker.join().unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["sensor"], "t1");
    assert_eq!(value["value"], 21.5);
}

#[test]
fn test_handshake_error_greeting() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.send("-ERR 'Authorization Violation'\r\n");
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    match conn.connect() {
        Err(ClientError::Handshake(reason)) => assert_eq!(reason, "Authorization Violation"),
        other => panic!("Expected Handshake error, got {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(conn.server_info().is_none());
    broker.join().unwrap();
}

#[test]
fn test_handshake_requires_info_greeting() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.send("PONG\r\n");
        session.drain();
    });

    let mut conn = Connection::new(common::options(&url));
    assert!(matches!(conn.connect(), Err(ClientError::Handshake(_))));
    broker.join().unwrap();
}

#[test]
fn test_connect_rejected() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.send(&format!("INFO {}\r\n", common::INFO));
        let connect = session.read_line();
        assert_eq!(session.read_line(), "PING");
        session.send("-ERR 'Authorization Violation'\r\n");
        session.drain();
        connect
    });

    let url = url.replace("nats://", "nats://alice:secret@");
    let mut conn = Connection::new(common::options(&url));
    match conn.connect() {
        Err(ClientError::Connect(reason)) => assert_eq!(reason, "Authorization Violation"),
        other => panic!("Expected Connect error, got {:?}", other),
    }
    assert_eq!(conn.state(), ConnectionState::Disconnected);

    let connect = broker.join().unwrap();
    assert!(connect.contains(r#""user":"alice""#));
    assert!(connect.contains(r#""pass":"secret""#));
}

#[test]
fn test_verbose_ok_before_pong() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.send(&format!("INFO {}\r\n", common::INFO));
        let connect = session.read_line();
        assert_eq!(session.read_line(), "PING");
        session.send("+OK\r\nPONG\r\n");
        session.drain();
        connect
    });

    let mut conn = Connection::new(common::options(&url).with_verbose(true));
    conn.connect().unwrap();
    assert!(conn.is_connected());

    conn.close();
    assert!(broker.join().unwrap().contains(r#""verbose":true"#));
}

#[test]
fn test_tls_failure_leaves_connection_disconnected() {
    let (url, broker) = common::spawn(|broker| {
        let mut session = broker.accept();
        session.send("INFO {\"server_id\":\"TLS\",\"tls_required\":true}\r\n");
        let hello = session.read_raw();
        session.send("-ERR 'Secure Connection - TLS Required'\r\n");
        hello
    });

    let mut conn = Connection::new(common::options(&url));
    assert!(matches!(conn.connect(), Err(ClientError::TlsNegotiation(_))));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
    assert!(!conn.is_connected());

    // A TLS record header: handshake content type.
    let hello = broker.join().unwrap();
    assert_eq!(hello.first(), Some(&0x16));
}

#[test]
fn test_connect_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("nats://{}", listener.local_addr().unwrap());
    drop(listener);

    let mut conn = Connection::new(common::options(&url));
    assert!(matches!(conn.connect(), Err(ClientError::Transport(_))));
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

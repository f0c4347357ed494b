//! Scripted in-process broker for integration tests.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use natter_core::ConnectOptions;

pub const INFO: &str = r#"{"server_id":"MOCK","version":"2.10.0","proto":1,"max_payload":1048576}"#;

/// Listening side of the mock broker.
pub struct Broker {
    listener: TcpListener,
}

impl Broker {
    /// Accept the next client connection.
    pub fn accept(&self) -> Session {
        let (stream, _) = self.listener.accept().unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let writer = stream.try_clone().unwrap();
        Session {
            reader: BufReader::new(stream),
            writer,
        }
    }
}

/// Start a broker thread running `script`. Returns the URL to connect to.
pub fn spawn<T, F>(script: F) -> (String, JoinHandle<T>)
where
    F: FnOnce(Broker) -> T + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("nats://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || script(Broker { listener }));
    (url, handle)
}

/// Client options for a mock broker URL.
pub fn options(url: &str) -> ConnectOptions {
    ConnectOptions::from_url(url)
        .unwrap()
        .with_read_timeout(Duration::from_secs(5))
        .with_connect_timeout(Duration::from_secs(5))
}

/// One accepted client connection.
pub struct Session {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Session {
    /// Greet with the default `INFO` and complete the handshake.
    pub fn handshake(&mut self) {
        self.handshake_with(INFO);
    }

    /// Greet with `info` and complete the handshake. Returns the `CONNECT`
    /// line.
    pub fn handshake_with(&mut self, info: &str) -> String {
        self.send(&format!("INFO {info}\r\n"));
        let connect = self.read_line();
        assert!(connect.starts_with("CONNECT {"), "unexpected line {connect:?}");
        assert_eq!(self.read_line(), "PING");
        self.send("PONG\r\n");
        connect
    }

    pub fn send(&mut self, data: &str) {
        self.writer.write_all(data.as_bytes()).unwrap();
    }

    /// Deliver a message on `sid`.
    pub fn send_msg(&mut self, subject: &str, sid: &str, reply: Option<&str>, payload: &[u8]) {
        let line = match reply {
            Some(reply) => format!("MSG {subject} {sid} {reply} {}\r\n", payload.len()),
            None => format!("MSG {subject} {sid} {}\r\n", payload.len()),
        };
        let mut frame = line.into_bytes();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(b"\r\n");
        self.writer.write_all(&frame).unwrap();
    }

    /// Next line without its terminator, `None` on EOF.
    pub fn try_read_line(&mut self) -> Option<String> {
        let mut line = Vec::new();
        match self.reader.read_until(b'\n', &mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(String::from_utf8_lossy(&line).trim_end().to_string()),
        }
    }

    pub fn read_line(&mut self) -> String {
        self.try_read_line().expect("client closed the connection")
    }

    /// Read a `PUB` payload block of `len` bytes and its CRLF.
    pub fn read_payload(&mut self, len: usize) -> Vec<u8> {
        let mut block = vec![0u8; len + 2];
        self.reader.read_exact(&mut block).unwrap();
        assert_eq!(&block[len..], b"\r\n");
        block.truncate(len);
        block
    }

    /// Read a `SUB` line and return its id.
    pub fn read_sub(&mut self, subject: &str) -> String {
        let line = self.read_line();
        let fields: Vec<&str> = line.split(' ').collect();
        assert_eq!(fields[0], "SUB", "unexpected line {line:?}");
        assert_eq!(fields[1], subject);
        fields[fields.len() - 1].to_string()
    }

    /// Collect lines up to the next `PING` and answer it.
    pub fn read_until_ping(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line();
            if line == "PING" {
                self.send("PONG\r\n");
                return lines;
            }
            lines.push(line);
        }
    }

    /// Read raw bytes, as the start of a TLS handshake.
    pub fn read_raw(&mut self) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let n = self.reader.read(&mut buf).unwrap_or(0);
        buf[..n].to_vec()
    }

    /// Read until the client hangs up.
    pub fn drain(&mut self) {
        while self.try_read_line().is_some() {}
    }
}

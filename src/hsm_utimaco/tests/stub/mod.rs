// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! A stub HSM, listening on localhost, for driving sessions in tests.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// What the stub does with a received command.
pub enum Action {
    /// Send back a reply whose body is the given hex string.
    Reply(String),
    /// Close the connection without replying.
    Close,
    /// Never answer.
    Hang,
}

/// Commands received so far, as upper-hex strings.
pub type Log = Arc<Mutex<Vec<String>>>;

/// Encode a reply frame: 4 byte length prefix (24 bit length in bytes 1..3), then the body.
pub fn reply_frame(body_hex: &str) -> Vec<u8> {
    let body = hex::decode(body_hex).unwrap();
    let len = body.len();
    let mut frame = vec![0u8, (len >> 16) as u8, (len >> 8) as u8, len as u8];
    frame.extend_from_slice(body.as_slice());
    frame
}

/// Approved reply body for a sequence-tagged command: response code, payload, then a 12 byte
/// trailer made of the echoed tag and 4 spare bytes.
pub fn approved_tagged(payload: &str, command_hex: &str) -> String {
    let tag = &command_hex[command_hex.len() - 16..];
    format!("9A{}{}00000000", payload, tag)
}

/// Read one command. The client writes each command in one go and waits for its reply before
/// sending the next, so a command is whatever arrives before the stream goes quiet.
fn read_command(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 64 * 1024];
    stream.set_read_timeout(None).ok()?;
    let n = stream.read(buf.as_mut_slice()).ok()?;
    if n == 0 {
        return None;
    }
    let mut command = buf[..n].to_vec();
    stream
        .set_read_timeout(Some(Duration::from_millis(20)))
        .ok()?;
    loop {
        match stream.read(buf.as_mut_slice()) {
            Ok(0) => break,
            Ok(n) => command.extend_from_slice(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                break
            }
            Err(_) => return None,
        }
    }
    Some(command)
}

/// Serve one accepted connection until the peer leaves or `handler` says to close.
fn serve_conn<F>(mut stream: TcpStream, log: &Log, handler: &F)
where
    F: Fn(&str) -> Action,
{
    while let Some(command) = read_command(&mut stream) {
        let command_hex = hex::encode_upper(command);
        log.lock().unwrap().push(command_hex.clone());
        match handler(command_hex.as_str()) {
            Action::Reply(body) => {
                if stream.write_all(reply_frame(body.as_str()).as_slice()).is_err() {
                    return;
                }
            }
            Action::Close => return,
            Action::Hang => {
                std::thread::sleep(Duration::from_secs(3600));
                return;
            }
        }
    }
}

/// Start a stub HSM on `addr` (use port 0 for any free port) that keeps accepting connections
/// and answers every command through `handler`. Each connection is served on its own thread,
/// so a hung connection does not keep the next one from being served.
pub fn serve<F>(addr: &str, handler: F) -> (SocketAddr, Log)
where
    F: Fn(&str) -> Action + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).unwrap();
    let local = listener.local_addr().unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let thread_log = log.clone();
    let handler = Arc::new(handler);
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(_) => break,
            };
            let log = thread_log.clone();
            let handler = handler.clone();
            std::thread::spawn(move || serve_conn(stream, &log, handler.as_ref()));
        }
    });
    (local, log)
}

/// Start a stub HSM that accepts a single connection, reads one command, then stops listening
/// and drops the connection without replying.
pub fn serve_once_then_drop() -> (SocketAddr, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let local = listener.local_addr().unwrap();
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let command = read_command(&mut stream).unwrap();
        drop(listener);
        drop(stream);
        hex::encode_upper(command)
    });
    (local, handle)
}

/// A localhost address nothing listens on (yet).
pub fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

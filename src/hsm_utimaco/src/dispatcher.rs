// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Weak};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::codec::{self, FrameTransport, Transport};
use crate::config::{Backoff, SessionConfig};
use crate::queue::{Command, QueueItem, QueueReceiver, Reply, SendQueue, TransportError};
use crate::reconnect;
use crate::registry::Registry;

/// The single owner of the HSM socket.
///
/// Commands are taken off the send queue one at a time: each is written out, its reply read
/// back and delivered to the waiting caller before the next command is dequeued. Any I/O
/// failure drops the socket and hands over to the reconnect controller.
pub struct Dispatcher {
    addr: SocketAddr,
    transport: Option<FrameTransport<TcpStream>>,
    rx: QueueReceiver,
    queue: Weak<SendQueue>,
    registry: Arc<Registry>,
    backoff: Backoff,
    io_timeout: Option<Duration>,
    logging: bool,
}

/// Outcome of a single command / reply exchange.
enum Exchange {
    Replied(String),
    /// Nothing was written; the socket is still usable.
    Rejected(TransportError),
    /// The socket is broken.
    Broken(TransportError),
}

impl Dispatcher {
    /// `stream` is the initial connection, if the initial dial succeeded. Without one, the
    /// dispatcher starts out reconnecting.
    pub fn new(
        addr: SocketAddr,
        stream: Option<TcpStream>,
        rx: QueueReceiver,
        queue: Weak<SendQueue>,
        registry: Arc<Registry>,
        config: &SessionConfig,
    ) -> Self {
        let mut dispatcher = Self {
            addr,
            transport: None,
            rx,
            queue,
            registry,
            backoff: config.backoff.clone(),
            io_timeout: config.io_timeout(),
            logging: config.logging,
        };
        if let Some(stream) = stream {
            dispatcher.install(stream);
        }
        dispatcher
    }

    /// Serve the send queue until the session is dropped.
    pub fn run(mut self) {
        debug!("Dispatcher started for HSM at {}", self.addr);
        loop {
            if self.transport.is_none() {
                match reconnect::reconnect(self.addr, &self.backoff, &self.rx, &self.queue) {
                    Some(stream) => self.install(stream),
                    None => break,
                }
            }

            let cmd = match self.rx.recv() {
                Some(QueueItem::Request(cmd)) => cmd,
                Some(QueueItem::SocketReady) => {
                    debug!("Dropping stray socket-ready signal");
                    continue;
                }
                None => break,
            };

            if !self.registry.contains(cmd.id) {
                debug!("Skipping cancelled request id={}", cmd.id);
                continue;
            }

            let reply: Reply = match self.exchange(&cmd) {
                Exchange::Replied(reply) => Ok(reply),
                Exchange::Rejected(e) => {
                    error!("Request id={} not sent: {}", cmd.id, e);
                    Err(e)
                }
                Exchange::Broken(e) => {
                    warn!("HSM connection lost ({}); reconnecting", e);
                    self.transport = None;
                    Err(e)
                }
            };
            cmd.respond(reply);
        }
        debug!("Dispatcher for HSM at {} exiting", self.addr);
    }

    fn install(&mut self, stream: TcpStream) {
        if let Err(e) = stream
            .set_read_timeout(self.io_timeout)
            .and_then(|_| stream.set_write_timeout(self.io_timeout))
        {
            warn!("Unable to set HSM socket timeouts: {}", e);
        }
        stream.set_nodelay(true).unwrap_or_default();
        info!("HSM session ready at {}", self.addr);
        self.transport = Some(FrameTransport::new(stream));
    }

    fn exchange(&mut self, cmd: &Command) -> Exchange {
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return Exchange::Broken(TransportError::SendFailed),
        };

        if self.logging {
            debug!("HSM >> [{}] {}", cmd.tag, cmd.frame);
        }
        match transport.send_command(cmd.frame.as_str()) {
            Ok(()) => (),
            Err(codec::Error::HexDecode(e)) => {
                return Exchange::Rejected(TransportError::HexDecode(e.to_string()))
            }
            Err(e) => {
                debug!("Send error: {:?}", e);
                return Exchange::Broken(TransportError::SendFailed);
            }
        }

        match transport.recv_reply() {
            Ok(reply) => {
                if self.logging {
                    debug!("HSM << [{}] {}", cmd.tag, reply);
                }
                Exchange::Replied(reply)
            }
            Err(e) => {
                debug!("Read error: {:?}", e);
                Exchange::Broken(TransportError::ReadFailed)
            }
        }
    }
}

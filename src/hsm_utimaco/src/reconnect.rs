// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::net::{SocketAddr, TcpStream};
use std::sync::Weak;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::Backoff;
use crate::queue::{QueueItem, QueueReceiver, SendQueue, TransportError};

/// Escalating reconnect interval.
pub struct Schedule {
    interval: Duration,
    max: Duration,
    factor: u32,
    escalate_every: usize,
    failures: usize,
}

impl Schedule {
    pub fn new(backoff: &Backoff) -> Self {
        Self {
            interval: backoff.initial(),
            max: backoff.max(),
            factor: backoff.factor,
            escalate_every: backoff.escalate_every,
            failures: 0,
        }
    }

    /// Record a failed dial and return how long to wait before the next one. `queue_empty`
    /// tells whether any caller is waiting; the interval only grows while nobody is.
    pub fn on_failure(&mut self, queue_empty: bool) -> Duration {
        self.failures += 1;
        if self.escalate_every > 0
            && self.failures % self.escalate_every == 0
            && queue_empty
            && self.interval < self.max
        {
            self.interval = self
                .interval
                .checked_mul(self.factor)
                .map_or(self.max, |next| std::cmp::min(next, self.max));
        }
        self.interval
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Re-dial `addr` until it succeeds, then push `SocketReady` onto the send queue. Returns
/// `None` (without pushing) if the session owning the queue went away in the meantime.
fn dial(addr: SocketAddr, backoff: Backoff, queue: Weak<SendQueue>) -> Option<TcpStream> {
    let mut schedule = Schedule::new(&backoff);
    let mut last_err: Option<String> = None;

    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                info!("Reconnected to HSM at {}", addr);
                let queue = queue.upgrade()?;
                if queue.push(QueueItem::SocketReady).is_err() {
                    return None;
                }
                return Some(stream);
            }
            Err(e) => {
                let text = e.to_string();
                if last_err.as_deref() != Some(text.as_str()) {
                    warn!("Unable to reconnect to HSM at {}: {}", addr, text);
                    last_err = Some(text);
                }
                let queue_empty = queue.upgrade()?.is_empty();
                let wait = schedule.on_failure(queue_empty);
                debug!("Next dial to {} in {:?}", addr, wait);
                std::thread::sleep(wait);
                // Bail out if the session was dropped while we slept.
                queue.upgrade()?;
            }
        }
    }
}

/// Bring the HSM connection back.
///
/// Dialing happens on a helper thread. Meanwhile, every command arriving on the send queue is
/// answered with `TransportError::Disconnected`, until the helper announces the new
/// connection with `SocketReady`. Only then is the new stream returned, so commands queued
/// after `SocketReady` are served on it.
///
/// Never gives up. Returns `None` only when the session is gone (the queue has no producers
/// left), in which case the dispatcher should exit.
pub fn reconnect(
    addr: SocketAddr,
    backoff: &Backoff,
    rx: &QueueReceiver,
    queue: &Weak<SendQueue>,
) -> Option<TcpStream> {
    let dialer = {
        let backoff = backoff.clone();
        let queue = Weak::clone(queue);
        std::thread::Builder::new()
            .name("utimaco-dial".to_string())
            .spawn(move || dial(addr, backoff, queue))
    };
    let dialer = match dialer {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Unable to start dialer thread: {}", e);
            return None;
        }
    };

    let mut purged = 0usize;
    loop {
        match rx.recv() {
            Some(QueueItem::Request(cmd)) => {
                purged += 1;
                cmd.respond(Err(TransportError::Disconnected));
            }
            Some(QueueItem::SocketReady) => break,
            None => {
                // All producers are gone: no SocketReady can come. The dialer exits on its own
                // once it notices the session has been dropped.
                return None;
            }
        }
    }
    if purged > 0 {
        info!("Rejected {} request(s) while reconnecting", purged);
    }

    dialer.join().unwrap_or_default()
}

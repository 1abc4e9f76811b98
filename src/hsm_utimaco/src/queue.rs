// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;

/// Why a command did not get an HSM reply.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportError {
    /// Writing the command to the socket failed.
    SendFailed,
    /// Reading the reply from the socket failed.
    ReadFailed,
    /// The command was queued while the session was reconnecting.
    Disconnected,
    /// The command frame is not valid hex.
    HexDecode(String),
    /// The caller's deadline expired before the reply arrived.
    Timeout,
    /// The dispatcher is not running (could not be started, or has exited).
    DispatcherGone,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SendFailed => write!(f, "err: send failed"),
            Self::ReadFailed => write!(f, "err: read error"),
            Self::Disconnected => write!(f, "err: disconnected from hsm"),
            Self::HexDecode(e) => write!(f, "err: Hex decode failed: {}", e),
            Self::Timeout => write!(f, "err: request timed out"),
            Self::DispatcherGone => write!(f, "err: dispatcher stopped"),
        }
    }
}

/// What the dispatcher hands back to a waiting caller: the full hex reply, or the reason
/// there is none.
pub type Reply = Result<String, TransportError>;

/// A command waiting to be sent to the HSM.
pub struct Command {
    /// Request id, also the registry key.
    pub id: u64,
    /// Sequence tag appended to `frame` (empty when sequence tagging is off).
    pub tag: String,
    /// Hex-encoded command frame.
    pub frame: String,
    reply: SyncSender<Reply>,
}

impl Command {
    /// Create a command, along with the receiving end of its single-shot reply channel.
    pub fn new(id: u64, tag: String, frame: String) -> (Self, Receiver<Reply>) {
        let (reply, rx) = mpsc::sync_channel(1);
        (
            Self {
                id,
                tag,
                frame,
                reply,
            },
            rx,
        )
    }

    /// Deliver the reply. The caller may have given up already, in which case the reply is
    /// dropped.
    pub fn respond(self, reply: Reply) {
        self.reply.send(reply).unwrap_or_default();
    }
}

pub enum QueueItem {
    Request(Command),
    /// The HSM connection has been re-established. Ends a reconnect purge.
    SocketReady,
}

/// Producer side of the bounded send queue. Keeps track of how many items are waiting.
pub struct SendQueue {
    tx: SyncSender<QueueItem>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side of the send queue, owned by the dispatcher.
pub struct QueueReceiver {
    rx: Receiver<QueueItem>,
    depth: Arc<AtomicUsize>,
}

pub fn channel(bound: usize) -> (SendQueue, QueueReceiver) {
    let (tx, rx) = mpsc::sync_channel(bound);
    let depth = Arc::new(AtomicUsize::new(0));
    (
        SendQueue {
            tx,
            depth: depth.clone(),
        },
        QueueReceiver { rx, depth },
    )
}

impl SendQueue {
    /// Enqueue an item, blocking while the queue is full. If the receiver is gone, the item is
    /// handed back.
    pub fn push(&self, item: QueueItem) -> Result<(), QueueItem> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        self.tx.send(item).map_err(|e| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            e.0
        })
    }

    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl QueueReceiver {
    /// Block until an item is available. Returns `None` once every `SendQueue` is gone.
    pub fn recv(&self) -> Option<QueueItem> {
        self.rx.recv().ok().map(|item| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            item
        })
    }
}

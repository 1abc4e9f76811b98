// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, warn};

use hsm_common::defs;
use hsm_common::error::{Error as HsmError, Result as HsmResult};
use hsm_common::module::validators;
use hsm_common::util::hex::len_hex;
use hsm_common::{CvvKind, KeyId, PaymentCrypto};

use crate::codec;
use crate::config::{self, Keys, SessionConfig};
use crate::dispatcher::Dispatcher;
use crate::queue::{self, Command, QueueItem, QueueReceiver, SendQueue, TransportError};
use crate::registry::{Pending, Registry};

/// Fixed decimalization data sent with the PIN offset command.
const OFFSET_DEC_TABLE: &str = "30313233343536373839303132333435";

#[derive(Debug)]
pub enum Error {
    /// `ip:port` does not resolve to an IPv4 address.
    BadAddress(String),
    AddressResolve(std::io::Error),
    InvalidConfig(config::Error),
}

/// Key blobs, each behind its own lock, so that a key update never races an operation
/// reading that key.
struct KeyStore {
    pvk: RwLock<String>,
    cvk: RwLock<String>,
    tpk: RwLock<String>,
}

impl KeyStore {
    fn new(keys: Keys) -> Self {
        Self {
            pvk: RwLock::new(keys.pvk),
            cvk: RwLock::new(keys.cvk),
            tpk: RwLock::new(keys.tpk),
        }
    }

    fn slot(&self, id: KeyId) -> &RwLock<String> {
        match id {
            KeyId::Pvk => &self.pvk,
            KeyId::Cvk => &self.cvk,
            KeyId::Tpk => &self.tpk,
        }
    }

    fn get(&self, id: KeyId) -> String {
        self.slot(id)
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set(&self, id: KeyId, value: &str) {
        *self.slot(id).write().unwrap_or_else(PoisonError::into_inner) = value.to_string();
    }
}

/// Dispatcher bootstrap state. The dispatcher is started by the first operation, and runs for
/// as long as the session lives.
struct DispatchState {
    queue: Option<Arc<SendQueue>>,
    initial_stream: Option<TcpStream>,
}

/// A session to a Utimaco payment HSM.
///
/// All operations funnel through a single dispatcher thread that owns the TCP connection, so a
/// session can be shared between any number of threads (e.g. behind an `Arc`).
pub struct Utimaco {
    config: SessionConfig,
    addr: SocketAddr,
    keys: KeyStore,
    seq: AtomicU64,
    registry: Arc<Registry>,
    dispatch: Mutex<DispatchState>,
}

impl Utimaco {
    /// Open a session to the HSM at `ip:port`, holding the given key blobs, with sequence
    /// tagging and logging on.
    ///
    /// The session is returned even if the HSM cannot be reached right now; the dial error
    /// comes along with it, and the session keeps trying to connect in the background once
    /// it is used.
    pub fn init(
        ip: &str,
        port: u16,
        pvk: &str,
        cvk: &str,
        tpk: &str,
    ) -> Result<(Self, Option<std::io::Error>), Error> {
        let keys = Keys {
            pvk: pvk.to_string(),
            cvk: cvk.to_string(),
            tpk: tpk.to_string(),
        };
        Self::with_config(SessionConfig::new(ip, port, keys))
    }

    /// Same as `init()`, with every session setting taken from `config`.
    pub fn with_config(config: SessionConfig) -> Result<(Self, Option<std::io::Error>), Error> {
        config.validate().map_err(Error::InvalidConfig)?;
        let addr = (config.ip.as_str(), config.port)
            .to_socket_addrs()
            .map_err(Error::AddressResolve)?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| Error::BadAddress(format!("{}:{}", config.ip, config.port)))?;

        let (initial_stream, dial_error) = match TcpStream::connect(addr) {
            Ok(stream) => (Some(stream), None),
            Err(e) => {
                warn!("Unable to connect to HSM at {}: {}", addr, e);
                (None, Some(e))
            }
        };

        let session = Self {
            keys: KeyStore::new(config.keys.clone()),
            config,
            addr,
            seq: AtomicU64::new(0),
            registry: Arc::new(Registry::new()),
            dispatch: Mutex::new(DispatchState {
                queue: None,
                initial_stream,
            }),
        };
        Ok((session, dial_error))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_dispatcher_running(&self) -> bool {
        self.dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .queue
            .is_some()
    }

    /// Number of requests currently waiting for a reply.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    pub fn set_key_id(&self, id: KeyId, value: &str) {
        self.keys.set(id, value)
    }

    pub fn key(&self, id: KeyId) -> String {
        self.keys.get(id)
    }

    /// Compute a CVV / CVV2. Returns the first 3 chars of the reply payload.
    pub fn cvv_kind(&self, pan: &str, exp: &str, kind: CvvKind) -> HsmResult<String> {
        validators::validate_pan(pan)?;
        validators::validate_expiry(exp)?;

        let (exp, svc) = match kind {
            CvvKind::Cvv1 => (exp.to_string(), "506"),
            // YYMM -> MMYY
            CvvKind::Cvv2 => (format!("{}{}", &exp[2..4], &exp[0..2]), "000"),
        };
        let cvk = self.keys.get(KeyId::Cvk);
        let body = format!(
            "{}1500{}{}{}{}010{}",
            defs::UTIMACO_BODY_PREFIX,
            len_hex(&cvk),
            cvk,
            exp,
            svc,
            pan
        );

        let reply = self.dispatch(defs::UTIMACO_CMD_HEADER, &body)?;
        let payload = self.approved_payload(&reply)?;
        Ok(payload.get(..3).unwrap_or(payload).to_string())
    }

    /// Hand a command over to the dispatcher and wait for the reply.
    fn dispatch(&self, header: &str, body: &str) -> HsmResult<String> {
        self.submit(header, body).map_err(|e| {
            HsmError::utimaco_resp("No reply from HSM").with_detail(e.to_string())
        })
    }

    fn submit(&self, header: &str, body: &str) -> Result<String, TransportError> {
        let id = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let tag = if self.config.sequence_tagging {
            format!("{:016X}", id)
        } else {
            String::new()
        };
        let frame = codec::frame(header, body, &tag);
        let (cmd, reply_rx) = Command::new(id, tag.clone(), frame);

        let queue = self.queue()?;
        if !self.registry.register(id, Pending::new(tag)) {
            return Err(TransportError::DispatcherGone);
        }
        if queue.push(QueueItem::Request(cmd)).is_err() {
            self.registry.take(id);
            return Err(TransportError::DispatcherGone);
        }
        // Do not keep the queue alive from here while waiting.
        drop(queue);

        let reply = match self.config.request_timeout() {
            Some(timeout) => reply_rx.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::Timeout,
                RecvTimeoutError::Disconnected => TransportError::DispatcherGone,
            }),
            None => reply_rx.recv().map_err(|_| TransportError::DispatcherGone),
        }
        .and_then(|r| r);
        self.registry.take(id);
        if let Err(TransportError::Timeout) = reply {
            debug!("Request id={} timed out", id);
        }
        reply
    }

    /// Get a handle to the send queue, starting the dispatcher on first use.
    fn queue(&self) -> Result<Arc<SendQueue>, TransportError> {
        let mut state = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = state.queue.as_ref() {
            return Ok(queue.clone());
        }

        let (tx, rx) = queue::channel(self.config.queue_depth);
        let queue = Arc::new(tx);
        self.spawn_dispatcher(state.initial_stream.take(), rx, &queue)?;
        state.queue = Some(queue.clone());
        Ok(queue)
    }

    fn spawn_dispatcher(
        &self,
        stream: Option<TcpStream>,
        rx: QueueReceiver,
        queue: &Arc<SendQueue>,
    ) -> Result<(), TransportError> {
        let dispatcher = Dispatcher::new(
            self.addr,
            stream,
            rx,
            Arc::downgrade(queue),
            self.registry.clone(),
            &self.config,
        );
        std::thread::Builder::new()
            .name("utimaco-dispatch".to_string())
            .spawn(move || dispatcher.run())
            .map(|_| ())
            .map_err(|e| {
                warn!("Unable to start HSM dispatcher: {}", e);
                TransportError::DispatcherGone
            })
    }

    /// Strip the reply framing: the length prefix at the head and, with sequence tagging on,
    /// the trailer at the tail.
    fn strip<'a>(&self, reply: &'a str) -> &'a str {
        let body = reply.get(codec::REPLY_LEN_PREFIX_HEX..).unwrap_or("");
        if self.config.sequence_tagging {
            let end = body.len().saturating_sub(defs::SEQ_TRIM_HEX_LEN);
            body.get(..end).unwrap_or("")
        } else {
            body
        }
    }

    /// Return the reply payload following an approved response code, or fail with the reply
    /// embedded for diagnosis.
    fn approved_payload<'a>(&self, reply: &'a str) -> HsmResult<&'a str> {
        let stripped = self.strip(reply);
        if stripped.starts_with(defs::UTIMACO_APPROVED) {
            Ok(&stripped[defs::UTIMACO_RESP_CODE_LEN..])
        } else {
            Err(HsmError::utimaco_resp(format!("Failed{}", reply)).with_detail(reply))
        }
    }
}

impl PaymentCrypto for Utimaco {
    fn set_key(&self, id: &str, value: &str) {
        match id.parse::<KeyId>() {
            Ok(id) => self.keys.set(id, value),
            Err(_) => debug!("Ignoring update of unknown key {}", id),
        }
    }

    fn get_key(&self, id: &str) -> String {
        id.parse::<KeyId>()
            .map(|id| self.keys.get(id))
            .unwrap_or_default()
    }

    fn cvv(&self, pan: &str, exp: &str, kind: &str) -> HsmResult<String> {
        self.cvv_kind(pan, exp, kind.parse()?)
    }

    fn pvv(&self, pan: &str, pin_block: &str) -> HsmResult<String> {
        validators::validate_pan(pan)?;
        validators::validate_pin_block(pin_block)?;

        let pvk = self.keys.get(KeyId::Pvk);
        let tpk = self.keys.get(KeyId::Tpk);
        let body = format!(
            "{}1600{}{}{}1{}{}{}{}",
            defs::UTIMACO_BODY_PREFIX,
            len_hex(&pvk),
            pvk,
            &pan[4..15],
            len_hex(&tpk),
            tpk,
            pin_block,
            &pan[3..15]
        );

        let reply = self.dispatch(defs::UTIMACO_CMD_HEADER, &body)?;
        self.approved_payload(&reply).map(str::to_string)
    }

    fn offset(&self, pan: &str, pin_block: &str) -> HsmResult<String> {
        validators::validate_pan(pan)?;
        validators::validate_pin_block(pin_block)?;

        let pvk = self.keys.get(KeyId::Pvk);
        let tpk = self.keys.get(KeyId::Tpk);
        let body = format!(
            "{}1C00{}{}08{}{}{}00{}{}{}06",
            defs::UTIMACO_BODY_PREFIX,
            len_hex(&pvk),
            pvk,
            pan,
            OFFSET_DEC_TABLE,
            pin_block,
            &pan[3..15],
            len_hex(&tpk),
            tpk
        );

        let reply = self.dispatch(defs::UTIMACO_CMD_HEADER, &body)?;
        self.approved_payload(&reply).map(|p| p.replace('F', ""))
    }
}

// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Client for Utimaco payment HSMs.
//!
//! A `Utimaco` session multiplexes any number of concurrent callers over a single TCP
//! connection. Callers queue framed commands; one dispatcher thread writes them out and reads
//! the replies back, strictly in order. When the connection breaks, queued callers are turned
//! away with a disconnect error while the session re-dials in the background.

extern crate hex;
extern crate hsm_common;
extern crate log;
extern crate serde;

pub mod codec;
pub mod config;
mod dispatcher;
pub mod queue;
mod reconnect;
pub mod registry;
pub mod session;

pub use config::{Backoff, Keys, SessionConfig};
pub use queue::TransportError;
pub use session::{Error, Utimaco};

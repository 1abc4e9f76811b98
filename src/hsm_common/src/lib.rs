// Copyright 2020-2022 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

extern crate hex;
extern crate serde;

pub mod error;
pub mod module;
pub mod util;

pub use error::{Error, ErrorCode, Result};
pub use module::{CryptMode, CvvKind, KeyId, PaymentCrypto};

pub mod defs {
    /// Command header shared by every implemented Utimaco operation.
    pub const UTIMACO_CMD_HEADER: &str = "9C";
    /// Fixed prefix of every Utimaco command body.
    pub const UTIMACO_BODY_PREFIX: &str = "0195";
    /// Response code signalling an approved (successful) HSM reply.
    pub const UTIMACO_APPROVED: &str = "9A";
    /// Length (in hex chars) of the response code at the head of a reply body.
    pub const UTIMACO_RESP_CODE_LEN: usize = 2;

    /// Length (in hex chars) of a sequence tag appended to outbound commands.
    pub const SEQ_TAG_HEX_LEN: usize = 16;
    /// Length (in hex chars) trimmed from the tail of a reply when sequence tagging is enabled.
    pub const SEQ_TRIM_HEX_LEN: usize = 24;

    /// Constant returned by the MAC and CVV2 padding placeholders.
    pub const STUB_ZERO_BLOCK: &str = "0000000000000000";

    /// Minimum length of a PAN. The operation surface slices it up to index 15.
    pub const PAN_MIN_LEN: usize = 15;
    /// Length of a card expiry date (YYMM).
    pub const EXPIRY_LEN: usize = 4;

    /// Default bound of the send queue between callers and the dispatcher.
    pub const DEFAULT_QUEUE_DEPTH: usize = 64;
    /// Sequence tagging is on unless configured otherwise.
    pub const DEFAULT_SEQUENCE_TAGGING: bool = true;
    /// Frame logging is on unless configured otherwise.
    pub const DEFAULT_LOGGING: bool = true;

    /// Initial reconnect interval.
    pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 1000;
    /// The reconnect interval never grows beyond this.
    pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60 * 1000;
    /// Multiplier applied to the reconnect interval when it escalates.
    pub const DEFAULT_BACKOFF_FACTOR: u32 = 5;
    /// Number of consecutive dial failures between two escalations.
    pub const DEFAULT_BACKOFF_ESCALATE_EVERY: usize = 10;
}

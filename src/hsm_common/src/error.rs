// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error classes surfaced to embedders. Each class maps onto a fixed tag and HTTP status, so
/// that web-facing callers can forward failures without inspecting them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorCode {
    /// The HSM rejected the command, or the command never got a reply.
    #[serde(rename = "ERROR_IN_UTIMACO_RESP")]
    UtimacoResp,
    /// The caller supplied arguments the command cannot be assembled from.
    #[serde(rename = "ERROR_INVALID_ARGS")]
    InvalidArgs,
    /// The capability exists on the interface but is not backed by the device.
    #[serde(rename = "ERROR_NOT_IMPLEMENTED")]
    NotImplemented,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UtimacoResp => "ERROR_IN_UTIMACO_RESP",
            Self::InvalidArgs => "ERROR_INVALID_ARGS",
            Self::NotImplemented => "ERROR_NOT_IMPLEMENTED",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::UtimacoResp => 500,
            Self::InvalidArgs => 400,
            Self::NotImplemented => 501,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged error value, carrying a short description and (optionally) the raw diagnostic
/// that caused it, e.g. the HSM reply.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Error {
    code: ErrorCode,
    status: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new<M: Into<String>>(code: ErrorCode, message: M) -> Self {
        Self {
            code,
            status: code.http_status(),
            message: message.into(),
            detail: None,
        }
    }

    /// Attach the raw diagnostic (reply string, transport failure text) to this error.
    pub fn with_detail<D: Into<String>>(mut self, detail: D) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn utimaco_resp<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorCode::UtimacoResp, message)
    }

    pub fn invalid_args<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorCode::InvalidArgs, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        self.message.as_str()
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(detail) = self.detail.as_ref() {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::defs;
use crate::error::{Error, Result};

/// Names of the key blobs a payment crypto module holds.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum KeyId {
    Pvk,
    Cvk,
    Tpk,
}

impl KeyId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pvk => "Pvk",
            Self::Cvk => "Cvk",
            Self::Tpk => "Tpk",
        }
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Pvk" => Ok(Self::Pvk),
            "Cvk" => Ok(Self::Cvk),
            "Tpk" => Ok(Self::Tpk),
            _ => Err(Error::invalid_args(format!("unknown key id: {}", s))),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CvvKind {
    /// Magnetic stripe CVV.
    Cvv1,
    /// CVV2, printed on the back of the card.
    Cvv2,
}

impl FromStr for CvvKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Cvv1" => Ok(Self::Cvv1),
            "Cvv2" => Ok(Self::Cvv2),
            _ => Err(Error::invalid_args(format!("unknown CVV kind: {}", s))),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum CryptMode {
    Encrypt,
    Decrypt,
}

impl FromStr for CryptMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "E" => Ok(Self::Encrypt),
            "D" => Ok(Self::Decrypt),
            _ => Err(Error::invalid_args(format!("unknown crypt mode: {}", s))),
        }
    }
}

/// The capability set a payment cryptographic module exposes to web services.
///
/// Keys are addressed by their string names ("Pvk", "Cvk", "Tpk"); unknown names are ignored
/// by `set_key()` and yield an empty string from `get_key()`.
///
/// `mac()`, `cvv2_padding()`, `translate()` and `crypt()` are not implemented against any
/// device yet. Their default bodies keep the placeholder behaviour downstream callers rely on:
/// a zero block for the first two, and a pass-through of the input for the latter two.
pub trait PaymentCrypto {
    fn set_key(&self, id: &str, value: &str);
    fn get_key(&self, id: &str) -> String;

    /// Compute a CVV (`kind` = "Cvv1") or CVV2 (`kind` = "Cvv2") for `pan`, with the card
    /// expiry `exp` given as YYMM.
    fn cvv(&self, pan: &str, exp: &str, kind: &str) -> Result<String>;
    /// Compute the PIN verification value for the PIN carried by `pin_block`.
    fn pvv(&self, pan: &str, pin_block: &str) -> Result<String>;
    /// Compute the PIN offset for the PIN carried by `pin_block`.
    fn offset(&self, pan: &str, pin_block: &str) -> Result<String>;

    fn mac(&self, _data: &str) -> Result<String> {
        Ok(defs::STUB_ZERO_BLOCK.to_string())
    }

    fn cvv2_padding(&self, _data: &str) -> Result<String> {
        Ok(defs::STUB_ZERO_BLOCK.to_string())
    }

    fn translate(&self, _pan: &str, pin_block: &str, _tpk_2nd: &str) -> Result<String> {
        Ok(pin_block.to_string())
    }

    fn crypt(&self, data: &str, mode: &str) -> Result<String> {
        mode.parse::<CryptMode>()?;
        Ok(data.to_string())
    }
}

/// Argument checks run before a command body is assembled. Valid inputs pass through
/// untouched; the checks only keep the slicing done by the operations in bounds.
pub mod validators {
    use crate::defs;
    use crate::error::{Error, Result};

    pub fn validate_pan(pan: &str) -> Result<()> {
        if pan.len() < defs::PAN_MIN_LEN {
            return Err(Error::invalid_args(format!(
                "PAN too short: expected at least {} digits",
                defs::PAN_MIN_LEN
            )));
        }
        if !pan.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_args("PAN must be decimal digits"));
        }
        Ok(())
    }

    pub fn validate_pin_block(pin_block: &str) -> Result<()> {
        if pin_block.is_empty() {
            return Err(Error::invalid_args("empty PIN block"));
        }
        if !pin_block.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::invalid_args("PIN block must be hex"));
        }
        Ok(())
    }

    pub fn validate_expiry(exp: &str) -> Result<()> {
        if exp.len() != defs::EXPIRY_LEN || !exp.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::invalid_args("expiry must be 4 digits (YYMM)"));
        }
        Ok(())
    }
}

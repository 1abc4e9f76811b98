// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

/// Upper-case hex encoding, as used on the HSM wire.
pub fn encode_upper<T: AsRef<[u8]>>(bytes: T) -> String {
    ::hex::encode_upper(bytes)
}

pub fn decode<T: AsRef<[u8]>>(data: T) -> Result<Vec<u8>, ::hex::FromHexError> {
    ::hex::decode(data)
}

/// Half the length of the hex string `k` (i.e. its size in bytes), as a 4 char upper-hex
/// number. This is the length field that precedes a key blob inside a command body.
pub fn len_hex(k: &str) -> String {
    format!("{:04X}", k.len() / 2)
}

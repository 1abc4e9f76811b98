// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::io::{Read, Write};

use hsm_common::util::hex;

#[derive(Debug)]
pub enum Error {
    HexDecode(::hex::FromHexError),
    Read(std::io::Error),
    Write(std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Size (in bytes) of the length prefix heading every HSM reply.
pub const REPLY_LEN_PREFIX: usize = 4;
/// Size (in hex chars) of the re-encoded reply length prefix.
pub const REPLY_LEN_PREFIX_HEX: usize = 2 * REPLY_LEN_PREFIX;

/// Assemble an outbound command frame, as an upper-hex string:
///
/// header || length || body || tag
///
/// where `length` is a 3 byte (6 hex chars) big-endian field. The device expects
/// `(len(body)/2 + 8 + len(tag)) / 2` here, with `len()` counting hex chars; `tag` is either
/// empty or a 16 char sequence tag.
pub fn frame(header: &str, body: &str, tag: &str) -> String {
    let len = (body.len() / 2 + 8 + tag.len()) / 2;
    format!("{}{:06X}{}{}", header, len, body, tag)
}

/// Body length announced by a reply length prefix: bytes 1..3, big-endian. Byte 0 is not part
/// of the length.
pub fn reply_body_len(prefix: &[u8; REPLY_LEN_PREFIX]) -> usize {
    (prefix[1] as usize) * 65536 + (prefix[2] as usize) * 256 + prefix[3] as usize
}

/// Framed command / reply transport to the HSM.
///
/// Commands and replies travel the underlying stream strictly in turn: once a command is sent,
/// its reply must be read before the next command goes out.
pub trait Transport {
    /// Send a hex-encoded command frame, as produced by `frame()`.
    fn send_command(&mut self, command: &str) -> Result<()>;
    /// Receive a reply, returned as the upper-hex encoding of its length prefix and body.
    fn recv_reply(&mut self) -> Result<String>;
}

/// `Transport` implementation over a connected `Read + Write` stream (a TCP socket, in
/// production).
pub struct FrameTransport<S: Read + Write> {
    stream: S,
}

impl<S: Read + Write> FrameTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

impl<S: Read + Write> Transport for FrameTransport<S> {
    fn send_command(&mut self, command: &str) -> Result<()> {
        let bytes = hex::decode(command).map_err(Error::HexDecode)?;
        // write_all() turns short writes into either a retry or an error (WriteZero).
        self.stream
            .write_all(bytes.as_slice())
            .and_then(|_| self.stream.flush())
            .map_err(Error::Write)
    }

    fn recv_reply(&mut self) -> Result<String> {
        let mut prefix = [0u8; REPLY_LEN_PREFIX];
        self.stream.read_exact(&mut prefix).map_err(Error::Read)?;
        let mut body = vec![0u8; reply_body_len(&prefix)];
        self.stream
            .read_exact(body.as_mut_slice())
            .map_err(Error::Read)?;

        let mut reply = hex::encode_upper(prefix);
        reply.push_str(hex::encode_upper(body).as_str());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory stream: reads come from `input`, writes land in `output`.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn with_input(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            // Accept at most 3 bytes per call, to exercise short writes.
            let n = std::cmp::min(3, buf.len());
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_frame_without_tag() {
        let body = "0195AABBCCDD";
        // (12/2 + 8) / 2 = 7
        assert_eq!(frame("9C", body, ""), "9C0000070195AABBCCDD");
    }

    #[test]
    fn test_frame_with_tag() {
        let body = "0195AABBCCDD";
        let tag = "000000000000002A";
        // (12/2 + 8 + 16) / 2 = 15
        assert_eq!(
            frame("9C", body, tag),
            "9C00000F0195AABBCCDD000000000000002A"
        );
    }

    #[test]
    fn test_frame_length_field_is_six_upper_hex_chars() {
        let body = "AB".repeat(1000);
        let framed = frame("9C", body.as_str(), "");
        // (2000/2 + 8) / 2 = 504 = 0x1F8
        assert_eq!(&framed[2..8], "0001F8");
        assert!(framed.ends_with(body.as_str()));
    }

    #[test]
    fn test_reply_body_len_ignores_first_byte() {
        assert_eq!(reply_body_len(&[0xff, 0x00, 0x00, 0x01]), 1);
        assert_eq!(reply_body_len(&[0x00, 0x01, 0x02, 0x03]), 0x010203);
    }

    #[test]
    fn test_send_command_writes_decoded_bytes() {
        let mut xport = FrameTransport::new(MockStream::with_input(Vec::new()));
        xport.send_command("9C0000070195AABBCCDD").unwrap();
        assert_eq!(
            xport.get_ref().output,
            vec![0x9c, 0x00, 0x00, 0x07, 0x01, 0x95, 0xaa, 0xbb, 0xcc, 0xdd]
        );
    }

    #[test]
    fn test_send_command_rejects_bad_hex() {
        let mut xport = FrameTransport::new(MockStream::with_input(Vec::new()));
        match xport.send_command("socket-ready") {
            Err(Error::HexDecode(_)) => (),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(xport.get_ref().output.is_empty());
    }

    #[test]
    fn test_recv_reply() {
        let mut xport = FrameTransport::new(MockStream::with_input(vec![
            0x00, 0x00, 0x00, 0x03, 0x9a, 0x02, 0x86, 0xee,
        ]));
        // Trailing bytes past the announced body length stay in the stream.
        assert_eq!(xport.recv_reply().unwrap(), "000000039A0286");
    }

    #[test]
    fn test_recv_reply_short_body() {
        let mut xport =
            FrameTransport::new(MockStream::with_input(vec![0x00, 0x00, 0x00, 0x05, 0x9a]));
        match xport.recv_reply() {
            Err(Error::Read(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_recv_reply_short_prefix() {
        let mut xport = FrameTransport::new(MockStream::with_input(vec![0x00, 0x00]));
        assert!(matches!(xport.recv_reply(), Err(Error::Read(_))));
    }
}

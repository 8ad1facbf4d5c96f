// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TK103 wire protocol.
//!
//! ```text
//! device                              gateway
//!   | ##,imei:<digits>,A;               |
//!   |---------------------------------->|
//!   |                            LOAD\r\n|
//!   |<----------------------------------|
//!   | imei:<payload>;                   |
//!   |---------------------------------->|
//!   |                              ON\r\n|
//!   |<----------------------------------|
//! ```
//!
//! Frames are ASCII, terminated by `;` and optionally followed by `\r\n`.

use regex::Regex;
use std::io;
use std::sync::OnceLock;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Reply to a successful registration.
pub const REPLY_REGISTERED: &[u8] = b"LOAD\r\n";

/// Reply to every frame received on an active session.
pub const REPLY_KEEPALIVE: &[u8] = b"ON\r\n";

/// Frame terminator.
pub const FRAME_TERMINATOR: u8 = b';';

/// Default maximum frame size (the device's own send buffer).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4094;

fn registration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^##,imei:([0-9]+),.;$").expect("valid registration regex"))
}

fn frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^imei:(.*?);").expect("valid frame regex"))
}

/// Extract the device identifier from a registration frame.
pub fn parse_registration(frame: &str) -> Option<String> {
    registration_re()
        .captures(frame)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Extract the payload from a normal frame.
pub fn parse_frame(frame: &str) -> Option<&str> {
    frame_re()
        .captures(frame)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Splits an inbound byte stream into trimmed frames.
pub struct FrameReader<R> {
    inner: R,
    buffer: Vec<u8>,
    chunk: Vec<u8>,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a reader.
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            buffer: Vec::with_capacity(max_frame_size),
            chunk: vec![0u8; max_frame_size],
            max_frame_size,
        }
    }

    /// Read the next frame, including its `;` terminator.
    ///
    /// Returns `Ok(None)` once the peer has closed the connection. When
    /// `max_frame_size` bytes arrive without a terminator they are returned as
    /// one frame.
    pub async fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(frame) = self.take_frame() {
                return Ok(Some(frame));
            }

            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                if !self.buffer.iter().all(u8::is_ascii_whitespace) {
                    tracing::debug!(
                        bytes = self.buffer.len(),
                        "Discarding unterminated frame at EOF"
                    );
                }
                self.buffer.clear();
                return Ok(None);
            }
            self.buffer.extend_from_slice(&self.chunk[..n]);
        }
    }

    fn take_frame(&mut self) -> Option<String> {
        let end = match self.buffer.iter().position(|&b| b == FRAME_TERMINATOR) {
            Some(pos) => pos + 1,
            None if self.buffer.len() >= self.max_frame_size => self.max_frame_size,
            None => return None,
        };

        let raw: Vec<u8> = self.buffer.drain(..end).collect();
        let frame = String::from_utf8_lossy(&raw).trim().to_string();

        // Whitespace between frames (the trailing \r\n) is not a frame.
        if frame.is_empty() {
            return self.take_frame();
        }
        Some(frame)
    }
}

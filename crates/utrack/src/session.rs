// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-connection device session.
//!
//! ```text
//! AwaitingRegistration --(valid ##,imei, sinks started / LOAD)--> Active
//!          |                                                        |
//!          | bad frame, timeout, sinks unavailable                  | timeout, EOF,
//!          v                                                        | all sinks failed,
//!        Closed <---------------------------------------------------+ shutdown
//! ```
//!
//! Every frame read on an active session is answered with `ON`, whether or not
//! it decoded into a report. The session exclusively owns its [`MultiSink`];
//! whatever window is open is finalized before the session ends.

use crate::config::GatewayConfig;
use crate::multi_sink::MultiSink;
use crate::protocol::{
    parse_frame, parse_registration, FrameReader, REPLY_KEEPALIVE, REPLY_REGISTERED,
};
use crate::report::{decode, DecodeError};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Builds the sink set for a freshly registered device.
pub type SinkBuilder = Arc<dyn Fn(&GatewayConfig, &str) -> MultiSink + Send + Sync>;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// First frame was not a registration.
    RegistrationRejected,
    /// No registration within the read timeout.
    RegistrationTimeout,
    /// A sink could not open its first window.
    SinksUnavailable,
    /// Every sink rejected a report.
    AllSinksFailed,
    /// No frame within the read timeout.
    Timeout,
    /// Peer closed the connection.
    Disconnected,
    /// Read or write error on the connection.
    Transport,
    /// Server shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RegistrationRejected => "registration rejected",
            Self::RegistrationTimeout => "registration timeout",
            Self::SinksUnavailable => "sinks unavailable",
            Self::AllSinksFailed => "all sinks failed",
            Self::Timeout => "read timeout",
            Self::Disconnected => "disconnected",
            Self::Transport => "transport error",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Registered identity, if registration got that far.
    pub device_id: Option<String>,

    /// Frames read, registration included.
    pub frames: u64,

    /// Reports accepted by at least one sink.
    pub reports: u64,

    pub close_reason: CloseReason,
}

/// Why a bounded frame read produced no frame.
enum ReadEnd {
    Eof,
    Timeout,
    Failed(io::Error),
    Shutdown,
}

/// Protocol handler for one accepted connection.
pub struct DeviceSession<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    peer: String,
    config: Arc<GatewayConfig>,
    sink_builder: SinkBuilder,
    shutdown: watch::Receiver<bool>,
    device_id: Option<String>,
    frames: u64,
    reports: u64,
}

impl<S: AsyncRead + AsyncWrite + Unpin> DeviceSession<S> {
    /// Wrap an accepted connection.
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        config: Arc<GatewayConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (read_half, writer) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half, config.max_frame_size),
            writer,
            peer: peer.into(),
            config,
            sink_builder: Arc::new(MultiSink::new),
            shutdown,
            device_id: None,
            frames: 0,
            reports: 0,
        }
    }

    /// Replace how sinks are built at registration.
    pub fn with_sink_builder(mut self, builder: SinkBuilder) -> Self {
        self.sink_builder = builder;
        self
    }

    /// Drive the session until it closes.
    pub async fn run(mut self) -> SessionSummary {
        let close_reason = match self.register().await {
            Ok(mut sinks) => {
                let reason = self.serve(&mut sinks).await;
                let failed = sinks.close();
                if failed > 0 {
                    warn!(
                        device_id = %sinks.device_id(),
                        "{} sink(s) failed to finalize", failed
                    );
                }
                reason
            }
            Err(reason) => reason,
        };

        if let Err(e) = self.writer.shutdown().await {
            debug!(peer = %self.peer, "Shutdown of write half failed: {}", e);
        }

        info!(
            peer = %self.peer,
            device_id = self.device_id.as_deref().unwrap_or("-"),
            frames = self.frames,
            reports = self.reports,
            "Session closed: {}", close_reason
        );

        SessionSummary {
            device_id: self.device_id,
            frames: self.frames,
            reports: self.reports,
            close_reason,
        }
    }

    /// Read the registration frame and bring the sinks up.
    async fn register(&mut self) -> Result<MultiSink, CloseReason> {
        let frame = match self.read_frame().await {
            Ok(frame) => frame,
            Err(end) => return Err(self.read_ended(end, CloseReason::RegistrationTimeout)),
        };
        self.frames += 1;

        let Some(device_id) = parse_registration(&frame) else {
            warn!(peer = %self.peer, "Registration rejected: {:?}", frame);
            return Err(CloseReason::RegistrationRejected);
        };
        self.device_id = Some(device_id.clone());

        let mut sinks = (self.sink_builder)(&self.config, &device_id);
        if let Err(e) = sinks.start() {
            warn!(device_id = %device_id, peer = %self.peer, "Registration failed: {}", e);
            return Err(CloseReason::SinksUnavailable);
        }

        if let Err(e) = self.writer.write_all(REPLY_REGISTERED).await {
            warn!(device_id = %device_id, "Failed to acknowledge registration: {}", e);
            sinks.close();
            return Err(CloseReason::Transport);
        }

        info!(device_id = %device_id, peer = %self.peer, "Device registered");
        Ok(sinks)
    }

    /// Active loop: decode, persist, acknowledge.
    async fn serve(&mut self, sinks: &mut MultiSink) -> CloseReason {
        loop {
            let frame = match self.read_frame().await {
                Ok(frame) => frame,
                Err(end) => return self.read_ended(end, CloseReason::Timeout),
            };
            self.frames += 1;
            debug!(device_id = %sinks.device_id(), "Frame: {}", frame);

            match parse_frame(&frame) {
                Some(payload) => match decode(sinks.device_id(), payload) {
                    Ok(report) => match sinks.write(&report) {
                        Ok(_) => self.reports += 1,
                        Err(e) => {
                            error!(device_id = %sinks.device_id(), "Dropping session: {}", e);
                            return CloseReason::AllSinksFailed;
                        }
                    },
                    Err(DecodeError::NoFixLock) => {
                        debug!(device_id = %sinks.device_id(), "No fix lock, frame skipped");
                    }
                    Err(e) => {
                        warn!(device_id = %sinks.device_id(), "{}", e);
                    }
                },
                None => {
                    debug!(device_id = %sinks.device_id(), "Unrecognized frame");
                }
            }

            if let Err(e) = self.writer.write_all(REPLY_KEEPALIVE).await {
                warn!(device_id = %sinks.device_id(), "Failed to send keep-alive: {}", e);
                return CloseReason::Transport;
            }
        }
    }

    async fn read_frame(&mut self) -> Result<String, ReadEnd> {
        let read_timeout = self.config.read_timeout();
        tokio::select! {
            result = tokio::time::timeout(read_timeout, self.reader.next_frame()) => match result {
                Ok(Ok(Some(frame))) => Ok(frame),
                Ok(Ok(None)) => Err(ReadEnd::Eof),
                Ok(Err(e)) => Err(ReadEnd::Failed(e)),
                Err(_) => Err(ReadEnd::Timeout),
            },
            _ = shutdown_requested(&mut self.shutdown) => Err(ReadEnd::Shutdown),
        }
    }

    /// Map a read that produced no frame to a close reason.
    fn read_ended(&self, end: ReadEnd, on_timeout: CloseReason) -> CloseReason {
        let device_id = self.device_id.as_deref().unwrap_or("-");
        match end {
            ReadEnd::Shutdown => CloseReason::Shutdown,
            ReadEnd::Eof => CloseReason::Disconnected,
            ReadEnd::Timeout => {
                warn!(
                    peer = %self.peer,
                    device_id,
                    "No frame within {}s", self.config.read_timeout_secs
                );
                on_timeout
            }
            ReadEnd::Failed(e) => {
                warn!(peer = %self.peer, device_id, "Read error: {}", e);
                CloseReason::Transport
            }
        }
    }
}

/// Resolves once shutdown is signalled; never if the sender is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

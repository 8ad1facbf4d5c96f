// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! uTrack GPS Tracker Gateway
//!
//! Accepts TCP connections from TK103-family trackers, registers each device,
//! decodes its location frames and persists every locked fix to a set of
//! rotating sinks:
//! - `raw`: append-only log of the payloads as received
//! - `track`: KML 2.2 document, one placemark per fix
//!
//! # Quick Start
//!
//! ```bash
//! # Listen on 22000, rotate every hour or 1000 points
//! utrack-server -d ./DATA -l ./logs -t 3600 -p 1000
//!
//! # Raw sink only, log to stdout
//! utrack-server --sinks raw --stdout
//! ```
//!
//! # Output Layout
//!
//! ```text
//! <data_root>/<device_id>/raw/2024_01_01_120000<suffix>.log
//! <data_root>/<device_id>/kml/2024_01_01_120000<suffix>.kml
//! ```

pub mod config;
pub mod multi_sink;
pub mod protocol;
pub mod report;
pub mod rotation;
pub mod server;
pub mod session;
pub mod sink;

pub use config::{ConfigError, GatewayConfig};
pub use multi_sink::{MultiSink, MultiSinkError, WriteOutcome};
pub use report::{decode, DecodeError, Report};
pub use rotation::{RotationConfig, RotationPolicy, RotationTrigger};
pub use server::{GatewayServer, ServerError};
pub use session::{CloseReason, DeviceSession, SessionSummary};
pub use sink::{create_sink, Sink, SinkError, SinkKind, SinkStats};

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistence backends for decoded reports.
//!
//! Each sink owns one open output window under `<data_root>/<device_id>/` and
//! rotates it according to its [`RotationPolicy`]:
//!
//! | Kind  | Window file                     | Rendering            |
//! |-------|---------------------------------|----------------------|
//! | raw   | `raw/<timestamp><suffix>.log`   | payload line         |
//! | track | `kml/<timestamp><suffix>.kml`   | KML 2.2 placemark    |

mod raw;
mod track;

pub use raw::RawAppendSink;
pub use track::TrackPointSink;

use crate::report::Report;
use crate::rotation::RotationPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Available sink variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Append-only log of raw payloads.
    Raw,
    /// KML track document.
    Track,
}

impl SinkKind {
    /// Subdirectory of the device directory holding this sink's windows.
    pub fn subdir(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Track => "kml",
        }
    }

    /// Window file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Raw => "log",
            Self::Track => "kml",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Track => write!(f, "track"),
        }
    }
}

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Sink not started")]
    NotStarted,

    #[error("Sink already started")]
    AlreadyStarted,
}

impl SinkError {
    pub(crate) fn io(path: &Path) -> impl Fn(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Per-sink counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Reports written.
    pub records: u64,

    /// Rotations performed.
    pub rotations: u64,

    /// Windows flushed or saved and closed.
    pub windows_finalized: u64,
}

/// A persistence backend.
pub trait Sink: Send {
    /// Variant of this sink.
    fn kind(&self) -> SinkKind;

    /// Ensure the output directory exists and open the first window.
    fn start(&mut self) -> Result<(), SinkError>;

    /// Append one report to the active window, rotating first if needed.
    fn write(&mut self, report: &Report) -> Result<(), SinkError>;

    /// Finalize the open window.
    fn close(&mut self) -> Result<(), SinkError>;

    /// Counters since the sink was created.
    fn stats(&self) -> SinkStats;
}

/// Create a sink for one device.
pub fn create_sink(
    kind: SinkKind,
    data_root: &Path,
    device_id: &str,
    policy: RotationPolicy,
) -> Box<dyn Sink> {
    let dir = data_root.join(device_id).join(kind.subdir());
    match kind {
        SinkKind::Raw => Box::new(RawAppendSink::new(dir, policy)),
        SinkKind::Track => Box::new(TrackPointSink::new(dir, policy)),
    }
}

/// Create `path` and its parents; an existing directory is not an error.
pub(crate) fn ensure_dir(path: &Path) -> Result<(), SinkError> {
    std::fs::create_dir_all(path).map_err(SinkError::io(path))
}

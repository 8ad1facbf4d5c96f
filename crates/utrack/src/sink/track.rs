// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! KML track writer.
//!
//! The document for the open window is held in memory and written to disk when
//! the window is finalized:
//!
//! ```text
//! <?xml ...?><kml><Document>
//!   <name>window file name</name>
//!   <Placemark> name=timestamp, description, Point lon,lat[,alt] </Placemark>
//!   ...
//! </Document></kml>
//! ```
//!
//! The size rule measures the whole serialized document. The length is kept
//! incrementally (header + cached placemarks + footer) and always equals what
//! `render()` would produce.

use super::{ensure_dir, Sink, SinkError, SinkKind, SinkStats};
use crate::report::Report;
use crate::rotation::{window_file_name, RotationPolicy, RotationState};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;

const KML_FOOTER: &str = "</Document>\n</kml>\n";

/// In-memory KML document for one window.
#[derive(Debug, Clone)]
pub struct TrackDocument {
    file_name: String,
    header: String,
    placemarks: Vec<String>,
    body_len: usize,
}

impl TrackDocument {
    /// Empty document named after its window file.
    pub fn new(file_name: String) -> Self {
        let header = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <kml xmlns=\"http://www.opengis.net/kml/2.2\">\n\
             <Document>\n\
             <name>{}</name>\n",
            escape(&file_name)
        );
        Self {
            file_name,
            header,
            placemarks: Vec::new(),
            body_len: 0,
        }
    }

    /// Render one report as a placemark.
    pub fn placemark(report: &Report) -> String {
        let mut out = String::with_capacity(256);
        let _ = write!(
            out,
            "<Placemark>\n<name>{}</name>\n<description>Time: {}, Keyword {}, speed {} km/h</description>\n",
            escape(&report.timestamp),
            escape(&report.timestamp),
            escape(&report.keyword),
            escape(&report.speed)
        );

        if report.accuracy.is_some() || report.temperature.is_some() {
            out.push_str("<ExtendedData>\n");
            if let Some(accuracy) = report.accuracy {
                let _ = writeln!(out, "<Data name=\"accuracy\"><value>{}</value></Data>", accuracy);
            }
            if let Some(temperature) = report.temperature {
                let _ = writeln!(
                    out,
                    "<Data name=\"temperature\"><value>{}</value></Data>",
                    temperature
                );
            }
            out.push_str("</ExtendedData>\n");
        }

        let _ = write!(out, "<Point>\n<coordinates>{:.6},{:.6}", report.longitude, report.latitude);
        if let Some(altitude) = report.altitude {
            let _ = write!(out, ",{}", altitude);
        }
        out.push_str("</coordinates>\n</Point>\n</Placemark>\n");
        out
    }

    /// Window file name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Number of placemarks.
    pub fn len(&self) -> usize {
        self.placemarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placemarks.is_empty()
    }

    /// Serialized size in bytes.
    pub fn serialized_len(&self) -> usize {
        self.header.len() + self.body_len + KML_FOOTER.len()
    }

    /// Serialized size in bytes if `placemark` were appended.
    pub fn serialized_len_with(&self, placemark: &str) -> usize {
        self.serialized_len() + placemark.len()
    }

    /// Append a rendered placemark.
    pub fn push(&mut self, placemark: String) {
        self.body_len += placemark.len();
        self.placemarks.push(placemark);
    }

    /// Serialize the whole document.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.serialized_len());
        out.push_str(&self.header);
        for placemark in &self.placemarks {
            out.push_str(placemark);
        }
        out.push_str(KML_FOOTER);
        out
    }

    /// Write the document into `dir`, replacing the file atomically.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, SinkError> {
        let path = dir.join(&self.file_name);
        let partial = dir.join(format!("{}.part", self.file_name));

        std::fs::write(&partial, self.render()).map_err(SinkError::io(&partial))?;
        std::fs::rename(&partial, &path).map_err(SinkError::io(&path))?;
        Ok(path)
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Accumulates a KML track per window.
pub struct TrackPointSink {
    dir: PathBuf,
    policy: RotationPolicy,
    document: Option<TrackDocument>,
    state: RotationState,
    started: bool,
    stats: SinkStats,
}

impl TrackPointSink {
    /// Create a sink writing windows into `dir`.
    pub fn new(dir: PathBuf, policy: RotationPolicy) -> Self {
        Self {
            dir,
            policy,
            document: None,
            state: RotationState::new(Instant::now()),
            started: false,
            stats: SinkStats::default(),
        }
    }

    /// Document of the open window, if any.
    pub fn document(&self) -> Option<&TrackDocument> {
        self.document.as_ref()
    }

    fn open_window(&mut self, now: Instant) {
        let document = TrackDocument::new(window_file_name(SinkKind::Track.extension()));
        tracing::debug!(file = document.file_name(), "Opened track window");
        self.document = Some(document);
        self.state.reset(now);
    }

    /// Save the open window. On failure the document is kept in memory.
    fn finalize_window(&mut self) -> Result<(), SinkError> {
        if let Some(document) = self.document.as_ref() {
            let path = document.save(&self.dir)?;
            tracing::debug!(
                path = %path.display(),
                points = document.len(),
                "Saved track window"
            );
            self.document = None;
            self.stats.windows_finalized += 1;
        }
        Ok(())
    }

    fn rotate(&mut self, now: Instant) -> Result<(), SinkError> {
        self.finalize_window()?;
        self.open_window(now);
        self.stats.rotations += 1;
        Ok(())
    }
}

impl Sink for TrackPointSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Track
    }

    fn start(&mut self) -> Result<(), SinkError> {
        if self.started {
            return Err(SinkError::AlreadyStarted);
        }
        ensure_dir(&self.dir)?;
        self.open_window(Instant::now());
        self.started = true;
        Ok(())
    }

    fn write(&mut self, report: &Report) -> Result<(), SinkError> {
        if !self.started {
            return Err(SinkError::NotStarted);
        }

        let now = Instant::now();
        let placemark = TrackDocument::placemark(report);

        let document = self.document.as_ref().ok_or(SinkError::NotStarted)?;
        let pending = RotationState {
            window_start: self.state.window_start,
            bytes: document.serialized_len_with(&placemark) as u64,
            points: self.state.points + 1,
        };
        if self.policy.should_rotate_before(&self.state, &pending, now) {
            self.rotate(now)?;
        }

        let document = self.document.as_mut().ok_or(SinkError::NotStarted)?;
        document.push(placemark);
        self.state = RotationState {
            window_start: self.state.window_start,
            bytes: document.serialized_len() as u64,
            points: self.state.points + 1,
        };
        self.stats.records += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.finalize_window()
    }

    fn stats(&self) -> SinkStats {
        self.stats
    }
}

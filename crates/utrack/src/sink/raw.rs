// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Append-only raw payload log.

use super::{ensure_dir, Sink, SinkError, SinkKind, SinkStats};
use crate::report::Report;
use crate::rotation::{window_file_name, RotationPolicy, RotationState};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;

struct RawWindow {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Writes each report's payload as one line, flushed per write.
///
/// Byte accounting counts the payload only, not the line terminator.
pub struct RawAppendSink {
    dir: PathBuf,
    policy: RotationPolicy,
    window: Option<RawWindow>,
    state: RotationState,
    started: bool,
    stats: SinkStats,
}

impl RawAppendSink {
    /// Create a sink writing windows into `dir`.
    pub fn new(dir: PathBuf, policy: RotationPolicy) -> Self {
        Self {
            dir,
            policy,
            window: None,
            state: RotationState::new(Instant::now()),
            started: false,
            stats: SinkStats::default(),
        }
    }

    /// Path of the open window, if any.
    pub fn current_path(&self) -> Option<&PathBuf> {
        self.window.as_ref().map(|w| &w.path)
    }

    fn open_window(&mut self, now: Instant) -> Result<(), SinkError> {
        let path = self.dir.join(window_file_name(SinkKind::Raw.extension()));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(SinkError::io(&path))?;

        tracing::debug!(path = %path.display(), "Opened raw window");
        self.window = Some(RawWindow {
            path,
            writer: BufWriter::new(file),
        });
        self.state.reset(now);
        Ok(())
    }

    /// Flush and close the open window. On failure the window stays open.
    fn finalize_window(&mut self) -> Result<(), SinkError> {
        if let Some(window) = self.window.as_mut() {
            window
                .writer
                .flush()
                .map_err(SinkError::io(&window.path))?;
            self.window = None;
            self.stats.windows_finalized += 1;
        }
        Ok(())
    }

    fn rotate(&mut self, now: Instant) -> Result<(), SinkError> {
        self.finalize_window()?;
        self.open_window(now)?;
        self.stats.rotations += 1;
        Ok(())
    }
}

impl Sink for RawAppendSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Raw
    }

    fn start(&mut self) -> Result<(), SinkError> {
        if self.started {
            return Err(SinkError::AlreadyStarted);
        }
        ensure_dir(&self.dir)?;
        self.open_window(Instant::now())?;
        self.started = true;
        Ok(())
    }

    fn write(&mut self, report: &Report) -> Result<(), SinkError> {
        if !self.started {
            return Err(SinkError::NotStarted);
        }

        let now = Instant::now();
        let line = report.raw.as_bytes();
        let bytes = line.len() as u64;

        if self.window.is_none() {
            // A previous open failed; retry before giving up on this record.
            self.open_window(now)?;
        } else if self
            .policy
            .should_rotate_before(&self.state, &self.state.with_point(bytes), now)
        {
            self.rotate(now)?;
        }

        let window = self.window.as_mut().ok_or(SinkError::NotStarted)?;
        let io = SinkError::io(&window.path);
        window.writer.write_all(line).map_err(&io)?;
        window.writer.write_all(b"\n").map_err(&io)?;
        window.writer.flush().map_err(io)?;

        self.state = self.state.with_point(bytes);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::testing::report;
    use std::time::Duration;
    use tempfile::TempDir;

    fn windows(dir: &std::path::Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        files.sort();
        files
    }

    #[test]
    fn test_write_before_start_fails() {
        let root = TempDir::new().unwrap();
        let mut sink = RawAppendSink::new(root.path().join("raw"), RotationPolicy::never());
        assert!(matches!(sink.write(&report(1)), Err(SinkError::NotStarted)));
    }

    #[test]
    fn test_start_twice_fails() {
        let root = TempDir::new().unwrap();
        let mut sink = RawAppendSink::new(root.path().join("raw"), RotationPolicy::never());
        sink.start().unwrap();
        assert!(matches!(sink.start(), Err(SinkError::AlreadyStarted)));
    }

    #[test]
    fn test_lines_are_appended() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("dev").join("raw");
        let mut sink = RawAppendSink::new(dir.clone(), RotationPolicy::never());

        sink.start().unwrap();
        sink.write(&report(1)).unwrap();
        sink.write(&report(2)).unwrap();

        // Flushed per write, readable before close
        let path = sink.current_path().unwrap().clone();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("{}\n{}\n", report(1).raw, report(2).raw));

        sink.close().unwrap();
        assert_eq!(windows(&dir).len(), 1);
        assert!(path.extension().is_some_and(|e| e == "log"));
    }

    #[test]
    fn test_rotation_by_points() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("raw");
        let mut sink = RawAppendSink::new(dir.clone(), RotationPolicy::never().with_max_points(2));

        sink.start().unwrap();
        sink.write(&report(1)).unwrap();
        sink.write(&report(2)).unwrap();
        assert_eq!(sink.stats().rotations, 0);

        sink.write(&report(3)).unwrap();
        assert_eq!(sink.stats().rotations, 1);
        sink.close().unwrap();

        let files = windows(&dir);
        assert_eq!(files.len(), 2);
        let mut lines: Vec<usize> = files
            .iter()
            .map(|f| std::fs::read_to_string(f).unwrap().lines().count())
            .collect();
        lines.sort();
        assert_eq!(lines, vec![1, 2]);
    }

    #[test]
    fn test_rotation_by_bytes() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("raw");
        let line_len = report(1).raw.len() as u64;
        let policy = RotationPolicy::never().with_max_bytes(line_len * 2);
        let mut sink = RawAppendSink::new(dir.clone(), policy);

        sink.start().unwrap();
        for seq in 1..=5 {
            sink.write(&report(seq)).unwrap();
        }
        sink.close().unwrap();

        // Two lines fit exactly, the third spills into a new window
        assert_eq!(sink.stats().rotations, 2);
        assert_eq!(sink.stats().records, 5);
        assert_eq!(windows(&dir).len(), 3);
    }

    #[test]
    fn test_oversized_record_does_not_create_empty_windows() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("raw");
        let mut sink = RawAppendSink::new(dir.clone(), RotationPolicy::never().with_max_bytes(1));

        sink.start().unwrap();
        sink.write(&report(1)).unwrap();
        sink.write(&report(2)).unwrap();
        sink.close().unwrap();

        for file in windows(&dir) {
            assert_eq!(std::fs::read_to_string(file).unwrap().lines().count(), 1);
        }
    }

    #[test]
    fn test_rotation_by_time() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("raw");
        let mut sink =
            RawAppendSink::new(dir.clone(), RotationPolicy::never().with_max_seconds(1));
        sink.start().unwrap();

        // The first window expires before anything is written to it
        std::thread::sleep(Duration::from_millis(1100));
        sink.write(&report(1)).unwrap();
        assert_eq!(sink.stats().rotations, 1);

        sink.write(&report(2)).unwrap();
        assert_eq!(sink.stats().rotations, 1);

        std::thread::sleep(Duration::from_millis(1100));
        sink.write(&report(3)).unwrap();
        assert_eq!(sink.stats().rotations, 2);
        sink.close().unwrap();

        let mut lines: Vec<usize> = windows(&dir)
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap().lines().count())
            .collect();
        lines.sort();
        assert_eq!(lines, vec![0, 1, 2]);
    }

    #[test]
    fn test_close_counts_finalized_windows() {
        let root = TempDir::new().unwrap();
        let mut sink =
            RawAppendSink::new(root.path().join("raw"), RotationPolicy::never().with_max_points(1));

        sink.start().unwrap();
        sink.write(&report(1)).unwrap();
        sink.write(&report(2)).unwrap();
        sink.close().unwrap();

        let stats = sink.stats();
        assert_eq!(stats.rotations, 1);
        assert_eq!(stats.windows_finalized, 2);
        assert!(sink.current_path().is_none());
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Output window rotation policies.
//!
//! A window is rotated when any enabled trigger fires:
//! - Duration since the window was opened (inclusive boundary)
//! - Bytes written to the window (strictly greater)
//! - Points written to the window (strictly greater)

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Rotation thresholds as carried in configuration. Zero disables a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Maximum window age in seconds.
    #[serde(default)]
    pub max_seconds: u64,

    /// Maximum window size in bytes.
    #[serde(default)]
    pub max_bytes: u64,

    /// Maximum number of points per window.
    #[serde(default)]
    pub max_points: u64,
}

/// Trigger condition for window rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationTrigger {
    /// Rotate once the window is at least this many seconds old.
    Duration(u64),

    /// Rotate when the window grows past this many bytes.
    Size(u64),

    /// Rotate when the window holds more than this many points.
    Points(u64),
}

impl RotationTrigger {
    /// Whether this trigger fires for `state` observed at `now`.
    pub fn fires(&self, state: &RotationState, now: Instant) -> bool {
        match *self {
            Self::Duration(secs) => state.elapsed(now) >= Duration::from_secs(secs),
            Self::Size(max_bytes) => state.bytes > max_bytes,
            Self::Points(max_points) => state.points > max_points,
        }
    }
}

/// Set of enabled rotation triggers, combined with OR semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationPolicy {
    triggers: Vec<RotationTrigger>,
}

impl RotationPolicy {
    /// A policy that never rotates.
    pub fn never() -> Self {
        Self::default()
    }

    /// Rotate after `secs` seconds (0 leaves the policy unchanged).
    pub fn with_max_seconds(self, secs: u64) -> Self {
        self.with_trigger(secs, RotationTrigger::Duration)
    }

    /// Rotate past `bytes` bytes (0 leaves the policy unchanged).
    pub fn with_max_bytes(self, bytes: u64) -> Self {
        self.with_trigger(bytes, RotationTrigger::Size)
    }

    /// Rotate past `points` points (0 leaves the policy unchanged).
    pub fn with_max_points(self, points: u64) -> Self {
        self.with_trigger(points, RotationTrigger::Points)
    }

    fn with_trigger(mut self, limit: u64, make: fn(u64) -> RotationTrigger) -> Self {
        if limit > 0 {
            self.triggers.push(make(limit));
        }
        self
    }

    /// Enabled triggers.
    pub fn triggers(&self) -> &[RotationTrigger] {
        &self.triggers
    }

    /// Whether any trigger is enabled.
    pub fn is_enabled(&self) -> bool {
        !self.triggers.is_empty()
    }

    /// Decide whether the window described by `state` must be rotated.
    pub fn should_rotate(&self, state: &RotationState, now: Instant) -> bool {
        self.triggers.iter().any(|t| t.fires(state, now))
    }

    /// Decide whether to rotate before a record is appended.
    ///
    /// `pending` is `current` with the record counted. A non-empty window is
    /// judged on `pending`; an empty window only on its age, so one oversized
    /// record never leaves an empty window behind.
    pub fn should_rotate_before(
        &self,
        current: &RotationState,
        pending: &RotationState,
        now: Instant,
    ) -> bool {
        if current.is_empty() {
            self.should_rotate(current, now)
        } else {
            self.should_rotate(pending, now)
        }
    }
}

impl From<RotationConfig> for RotationPolicy {
    fn from(config: RotationConfig) -> Self {
        Self::never()
            .with_max_seconds(config.max_seconds)
            .with_max_bytes(config.max_bytes)
            .with_max_points(config.max_points)
    }
}

/// Accounting for the currently open window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    /// When the window was opened.
    pub window_start: Instant,

    /// Bytes attributed to the window.
    pub bytes: u64,

    /// Points written to the window.
    pub points: u64,
}

impl RotationState {
    /// Fresh state for a window opened at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            bytes: 0,
            points: 0,
        }
    }

    /// Window age at `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    /// True when nothing has been written to the window yet.
    pub fn is_empty(&self) -> bool {
        self.points == 0
    }

    /// State after one more point of `bytes` bytes.
    pub fn with_point(&self, bytes: u64) -> Self {
        Self {
            window_start: self.window_start,
            bytes: self.bytes + bytes,
            points: self.points + 1,
        }
    }

    /// Zero the counters for a window opened at `now`.
    pub fn reset(&mut self, now: Instant) {
        *self = Self::new(now);
    }
}

/// Generate a collision-resistant window filename.
///
/// Local wall-clock time down to the second, followed by 128 random bits in hex,
/// e.g. `2024_01_15_143022` + `9f...` + `.kml`.
pub fn window_file_name(extension: &str) -> String {
    let ts = chrono::Local::now().format("%Y_%m_%d_%H%M%S");
    format!("{}{:032x}.{}", ts, fastrand::u128(..), extension)
}

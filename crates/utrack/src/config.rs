// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration.
//!
//! Built once at startup (from the command line, optionally layered over a JSON
//! file) and shared read-only with every session.

use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::rotation::RotationConfig;
use crate::sink::SinkKind;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Smallest accepted frame buffer.
pub const MIN_FRAME_SIZE: usize = 16;

/// Gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port devices connect to (default: 22000)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root of the per-device output tree
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Directory holding the service log file
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Upper bound on every frame read, in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,

    /// Largest frame accepted before it is cut (bytes)
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Concurrent session limit (0 = unbounded)
    #[serde(default)]
    pub max_connections: usize,

    /// Sinks created for every registered device, in order
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkKind>,

    /// Rotation thresholds shared by every sink
    #[serde(default)]
    pub rotation: RotationConfig,
}

fn default_bind_address() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    22000
}

fn default_data_root() -> PathBuf {
    PathBuf::from("./DATA")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./")
}

fn default_read_timeout() -> u64 {
    300
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}

fn default_sinks() -> Vec<SinkKind> {
    vec![SinkKind::Raw, SinkKind::Track]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            data_root: default_data_root(),
            log_dir: default_log_dir(),
            read_timeout_secs: default_read_timeout(),
            max_frame_size: default_max_frame_size(),
            max_connections: 0,
            sinks: default_sinks(),
            rotation: RotationConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read timeout as Duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Output directory for one device.
    pub fn device_dir(&self, device_id: &str) -> PathBuf {
        self.data_root.join(device_id)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port cannot be 0".into()));
        }
        if self.read_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "read_timeout_secs cannot be 0".into(),
            ));
        }
        if self.max_frame_size < MIN_FRAME_SIZE {
            return Err(ConfigError::InvalidValue(format!(
                "max_frame_size must be at least {}",
                MIN_FRAME_SIZE
            )));
        }
        if self.sinks.is_empty() {
            return Err(ConfigError::InvalidValue(
                "at least one sink is required".into(),
            ));
        }
        for (idx, kind) in self.sinks.iter().enumerate() {
            if self.sinks[..idx].contains(kind) {
                return Err(ConfigError::InvalidValue(format!(
                    "sink {} listed twice",
                    kind
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

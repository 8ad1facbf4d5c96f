// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! uTrack gateway server
//!
//! # Usage
//!
//! ```bash
//! # Default port (22000), data under ./DATA, log in ./utracklog.log
//! utrack-server
//!
//! # Rotate every 24h or at 10 MiB, whichever comes first
//! utrack-server -d /srv/track -l /var/log/utrack -t 86400 -b 10M
//!
//! # Start from a JSON config, override the port
//! utrack-server --config gateway.json --port 5013
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::fs::OpenOptions;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};
use utrack::{GatewayConfig, GatewayServer, SinkKind};

/// Service log file, created under the log directory.
const LOG_FILE_NAME: &str = "utracklog.log";

#[derive(Parser, Debug)]
#[command(name = "utrack-server")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "GPS tracker gateway - records TK103 device reports as raw logs and KML tracks")]
#[command(long_about = None)]
struct Cli {
    /// Directory for the service log file
    #[arg(short = 'l', long)]
    log_path: Option<PathBuf>,

    /// Root directory for per-device output
    #[arg(short = 'd', long)]
    data_path: Option<PathBuf>,

    /// Rotate output windows after this many seconds (0 = never)
    #[arg(short = 't', long)]
    time: Option<u64>,

    /// Rotate output windows past this size (e.g., 500K, 10M, 1G; 0 = never)
    #[arg(short = 'b', long, value_parser = parse_size)]
    bytes: Option<u64>,

    /// Rotate output windows past this many points (0 = never)
    #[arg(short = 'p', long)]
    points: Option<u64>,

    /// TCP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Configuration file (JSON format); flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Sinks to record into, comma separated
    #[arg(long, value_enum, value_delimiter = ',')]
    sinks: Option<Vec<SinkArg>>,

    /// Maximum concurrent device sessions (0 = unbounded)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Seconds to wait for each frame before dropping a device
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Minimum log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LevelArg,

    /// Log to stdout instead of the log file
    #[arg(long)]
    stdout: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkArg {
    Raw,
    Track,
}

impl From<SinkArg> for SinkKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Raw => SinkKind::Raw,
            SinkArg::Track => SinkKind::Track,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LevelArg {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LevelArg {
    fn directive(self) -> String {
        let level = match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        format!("utrack={level},utrack_server={level}")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    std::fs::create_dir_all(&config.log_dir).with_context(|| {
        format!(
            "Failed to create log directory {}",
            config.log_dir.display()
        )
    })?;
    std::fs::create_dir_all(&config.data_root).with_context(|| {
        format!(
            "Failed to create data directory {}",
            config.data_root.display()
        )
    })?;

    init_logging(&cli, &config.log_dir)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind_address,
        port = config.port,
        data_root = %config.data_root.display(),
        sinks = ?config.sinks,
        max_seconds = config.rotation.max_seconds,
        max_bytes = config.rotation.max_bytes,
        max_points = config.rotation.max_points,
        "Starting uTrack gateway"
    );

    let server = GatewayServer::new(config).context("Invalid configuration")?;

    // Setup Ctrl+C handler
    let server_handle = server.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Shutdown signal received, stopping gateway...");
        server_handle.shutdown();
    });

    server.run().await.context("Gateway server error")?;

    info!("Gateway stopped");
    Ok(())
}

/// Start from the config file (or defaults) and apply command line overrides.
fn build_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    if let Some(path) = &cli.log_path {
        config.log_dir = path.clone();
    }
    if let Some(path) = &cli.data_path {
        config.data_root = path.clone();
    }
    if let Some(secs) = cli.time {
        config.rotation.max_seconds = secs;
    }
    if let Some(bytes) = cli.bytes {
        config.rotation.max_bytes = bytes;
    }
    if let Some(points) = cli.points {
        config.rotation.max_points = points;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }
    if let Some(sinks) = &cli.sinks {
        config.sinks = sinks.iter().map(|&s| s.into()).collect();
    }
    if let Some(n) = cli.max_connections {
        config.max_connections = n;
    }
    if let Some(secs) = cli.read_timeout {
        config.read_timeout_secs = secs;
    }

    Ok(config)
}

fn init_logging(cli: &Cli, log_dir: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.directive()));
    let builder = fmt().with_env_filter(filter).with_target(false);

    if cli.stdout {
        builder.init();
    } else {
        let path = log_dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.with_ansi(false).with_writer(Mutex::new(file)).init();
    }
    Ok(())
}

/// Parse size string like "10M", "100K", "1G".
fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim().to_uppercase();
    let (digits, unit) = match s.char_indices().last() {
        Some((idx, 'K')) => (&s[..idx], 1024),
        Some((idx, 'M')) => (&s[..idx], 1024 * 1024),
        Some((idx, 'G')) => (&s[..idx], 1024 * 1024 * 1024),
        _ => (s.as_str(), 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .ok_or_else(|| format!("invalid size: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("100"), Ok(100));
        assert_eq!(parse_size("10K"), Ok(10 * 1024));
        assert_eq!(parse_size("10M"), Ok(10 * 1024 * 1024));
        assert_eq!(parse_size("1G"), Ok(1024 * 1024 * 1024));
        assert_eq!(parse_size("10m"), Ok(10 * 1024 * 1024)); // Case insensitive
        assert!(parse_size("invalid").is_err());
        assert!(parse_size("M").is_err());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "utrack-server",
            "-d",
            "/srv/track",
            "-t",
            "3600",
            "-b",
            "1M",
            "-p",
            "500",
            "--port",
            "5013",
            "--sinks",
            "track",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();

        assert_eq!(config.data_root, PathBuf::from("/srv/track"));
        assert_eq!(config.rotation.max_seconds, 3600);
        assert_eq!(config.rotation.max_bytes, 1024 * 1024);
        assert_eq!(config.rotation.max_points, 500);
        assert_eq!(config.port, 5013);
        assert_eq!(config.sinks, vec![SinkKind::Track]);
        assert_eq!(config.log_dir, PathBuf::from("./"));
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(&path, r#"{ "port": 7000, "rotation": { "max_points": 10 } }"#).unwrap();

        let cli = Cli::try_parse_from([
            "utrack-server",
            "--config",
            path.to_str().unwrap(),
            "--sinks",
            "raw,track",
            "--read-timeout",
            "60",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.rotation.max_points, 10);
        assert_eq!(config.read_timeout_secs, 60);
        assert_eq!(config.sinks, vec![SinkKind::Raw, SinkKind::Track]);
    }
}

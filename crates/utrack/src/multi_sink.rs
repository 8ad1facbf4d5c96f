// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fan-out of one report to every configured sink.
//!
//! A write succeeds if at least one sink accepted the report. Individual sink
//! failures are logged and counted; only a write that every sink rejects is
//! escalated as [`MultiSinkError::AllSinksFailed`].

use crate::config::GatewayConfig;
use crate::report::Report;
use crate::rotation::RotationPolicy;
use crate::sink::{create_sink, Sink, SinkError, SinkKind};
use thiserror::Error;
use tracing::{error, warn};

/// Aggregate sink errors.
#[derive(Debug, Error)]
pub enum MultiSinkError {
    #[error("Sink {kind} unavailable: {source}")]
    Unavailable {
        kind: SinkKind,
        #[source]
        source: SinkError,
    },

    #[error("All {failures} sinks failed for device {device_id}")]
    AllSinksFailed { device_id: String, failures: usize },

    #[error("No sinks configured for device {device_id}")]
    NoSinks { device_id: String },
}

/// Result of a fan-out write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Sinks that accepted the report.
    pub accepted: usize,

    /// Sinks that failed.
    pub failed: usize,
}

/// Ordered set of sinks owned by one device session.
pub struct MultiSink {
    device_id: String,
    sinks: Vec<Box<dyn Sink>>,
    failures: Vec<u64>,
}

impl MultiSink {
    /// Build the configured sinks for `device_id`.
    pub fn new(config: &GatewayConfig, device_id: &str) -> Self {
        let policy = RotationPolicy::from(config.rotation);
        let sinks = config
            .sinks
            .iter()
            .map(|&kind| create_sink(kind, &config.data_root, device_id, policy.clone()))
            .collect();
        Self::from_sinks(device_id, sinks)
    }

    /// Wrap already constructed sinks.
    pub fn from_sinks(device_id: impl Into<String>, sinks: Vec<Box<dyn Sink>>) -> Self {
        let failures = vec![0; sinks.len()];
        Self {
            device_id: device_id.into(),
            sinks,
            failures,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Sinks in configuration order.
    pub fn sinks(&self) -> &[Box<dyn Sink>] {
        &self.sinks
    }

    /// Cumulative write failures per sink, in configuration order.
    pub fn failure_counts(&self) -> &[u64] {
        &self.failures
    }

    /// Start every sink.
    ///
    /// If any sink fails, the ones already started are closed again and the
    /// whole set is reported unavailable. An empty set never starts.
    pub fn start(&mut self) -> Result<(), MultiSinkError> {
        if self.sinks.is_empty() {
            return Err(MultiSinkError::NoSinks {
                device_id: self.device_id.clone(),
            });
        }
        for idx in 0..self.sinks.len() {
            if let Err(source) = self.sinks[idx].start() {
                let kind = self.sinks[idx].kind();
                error!(
                    device_id = %self.device_id,
                    sink = %kind,
                    "Failed to start sink: {}", source
                );
                for started in &mut self.sinks[..idx] {
                    if let Err(e) = started.close() {
                        warn!(
                            device_id = %self.device_id,
                            sink = %started.kind(),
                            "Close failed: {}", e
                        );
                    }
                }
                return Err(MultiSinkError::Unavailable { kind, source });
            }
        }
        Ok(())
    }

    /// Write a report to every sink.
    pub fn write(&mut self, report: &Report) -> Result<WriteOutcome, MultiSinkError> {
        if self.sinks.is_empty() {
            return Err(MultiSinkError::NoSinks {
                device_id: self.device_id.clone(),
            });
        }

        let mut outcome = WriteOutcome {
            accepted: 0,
            failed: 0,
        };

        for (sink, failures) in self.sinks.iter_mut().zip(self.failures.iter_mut()) {
            match sink.write(report) {
                Ok(()) => outcome.accepted += 1,
                Err(e) => {
                    *failures += 1;
                    outcome.failed += 1;
                    error!(
                        device_id = %self.device_id,
                        sink = %sink.kind(),
                        "Sink write failed: {}", e
                    );
                }
            }
        }

        if outcome.failed == self.sinks.len() {
            return Err(MultiSinkError::AllSinksFailed {
                device_id: self.device_id.clone(),
                failures: outcome.failed,
            });
        }
        Ok(outcome)
    }

    /// Close every sink, continuing past failures. Returns the failure count.
    pub fn close(&mut self) -> usize {
        let mut failed = 0;
        for sink in &mut self.sinks {
            if let Err(e) = sink.close() {
                failed += 1;
                error!(
                    device_id = %self.device_id,
                    sink = %sink.kind(),
                    "Sink close failed: {}", e
                );
            }
        }
        failed
    }
}

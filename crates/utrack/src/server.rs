// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TCP accept loop.

use crate::config::{ConfigError, GatewayConfig};
use crate::session::{shutdown_requested, DeviceSession, SessionSummary};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// Gateway server: one task per device connection.
#[derive(Clone)]
pub struct GatewayServer {
    config: Arc<GatewayConfig>,
    shutdown: Arc<watch::Sender<bool>>,
    running: Arc<AtomicBool>,
}

impl GatewayServer {
    /// Create a new server from a validated configuration.
    pub fn new(config: GatewayConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            shutdown: Arc::new(shutdown),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Address taken from the configuration.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.config.bind_address, self.config.port)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.bind_addr();
        TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })
    }

    /// Bind and serve until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    ///
    /// Returns after shutdown once every live session has finalized its sinks.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let result = self.accept_loop(listener).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        info!("Gateway listening on {}", local_addr);

        let slots = match self.config.max_connections {
            0 => None,
            n => Some(Arc::new(Semaphore::new(n))),
        };
        let mut shutdown = self.shutdown.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            let permit = match &slots {
                Some(slots) => tokio::select! {
                    permit = slots.clone().acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    },
                    _ = shutdown_requested(&mut shutdown) => break,
                },
                None => None,
            };

            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Connection accepted");
                        let session = DeviceSession::new(
                            stream,
                            peer.to_string(),
                            self.config.clone(),
                            self.shutdown.subscribe(),
                        );
                        sessions.spawn(async move {
                            let summary = session.run().await;
                            drop(permit);
                            summary
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    reap(joined);
                }
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!(
            sessions = sessions.len(),
            "Shutdown signal received, finalizing sessions"
        );
        drop(listener);
        while let Some(joined) = sessions.join_next().await {
            reap(joined);
        }

        info!("Gateway on {} stopped", local_addr);
        Ok(())
    }

    /// Stop accepting and close every live session.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Check if the accept loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn reap(joined: Result<SessionSummary, JoinError>) {
    match joined {
        Ok(summary) => debug!(
            device_id = summary.device_id.as_deref().unwrap_or("-"),
            "Session task finished: {}", summary.close_reason
        ),
        Err(e) => error!("Session task failed: {}", e),
    }
}

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Server already running")]
    AlreadyRunning,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

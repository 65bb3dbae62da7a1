//! Shared server state
//!
//! One [`ServerContext`] per server, behind an `Arc` handed to every worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Mutex};

use crate::config::ServerConfig;
use crate::error::{DirappError, FsOp, Result};
use crate::monitor::{DirectoryMonitor, ServerStatus};
use crate::socket_server::fanout::{self, CycleOutcome, ScratchFormatter};
use crate::socket_server::registry::Registry;
use crate::socket_server::supervisor::Control;
use crate::socket_server::SocketId;

pub struct ServerContext {
    config: ServerConfig,
    /// Directory string sent in every init handshake
    advertised: String,
    /// LOCKING ORDER: acquire first, hold for a whole cycle
    pub monitor: Arc<Mutex<DirectoryMonitor>>,
    /// LOCKING ORDER: after monitor, before any subscriber
    pub registry: Registry<OwnedWriteHalf>,
    pub formatter: ScratchFormatter,
    status: SyncMutex<ServerStatus>,
    control: mpsc::Sender<Control>,
    next_id: AtomicU64,
    /// Set once the server starts its final broadcast
    shutdown: SyncMutex<Option<&'static str>>,
}

impl ServerContext {
    /// Validate `config` and take the initial snapshot
    pub fn new(config: ServerConfig, control: mpsc::Sender<Control>) -> Result<Self> {
        config.validate()?;

        let advertised = config.advertised_directory();
        let root = config
            .directory
            .canonicalize()
            .map_err(|source| DirappError::Filesystem {
                op: FsOp::ListDirectory,
                path: config.directory.clone(),
                source,
            })?;
        let monitor = DirectoryMonitor::open(root, config.arena_capacity)?;

        let mut status = ServerStatus::new(config.directory.clone(), config.period);
        status.arena = monitor.arena_stats();

        Ok(Self {
            registry: Registry::new(config.max_clients),
            monitor: Arc::new(Mutex::new(monitor)),
            formatter: ScratchFormatter::new(),
            status: SyncMutex::new(status),
            advertised,
            config,
            control,
            next_id: AtomicU64::new(1),
            shutdown: SyncMutex::new(None),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn directory(&self) -> &str {
        &self.advertised
    }

    pub fn period(&self) -> u8 {
        self.config.period
    }

    pub fn control(&self) -> &mpsc::Sender<Control> {
        &self.control
    }

    pub fn next_socket_id(&self) -> SocketId {
        SocketId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Mark the server as stopping; handshakes from now on are answered
    /// with `message` instead of a greeting. The first message set wins.
    pub fn begin_shutdown(&self, message: &'static str) {
        self.shutdown.lock().get_or_insert(message);
    }

    pub fn shutdown_message(&self) -> Option<&'static str> {
        *self.shutdown.lock()
    }

    /// One scan/diff/notify cycle, recorded in the status
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let outcome = fanout::run_cycle(&self.monitor, &self.registry, &self.formatter).await?;
        self.status.lock().record_cycle(outcome.count, outcome.arena);
        Ok(outcome)
    }

    /// Disconnect every subscriber with `message`
    pub async fn broadcast_termination(&self, message: &str) -> usize {
        let removed = fanout::broadcast_termination(&self.registry, &self.control, message).await;
        self.status.lock().record_departure(self.registry.len());
        removed
    }

    pub fn record_accept(&self) {
        self.status.lock().record_accept(self.registry.len());
    }

    pub fn record_reject(&self) {
        self.status.lock().record_reject();
    }

    pub fn record_departure(&self) {
        self.status.lock().record_departure(self.registry.len());
    }

    /// Current status with uptime refreshed
    pub fn status(&self) -> ServerStatus {
        let mut status = self.status.lock();
        status.update_uptime();
        status.subscribers = self.registry.len();
        status.clone()
    }
}

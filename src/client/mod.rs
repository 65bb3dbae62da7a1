//! Multi-server client
//!
//! A [`Client`] keeps one [`Session`] per server it subscribed to. Each
//! session runs its own reader task; every batch, termination notice or
//! failure is reported as a [`ClientEvent`] on the receiver returned by
//! [`Client::new`].
//!
//! ```text
//! connect(h, p) ──► Session::open ──► reader task ──┐
//!                                                   ├──► ClientEvent channel
//! disconnect(h, p) ──► Session::close ─────────────┘
//! ```

pub mod events;
pub mod session;

pub use events::{ClientEvent, EventKind, EventPrinter};
pub use session::{BatchReader, Frame, ServerInfo, Session};

use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{DirappError, Result};

pub struct Client {
    config: ClientConfig,
    sessions: Vec<Session>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Client {
    pub fn new(config: ClientConfig) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                sessions: Vec::new(),
                events,
            },
            rx,
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Subscribe to the server at `host:port`
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<ServerInfo> {
        self.prune();

        let key = format!("{}:{}", host, port);
        if self.sessions.iter().any(|s| s.info().key() == key) {
            return Err(DirappError::AlreadyConnected(key));
        }
        if self.sessions.len() >= self.config.max_servers {
            return Err(DirappError::TooManyServers(self.config.max_servers));
        }

        let session = Session::open(
            host,
            port,
            self.config.overflow_grace,
            self.events.clone(),
        )
        .await?;
        let info = session.info().clone();
        tracing::info!("Subscribed to {} ({})", key, info.path);
        self.sessions.push(session);
        Ok(info)
    }

    /// Unsubscribe from `host:port`
    ///
    /// Returns whether the server acknowledged the teardown.
    pub async fn disconnect(&mut self, host: &str, port: u16) -> Result<bool> {
        let key = format!("{}:{}", host, port);
        let index = self
            .sessions
            .iter()
            .position(|s| s.info().key() == key)
            .ok_or_else(|| DirappError::NotConnected(key.clone()))?;

        let session = self.sessions.remove(index);
        let orderly = session.close().await?;
        if !orderly {
            tracing::warn!("Non-orderly shutdown of {}", key);
        }
        Ok(orderly)
    }

    /// Servers still connected, in connection order
    pub fn list(&mut self) -> Vec<ServerInfo> {
        self.prune();
        self.sessions.iter().map(|s| s.info().clone()).collect()
    }

    /// Disconnect from every server
    pub async fn quit(&mut self) -> Result<()> {
        for session in self.sessions.drain(..) {
            let key = session.info().key();
            match session.close().await {
                Ok(true) => {}
                Ok(false) => tracing::warn!("Non-orderly shutdown of {}", key),
                Err(DirappError::NotConnected(_)) => {}
                Err(e) => tracing::warn!("Failed to disconnect from {}: {}", key, e),
            }
        }
        Ok(())
    }

    /// Forget sessions the server already ended
    fn prune(&mut self) {
        self.sessions.retain(|s| {
            let finished = s.is_finished();
            if finished {
                tracing::debug!("Dropping finished session {}", s.info().key());
            }
            !finished
        });
    }
}

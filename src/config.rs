//! Server and client configuration

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::{DirappError, Result};
use crate::socket_server::protocol::MAX_FRAME;

/// Configuration for the notification server
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1)
    pub host: String,
    /// Port to listen on; 0 picks a free port
    pub port: u16,
    /// Directory to watch, advertised to subscribers as given
    pub directory: PathBuf,
    /// Refresh period in seconds (1..=255)
    pub period: u8,
    /// Most subscribers connected at once (default: 10)
    pub max_clients: usize,
    /// Entry nodes preallocated by the arena (default: 512)
    pub arena_capacity: usize,
    /// Bound of the supervisor's control channel (default: 64)
    pub control_capacity: usize,
    /// Listen for SIGHUP, SIGTERM and SIGINT (default: true)
    pub handle_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            directory: PathBuf::from("."),
            period: 1,
            max_clients: 10,
            arena_capacity: 512,
            control_capacity: 64,
            handle_signals: true,
        }
    }
}

impl ServerConfig {
    pub fn new(port: u16, directory: impl Into<PathBuf>, period: u8) -> Self {
        Self {
            port,
            directory: directory.into(),
            period,
            ..Self::default()
        }
    }

    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.max_clients = max_clients;
        self
    }

    pub fn with_arena_capacity(mut self, arena_capacity: usize) -> Self {
        self.arena_capacity = arena_capacity;
        self
    }

    pub fn with_signals(mut self, handle_signals: bool) -> Self {
        self.handle_signals = handle_signals;
        self
    }

    /// Check the configuration before any socket is opened
    pub fn validate(&self) -> Result<()> {
        if self.period == 0 {
            return Err(DirappError::Config(
                "refresh period must be between 1 and 255 seconds".to_string(),
            ));
        }
        if self.max_clients == 0 {
            return Err(DirappError::Config(
                "at least one client must be allowed".to_string(),
            ));
        }
        if self.control_capacity == 0 {
            return Err(DirappError::Config(
                "control channel needs room for one message".to_string(),
            ));
        }
        let advertised = self.advertised_directory();
        if advertised.len() > MAX_FRAME {
            return Err(DirappError::Config(format!(
                "directory path is {} bytes, the protocol allows {}",
                advertised.len(),
                MAX_FRAME
            )));
        }
        if !self.directory.is_dir() {
            return Err(DirappError::Config(format!(
                "{} is not a directory",
                self.directory.display()
            )));
        }
        Ok(())
    }

    /// Directory string sent in the init handshake
    pub fn advertised_directory(&self) -> String {
        self.directory.to_string_lossy().into_owned()
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        resolve(&self.host, self.port)
    }
}

/// Configuration for the multi-server client
#[derive(Debug, Clone, Serialize)]
pub struct ClientConfig {
    /// Most servers connected at once (default: 5)
    pub max_servers: usize,
    /// How long to wait for an overflow byte after a full batch (default: 100ms)
    pub overflow_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_servers: 5,
            overflow_grace: Duration::from_millis(100),
        }
    }
}

/// Resolve `host:port` to the first matching socket address
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| DirappError::InvalidAddress(format!("{}:{}", host, port)))?
        .next()
        .ok_or_else(|| DirappError::InvalidAddress(format!("{}:{}", host, port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_clients, 10);
        assert_eq!(ClientConfig::default().max_servers, 5);
        assert_eq!(
            ClientConfig::default().overflow_grace,
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_validate_accepts_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        ServerConfig::new(9000, dir.path(), 5).validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();

        let zero_period = ServerConfig::new(9000, dir.path(), 0);
        assert!(matches!(zero_period.validate(), Err(DirappError::Config(_))));

        let no_clients = ServerConfig::new(9000, dir.path(), 1).with_max_clients(0);
        assert!(matches!(no_clients.validate(), Err(DirappError::Config(_))));

        let missing = ServerConfig::new(9000, dir.path().join("missing"), 1);
        assert!(matches!(missing.validate(), Err(DirappError::Config(_))));

        let long = ServerConfig::new(9000, format!("/{}", "d".repeat(300)), 1);
        let err = long.validate().unwrap_err();
        assert!(err.to_string().contains("301 bytes"));
    }

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("127.0.0.1", 8080).unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(matches!(
            resolve("not a host", 1),
            Err(DirappError::InvalidAddress(_))
        ));
    }
}

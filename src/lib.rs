//! dirapp: directory change notifications over a compact binary protocol
//!
//! A server watches one directory, rescans it every refresh period and pushes
//! the differences to every subscribed client as a batch of short text
//! messages (`"+new.txt "`, `"-old.txt "`, `"!a.txt -> size"`). Clients can
//! subscribe to several servers at once.
//!
//! # Example
//!
//! ```ignore
//! use dirapp::{Server, ServerConfig};
//!
//! let config = ServerConfig::new(9000, "/srv/data", 5);
//! let server = Server::bind(config).await?;
//! server.run().await?;
//! ```

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod monitor;
pub mod socket_server;

// Re-export commonly used types
pub use cli::{Cli, ClientCommand, OutputFormat};
pub use client::{Client, ClientEvent, EventKind, ServerInfo};
pub use config::{ClientConfig, ServerConfig};
pub use error::{DirappError, FsOp, Result};
pub use monitor::{Change, DirectoryMonitor, ServerStatus};
pub use socket_server::{Server, ServerHandle, SocketId};

//! Error types and exit codes for dirapp

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use thiserror::Error;

use crate::socket_server::SocketId;

/// Main error type for dirapp operations
#[derive(Error, Debug)]
pub enum DirappError {
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("framed string of {length} bytes does not fit a buffer of {capacity}")]
    Framing { length: usize, capacity: usize },

    #[error("protocol violation: expected {expected}, received 0x{received:02x}")]
    ProtocolViolation { expected: &'static str, received: u8 },

    #[error("no more clients can be accepted (capacity {capacity})")]
    ResourceExhausted { capacity: usize },

    #[error("no subscriber registered for socket {0}")]
    NotFound(SocketId),

    #[error("cannot {op} {}: {source}", path.display())]
    Filesystem {
        op: FsOp,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("server refused the connection: {0}")]
    ServerRejected(String),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("not connected to {0}")]
    NotConnected(String),

    #[error("cannot talk to more than {0} servers at once")]
    TooManyServers(usize),

    #[error("invalid server address {0}")]
    InvalidAddress(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Filesystem step that failed while scanning the watched directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    /// Opening or reading the directory listing
    ListDirectory,
    /// Reading the metadata of one entry
    Stat,
}

impl fmt::Display for FsOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsOp::ListDirectory => f.write_str("list"),
            FsOp::Stat => f.write_str("stat"),
        }
    }
}

impl DirappError {
    /// Read-side I/O errors are folded into `ConnectionClosed` when the peer
    /// simply went away.
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            _ => Self::Io(err),
        }
    }

    /// Whether the error only concerns one connection (never fatal to the server)
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed
                | Self::Io(_)
                | Self::Framing { .. }
                | Self::ProtocolViolation { .. }
                | Self::ResourceExhausted { .. }
                | Self::NotFound(_)
        )
    }

    /// Convert error to the process exit code:
    /// - 1: I/O or filesystem failure
    /// - 2: Invalid configuration or address
    /// - 3: Protocol failure or refused connection
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) | Self::Filesystem { .. } => ExitCode::from(1),
            Self::Config(_) | Self::InvalidAddress(_) => ExitCode::from(2),
            Self::ConnectionClosed
            | Self::Framing { .. }
            | Self::ProtocolViolation { .. }
            | Self::ResourceExhausted { .. }
            | Self::NotFound(_)
            | Self::ServerRejected(_)
            | Self::AlreadyConnected(_)
            | Self::NotConnected(_)
            | Self::TooManyServers(_) => ExitCode::from(3),
        }
    }
}

/// Result type alias for dirapp operations
pub type Result<T> = std::result::Result<T, DirappError>;

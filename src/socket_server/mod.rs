//! dirapp socket server
//!
//! Watches one directory and pushes change notifications to every connected
//! subscriber over plain TCP, using the binary protocol in [`protocol`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                  SUPERVISOR LOOP (single task, select!)             │
//! │                                                                      │
//! │   TcpListener ──accept──► handshake worker ──Watch──┐               │
//! │                                                      ▼               │
//! │   watch set (FuturesUnordered of read halves) ──readable──►          │
//! │                                            teardown worker           │
//! │                                                                      │
//! │   control channel ◄── Watch / Unwatch{ack} / BroadcastDone / Fatal   │
//! │   Coordinator     ◄── SIGHUP / SIGTERM / SIGINT / rescan timer       │
//! │                                                                      │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ServerContext (Arc)                                                 │
//! │    monitor   Arc<tokio Mutex<DirectoryMonitor>>  held for a cycle    │
//! │    registry  tokio Mutex<Vec<Arc<Subscriber>>>                       │
//! │      └─ subscriber  tokio Mutex<Channel { writer, phase }>           │
//! │    formatter parking_lot Mutex<String>       held for one message    │
//! │    status    parking_lot Mutex<ServerStatus>                         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking order
//!
//! monitor → registry → subscriber, everywhere. The supervisor loop never
//! awaits a lock; it only owns the watch set, which workers change by
//! sending `Watch`/`Unwatch` over the control channel. A worker that asks
//! for `Unwatch` waits for the acknowledgment before closing the socket, so
//! the loop never polls a socket that a worker has already closed.

use std::fmt;

use serde::Serialize;

pub mod connection;
pub mod context;
pub mod coordinator;
pub mod fanout;
pub mod protocol;
pub mod registry;
pub mod supervisor;

pub use context::ServerContext;
pub use coordinator::ServerEvent;
pub use fanout::{broadcast_termination, run_cycle, send_error, ScratchFormatter};
pub use protocol::{Greeting, UpdateBatch};
pub use registry::{Phase, Registry, Subscriber};
pub use supervisor::{Control, Server, ServerHandle};

/// Identifier assigned to each accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SocketId(pub u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sent to subscribers when the server receives SIGHUP
pub const HANGUP_MESSAGE: &str = "Server received SIGHUP; Disconnect all clients.";
/// Sent to subscribers when the server is asked to stop
pub const TERMINATE_MESSAGE: &str = "Server received SIGTERM; Exiting now!";
/// Sent to subscribers when the watched directory can no longer be listed
pub const FATAL_MESSAGE: &str = "Cannot open directory! ; Exiting now!";
/// Sent to subscribers when any other step of a scan fails
pub const UNRECOVERABLE_MESSAGE: &str = "Unrecoverable server error! ; Exiting now!";

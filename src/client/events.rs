//! Client events
//!
//! Everything the client learns from its servers is reported as a
//! [`ClientEvent`] on an unbounded channel. The binary prints them either as
//! text lines or as JSON Lines:
//!
//! ```json
//! {"server":"127.0.0.1:9000","timestamp":"...","type":"update","count":1,"messages":["+a.txt "],"pending":null}
//! ```

use std::io::{self, Write};

use serde::Serialize;

use crate::cli::OutputFormat;

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Init handshake completed
    Connected { path: String, period: u8 },
    /// One update batch
    Update {
        count: usize,
        messages: Vec<String>,
        /// Changes announced beyond the 254 carried in this batch, saturating at 254
        pending: Option<u8>,
    },
    /// The server ended the session with `END_COM` + message
    Terminated { message: String },
    /// The client ended the session
    Disconnected { orderly: bool },
    /// The connection failed
    Error { message: String },
}

/// One event from one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientEvent {
    /// `host:port` as given to `connect`
    pub server: String,
    /// RFC 3339
    pub timestamp: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ClientEvent {
    pub fn new(server: impl Into<String>, kind: EventKind) -> Self {
        Self {
            server: server.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            kind,
        }
    }

    /// Human-readable rendering, one or more lines without a trailing newline
    pub fn to_text(&self) -> String {
        match &self.kind {
            EventKind::Connected { path, period } => {
                format!("[{}] watching {} every {}s", self.server, path, period)
            }
            EventKind::Update {
                count,
                messages,
                pending,
            } => {
                let mut out = format!("[{}] {} changes", self.server, count);
                if let Some(pending) = pending {
                    out.push_str(&format!(" (+{} pending)", pending));
                }
                for message in messages {
                    out.push_str("\n  ");
                    out.push_str(message);
                }
                out
            }
            EventKind::Terminated { message } => {
                format!("[{}] server closed the connection: {}", self.server, message)
            }
            EventKind::Disconnected { orderly: true } => {
                format!("[{}] disconnected", self.server)
            }
            EventKind::Disconnected { orderly: false } => {
                format!("[{}] non-orderly shutdown", self.server)
            }
            EventKind::Error { message } => format!("[{}] error: {}", self.server, message),
        }
    }
}

/// Prints client events to stdout in the selected format
pub struct EventPrinter {
    format: OutputFormat,
}

impl EventPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn render(&self, event: &ClientEvent) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string(event).unwrap_or_else(|e| {
                format!(r#"{{"type":"error","message":"unserializable event: {}"}}"#, e)
            }),
            OutputFormat::Text => event.to_text(),
        }
    }

    pub fn print(&self, event: &ClientEvent) {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        // Ignore write errors (stdout may have closed)
        let _ = writeln!(handle, "{}", self.render(event));
        let _ = handle.flush();
    }
}

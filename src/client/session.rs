//! One client link to one server
//!
//! After the init handshake the read half moves into a reader task that
//! reports every batch. Disconnecting stops that task between batches, takes
//! the read half back, sends the teardown request and drains whatever the
//! server had already sent until the `END_COM` that answers it.

use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::events::{ClientEvent, EventKind};
use crate::error::{DirappError, Result};
use crate::socket_server::protocol::{self, END_COM, GOODBYE, MAX_BATCH, READ_CAPACITY};

/// A server the client is subscribed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    /// Directory advertised by the server
    pub path: String,
    pub period: u8,
}

impl ServerInfo {
    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One unit read from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Batch {
        count: usize,
        messages: Vec<String>,
        pending: Option<u8>,
    },
    /// `END_COM` and the string after it
    End(String),
}

/// Reads update batches, resolving the trailing overflow byte
///
/// A batch of exactly 254 messages may or may not be followed by a pending
/// count. The byte is only taken as one if it arrives within `grace`; an
/// `END_COM` seen there is kept for the next frame.
#[derive(Debug)]
pub struct BatchReader<R> {
    inner: R,
    pushback: Option<u8>,
    grace: Duration,
}

impl<R: AsyncRead + Unpin> BatchReader<R> {
    pub fn new(inner: R, grace: Duration) -> Self {
        Self {
            inner,
            pushback: None,
            grace,
        }
    }

    /// First byte of the next frame; cancel safe
    pub async fn next_byte(&mut self) -> Result<u8> {
        if let Some(byte) = self.pushback.take() {
            return Ok(byte);
        }
        protocol::read_byte(&mut self.inner).await
    }

    pub async fn read_frame(&mut self) -> Result<Frame> {
        let first = self.next_byte().await?;
        self.finish_frame(first).await
    }

    /// Read the rest of a frame whose first byte was `first`
    pub async fn finish_frame(&mut self, first: u8) -> Result<Frame> {
        if first == END_COM {
            let message = protocol::read_string(&mut self.inner, READ_CAPACITY).await?;
            return Ok(Frame::End(message));
        }

        let count = first as usize;
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            messages.push(protocol::read_string(&mut self.inner, READ_CAPACITY).await?);
        }

        let pending = if count == MAX_BATCH {
            match timeout(self.grace, protocol::read_byte(&mut self.inner)).await {
                Ok(Ok(END_COM)) => {
                    self.pushback = Some(END_COM);
                    None
                }
                Ok(Ok(byte)) => Some(byte),
                // A closed stream shows up again on the next read
                Ok(Err(_)) | Err(_) => None,
            }
        } else {
            None
        };

        Ok(Frame::Batch {
            count,
            messages,
            pending,
        })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn frame_event(frame: Frame) -> EventKind {
    match frame {
        Frame::Batch {
            count,
            messages,
            pending,
        } => EventKind::Update {
            count,
            messages,
            pending,
        },
        Frame::End(message) => EventKind::Terminated { message },
    }
}

/// How the reader task ended
enum ReaderExit {
    /// Asked to stop; the reader is handed back for the teardown exchange
    Stopped(BatchReader<OwnedReadHalf>),
    /// The server ended the session or the connection failed
    Ended,
}

pub struct Session {
    info: ServerInfo,
    writer: OwnedWriteHalf,
    stop: Option<oneshot::Sender<()>>,
    reader: JoinHandle<ReaderExit>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Session {
    /// Connect, perform the init handshake and start the reader task
    pub async fn open(
        host: &str,
        port: u16,
        grace: Duration,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Result<Self> {
        let addr = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| DirappError::InvalidAddress(format!("{}:{}", host, port)))?
            .next()
            .ok_or_else(|| DirappError::InvalidAddress(format!("{}:{}", host, port)))?;

        let stream = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = stream.into_split();

        let greeting = match protocol::receive_greeting(&mut reader).await {
            Ok(greeting) => greeting,
            Err(e) => {
                let _ = writer.shutdown().await;
                return Err(e);
            }
        };

        let info = ServerInfo {
            host: host.to_string(),
            port,
            path: greeting.path,
            period: greeting.period,
        };
        tracing::debug!("Connected to {} watching {}", info.key(), info.path);
        let _ = events.send(ClientEvent::new(
            info.key(),
            EventKind::Connected {
                path: info.path.clone(),
                period: info.period,
            },
        ));

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(read_updates(
            info.key(),
            BatchReader::new(reader, grace),
            stop_rx,
            events.clone(),
        ));

        Ok(Self {
            info,
            writer,
            stop: Some(stop),
            reader: task,
            events,
        })
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Whether the server has ended the session on its own
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Perform the teardown exchange and close
    ///
    /// Returns whether the server answered with `END_COM` + `"Goodbye"`.
    pub async fn close(mut self) -> Result<bool> {
        let key = self.info.key();
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        let mut reader = match self.reader.await {
            Ok(ReaderExit::Stopped(reader)) => reader,
            Ok(ReaderExit::Ended) => {
                let _ = self.writer.shutdown().await;
                return Err(DirappError::NotConnected(key));
            }
            Err(e) => {
                let _ = self.writer.shutdown().await;
                return Err(DirappError::Io(std::io::Error::other(e)));
            }
        };

        let orderly = match protocol::request_teardown(&mut self.writer).await {
            Ok(()) => drain_until_goodbye(&key, &mut reader, &self.events).await,
            Err(e) => {
                tracing::debug!("Teardown request to {} failed: {}", key, e);
                false
            }
        };

        let _ = self.writer.shutdown().await;
        let _ = self
            .events
            .send(ClientEvent::new(key, EventKind::Disconnected { orderly }));
        Ok(orderly)
    }
}

/// Report batches sent before the server saw our request, then check the reply
async fn drain_until_goodbye<R: AsyncRead + Unpin>(
    key: &str,
    reader: &mut BatchReader<R>,
    events: &mpsc::UnboundedSender<ClientEvent>,
) -> bool {
    loop {
        match reader.read_frame().await {
            Ok(Frame::End(reply)) if reply == GOODBYE => return true,
            Ok(Frame::End(message)) => {
                // The server was closing us anyway
                let _ = events.send(ClientEvent::new(key, EventKind::Terminated { message }));
                return false;
            }
            Ok(frame) => {
                let _ = events.send(ClientEvent::new(key, frame_event(frame)));
            }
            Err(e) => {
                tracing::debug!("Teardown with {} failed: {}", key, e);
                return false;
            }
        }
    }
}

async fn read_updates(
    key: String,
    mut reader: BatchReader<OwnedReadHalf>,
    mut stop: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ClientEvent>,
) -> ReaderExit {
    loop {
        let first = tokio::select! {
            biased;
            _ = &mut stop => return ReaderExit::Stopped(reader),
            first = reader.next_byte() => first,
        };

        let result = match first {
            Ok(first) => reader.finish_frame(first).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Frame::End(message)) => {
                tracing::info!("{} closed the connection: {}", key, message);
                let _ = events.send(ClientEvent::new(key, EventKind::Terminated { message }));
                return ReaderExit::Ended;
            }
            Ok(frame) => {
                let _ = events.send(ClientEvent::new(key.as_str(), frame_event(frame)));
            }
            Err(e) => {
                let message = match e {
                    DirappError::ConnectionClosed => "connection closed by server".to_string(),
                    other => other.to_string(),
                };
                let _ = events.send(ClientEvent::new(key, EventKind::Error { message }));
                return ReaderExit::Ended;
            }
        }
    }
}

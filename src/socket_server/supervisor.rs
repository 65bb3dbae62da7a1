//! Connection supervisor
//!
//! A single task multiplexes the listening socket, every subscriber socket
//! waiting for a teardown request, the control channel and the coordinator.
//! Everything else (handshakes, teardowns, fan-out cycles, broadcasts) runs
//! on detached workers that are never joined.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{AbortHandle, Abortable, BoxFuture};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::config::ServerConfig;
use crate::error::{DirappError, FsOp, Result};
use crate::monitor::ServerStatus;
use crate::socket_server::connection;
use crate::socket_server::context::ServerContext;
use crate::socket_server::coordinator::{Coordinator, ServerEvent};
use crate::socket_server::{
    SocketId, FATAL_MESSAGE, HANGUP_MESSAGE, TERMINATE_MESSAGE, UNRECOVERABLE_MESSAGE,
};

/// Messages from workers to the supervisor loop
#[derive(Debug)]
pub enum Control {
    /// Start waiting for a teardown request on this socket
    Watch { id: SocketId, reader: OwnedReadHalf },
    /// Stop watching; `ack` reports whether the socket was being watched
    Unwatch {
        id: SocketId,
        ack: oneshot::Sender<bool>,
    },
    /// Ids of the sockets currently watched
    WatchedSockets(oneshot::Sender<Vec<SocketId>>),
    /// A broadcast disconnect finished; stop the loop if `exit`
    BroadcastDone { exit: bool },
    /// Unrecoverable failure in a worker
    Fatal(DirappError),
}

type Readiness = (SocketId, OwnedReadHalf, io::Result<()>);

/// Sockets waiting for their peer to speak
#[derive(Default)]
struct WatchSet {
    pending: FuturesUnordered<Abortable<BoxFuture<'static, Readiness>>>,
    handles: HashMap<SocketId, AbortHandle>,
}

impl WatchSet {
    fn watch(&mut self, id: SocketId, reader: OwnedReadHalf) {
        let (handle, registration) = AbortHandle::new_pair();
        let ready = async move {
            let result = reader.readable().await;
            (id, reader, result)
        }
        .boxed();
        self.pending.push(Abortable::new(ready, registration));
        if let Some(previous) = self.handles.insert(id, handle) {
            previous.abort();
        }
    }

    fn unwatch(&mut self, id: SocketId) -> bool {
        match self.handles.remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    fn ids(&self) -> Vec<SocketId> {
        let mut ids: Vec<SocketId> = self.handles.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Bound, not yet running server
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    control: mpsc::Receiver<Control>,
    coordinator: Coordinator,
    requests: mpsc::UnboundedSender<ServerEvent>,
}

impl Server {
    /// Validate `config`, take the initial snapshot and bind the listener
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.bind_addr()?;
        let period = Duration::from_secs(u64::from(config.period));
        let handle_signals = config.handle_signals;

        let (control_tx, control) = mpsc::channel(config.control_capacity.max(1));
        let ctx = Arc::new(ServerContext::new(config, control_tx)?);

        let listener = TcpListener::bind(addr).await?;
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(period, requests_rx, handle_signals)?;

        tracing::info!(
            "Serving {} on {} every {}s",
            ctx.directory(),
            listener.local_addr()?,
            ctx.period()
        );

        Ok(Self {
            listener,
            ctx,
            control,
            coordinator,
            requests,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            requests: self.requests.clone(),
            ctx: Arc::clone(&self.ctx),
        }
    }

    /// Run the supervisor loop until terminated
    ///
    /// Returns the fatal error if the watched directory became unreadable;
    /// every subscriber has been told before this returns.
    pub async fn run(self) -> Result<()> {
        let Server {
            listener,
            ctx,
            mut control,
            mut coordinator,
            requests: _requests,
        } = self;

        let mut watched = WatchSet::default();
        let mut stopping = false;
        let mut fatal: Option<DirappError> = None;

        loop {
            tokio::select! {
                accepted = listener.accept(), if !stopping => match accepted {
                    Ok((stream, peer)) => {
                        let id = ctx.next_socket_id();
                        tracing::debug!("Accepted {} from {}", id, peer);
                        tokio::spawn(connection::handshake(Arc::clone(&ctx), id, stream, peer));
                    }
                    Err(e) => tracing::warn!("Failed to accept connection: {}", e),
                },

                Some(ready) = watched.pending.next(), if !watched.pending.is_empty() => {
                    // Aborted entries were already removed by unwatch
                    if let Ok((id, reader, result)) = ready {
                        if watched.handles.remove(&id).is_some() {
                            if let Err(e) = result {
                                tracing::debug!("Readiness error on {}: {}", id, e);
                            }
                            tokio::spawn(connection::teardown(Arc::clone(&ctx), id, reader));
                        }
                    }
                }

                Some(message) = control.recv() => match message {
                    Control::Watch { id, reader } => watched.watch(id, reader),
                    Control::Unwatch { id, ack } => {
                        let _ = ack.send(watched.unwatch(id));
                    }
                    Control::WatchedSockets(reply) => {
                        let _ = reply.send(watched.ids());
                    }
                    Control::BroadcastDone { exit } => {
                        if exit {
                            break;
                        }
                    }
                    Control::Fatal(err) => {
                        if fatal.is_none() {
                            tracing::error!("Stopping after fatal error: {}", err);
                            let message = fatal_message(&err);
                            fatal = Some(err);
                            stopping = true;
                            ctx.begin_shutdown(message);
                            spawn_broadcast(&ctx, message, true);
                        }
                    }
                },

                event = coordinator.next() => match event {
                    ServerEvent::Rescan if !stopping => spawn_cycle(&ctx),
                    ServerEvent::Rescan => {}
                    ServerEvent::Hangup => spawn_broadcast(&ctx, HANGUP_MESSAGE, false),
                    ServerEvent::Terminate => {
                        if !stopping {
                            stopping = true;
                            ctx.begin_shutdown(TERMINATE_MESSAGE);
                            spawn_broadcast(&ctx, TERMINATE_MESSAGE, true);
                        }
                    }
                },
            }
        }

        tracing::info!("Server stopped");
        match fatal {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Farewell sent to subscribers when a worker hits `err`
fn fatal_message(err: &DirappError) -> &'static str {
    match err {
        DirappError::Filesystem {
            op: FsOp::ListDirectory,
            ..
        } => FATAL_MESSAGE,
        _ => UNRECOVERABLE_MESSAGE,
    }
}

fn spawn_cycle(ctx: &Arc<ServerContext>) {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        if let Err(e) = ctx.run_cycle().await {
            tracing::error!("Rescan of {} failed: {}", ctx.directory(), e);
            let _ = ctx.control().send(Control::Fatal(e)).await;
        }
    });
}

fn spawn_broadcast(ctx: &Arc<ServerContext>, message: &'static str, exit: bool) {
    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        ctx.broadcast_termination(message).await;
        let _ = ctx.control().send(Control::BroadcastDone { exit }).await;
    });
}

/// Programmatic access to a running server
#[derive(Clone)]
pub struct ServerHandle {
    requests: mpsc::UnboundedSender<ServerEvent>,
    ctx: Arc<ServerContext>,
}

impl ServerHandle {
    /// Run one fan-out cycle now; false if the server has stopped
    pub fn rescan(&self) -> bool {
        self.requests.send(ServerEvent::Rescan).is_ok()
    }

    /// Disconnect every subscriber, as on SIGHUP
    pub fn hangup(&self) -> bool {
        self.requests.send(ServerEvent::Hangup).is_ok()
    }

    /// Disconnect every subscriber and stop, as on SIGTERM
    pub fn terminate(&self) -> bool {
        self.requests.send(ServerEvent::Terminate).is_ok()
    }

    pub fn status(&self) -> ServerStatus {
        self.ctx.status()
    }

    pub fn subscriber_count(&self) -> usize {
        self.ctx.registry.len()
    }

    pub async fn subscriber_ids(&self) -> Vec<SocketId> {
        self.ctx.registry.ids().await
    }

    /// Sockets the supervisor is currently waiting on; empty once it stopped
    pub async fn watched_sockets(&self) -> Vec<SocketId> {
        let (reply, answer) = oneshot::channel();
        if self
            .ctx
            .control()
            .send(Control::WatchedSockets(reply))
            .await
            .is_err()
        {
            return Vec::new();
        }
        answer.await.unwrap_or_default()
    }
}

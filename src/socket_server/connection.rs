//! Handshake and teardown workers
//!
//! Both run on their own detached task and never touch the watch set
//! directly: the handshake worker hands the read half to the supervisor with
//! `Control::Watch`, and the teardown worker is given the read half by the
//! supervisor after it has already stopped watching it.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;

use crate::error::DirappError;
use crate::socket_server::context::ServerContext;
use crate::socket_server::protocol::{self, REJECT_MESSAGE};
use crate::socket_server::registry::Subscriber;
use crate::socket_server::supervisor::Control;
use crate::socket_server::SocketId;

/// Register a freshly accepted connection and send it the init handshake
pub async fn handshake(ctx: Arc<ServerContext>, id: SocketId, stream: TcpStream, peer: SocketAddr) {
    let (reader, writer) = stream.into_split();

    let subscriber = match ctx.registry.add(Subscriber::new(id, peer, writer)).await {
        Ok(subscriber) => subscriber,
        Err(rejected) => {
            let (subscriber, err) = rejected.into_parts();
            ctx.record_reject();
            tracing::warn!("Refusing {} from {}: {}", id, peer, err);
            if let Err(e) = subscriber.send_error(REJECT_MESSAGE).await {
                tracing::debug!("Could not tell {} it was refused: {}", peer, e);
            }
            if let Some(mut writer) = subscriber.into_writer() {
                let _ = writer.shutdown().await;
            }
            return;
        }
    };

    // A broadcast already underway may have listed the registry before this
    // subscriber joined it
    if let Some(message) = ctx.shutdown_message() {
        tracing::info!("Turning away {} from {}: server is stopping", id, peer);
        if let Err(e) = subscriber.send_error(message).await {
            tracing::debug!("Could not tell {} the server is stopping: {}", peer, e);
        }
        drop(subscriber);
        if let Ok(Some(mut writer)) = ctx.registry.remove(id).await {
            let _ = writer.shutdown().await;
        }
        ctx.record_reject();
        return;
    }
    ctx.record_accept();

    if let Err(e) = subscriber.greet(ctx.directory(), ctx.period()).await {
        tracing::warn!("Init handshake with {} ({}) failed: {}", id, peer, e);
        drop(subscriber);
        if ctx.registry.remove(id).await.is_ok() {
            ctx.record_departure();
        }
        return;
    }
    drop(subscriber);

    tracing::info!("Subscriber {} connected from {}", id, peer);
    if ctx.control().send(Control::Watch { id, reader }).await.is_err() {
        tracing::debug!("Supervisor stopped before {} could be watched", id);
    }
}

/// Answer a subscriber's teardown request and close its socket
///
/// Called once the supervisor has seen the socket become readable. Anything
/// other than `REQ1`/`REQ2` is a messy disconnect: logged, never fatal.
pub async fn teardown(ctx: Arc<ServerContext>, id: SocketId, mut reader: OwnedReadHalf) {
    let writer = match ctx.registry.remove(id).await {
        Ok(writer) => writer,
        Err(e) => {
            // Already unlinked by a broadcast
            tracing::debug!("Teardown of {} skipped: {}", id, e);
            return;
        }
    };
    ctx.record_departure();

    let Some(mut writer) = writer else {
        tracing::warn!("Messy disconnect from {}: updates to it had already failed", id);
        return;
    };

    match protocol::answer_teardown(&mut reader, &mut writer).await {
        Ok(()) => tracing::info!("Subscriber {} disconnected", id),
        Err(DirappError::ConnectionClosed) => {
            tracing::warn!("Messy disconnect from {}: connection closed without goodbye", id)
        }
        Err(e) => tracing::warn!("Messy disconnect from {}: {}", id, e),
    }
    let _ = writer.shutdown().await;
}

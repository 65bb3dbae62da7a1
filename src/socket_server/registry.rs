//! Subscriber registry
//!
//! A bounded, ordered collection of connected subscribers. The list itself
//! sits behind one async lock (the structural lock); each subscriber's
//! writer sits behind its own lock together with its phase.
//!
//! Removal takes the subscriber's lock before unlinking it, so it waits for
//! any send in progress and never tears a socket out from under a writer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{DirappError, Result};
use crate::socket_server::protocol;
use crate::socket_server::SocketId;

/// Where a subscriber is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered, init handshake not yet sent
    Handshaking,
    /// Receives update batches
    Subscribed,
    /// Sent `END_COM`; nothing else goes out before the socket closes
    Notified,
}

/// Writer half and phase, guarded together
#[derive(Debug)]
pub struct Channel<W> {
    /// `None` once the subscriber has been unlinked or a send to it failed
    pub writer: Option<W>,
    pub phase: Phase,
}

/// One connected client
#[derive(Debug)]
pub struct Subscriber<W> {
    id: SocketId,
    peer: SocketAddr,
    channel: Mutex<Channel<W>>,
}

impl<W> Subscriber<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(id: SocketId, peer: SocketAddr, writer: W) -> Self {
        Self {
            id,
            peer,
            channel: Mutex::new(Channel {
                writer: Some(writer),
                phase: Phase::Handshaking,
            }),
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn phase(&self) -> Phase {
        self.channel.lock().await.phase
    }

    /// Take back the writer of a subscriber that was never registered
    pub fn into_writer(self) -> Option<W> {
        self.channel.into_inner().writer
    }

    /// Send the init handshake and mark the subscriber as subscribed
    ///
    /// Fails with `ConnectionClosed` if the subscriber was already told to go.
    pub async fn greet(&self, directory: &str, period: u8) -> Result<()> {
        let mut channel = self.channel.lock().await;
        if channel.phase != Phase::Handshaking {
            return Err(DirappError::ConnectionClosed);
        }
        let writer = channel
            .writer
            .as_mut()
            .ok_or(DirappError::ConnectionClosed)?;
        protocol::send_greeting(writer, directory, period).await?;
        channel.phase = Phase::Subscribed;
        Ok(())
    }

    /// Write a pre-encoded update batch
    ///
    /// Returns `Ok(false)` when the subscriber is not ready for updates. On
    /// a write failure the writer is dropped so nothing more reaches it.
    pub async fn deliver(&self, encoded: &[u8]) -> Result<bool> {
        let mut channel = self.channel.lock().await;
        if channel.phase != Phase::Subscribed {
            return Ok(false);
        }
        let Some(writer) = channel.writer.as_mut() else {
            return Ok(false);
        };
        if let Err(e) = protocol::send_encoded(writer, encoded).await {
            channel.writer = None;
            return Err(e);
        }
        Ok(true)
    }

    /// Send `END_COM` + `message` from any phase
    ///
    /// Only the first call writes anything; later ones are no-ops.
    pub async fn send_error(&self, message: &str) -> Result<()> {
        let mut channel = self.channel.lock().await;
        if channel.phase == Phase::Notified {
            return Ok(());
        }
        let writer = channel
            .writer
            .as_mut()
            .ok_or(DirappError::ConnectionClosed)?;
        let sent = protocol::send_error(writer, message).await;
        channel.phase = Phase::Notified;
        if let Err(e) = sent {
            channel.writer = None;
            return Err(e);
        }
        Ok(())
    }
}

/// Returned by [`Registry::add`] when the registry is full
#[derive(Debug)]
pub struct Rejected<W> {
    pub subscriber: Subscriber<W>,
    pub capacity: usize,
}

impl<W> Rejected<W> {
    /// Split into the rejected subscriber and the matching error
    pub fn into_parts(self) -> (Subscriber<W>, DirappError) {
        let error = DirappError::ResourceExhausted {
            capacity: self.capacity,
        };
        (self.subscriber, error)
    }
}

/// Bounded collection of subscribers
#[derive(Debug)]
pub struct Registry<W> {
    subscribers: Mutex<Vec<Arc<Subscriber<W>>>>,
    capacity: usize,
    /// Mirrors `subscribers.len()`, updated under the structural lock
    count: AtomicUsize,
}

impl<W> Registry<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            count: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a subscriber, or hand it back when the registry is full
    pub async fn add(
        &self,
        subscriber: Subscriber<W>,
    ) -> std::result::Result<Arc<Subscriber<W>>, Rejected<W>> {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.len() >= self.capacity {
            return Err(Rejected {
                subscriber,
                capacity: self.capacity,
            });
        }
        let subscriber = Arc::new(subscriber);
        subscribers.push(Arc::clone(&subscriber));
        self.count.store(subscribers.len(), Ordering::Release);
        tracing::debug!(
            "Registered subscriber {} ({}/{})",
            subscriber.id,
            subscribers.len(),
            self.capacity
        );
        Ok(subscriber)
    }

    /// Unlink a subscriber and take its writer
    ///
    /// Waits for any send to it that is in progress. The writer is `None` if
    /// an earlier send had already failed.
    pub async fn remove(&self, id: SocketId) -> Result<Option<W>> {
        let mut subscribers = self.subscribers.lock().await;
        let position = subscribers
            .iter()
            .position(|s| s.id == id)
            .ok_or(DirappError::NotFound(id))?;

        let writer = {
            let mut channel = subscribers[position].channel.lock().await;
            channel.writer.take()
        };
        subscribers.remove(position);
        self.count.store(subscribers.len(), Ordering::Release);
        tracing::debug!("Unregistered subscriber {} ({} left)", id, subscribers.len());
        Ok(writer)
    }

    /// Hold the structural lock for a walk over every subscriber
    pub async fn lock(&self) -> RegistryGuard<'_, W> {
        RegistryGuard {
            subscribers: self.subscribers.lock().await,
        }
    }

    /// Ids of all registered subscribers, in registration order
    pub async fn ids(&self) -> Vec<SocketId> {
        self.lock().await.iter().map(|s| s.id).collect()
    }
}

/// Held structural lock
pub struct RegistryGuard<'a, W> {
    subscribers: MutexGuard<'a, Vec<Arc<Subscriber<W>>>>,
}

impl<W> RegistryGuard<'_, W> {
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Subscriber<W>>> {
        self.subscribers.iter()
    }

    /// Best-effort lookup, used for logging
    pub fn find(&self, id: SocketId) -> Option<&Arc<Subscriber<W>>> {
        self.subscribers.iter().find(|s| s.id == id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn subscriber(id: u64) -> (Subscriber<DuplexStream>, DuplexStream) {
        let (ours, theirs) = duplex(4096);
        (Subscriber::new(SocketId(id), peer(), ours), theirs)
    }

    #[tokio::test]
    async fn test_capacity_rejects_and_keeps_list() {
        let registry = Registry::new(2);
        let mut peers = Vec::new();
        for id in 0..2 {
            let (sub, other) = subscriber(id);
            registry.add(sub).await.unwrap();
            peers.push(other);
        }

        let (extra, _other) = subscriber(2);
        let rejected = registry.add(extra).await.unwrap_err();
        let (sub, err) = rejected.into_parts();
        assert_eq!(sub.id(), SocketId(2));
        assert!(matches!(err, DirappError::ResourceExhausted { capacity: 2 }));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids().await, vec![SocketId(0), SocketId(1)]);
    }

    #[tokio::test]
    async fn test_remove_returns_writer_once() {
        let registry = Registry::new(4);
        let (sub, _other) = subscriber(7);
        registry.add(sub).await.unwrap();

        let writer = registry.remove(SocketId(7)).await.unwrap();
        assert!(writer.is_some());
        assert!(registry.is_empty());

        let err = registry.remove(SocketId(7)).await.unwrap_err();
        assert!(matches!(err, DirappError::NotFound(SocketId(7))));
    }

    #[tokio::test]
    async fn test_deliver_skips_handshaking() {
        let registry = Registry::new(4);
        let (sub, _other) = subscriber(1);
        let sub = registry.add(sub).await.unwrap();

        assert_eq!(sub.phase().await, Phase::Handshaking);
        assert!(!sub.deliver(&[0]).await.unwrap());

        sub.greet("/tmp", 3).await.unwrap();
        assert_eq!(sub.phase().await, Phase::Subscribed);
        assert!(sub.deliver(&[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_removed_subscriber_receives_nothing() {
        let registry = Registry::new(4);
        let (sub, _other) = subscriber(3);
        let sub = registry.add(sub).await.unwrap();
        sub.greet("/tmp", 3).await.unwrap();

        registry.remove(SocketId(3)).await.unwrap();
        // A fan-out that cloned the Arc before removal finds no writer
        assert!(!sub.deliver(&[0]).await.unwrap());
        assert!(matches!(
            sub.send_error("bye").await,
            Err(DirappError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_end_com_is_sent_once_and_blocks_greeting() {
        let (sub, mut other) = subscriber(4);
        sub.send_error("first").await.unwrap();
        sub.send_error("second").await.unwrap();
        assert_eq!(sub.phase().await, Phase::Notified);
        assert!(matches!(
            sub.greet("/tmp", 3).await,
            Err(DirappError::ConnectionClosed)
        ));
        assert!(!sub.deliver(&[0]).await.unwrap());

        drop(sub);
        let err = protocol::receive_greeting(&mut other).await.unwrap_err();
        assert!(matches!(err, DirappError::ServerRejected(ref m) if m == "first"));
        // Nothing followed the first notice
        assert!(matches!(
            protocol::read_byte(&mut other).await,
            Err(DirappError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_guard_find() {
        let registry = Registry::new(4);
        let (sub, _other) = subscriber(9);
        registry.add(sub).await.unwrap();

        let guard = registry.lock().await;
        assert_eq!(guard.len(), 1);
        assert_eq!(guard.find(SocketId(9)).map(|s| s.peer()), Some(peer()));
        assert!(guard.find(SocketId(10)).is_none());
    }
}

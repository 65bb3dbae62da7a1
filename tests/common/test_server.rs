//! Server fixture

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinHandle;

use dirapp::{Result, Server, ServerConfig, ServerHandle};

/// A server on an ephemeral port with the timer effectively disabled
///
/// The refresh period is 255 seconds; tests drive cycles through
/// `handle.rescan()` instead.
pub struct TestServer {
    pub addr: SocketAddr,
    pub handle: ServerHandle,
    pub task: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn start(dir: &std::path::Path) -> Self {
        Self::start_with(ServerConfig::new(0, dir, 255)).await
    }

    pub async fn start_with(config: ServerConfig) -> Self {
        let server = Server::bind(config.with_signals(false))
            .await
            .expect("Failed to bind server");
        let addr = server.local_addr().expect("No local address");
        let handle = server.handle();
        let task = tokio::spawn(server.run());
        Self { addr, handle, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait until the supervisor watches exactly `count` sockets
    pub async fn wait_for_watched(&self, count: usize) {
        let handle = self.handle.clone();
        let reached = eventually(|| {
            let handle = handle.clone();
            async move { handle.watched_sockets().await.len() == count }
        })
        .await;
        assert!(reached, "Expected {} watched sockets", count);
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        let handle = self.handle.clone();
        let reached = eventually(|| {
            let handle = handle.clone();
            async move { handle.subscriber_count() == count }
        })
        .await;
        assert!(reached, "Expected {} subscribers", count);
    }
}

/// Poll `check` every 10ms for up to 5s
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

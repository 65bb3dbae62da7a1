//! Notification fan-out
//!
//! One cycle: lock the monitor, rescan and diff on the blocking pool, render
//! the batch once, then walk the registry under its structural lock and
//! write the same bytes to every subscribed client. A client whose write
//! fails loses its writer; the EOF on its socket then drives an ordinary
//! teardown.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task;

use crate::error::{DirappError, Result};
use crate::monitor::{ArenaStats, Change, CycleReport, DirectoryMonitor};
use crate::socket_server::protocol::{format_change, UpdateBatch, MAX_BATCH};
use crate::socket_server::registry::Registry;
use crate::socket_server::supervisor::Control;
use crate::socket_server::SocketId;

/// Shared buffer used to compose one message at a time
#[derive(Debug, Default)]
pub struct ScratchFormatter {
    buf: SyncMutex<Vec<u8>>,
}

impl ScratchFormatter {
    pub fn new() -> Self {
        Self {
            buf: SyncMutex::new(Vec::with_capacity(MAX_BATCH + 1)),
        }
    }

    /// Render one change and append it to `batch`
    pub fn render(&self, change: &Change, batch: &mut UpdateBatch) {
        let mut buf = self.buf.lock();
        format_change(&mut buf, change);
        batch.push(&buf);
    }

    /// Render the first [`MAX_BATCH`] changes of a cycle
    pub fn render_batch(&self, report: &CycleReport) -> UpdateBatch {
        let mut batch = UpdateBatch::new(report.count);
        for change in report.changes.iter().take(MAX_BATCH) {
            self.render(change, &mut batch);
        }
        batch
    }
}

/// What one fan-out cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Changes found by the diff
    pub count: usize,
    /// Subscribers the batch was written to
    pub delivered: usize,
    /// Subscribers whose write failed
    pub failed: usize,
    pub arena: ArenaStats,
}

/// Run one scan/diff/notify cycle
///
/// The monitor lock is held throughout, so cycles never interleave. The
/// scan and diff run on the blocking pool with the lock moved into the
/// closure. A scan failure is returned untouched; the caller treats it as
/// fatal.
pub async fn run_cycle<W>(
    monitor: &Arc<Mutex<DirectoryMonitor>>,
    registry: &Registry<W>,
    formatter: &ScratchFormatter,
) -> Result<CycleOutcome>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut guard = Arc::clone(monitor).lock_owned().await;
    let (mut monitor, report) = task::spawn_blocking(move || {
        let report = guard.rescan();
        (guard, report)
    })
    .await
    .map_err(|e| DirappError::Io(io::Error::other(e)))?;
    let report = report?;
    let encoded = formatter.render_batch(&report).encode()?;

    let mut outcome = CycleOutcome {
        count: report.count,
        ..CycleOutcome::default()
    };

    {
        let subscribers = registry.lock().await;
        for subscriber in subscribers.iter() {
            match subscriber.deliver(&encoded).await {
                Ok(true) => outcome.delivered += 1,
                Ok(false) => {}
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(
                        "Dropping subscriber {} ({}) from updates: {}",
                        subscriber.id(),
                        subscriber.peer(),
                        e
                    );
                }
            }
        }
    }

    monitor.finish_cycle();
    outcome.arena = monitor.arena_stats();

    tracing::debug!(
        "Cycle sent {} changes to {} subscribers ({} failed)",
        outcome.count,
        outcome.delivered,
        outcome.failed
    );
    Ok(outcome)
}

/// Send `END_COM` + `message` to one subscriber
pub async fn send_error<W>(registry: &Registry<W>, id: SocketId, message: &str) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let subscribers = registry.lock().await;
    let subscriber = subscribers.find(id).ok_or(DirappError::NotFound(id))?;
    subscriber.send_error(message).await
}

/// Disconnect every subscriber with `message`
///
/// Each socket is unwatched first (waiting for the supervisor's
/// acknowledgment), then told why, unlinked and closed. Returns the number
/// of subscribers this call removed.
pub async fn broadcast_termination<W>(
    registry: &Registry<W>,
    control: &mpsc::Sender<Control>,
    message: &str,
) -> usize
where
    W: AsyncWrite + Unpin + Send,
{
    let mut removed = 0;

    for id in registry.ids().await {
        let (ack, acked) = oneshot::channel();
        if control.send(Control::Unwatch { id, ack }).await.is_err() {
            tracing::debug!("Supervisor gone while unwatching {}", id);
        }
        // A dropped ack means the loop has exited; nothing polls the socket then
        let watched = acked.await.unwrap_or(false);
        tracing::debug!("Unwatched {} (was watched: {})", id, watched);

        if let Err(e) = send_error(registry, id, message).await {
            tracing::debug!("Could not notify {} before disconnect: {}", id, e);
        }

        match registry.remove(id).await {
            Ok(writer) => {
                removed += 1;
                if let Some(mut writer) = writer {
                    let _ = writer.shutdown().await;
                }
            }
            // Its own teardown got there first
            Err(e) => tracing::debug!("Skipping {}: {}", id, e),
        }
    }

    tracing::info!("Disconnected {} subscribers: {}", removed, message);
    removed
}

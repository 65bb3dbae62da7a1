//! Timer and signal coordinator
//!
//! Folds the rescan timer, process signals and programmatic requests from a
//! `ServerHandle` into one stream of [`ServerEvent`]s for the supervisor loop.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant, Sleep};

use crate::error::Result;

/// Something the supervisor should act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    /// Run one fan-out cycle
    Rescan,
    /// Disconnect every subscriber, keep serving
    Hangup,
    /// Disconnect every subscriber, then stop
    Terminate,
}

struct Signals {
    hangup: Signal,
    terminate: Signal,
    interrupt: Signal,
}

pub struct Coordinator {
    period: Duration,
    timer: Pin<Box<Sleep>>,
    requests: mpsc::UnboundedReceiver<ServerEvent>,
    signals: Option<Signals>,
}

impl Coordinator {
    /// Arm the rescan timer and, if asked, install the signal handlers
    pub fn new(
        period: Duration,
        requests: mpsc::UnboundedReceiver<ServerEvent>,
        handle_signals: bool,
    ) -> Result<Self> {
        let signals = if handle_signals {
            Some(Signals {
                hangup: signal(SignalKind::hangup())?,
                terminate: signal(SignalKind::terminate())?,
                interrupt: signal(SignalKind::interrupt())?,
            })
        } else {
            None
        };

        Ok(Self {
            period,
            timer: Box::pin(sleep(period)),
            requests,
            signals,
        })
    }

    /// Wait for the next event
    ///
    /// Cancel safe: dropping the future before it resolves loses nothing.
    pub async fn next(&mut self) -> ServerEvent {
        let (hangup, terminate, interrupt) = match self.signals.as_mut() {
            Some(s) => (Some(&mut s.hangup), Some(&mut s.terminate), Some(&mut s.interrupt)),
            None => (None, None, None),
        };

        tokio::select! {
            _ = &mut self.timer => {
                // One-shot, re-armed from the moment it fired
                self.timer.as_mut().reset(Instant::now() + self.period);
                ServerEvent::Rescan
            }
            Some(event) = self.requests.recv() => event,
            _ = recv_signal(hangup) => {
                tracing::info!("Received SIGHUP");
                ServerEvent::Hangup
            }
            _ = recv_signal(terminate) => {
                tracing::info!("Received SIGTERM");
                ServerEvent::Terminate
            }
            _ = recv_signal(interrupt) => {
                tracing::info!("Received SIGINT");
                ServerEvent::Terminate
            }
        }
    }
}

async fn recv_signal(signal: Option<&mut Signal>) {
    match signal {
        Some(signal) => {
            if signal.recv().await.is_none() {
                pending::<()>().await;
            }
        }
        None => pending::<()>().await,
    }
}

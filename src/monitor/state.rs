//! Server status bookkeeping
//!
//! Updated by each scan cycle and by subscriber arrivals/departures, read
//! through `ServerHandle::status()`. Lives behind a `parking_lot` mutex and
//! is only ever held for a field update.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::arena::ArenaStats;

/// Overall server status
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Directory as advertised to subscribers
    pub directory: PathBuf,
    /// Refresh period in seconds
    pub period: u8,
    /// RFC 3339 timestamp of server start
    pub started_at: String,
    /// Completed scan cycles
    pub cycles: u64,
    /// Change count of the most recent cycle
    pub last_diff_count: usize,
    /// Currently registered subscribers
    pub subscribers: usize,
    /// Subscribers accepted since start
    pub total_accepted: u64,
    /// Connections refused because the registry was full
    pub total_rejected: u64,
    pub arena: ArenaStats,
    /// Server uptime, refreshed on read
    pub uptime: Duration,
    #[serde(skip)]
    start_time: Instant,
}

impl ServerStatus {
    pub fn new(directory: PathBuf, period: u8) -> Self {
        Self {
            directory,
            period,
            started_at: chrono::Utc::now().to_rfc3339(),
            cycles: 0,
            last_diff_count: 0,
            subscribers: 0,
            total_accepted: 0,
            total_rejected: 0,
            arena: ArenaStats::default(),
            uptime: Duration::ZERO,
            start_time: Instant::now(),
        }
    }

    /// Update uptime
    pub fn update_uptime(&mut self) {
        self.uptime = self.start_time.elapsed();
    }

    /// Record a completed scan cycle
    pub fn record_cycle(&mut self, count: usize, arena: ArenaStats) {
        self.cycles += 1;
        self.last_diff_count = count;
        self.arena = arena;
    }

    pub fn record_accept(&mut self, subscribers: usize) {
        self.total_accepted += 1;
        self.subscribers = subscribers;
    }

    pub fn record_reject(&mut self) {
        self.total_rejected += 1;
    }

    pub fn record_departure(&mut self, subscribers: usize) {
        self.subscribers = subscribers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cycle() {
        let mut status = ServerStatus::new(PathBuf::from("/tmp/watched"), 5);
        status.record_cycle(3, ArenaStats::default());
        status.record_cycle(0, ArenaStats::default());
        assert_eq!(status.cycles, 2);
        assert_eq!(status.last_diff_count, 0);
    }

    #[test]
    fn test_serializes_without_start_instant() {
        let mut status = ServerStatus::new(PathBuf::from("/tmp/watched"), 5);
        status.record_accept(1);
        status.update_uptime();

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["subscribers"], 1);
        assert_eq!(json["period"], 5);
        assert!(json.get("start_time").is_none());
        assert!(json["started_at"].as_str().unwrap().contains('T'));
    }
}

//! Per-target probe statistics
//!
//! Consumes outcome events and keeps running counters per target; renders a
//! fixed-width table on demand (SIGUSR1). Purely an observer - nothing here
//! feeds back into probing.

use crate::types::{ProbeOutcome, ProbeResult};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::IpAddr;
use std::time::Instant;

/// Accumulated counters for one target
#[derive(Debug, Clone)]
pub struct TargetStats {
    pub device: String,
    pub address: IpAddr,
    /// Probes resolved (replies and failures)
    pub samples: u64,
    /// Probes lost to timeout or socket errors
    pub failures: u64,
    /// Running average round trip in seconds
    pub average_rtt: f64,
    /// When the most recent outcome arrived
    pub last_outcome: Option<Instant>,
}

impl TargetStats {
    fn new(device: String, address: IpAddr) -> Self {
        Self {
            device,
            address,
            samples: 0,
            failures: 0,
            average_rtt: 0.0,
            last_outcome: None,
        }
    }

    /// Probes that came back
    pub fn successes(&self) -> u64 {
        self.samples - self.failures
    }

    fn record(&mut self, result: &ProbeResult, now: Instant) {
        match result.rtt() {
            Some(rtt) => {
                let successes = self.successes() as f64;
                self.average_rtt =
                    (self.average_rtt * successes + rtt.as_secs_f64()) / (successes + 1.0);
            }
            None => self.failures += 1,
        }
        self.samples += 1;
        self.last_outcome = Some(now);
    }
}

/// Statistics for every configured target
#[derive(Debug, Default)]
pub struct StatsRegistry {
    targets: BTreeMap<String, TargetStats>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a target before its first outcome so the table is complete
    /// from startup
    pub fn register(&mut self, target: impl Into<String>, device: impl Into<String>, address: IpAddr) {
        self.targets
            .entry(target.into())
            .or_insert_with(|| TargetStats::new(device.into(), address));
    }

    /// Fold one outcome into its target's counters
    pub fn record(&mut self, outcome: &ProbeOutcome, now: Instant) {
        let entry = self
            .targets
            .entry(outcome.target.clone())
            .or_insert_with(|| TargetStats::new(outcome.device.clone(), outcome.address));
        entry.record(&outcome.result, now);
    }

    pub fn get(&self, target: &str) -> Option<&TargetStats> {
        self.targets.get(target)
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Render the statistics table
    pub fn render(&self, now: Instant) -> String {
        let mut out = String::new();
        if self.targets.is_empty() {
            return out;
        }

        let _ = writeln!(
            out,
            "{:>16}/{:<16} {:>6} {:>11} {:>8} {:<8}",
            "device", "addr", "last", "rcv/sent", "percent", "rtt"
        );

        for stats in self.targets.values() {
            let last = stats
                .last_outcome
                .map(|t| now.saturating_duration_since(t).as_secs_f64())
                .unwrap_or(0.0);
            let percent = if stats.samples > 0 {
                stats.successes() as f64 / stats.samples as f64 * 100.0
            } else {
                0.0
            };
            let _ = writeln!(
                out,
                "{:>16}/{:<16} {:>5.1}s {:>5}/{:<5} {:>6.1}% {:>4.2}ms",
                stats.device,
                stats.address,
                last,
                stats.successes(),
                stats.samples,
                percent,
                stats.average_rtt * 1000.0
            );
        }

        out
    }
}

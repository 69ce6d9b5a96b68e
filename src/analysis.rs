//! Post-run analysis: summary statistics and the performance report.

use crate::results::write_atomic;
use crate::runner::{RunOutcome, RunSummary};
use crate::snapshot::ResultRecord;
use crate::stats::{format_sim_time, NetworkStats};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io;
use std::path::Path;

/// Estimated TCP/IP completion time relative to DTN (timeouts and retries)
pub const TCP_TIME_FACTOR: f64 = 2.5;

/// Estimated TCP/IP success rate over a Mars-Earth path
pub const TCP_SUCCESS_RATE: f64 = 0.4;

pub const SUMMARY_FILE: &str = "summary.json";
pub const REPORT_FILE: &str = "report.txt";

/// Summary of one run, saved as `summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub seed: u64,
    pub outcome: String,
    pub steps: u64,
    pub simulated_secs: u64,
    pub created: u64,
    pub delivered: u64,
    pub expired: u64,
    pub dropped: u64,
    pub retransmissions: u64,
    pub forwarded: u64,
    pub disruptions: u64,
    pub max_stored_bundles: usize,
    pub delivery_ratio: f64,
    pub mean_delay_secs: f64,
    pub max_delay_secs: u64,
    /// Delivered share of bundles that have left the network
    pub success_rate: f64,
    pub tcp_estimated_delay_secs: f64,
    pub tcp_success_rate: f64,
    pub records_written: u64,
    pub records_dropped: u64,
    pub elapsed_secs: f64,
}

impl RunReport {
    /// Build a report from network statistics alone
    pub fn from_stats(run_id: &str, seed: u64, stats: &NetworkStats) -> Self {
        let resolved = stats.resolved();
        let success_rate = if resolved > 0 {
            stats.delivered as f64 / resolved as f64
        } else {
            0.0
        };

        Self {
            run_id: run_id.to_string(),
            seed,
            outcome: "completed".to_string(),
            steps: stats.steps,
            simulated_secs: stats.time_secs,
            created: stats.created,
            delivered: stats.delivered,
            expired: stats.expired,
            dropped: stats.dropped,
            retransmissions: stats.retransmissions,
            forwarded: stats.forwarded,
            disruptions: stats.disruptions,
            max_stored_bundles: stats.max_stored_bundles,
            delivery_ratio: stats.delivery_ratio,
            mean_delay_secs: stats.mean_delay_secs,
            max_delay_secs: stats.delay_max_secs,
            success_rate,
            tcp_estimated_delay_secs: stats.mean_delay_secs * TCP_TIME_FACTOR,
            tcp_success_rate: TCP_SUCCESS_RATE,
            records_written: 0,
            records_dropped: 0,
            elapsed_secs: 0.0,
        }
    }

    /// Build a report for a finished run
    pub fn from_summary(run_id: &str, summary: &RunSummary) -> Self {
        let mut report = Self::from_stats(run_id, summary.seed, &summary.final_stats);
        report.outcome = match summary.outcome {
            RunOutcome::Completed => "completed".to_string(),
            RunOutcome::Interrupted { .. } => "interrupted".to_string(),
        };
        report.records_written = summary.records_written;
        report.records_dropped = summary.records_dropped;
        report.elapsed_secs = summary.elapsed_secs;
        report
    }

    /// Human readable performance report
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let storage_efficiency = if self.disruptions > 0 {
            self.max_stored_bundles as f64 / self.disruptions as f64
        } else {
            0.0
        };
        let saved = self.tcp_estimated_delay_secs - self.mean_delay_secs;

        let _ = writeln!(out, "DTN Simulation Report");
        let _ = writeln!(out, "=====================");
        let _ = writeln!(out, "Run: {} (seed {}, {})", self.run_id, self.seed, self.outcome);
        let _ = writeln!(
            out,
            "Simulated: {} steps, {}",
            self.steps,
            format_sim_time(self.simulated_secs)
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "Delivery");
        let _ = writeln!(out, "--------");
        let _ = writeln!(out, "- Bundles created: {}", self.created);
        let _ = writeln!(
            out,
            "- Delivered: {} ({:.1}%)",
            self.delivered,
            self.delivery_ratio * 100.0
        );
        let _ = writeln!(out, "- Expired: {}", self.expired);
        let _ = writeln!(out, "- Dropped: {}", self.dropped);
        let _ = writeln!(
            out,
            "- Mean delay: {:.1} seconds ({:.1} minutes)",
            self.mean_delay_secs,
            self.mean_delay_secs / 60.0
        );
        let _ = writeln!(out, "- Max delay: {} seconds", self.max_delay_secs);
        let _ = writeln!(out);

        let _ = writeln!(out, "Storage Utilization");
        let _ = writeln!(out, "-------------------");
        let _ = writeln!(out, "- Maximum stored bundles: {}", self.max_stored_bundles);
        let _ = writeln!(
            out,
            "- Storage efficiency: {:.2} bundles/disruption",
            storage_efficiency
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "Network Performance");
        let _ = writeln!(out, "-------------------");
        let _ = writeln!(out, "- Hops forwarded: {}", self.forwarded);
        let _ = writeln!(out, "- Link disruptions: {}", self.disruptions);
        let _ = writeln!(out, "- Retransmissions: {}", self.retransmissions);
        let _ = writeln!(out, "- Transmission success: {:.1}%", self.success_rate * 100.0);
        let _ = writeln!(out);

        let _ = writeln!(out, "Comparison with TCP/IP");
        let _ = writeln!(out, "----------------------");
        let _ = writeln!(out, "- DTN mean delay: {:.1} seconds", self.mean_delay_secs);
        let _ = writeln!(
            out,
            "- Estimated TCP/IP delay: {:.1} seconds",
            self.tcp_estimated_delay_secs
        );
        let _ = writeln!(out, "- Time saved: {:.1} seconds", saved);
        let _ = writeln!(
            out,
            "- Reliability improvement: {:.1}% (TCP/IP est. {:.0}%)",
            (self.success_rate - self.tcp_success_rate) * 100.0,
            self.tcp_success_rate * 100.0
        );

        if self.records_written > 0 || self.elapsed_secs > 0.0 {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "Records written: {} (dropped {}), wall time {:.2}s",
                self.records_written, self.records_dropped, self.elapsed_secs
            );
        }

        out
    }

    /// Write `summary.json` and `report.txt` into `dir`
    pub fn save(&self, dir: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(SUMMARY_FILE), &json)?;
        write_atomic(&dir.join(REPORT_FILE), self.render_text().as_bytes())
    }

    /// Read `summary.json` from a run directory
    pub fn load(dir: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(dir.join(SUMMARY_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// `(step_index, delivery_ratio)` over a run
pub fn delivery_series(records: &[ResultRecord]) -> Vec<(u64, f64)> {
    records
        .iter()
        .map(|r| (r.step_index, r.snapshot.stats.delivery_ratio))
        .collect()
}

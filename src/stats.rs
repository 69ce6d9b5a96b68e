//! Statistics tracking for the simulation.

use serde::{Deserialize, Serialize};

/// Counters gathered while executing a single step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepTally {
    pub created: u64,
    pub delivered: u64,
    pub expired: u64,
    pub dropped: u64,
    pub retransmissions: u64,
    pub forwarded: u64,
    pub disruptions: u64,
    pub recoveries: u64,
    /// Sum of end-to-end delays of bundles delivered this step
    pub delay_total_secs: u64,
    pub delay_max_secs: u64,
}

impl StepTally {
    /// Account for one delivered bundle
    pub fn delivered_after(&mut self, delay_secs: u64) {
        self.delivered += 1;
        self.delay_total_secs += delay_secs;
        self.delay_max_secs = self.delay_max_secs.max(delay_secs);
    }
}

/// Cumulative network statistics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Simulated time (seconds)
    pub time_secs: u64,
    /// Steps completed
    pub steps: u64,
    /// Bundles created by traffic flows
    pub created: u64,
    /// Bundles that reached their destination
    pub delivered: u64,
    /// Bundles discarded because their TTL ran out
    pub expired: u64,
    /// Bundles discarded because a buffer was full
    pub dropped: u64,
    /// Hops restarted after a link was lost mid-flight
    pub retransmissions: u64,
    /// Hop departures
    pub forwarded: u64,
    /// Bundles currently held in custody
    pub stored: usize,
    /// Bundles currently on a link
    pub in_transit: usize,
    /// Links currently disrupted
    pub disrupted_links: usize,
    /// Disruptions started so far
    pub disruptions: u64,
    /// Largest total custody occupancy seen
    pub max_stored_bundles: usize,
    pub delay_total_secs: u64,
    pub delay_max_secs: u64,
    /// Mean end-to-end delay of delivered bundles
    pub mean_delay_secs: f64,
    /// Delivered / created
    pub delivery_ratio: f64,
    /// Bundles delivered during the latest step
    pub delivered_last_step: u64,
}

impl NetworkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one step's counters and the current occupancy into the totals
    pub fn record_step(
        &mut self,
        tally: &StepTally,
        stored: usize,
        in_transit: usize,
        disrupted_links: usize,
        time_secs: u64,
    ) {
        self.time_secs = time_secs;
        self.steps += 1;

        self.created += tally.created;
        self.delivered += tally.delivered;
        self.expired += tally.expired;
        self.dropped += tally.dropped;
        self.retransmissions += tally.retransmissions;
        self.forwarded += tally.forwarded;
        self.disruptions += tally.disruptions;
        self.delay_total_secs += tally.delay_total_secs;
        self.delay_max_secs = self.delay_max_secs.max(tally.delay_max_secs);
        self.delivered_last_step = tally.delivered;

        self.stored = stored;
        self.in_transit = in_transit;
        self.disrupted_links = disrupted_links;
        self.max_stored_bundles = self.max_stored_bundles.max(stored);

        self.mean_delay_secs = if self.delivered > 0 {
            self.delay_total_secs as f64 / self.delivered as f64
        } else {
            0.0
        };
        self.delivery_ratio = if self.created > 0 {
            self.delivered as f64 / self.created as f64
        } else {
            0.0
        };
    }

    /// Bundles that have left the network, one way or another
    pub fn resolved(&self) -> u64 {
        self.delivered + self.expired + self.dropped
    }

    /// Format stats as a one-line summary
    pub fn summary(&self) -> String {
        format!(
            "T:{} | Step:{:6} | Created:{:5} | Delivered:{:5} ({:5.1}%) | Stored:{:4} | InFlight:{:4} | Down:{:2} | Retx:{:4} | Delay:{:.0}s",
            format_sim_time(self.time_secs),
            self.steps,
            self.created,
            self.delivered,
            self.delivery_ratio * 100.0,
            self.stored,
            self.in_transit,
            self.disrupted_links,
            self.retransmissions,
            self.mean_delay_secs,
        )
    }
}

/// Format simulated seconds as `HH:MM:SS` (hours keep growing past 24)
pub fn format_sim_time(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

//! Snapshot structures shared by persistence and visualization.
//!
//! A snapshot is an owned, read-only copy of the interesting parts of a
//! `SimulationState`. It can be handed to another thread or serialized
//! without touching the state itself.

use crate::config::Config;
use crate::state::{LinkStatus, SimulationState};
use crate::stats::NetworkStats;
use crate::topology::NodeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lightweight view of a node for rendering
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: String,
    pub kind: NodeKind,
    pub position: [f32; 2],
    pub stored: usize,
    pub capacity: usize,
    pub peak_storage: usize,
}

impl NodeView {
    /// Storage occupancy in [0, 1]
    pub fn fill(&self) -> f32 {
        if self.capacity == 0 {
            0.0
        } else {
            self.stored as f32 / self.capacity as f32
        }
    }
}

/// Lightweight view of a link
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkView {
    /// Node index of one end
    pub source: usize,
    /// Node index of the other end
    pub target: usize,
    pub up: bool,
    pub disrupted_until: Option<u64>,
    pub in_transit: usize,
    pub deep_space: bool,
    pub delay_secs: f64,
    pub distance_km: f64,
}

/// A bundle on the move
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransitView {
    pub bundle_id: u64,
    pub from: usize,
    pub to: usize,
    /// Fraction of the hop completed
    pub progress: f32,
}

/// Complete network snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub steps_taken: u64,
    pub time_secs: u64,
    pub nodes: Vec<NodeView>,
    pub links: Vec<LinkView>,
    pub transits: Vec<TransitView>,
    pub stats: NetworkStats,
}

impl StateSnapshot {
    /// Capture the current state
    pub fn capture(state: &SimulationState, config: &Config) -> Self {
        let topology = &config.topology;
        let now = state.time_secs;

        let nodes = state
            .nodes
            .iter()
            .zip(&topology.nodes)
            .map(|(node, spec)| NodeView {
                id: spec.id.clone(),
                kind: spec.kind,
                position: spec.position,
                stored: node.storage.len(),
                capacity: spec.buffer_capacity,
                peak_storage: node.peak_storage,
            })
            .collect();

        let mut in_transit = vec![0usize; state.links.len()];
        for transit in &state.transits {
            if let Some(count) = in_transit.get_mut(transit.link) {
                *count += 1;
            }
        }

        let links = state
            .links
            .iter()
            .zip(&topology.links)
            .enumerate()
            .map(|(index, (link, spec))| LinkView {
                source: topology.node_index(&spec.source).unwrap_or_default(),
                target: topology.node_index(&spec.target).unwrap_or_default(),
                up: link.is_up(),
                disrupted_until: match link.status {
                    LinkStatus::Up => None,
                    LinkStatus::Disrupted { until } => Some(until),
                },
                in_transit: in_transit[index],
                deep_space: spec.is_deep_space(),
                delay_secs: spec.delay_secs,
                distance_km: spec.distance_km,
            })
            .collect();

        let transits = state
            .transits
            .iter()
            .map(|t| TransitView {
                bundle_id: t.bundle.id,
                from: t.from,
                to: t.to,
                progress: t.progress(now),
            })
            .collect();

        Self {
            steps_taken: state.steps_taken,
            time_secs: now,
            nodes,
            links,
            transits,
            stats: state.stats.clone(),
        }
    }
}

/// One persisted step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Index of the step that produced this snapshot
    pub step_index: u64,
    /// Wall-clock time the record was created
    pub timestamp: DateTime<Utc>,
    pub snapshot: StateSnapshot,
}

impl ResultRecord {
    pub fn new(step_index: u64, snapshot: StateSnapshot) -> Self {
        Self {
            step_index,
            timestamp: Utc::now(),
            snapshot,
        }
    }

    /// File name used by the results writer
    pub fn file_name(&self) -> String {
        record_file_name(self.step_index)
    }
}

/// `step_00000042.json`
pub fn record_file_name(step_index: u64) -> String {
    format!("step_{:08}.json", step_index)
}

/// Parse a step index back out of a record file name
pub fn parse_record_file_name(name: &str) -> Option<u64> {
    name.strip_prefix("step_")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_matches_state() {
        let config = Config::default();
        let mut state = SimulationState::initialize(&config, 9).unwrap();
        for _ in 0..5 {
            state = state.step(&config).unwrap();
        }

        let snapshot = StateSnapshot::capture(&state, &config);

        assert_eq!(snapshot.steps_taken, 5);
        assert_eq!(snapshot.nodes.len(), config.topology.nodes.len());
        assert_eq!(snapshot.links.len(), config.topology.links.len());
        assert_eq!(snapshot.transits.len(), state.transits.len());
        let stored: usize = snapshot.nodes.iter().map(|n| n.stored).sum();
        assert_eq!(stored, state.stored_bundles());
        let flying: usize = snapshot.links.iter().map(|l| l.in_transit).sum();
        assert_eq!(flying, state.transits.len());
    }

    #[test]
    fn test_record_file_names() {
        assert_eq!(record_file_name(42), "step_00000042.json");
        assert_eq!(parse_record_file_name("step_00000042.json"), Some(42));
        assert_eq!(parse_record_file_name(".step_00000042.json.tmp"), None);
        assert_eq!(parse_record_file_name("summary.json"), None);
    }

    #[test]
    fn test_record_json_roundtrip() {
        let config = Config::default();
        let state = SimulationState::initialize(&config, 1)
            .unwrap()
            .step(&config)
            .unwrap();
        let record = ResultRecord::new(0, StateSnapshot::capture(&state, &config));

        let json = serde_json::to_string(&record).unwrap();
        let back: ResultRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}

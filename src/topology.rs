//! Network topology: nodes, links and the default Mars-Earth network.
//!
//! Topologies can be embedded in the YAML configuration or loaded from a
//! JSON file (see `data/network_topologies/mars_earth.json`).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Links at least this long are treated as deep-space links
pub const DEEP_SPACE_DISTANCE_KM: f64 = 1_000_000.0;

/// Reliability assumed for deep-space links when ranking routes
pub const DEEP_SPACE_RELIABILITY: f64 = 0.7;

/// Reliability assumed for local (planetary) links when ranking routes
pub const LOCAL_RELIABILITY: f64 = 0.9;

/// Role of a node in the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Rover,
    Base,
    Orbiter,
    Relay,
    GroundStation,
}

/// A network node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node name
    pub id: String,
    /// Node role
    pub kind: NodeKind,
    /// Layout position for visualization, in the unit square
    #[serde(default)]
    pub position: [f32; 2],
    /// Maximum number of bundles held in custody
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

/// A bidirectional link between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub source: String,
    pub target: String,
    /// One-way propagation delay in seconds
    pub delay_secs: f64,
    /// Link length in kilometres
    pub distance_km: f64,
    /// Bundles that can depart per step in each direction
    #[serde(default = "default_bandwidth")]
    pub bandwidth: usize,
}

fn default_buffer_capacity() -> usize {
    100
}

fn default_bandwidth() -> usize {
    4
}

impl LinkSpec {
    fn new(source: &str, target: &str, delay_secs: f64, distance_km: f64, bandwidth: usize) -> Self {
        Self {
            source: source.to_string(),
            target: target.to_string(),
            delay_secs,
            distance_km,
            bandwidth,
        }
    }

    /// Whether this link crosses interplanetary distance
    pub fn is_deep_space(&self) -> bool {
        self.distance_km >= DEEP_SPACE_DISTANCE_KM
    }

    /// Reliability estimate used for route ranking
    pub fn reliability(&self) -> f64 {
        if self.is_deep_space() {
            DEEP_SPACE_RELIABILITY
        } else {
            LOCAL_RELIABILITY
        }
    }
}

/// Errors in topology definitions
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("failed to read topology file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse topology JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("topology has no nodes")]
    Empty,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("link {source_id} <-> {target_id} references unknown node '{missing}'")]
    UnknownNode {
        source_id: String,
        target_id: String,
        missing: String,
    },

    #[error("link {0} <-> {0} connects a node to itself")]
    SelfLoop(String),

    #[error("more than one link between {0} and {1}")]
    ParallelLink(String, String),

    #[error("link {source_id} <-> {target_id}: {reason}")]
    InvalidLink {
        source_id: String,
        target_id: String,
        reason: String,
    },

    #[error("node '{0}' has zero buffer capacity")]
    ZeroCapacity(String),
}

/// Complete network description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: Vec<NodeSpec>,
    pub links: Vec<LinkSpec>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::mars_earth()
    }
}

impl Topology {
    /// The reference Mars-Earth relay network.
    ///
    /// Two rovers and a base on the surface, two orbiters, an areostationary
    /// relay, and two Earth ground stations. Besides the relay path, one
    /// orbiter has a narrow direct-to-Earth link.
    pub fn mars_earth() -> Self {
        let node = |id: &str, kind, x, y, buffer_capacity| NodeSpec {
            id: id.to_string(),
            kind,
            position: [x, y],
            buffer_capacity,
        };

        let nodes = vec![
            node("mars_rover_1", NodeKind::Rover, 0.05, 0.25, 50),
            node("mars_rover_2", NodeKind::Rover, 0.05, 0.75, 50),
            node("mars_base", NodeKind::Base, 0.15, 0.5, 200),
            node("mars_orbiter_1", NodeKind::Orbiter, 0.3, 0.2, 150),
            node("mars_orbiter_2", NodeKind::Orbiter, 0.3, 0.8, 150),
            node("relay_satellite", NodeKind::Relay, 0.55, 0.5, 500),
            node("earth_station_1", NodeKind::GroundStation, 0.92, 0.3, 1000),
            node("earth_station_2", NodeKind::GroundStation, 0.92, 0.7, 1000),
        ];

        let links = vec![
            LinkSpec::new("mars_rover_1", "mars_orbiter_1", 1.0, 400.0, 4),
            LinkSpec::new("mars_rover_1", "mars_base", 0.1, 12.0, 8),
            LinkSpec::new("mars_rover_2", "mars_orbiter_2", 1.0, 400.0, 4),
            LinkSpec::new("mars_rover_2", "mars_base", 0.1, 30.0, 8),
            LinkSpec::new("mars_base", "mars_orbiter_1", 1.0, 400.0, 8),
            LinkSpec::new("mars_base", "mars_orbiter_2", 1.0, 400.0, 8),
            LinkSpec::new("mars_orbiter_1", "relay_satellite", 0.06, 17_000.0, 8),
            LinkSpec::new("mars_orbiter_2", "relay_satellite", 0.06, 17_000.0, 8),
            LinkSpec::new("relay_satellite", "earth_station_1", 750.0, 225_000_000.0, 6),
            LinkSpec::new("relay_satellite", "earth_station_2", 750.0, 225_000_000.0, 6),
            LinkSpec::new("mars_orbiter_1", "earth_station_2", 760.0, 225_000_000.0, 2),
            LinkSpec::new("earth_station_1", "earth_station_2", 0.05, 8_000.0, 16),
        ];

        Self { nodes, links }
    }

    /// Load a topology from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, TopologyError> {
        let contents = std::fs::read_to_string(path)?;
        let topology: Topology = serde_json::from_str(&contents)?;
        topology.validate()?;
        Ok(topology)
    }

    /// Save the topology as pretty-printed JSON
    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), TopologyError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Index of the node with the given id
    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Node id for an index
    pub fn node_id(&self, index: usize) -> &str {
        &self.nodes[index].id
    }

    /// Resolve every link to `(source_index, target_index)`
    pub fn endpoints(&self) -> Result<Vec<(usize, usize)>, TopologyError> {
        self.links
            .iter()
            .map(|link| {
                let lookup = |id: &str| {
                    self.node_index(id).ok_or_else(|| TopologyError::UnknownNode {
                        source_id: link.source.clone(),
                        target_id: link.target.clone(),
                        missing: id.to_string(),
                    })
                };
                Ok((lookup(&link.source)?, lookup(&link.target)?))
            })
            .collect()
    }

    /// Validate structure and link parameters
    pub fn validate(&self) -> Result<(), TopologyError> {
        if self.nodes.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(TopologyError::DuplicateNode(node.id.clone()));
            }
            if node.buffer_capacity == 0 {
                return Err(TopologyError::ZeroCapacity(node.id.clone()));
            }
        }

        let endpoints = self.endpoints()?;
        let mut pairs = HashSet::new();
        for (link, &(a, b)) in self.links.iter().zip(&endpoints) {
            let invalid = |reason: &str| TopologyError::InvalidLink {
                source_id: link.source.clone(),
                target_id: link.target.clone(),
                reason: reason.to_string(),
            };

            if a == b {
                return Err(TopologyError::SelfLoop(link.source.clone()));
            }
            if !pairs.insert((a.min(b), a.max(b))) {
                return Err(TopologyError::ParallelLink(
                    link.source.clone(),
                    link.target.clone(),
                ));
            }
            if !link.delay_secs.is_finite() || link.delay_secs < 0.0 {
                return Err(invalid("delay must be a finite, non-negative number of seconds"));
            }
            if !link.distance_km.is_finite() || link.distance_km <= 0.0 {
                return Err(invalid("distance must be a finite, positive number of kilometres"));
            }
            if link.bandwidth == 0 {
                return Err(invalid("bandwidth must be at least one bundle per step"));
            }
        }

        Ok(())
    }
}

/// Human readable distance ("225.0M km", "17.0k km", "400.0 km")
pub fn format_distance(km: f64) -> String {
    if km >= 1_000_000.0 {
        format!("{:.1}M km", km / 1_000_000.0)
    } else if km >= 1_000.0 {
        format!("{:.1}k km", km / 1_000.0)
    } else {
        format!("{:.1} km", km)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topology_valid() {
        let topology = Topology::mars_earth();
        assert!(topology.validate().is_ok());
        assert_eq!(topology.nodes.len(), 8);
        assert!(topology.node_index("relay_satellite").is_some());
    }

    #[test]
    fn test_deep_space_classification() {
        let topology = Topology::mars_earth();
        let deep = topology.links.iter().filter(|l| l.is_deep_space()).count();
        assert_eq!(deep, 3);
        assert_eq!(topology.links[8].reliability(), DEEP_SPACE_RELIABILITY);
        assert_eq!(topology.links[0].reliability(), LOCAL_RELIABILITY);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut topology = Topology::mars_earth();
        topology.links[0].target = "phobos".to_string();
        assert!(matches!(
            topology.validate(),
            Err(TopologyError::UnknownNode { missing, .. }) if missing == "phobos"
        ));
    }

    #[test]
    fn test_parallel_link_rejected() {
        let mut topology = Topology::mars_earth();
        let mut reversed = topology.links[0].clone();
        std::mem::swap(&mut reversed.source, &mut reversed.target);
        topology.links.push(reversed);
        assert!(matches!(topology.validate(), Err(TopologyError::ParallelLink(..))));
    }

    #[test]
    fn test_negative_delay_rejected() {
        let mut topology = Topology::mars_earth();
        topology.links[3].delay_secs = -1.0;
        assert!(matches!(topology.validate(), Err(TopologyError::InvalidLink { .. })));
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(225_000_000.0), "225.0M km");
        assert_eq!(format_distance(17_000.0), "17.0k km");
        assert_eq!(format_distance(400.0), "400.0 km");
    }

    #[test]
    fn test_shipped_topology_file_matches_default() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("data")
            .join("network_topologies")
            .join("mars_earth.json");
        let loaded = Topology::from_json_file(path).unwrap();
        assert_eq!(loaded, Topology::mars_earth());
    }
}

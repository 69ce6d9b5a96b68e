//! Configuration system for the DTN simulator.
//!
//! Supports YAML configuration files with sensible defaults. Every section
//! may be omitted; missing values fall back to the defaults below.

use crate::topology::{Topology, TopologyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while loading or validating a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid topology: {0}")]
    Topology(#[from] TopologyError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    /// Inline network description
    pub topology: Topology,
    /// Optional JSON topology, resolved relative to the config file
    pub topology_file: Option<PathBuf>,
    pub traffic: TrafficConfig,
    pub disruptions: DisruptionConfig,
    pub output: OutputConfig,
    pub visualization: VisualizationConfig,
    pub logging: LoggingConfig,
}

/// Stepping parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of steps to run
    pub steps: u64,
    /// Simulated seconds per step
    pub step_secs: u64,
    /// RNG seed; a random seed is drawn when absent
    pub seed: Option<u64>,
}

/// A periodic bundle source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficFlow {
    pub source: String,
    pub destination: String,
    /// Emit one bundle every this many steps
    pub interval_steps: u64,
    pub payload_bytes: u32,
}

impl TrafficFlow {
    fn new(source: &str, destination: &str, interval_steps: u64, payload_bytes: u32) -> Self {
        Self {
            source: source.to_string(),
            destination: destination.to_string(),
            interval_steps,
            payload_bytes,
        }
    }
}

/// Traffic generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    pub flows: Vec<TrafficFlow>,
    /// Bundle lifetime in simulated seconds
    pub bundle_ttl_secs: u64,
}

/// Random link disruption model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisruptionConfig {
    pub enabled: bool,
    /// Per-step probability of losing a planetary link
    pub local_probability: f64,
    /// Per-step probability of losing a deep-space link
    pub deep_space_probability: f64,
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
}

/// How records reach the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceMode {
    /// Write on the stepping thread
    Sync,
    /// Hand records to a writer thread through a bounded queue
    Background,
}

/// What the background writer does when its queue is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    Block,
    DropIntermediate,
}

/// Output and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory holding one subdirectory per run
    pub results_dir: PathBuf,
    pub persist_cadence: Cadence,
    pub persistence: PersistenceMode,
    /// Background queue length
    pub queue_capacity: usize,
    pub overflow: OverflowPolicy,
    /// Steps between checkpoints (0 writes only the final one)
    pub checkpoint_interval: u64,
}

/// Visualization backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualBackend {
    Gui,
    Terminal,
    #[serde(rename = "none")]
    Headless,
}

/// Live visualization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    pub backend: VisualBackend,
    pub render_cadence: Cadence,
    /// Time budget per rendered frame (0 = unlimited)
    pub frame_budget_ms: u64,
    /// Frames buffered between the loop and a GUI window
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Steps between stats logging (0 disables)
    pub stats_interval: u64,
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
}

/// How often a consumer is offered a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Cadence {
    EveryStep,
    /// Every n-th step (n >= 1)
    Every(u64),
    /// Only the last step of the run
    FinalOnly,
}

impl Cadence {
    /// Whether `step_index` is due; the last step of a run always is.
    pub fn is_due(&self, step_index: u64, last_index: u64) -> bool {
        if step_index == last_index {
            return true;
        }
        match *self {
            Cadence::EveryStep => true,
            Cadence::Every(n) => n > 0 && (step_index + 1) % n == 0,
            Cadence::FinalOnly => false,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::EveryStep => write!(f, "every_step"),
            Cadence::Every(n) => write!(f, "every:{}", n),
            Cadence::FinalOnly => write!(f, "final_only"),
        }
    }
}

impl FromStr for Cadence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "every_step" => Ok(Cadence::EveryStep),
            "final_only" => Ok(Cadence::FinalOnly),
            other => {
                let n = other
                    .strip_prefix("every:")
                    .and_then(|n| n.trim().parse::<u64>().ok())
                    .ok_or_else(|| {
                        format!(
                            "unknown cadence '{}' (expected every_step, every:N or final_only)",
                            other
                        )
                    })?;
                if n == 0 {
                    return Err("cadence interval must be at least 1".to_string());
                }
                Ok(Cadence::Every(n))
            }
        }
    }
}

impl TryFrom<String> for Cadence {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cadence> for String {
    fn from(cadence: Cadence) -> Self {
        cadence.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            topology: Topology::default(),
            topology_file: None,
            traffic: TrafficConfig::default(),
            disruptions: DisruptionConfig::default(),
            output: OutputConfig::default(),
            visualization: VisualizationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: 240,
            step_secs: 60,
            seed: None,
        }
    }
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            flows: vec![
                TrafficFlow::new("mars_rover_1", "earth_station_1", 1, 1024),
                TrafficFlow::new("mars_rover_2", "earth_station_2", 2, 1024),
                TrafficFlow::new("mars_base", "earth_station_1", 5, 4096),
            ],
            bundle_ttl_secs: 3600,
        }
    }
}

impl Default for DisruptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_probability: 0.01,
            deep_space_probability: 0.03,
            min_duration_secs: 60,
            max_duration_secs: 300,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("data/results"),
            persist_cadence: Cadence::EveryStep,
            persistence: PersistenceMode::Sync,
            queue_capacity: 64,
            overflow: OverflowPolicy::Block,
            checkpoint_interval: 100,
        }
    }
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            backend: VisualBackend::Terminal,
            render_cadence: Cadence::EveryStep,
            frame_budget_ms: 50,
            channel_capacity: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stats_interval: 20,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A `topology_file` is read relative to the config file's directory and
    /// replaces the inline topology.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&contents)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_topology(base)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Replace the inline topology with `topology_file`, if one is set
    pub fn resolve_topology(&mut self, base: &Path) -> Result<(), ConfigError> {
        if let Some(file) = self.topology_file.take() {
            let full = if file.is_absolute() { file } else { base.join(file) };
            self.topology = Topology::from_json_file(full)?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.simulation.steps == 0 {
            return invalid("simulation.steps must be > 0");
        }
        if self.simulation.step_secs == 0 {
            return invalid("simulation.step_secs must be > 0");
        }
        if self.topology_file.is_some() {
            return invalid("topology_file must be resolved before validation");
        }

        self.topology.validate()?;

        for flow in &self.traffic.flows {
            for id in [&flow.source, &flow.destination] {
                if self.topology.node_index(id).is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "traffic flow references unknown node '{}'",
                        id
                    )));
                }
            }
            if flow.source == flow.destination {
                return Err(ConfigError::Invalid(format!(
                    "traffic flow from '{}' to itself",
                    flow.source
                )));
            }
            if flow.interval_steps == 0 {
                return invalid("traffic flow interval_steps must be > 0");
            }
        }
        if self.traffic.bundle_ttl_secs == 0 {
            return invalid("traffic.bundle_ttl_secs must be > 0");
        }

        let d = &self.disruptions;
        for p in [d.local_probability, d.deep_space_probability] {
            if !(0.0..=1.0).contains(&p) {
                return invalid("disruption probabilities must be between 0 and 1");
            }
        }
        if d.min_duration_secs > d.max_duration_secs {
            return invalid("disruptions.min_duration_secs cannot exceed max_duration_secs");
        }

        if self.output.queue_capacity == 0 {
            return invalid("output.queue_capacity must be > 0");
        }
        if self.visualization.channel_capacity == 0 {
            return invalid("visualization.channel_capacity must be > 0");
        }
        if self.logging.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log level '{}'",
                self.logging.log_level
            )));
        }

        Ok(())
    }

    /// Index of the last step of a run of `simulation.steps` steps
    pub fn last_step_index(&self) -> u64 {
        self.simulation.steps.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.output.persist_cadence = Cadence::Every(5);
        config.visualization.backend = VisualBackend::Headless;
        let yaml = serde_yaml::to_string(&config).unwrap();
        let loaded: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, loaded);
        assert!(yaml.contains("every:5"));
        assert!(yaml.contains("backend: none"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "simulation:\n  steps: 10\n  seed: 42\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.simulation.steps, 10);
        assert_eq!(config.simulation.step_secs, 60);
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.topology, Topology::mars_earth());
    }

    #[test]
    fn test_cadence_parsing() {
        assert_eq!("every_step".parse::<Cadence>(), Ok(Cadence::EveryStep));
        assert_eq!("every:3".parse::<Cadence>(), Ok(Cadence::Every(3)));
        assert_eq!("final_only".parse::<Cadence>(), Ok(Cadence::FinalOnly));
        assert!("every:0".parse::<Cadence>().is_err());
        assert!("sometimes".parse::<Cadence>().is_err());
    }

    #[test]
    fn test_cadence_due() {
        assert!(Cadence::EveryStep.is_due(0, 9));
        assert!(!Cadence::Every(3).is_due(0, 9));
        assert!(Cadence::Every(3).is_due(2, 9));
        assert!(Cadence::Every(3).is_due(9, 9));
        assert!(!Cadence::FinalOnly.is_due(8, 9));
        assert!(Cadence::FinalOnly.is_due(9, 9));
    }

    #[test]
    fn test_unknown_flow_node_rejected() {
        let mut config = Config::default();
        config.traffic.flows[0].destination = "moon_base".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_probability_rejected() {
        let mut config = Config::default();
        config.disruptions.deep_space_probability = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_topology_file_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let mut topology = Topology::mars_earth();
        topology.nodes[0].buffer_capacity = 7;
        topology.save_json(dir.path().join("net.json")).unwrap();

        let yaml = "topology_file: net.json\n";
        std::fs::write(dir.path().join("config.yaml"), yaml).unwrap();

        let config = Config::from_file(dir.path().join("config.yaml")).unwrap();
        assert_eq!(config.topology.nodes[0].buffer_capacity, 7);
        assert!(config.topology_file.is_none());
    }
}

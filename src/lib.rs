//! # dtnsim
//!
//! Delay-tolerant networking simulator for a Mars-Earth relay network.
//!
//! Bundles travel from Mars rovers and bases through orbiters and a deep
//! space relay to Earth ground stations. Nodes store bundles while links are
//! disrupted and forward them once a route is back.
//!
//! ## Features
//!
//! - **Deterministic**: a seed fully determines a run
//! - **Durable**: one crash-safe JSON record per step
//! - **Live view**: terminal frames, or an egui window with `--features gui`
//! - **Resumable**: bincode checkpoints
//! - **Configurable**: YAML configuration, JSON topologies
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dtnsim::results::ResultsWriter;
//! use dtnsim::{Config, SimulationLoop};
//!
//! let mut config = Config::default();
//! config.simulation.steps = 100;
//! config.simulation.seed = Some(42);
//!
//! let mut writer = ResultsWriter::open("data/results/example").unwrap();
//! let summary = SimulationLoop::new(&config, &mut writer).run().unwrap();
//! println!("{}", summary.final_stats.summary());
//! ```
//!
//! ## Stepping by hand
//!
//! ```rust
//! use dtnsim::{Config, SimulationState};
//!
//! let config = Config::default();
//! let mut state = SimulationState::initialize(&config, 7).unwrap();
//! for _ in 0..10 {
//!     state = state.step(&config).unwrap();
//! }
//! assert_eq!(state.steps_taken, 10);
//! ```

pub mod analysis;
pub mod bundle;
pub mod checkpoint;
pub mod config;
pub mod logging;
pub mod results;
pub mod routing;
pub mod runner;
pub mod snapshot;
pub mod state;
pub mod stats;
pub mod topology;
pub mod visual;

#[cfg(feature = "gui")]
pub mod gui;

// Re-export main types
pub use config::Config;
pub use runner::{Interrupt, RunOutcome, RunSummary, SimError, SimulationLoop};
pub use snapshot::{ResultRecord, StateSnapshot};
pub use state::SimulationState;
pub use topology::Topology;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

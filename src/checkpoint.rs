//! Checkpoint system for saving and resuming simulation state.

use crate::config::Config;
use crate::results::write_atomic;
use crate::state::SimulationState;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAGIC: &[u8; 4] = b"DTNS";

/// Default checkpoint file name inside a run directory
pub const CHECKPOINT_FILE: &str = "checkpoint.bin";

/// Complete simulation state for checkpointing
#[derive(Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Version for compatibility checking
    pub version: u32,
    /// Configuration the state was produced with
    pub config: Config,
    pub state: SimulationState,
}

impl Checkpoint {
    /// Current checkpoint version
    pub const VERSION: u32 = 1;

    pub fn new(config: Config, state: SimulationState) -> Self {
        Self {
            version: Self::VERSION,
            config,
            state,
        }
    }

    /// Save checkpoint to a binary file, replacing any previous one atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CheckpointError> {
        let mut bytes = MAGIC.to_vec();
        bincode::serialize_into(&mut bytes, self)?;
        write_atomic(path.as_ref(), &bytes)?;
        Ok(())
    }

    /// Load checkpoint from a binary file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let bytes = std::fs::read(path)?;

        let payload = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or_else(|| CheckpointError::InvalidFormat("Invalid magic bytes".to_string()))?;
        let checkpoint: Checkpoint = bincode::deserialize(payload)?;

        if checkpoint.version != Self::VERSION {
            return Err(CheckpointError::VersionMismatch {
                expected: Self::VERSION,
                found: checkpoint.version,
            });
        }

        Ok(checkpoint)
    }

    /// Approximate size in bytes
    pub fn size_bytes(&self) -> usize {
        bincode::serialized_size(self).unwrap_or(0) as usize + MAGIC.len()
    }
}

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

/// Periodic checkpointing into a single file
pub struct CheckpointManager {
    path: PathBuf,
    /// Steps between checkpoints (0 = only when forced)
    interval: u64,
    last_saved: Option<u64>,
}

impl CheckpointManager {
    pub fn new<P: Into<PathBuf>>(path: P, interval: u64) -> Self {
        Self {
            path: path.into(),
            interval,
            last_saved: None,
        }
    }

    /// Manager writing `checkpoint.bin` inside `run_dir`
    pub fn in_run_dir(run_dir: &Path, interval: u64) -> Self {
        Self::new(run_dir.join(CHECKPOINT_FILE), interval)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a checkpoint is due after `steps_taken` steps
    pub fn should_save(&self, steps_taken: u64) -> bool {
        self.interval > 0
            && steps_taken > 0
            && steps_taken % self.interval == 0
            && self.last_saved != Some(steps_taken)
    }

    /// Save unconditionally
    pub fn save(&mut self, config: &Config, state: &SimulationState) -> Result<(), CheckpointError> {
        if self.last_saved == Some(state.steps_taken) {
            return Ok(());
        }
        Checkpoint::new(config.clone(), state.clone()).save(&self.path)?;
        self.last_saved = Some(state.steps_taken);
        debug!(
            "Checkpoint saved at step {}: {}",
            state.steps_taken,
            self.path.display()
        );
        Ok(())
    }

    /// Save if the interval says so
    pub fn maybe_save(
        &mut self,
        config: &Config,
        state: &SimulationState,
    ) -> Result<bool, CheckpointError> {
        if !self.should_save(state.steps_taken) {
            return Ok(false);
        }
        self.save(config, state)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advanced(config: &Config, steps: u64) -> SimulationState {
        let mut state = SimulationState::initialize(config, 12345).unwrap();
        for _ in 0..steps {
            state = state.step(config).unwrap();
        }
        state
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        let config = Config::default();
        let state = advanced(&config, 20);

        Checkpoint::new(config.clone(), state.clone())
            .save(&path)
            .unwrap();
        let loaded = Checkpoint::load(&path).unwrap();

        assert_eq!(loaded.config, config);
        assert_eq!(loaded.state.steps_taken, 20);
        assert_eq!(loaded.state.nodes, state.nodes);
        assert_eq!(loaded.state.stats, state.stats);
        assert_eq!(loaded.state.seed, 12345);
    }

    #[test]
    fn test_resumed_run_matches_uninterrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        let mut config = Config::default();
        config.disruptions.deep_space_probability = 0.2;

        let straight = advanced(&config, 30);

        Checkpoint::new(config.clone(), advanced(&config, 15))
            .save(&path)
            .unwrap();
        let mut resumed = Checkpoint::load(&path).unwrap().state;
        for _ in 0..15 {
            resumed = resumed.step(&config).unwrap();
        }

        assert_eq!(resumed.nodes, straight.nodes);
        assert_eq!(resumed.links, straight.links);
        assert_eq!(resumed.transits, straight.transits);
        assert_eq!(resumed.stats, straight.stats);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.bin");
        std::fs::write(&path, b"PRMD0000").unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(CheckpointError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_manager_interval() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let mut manager = CheckpointManager::in_run_dir(dir.path(), 5);

        assert!(!manager.should_save(0));
        assert!(!manager.should_save(4));
        assert!(manager.should_save(5));

        let state = advanced(&config, 5);
        assert!(manager.maybe_save(&config, &state).unwrap());
        assert!(!manager.should_save(5));
        assert!(manager.path().exists());
    }

    #[test]
    fn test_checkpoint_size() {
        let config = Config::default();
        let checkpoint = Checkpoint::new(config.clone(), advanced(&config, 10));
        let size = checkpoint.size_bytes();
        assert!(size > MAGIC.len());
        assert!(size < 1_000_000);
    }
}

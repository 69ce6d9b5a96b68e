//! Live visualization of the running network.
//!
//! The simulation loop only knows the `Visualizer` contract. Backends:
//! - `TerminalVisualizer`: ANSI redraw in the controlling terminal
//! - `ChannelVisualizer`: forwards frames to another thread (the GUI window)
//!
//! A visualizer never sees the live state, only `StateSnapshot` copies.

pub mod channel;
pub mod terminal;

pub use channel::{frame_channel, ChannelVisualizer, FrameReceiver};
pub use terminal::TerminalVisualizer;

use crate::snapshot::StateSnapshot;
use thiserror::Error;

/// Errors raised by visualizers
#[derive(Debug, Error)]
pub enum VisualError {
    #[error("no display available: {0}")]
    DisplayUnavailable(String),

    #[error("visualization window has gone away")]
    Disconnected,

    #[error("visualization output failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A live view of the simulation
pub trait Visualizer {
    /// Short backend name for log lines
    fn name(&self) -> &str;

    /// Acquire the display; fails with `DisplayUnavailable` when there is none
    fn open(&mut self) -> Result<(), VisualError>;

    /// Draw one frame
    fn render(&mut self, snapshot: &StateSnapshot) -> Result<(), VisualError>;

    /// Release the display
    fn close(&mut self) -> Result<(), VisualError>;
}

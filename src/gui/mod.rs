//! Desktop window for a running simulation (egui + eframe).
//!
//! ## Architecture
//!
//! A native window must own the main thread, so in GUI mode the simulation
//! loop runs on a worker thread:
//! - **Simulation thread**: `SimulationLoop` with a `GuiVisualizer`
//! - **Main thread**: `run_gui`, drawing the newest snapshot at ~60fps
//!
//! Frames flow over the bounded channel from `visual::frame_channel`; when
//! the window falls behind, frames are dropped instead of slowing the run.
//! `Q` triggers the run's `Interrupt`; closing the window only ends the
//! visualization and the run continues headless.

mod app;
mod views;

pub use app::{run_gui, DtnApp};

use crate::runner::Interrupt;
use crate::snapshot::StateSnapshot;
use crate::visual::{frame_channel, ChannelVisualizer, FrameReceiver, VisualError, Visualizer};

/// Whether a windowing system looks reachable
pub fn display_available() -> bool {
    if cfg!(any(target_os = "windows", target_os = "macos")) {
        return true;
    }
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|var| std::env::var_os(var).map_or(false, |v| !v.is_empty()))
}

/// Simulation-side half of the GUI
pub struct GuiVisualizer {
    channel: ChannelVisualizer,
}

impl GuiVisualizer {
    /// Visualizer plus the receiver to hand to `run_gui`
    pub fn new(capacity: usize) -> (Self, FrameReceiver) {
        let (channel, frames) = frame_channel(capacity);
        (Self { channel }, frames)
    }

    /// Frames dropped because the window was behind
    pub fn dropped(&self) -> u64 {
        self.channel.dropped()
    }
}

impl Visualizer for GuiVisualizer {
    fn name(&self) -> &str {
        "gui"
    }

    fn open(&mut self) -> Result<(), VisualError> {
        if !display_available() {
            return Err(VisualError::DisplayUnavailable(
                "neither DISPLAY nor WAYLAND_DISPLAY is set".to_string(),
            ));
        }
        self.channel.open()
    }

    fn render(&mut self, snapshot: &StateSnapshot) -> Result<(), VisualError> {
        self.channel.render(snapshot)
    }

    fn close(&mut self) -> Result<(), VisualError> {
        self.channel.close()
    }
}

/// Open the window and block until it is closed
pub fn open_window(frames: FrameReceiver, interrupt: Interrupt) -> Result<(), VisualError> {
    run_gui(frames, interrupt).map_err(|e| VisualError::DisplayUnavailable(e.to_string()))
}

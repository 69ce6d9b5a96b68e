//! Main GUI application.

use eframe::egui;
use std::collections::VecDeque;

use crate::runner::Interrupt;
use crate::snapshot::StateSnapshot;
use crate::stats::format_sim_time;
use crate::visual::FrameReceiver;

use super::views::{NetworkView, StatsPanel};

/// Frames kept for stepping back with the arrow keys
const HISTORY_LEN: usize = 500;

/// Recent frames plus the one on screen.
///
/// `cursor` is `None` while following the live run; otherwise it indexes a
/// past frame and new frames keep arriving underneath it.
#[derive(Default)]
pub struct FrameHistory {
    frames: VecDeque<StateSnapshot>,
    cursor: Option<usize>,
}

impl FrameHistory {
    pub fn push(&mut self, snapshot: StateSnapshot) {
        if self.frames.len() == HISTORY_LEN {
            self.frames.pop_front();
            // Keep looking at the same frame while the window slides
            self.cursor = self.cursor.map(|i| i.saturating_sub(1));
        }
        self.frames.push_back(snapshot);
    }

    pub fn current(&self) -> Option<&StateSnapshot> {
        match self.cursor {
            Some(i) => self.frames.get(i),
            None => self.frames.back(),
        }
    }

    pub fn back(&mut self) {
        let last = match self.frames.len() {
            0 => return,
            n => n - 1,
        };
        self.cursor = Some(self.cursor.unwrap_or(last).saturating_sub(1));
    }

    /// Forward one frame; stepping past the newest resumes live view
    pub fn forward(&mut self) {
        if let Some(i) = self.cursor {
            self.cursor = (i + 2 < self.frames.len()).then(|| i + 1);
        }
    }

    pub fn is_live(&self) -> bool {
        self.cursor.is_none()
    }

    /// 1-based position of the frame on screen
    pub fn position(&self) -> (usize, usize) {
        let len = self.frames.len();
        (self.cursor.map_or(len, |i| i + 1), len)
    }
}

/// Window state
pub struct DtnApp {
    frames: FrameReceiver,
    interrupt: Interrupt,
    history: FrameHistory,
    network_view: NetworkView,
    stats_panel: StatsPanel,
}

impl DtnApp {
    pub fn new(frames: FrameReceiver, interrupt: Interrupt) -> Self {
        Self {
            frames,
            interrupt,
            history: FrameHistory::default(),
            network_view: NetworkView::new(),
            stats_panel: StatsPanel::new(),
        }
    }

    fn status(&self) -> &'static str {
        if self.frames.is_finished() {
            "Finished"
        } else if self.interrupt.is_triggered() {
            "Stopping"
        } else {
            "Running"
        }
    }
}

impl eframe::App for DtnApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(snapshot) = self.frames.latest() {
            self.stats_panel.update(&snapshot);
            self.history.push(snapshot);
        }

        if !self.frames.is_finished() {
            ctx.request_repaint();
        }

        if ctx.input(|i| i.key_pressed(egui::Key::Q)) {
            self.interrupt.trigger();
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }
        if ctx.input(|i| i.key_pressed(egui::Key::ArrowLeft)) {
            self.history.back();
        }
        if ctx.input(|i| i.key_pressed(egui::Key::ArrowRight)) {
            self.history.forward();
        }
        let snapshot = self.history.current();

        egui::SidePanel::right("stats_panel")
            .min_width(250.0)
            .default_width(300.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| match snapshot {
                    Some(snapshot) => self.stats_panel.show(ui, snapshot),
                    None => {
                        ui.label("Waiting for simulation...");
                    }
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            if let Some(snapshot) = snapshot {
                self.network_view.show(ui, snapshot);
            } else {
                ui.centered_and_justified(|ui| {
                    ui.label("Loading simulation...");
                });
            }
        });

        egui::TopBottomPanel::bottom("status_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if let Some(snapshot) = snapshot {
                    ui.label(format!(
                        "T+{} | Step: {} | Delivered: {} | Stored: {} | {}",
                        format_sim_time(snapshot.time_secs),
                        snapshot.steps_taken,
                        snapshot.stats.delivered,
                        snapshot.stats.stored,
                        self.status()
                    ));
                    if !self.history.is_live() {
                        let (at, of) = self.history.position();
                        ui.label(format!("Replay {}/{}", at, of));
                    }
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label("\u{2190}/\u{2192} browse | Q to stop");
                });
            });
        });
    }
}

/// Run the window until it is closed
pub fn run_gui(frames: FrameReceiver, interrupt: Interrupt) -> eframe::Result<()> {
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title("Mars-Earth DTN Simulator"),
        ..Default::default()
    };

    eframe::run_native(
        "dtnsim",
        native_options,
        Box::new(|_cc| Box::new(DtnApp::new(frames, interrupt))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::SimulationState;

    fn frames(count: usize) -> Vec<StateSnapshot> {
        let config = Config::default();
        let mut state = SimulationState::initialize(&config, 1).unwrap();
        (0..count)
            .map(|_| {
                state = state.step(&config).unwrap();
                StateSnapshot::capture(&state, &config)
            })
            .collect()
    }

    #[test]
    fn test_history_browse_and_return_live() {
        let mut history = FrameHistory::default();
        history.back();
        assert!(history.current().is_none());

        for frame in frames(4) {
            history.push(frame);
        }
        assert_eq!(history.current().map(|s| s.steps_taken), Some(4));

        history.back();
        history.back();
        assert_eq!(history.current().map(|s| s.steps_taken), Some(2));
        assert_eq!(history.position(), (2, 4));

        // New frames do not move a paused view
        history.push(frames(5).pop().unwrap());
        assert_eq!(history.current().map(|s| s.steps_taken), Some(2));

        history.forward();
        history.forward();
        history.forward();
        assert!(history.is_live());
        assert_eq!(history.current().map(|s| s.steps_taken), Some(5));
    }

    #[test]
    fn test_history_stops_at_oldest() {
        let mut history = FrameHistory::default();
        for frame in frames(2) {
            history.push(frame);
        }
        for _ in 0..5 {
            history.back();
        }
        assert_eq!(history.current().map(|s| s.steps_taken), Some(1));
    }
}

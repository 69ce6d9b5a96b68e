//! ANSI terminal rendering.

use super::{VisualError, Visualizer};
use crate::snapshot::StateSnapshot;
use crate::stats::format_sim_time;
use crate::topology::format_distance;
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use crossterm::tty::IsTty;
use crossterm::{execute, queue};
use std::fmt::Write as _;
use std::io::{self, Stdout, Write};

const BAR_WIDTH: usize = 20;

/// Redraws a text frame on every render
pub struct TerminalVisualizer<W: Write> {
    writer: W,
    /// Whether `writer` is an interactive terminal
    interactive: bool,
    opened: bool,
    frames: u64,
}

impl TerminalVisualizer<Stdout> {
    /// Render to standard output
    pub fn stdout() -> Self {
        let stdout = io::stdout();
        let interactive = stdout.is_tty();
        Self {
            writer: stdout,
            interactive,
            opened: false,
            frames: 0,
        }
    }
}

impl<W: Write> TerminalVisualizer<W> {
    /// Render to an arbitrary writer, treated as a terminal
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            interactive: true,
            opened: false,
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> Visualizer for TerminalVisualizer<W> {
    fn name(&self) -> &str {
        "terminal"
    }

    fn open(&mut self) -> Result<(), VisualError> {
        if !self.interactive {
            return Err(VisualError::DisplayUnavailable(
                "standard output is not a terminal".to_string(),
            ));
        }
        execute!(self.writer, Hide)?;
        self.opened = true;
        Ok(())
    }

    fn render(&mut self, snapshot: &StateSnapshot) -> Result<(), VisualError> {
        let frame = render_frame(snapshot);
        queue!(self.writer, MoveTo(0, 0), Clear(ClearType::All))?;
        self.writer.write_all(frame.as_bytes())?;
        self.writer.flush()?;
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), VisualError> {
        if self.opened {
            self.opened = false;
            execute!(self.writer, Show)?;
            writeln!(self.writer)?;
        }
        Ok(())
    }
}

/// Text frame for one snapshot
pub fn render_frame(snapshot: &StateSnapshot) -> String {
    let mut out = String::new();
    let name = |index: usize| {
        snapshot
            .nodes
            .get(index)
            .map(|n| n.id.as_str())
            .unwrap_or("?")
    };
    let width = snapshot.nodes.iter().map(|n| n.id.len()).max().unwrap_or(0);

    let _ = writeln!(
        out,
        "{}  T+{}  step {}\r",
        "Mars-Earth DTN".bold(),
        format_sim_time(snapshot.time_secs),
        snapshot.steps_taken
    );
    let _ = writeln!(out, "\r");

    let _ = writeln!(out, "{}\r", "Links".underlined());
    for link in &snapshot.links {
        let ends = format!("{} <-> {}", name(link.source), name(link.target));
        let status = match link.disrupted_until {
            None => format!("{}", "UP".green()),
            Some(until) => format!("{} until {}", "DOWN".red(), format_sim_time(until)),
        };
        let _ = writeln!(
            out,
            "  {:<w$}  {:>10}  {:>7.2}s  {}  in flight {}\r",
            ends,
            format_distance(link.distance_km),
            link.delay_secs,
            status,
            link.in_transit,
            w = width * 2 + 5
        );
    }
    let _ = writeln!(out, "\r");

    let _ = writeln!(out, "{}\r", "Storage".underlined());
    for node in &snapshot.nodes {
        let filled = ((node.fill() * BAR_WIDTH as f32).round() as usize).min(BAR_WIDTH);
        let bar = format!("{}{}", "#".repeat(filled), "-".repeat(BAR_WIDTH - filled));
        let bar = if node.fill() > 0.8 {
            format!("{}", bar.red())
        } else {
            format!("{}", bar.cyan())
        };
        let _ = writeln!(
            out,
            "  {:<w$}  [{}] {:>4}/{:<4} peak {}\r",
            node.id,
            bar,
            node.stored,
            node.capacity,
            node.peak_storage,
            w = width
        );
    }
    let _ = writeln!(out, "\r");
    let _ = writeln!(out, "{}\r", snapshot.stats.summary());

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::state::SimulationState;

    fn snapshot() -> StateSnapshot {
        let config = Config::default();
        let state = SimulationState::initialize(&config, 4)
            .unwrap()
            .step(&config)
            .unwrap();
        StateSnapshot::capture(&state, &config)
    }

    #[test]
    fn test_frame_lists_nodes_and_links() {
        let frame = render_frame(&snapshot());
        assert!(frame.contains("mars_rover_1 <-> mars_orbiter_1"));
        assert!(frame.contains("earth_station_2"));
        assert!(frame.contains("225.0M km"));
        assert!(frame.contains("T+00:01:00"));
    }

    #[test]
    fn test_render_writes_frames() {
        let mut visual = TerminalVisualizer::new(Vec::new());
        visual.open().unwrap();
        visual.render(&snapshot()).unwrap();
        visual.render(&snapshot()).unwrap();
        visual.close().unwrap();

        assert_eq!(visual.frames(), 2);
        let output = String::from_utf8_lossy(&visual.into_inner()).to_string();
        assert!(output.contains("Mars-Earth DTN"));
    }
}

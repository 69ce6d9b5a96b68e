//! Statistics panel showing delivery metrics.

use egui::Ui;
use egui_plot::{Legend, Line, Plot, PlotPoints};

use crate::snapshot::StateSnapshot;
use crate::stats::format_sim_time;

/// Current figures plus short history plots
pub struct StatsPanel {
    /// Delivery ratio (%) against simulated minutes
    delivery_history: Vec<[f64; 2]>,
    /// Bundles held in node storage
    stored_history: Vec<[f64; 2]>,
    /// Bundles on the move
    in_transit_history: Vec<[f64; 2]>,
    max_history: usize,
}

impl Default for StatsPanel {
    fn default() -> Self {
        Self {
            delivery_history: Vec::new(),
            stored_history: Vec::new(),
            in_transit_history: Vec::new(),
            max_history: 500,
        }
    }
}

impl StatsPanel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update history from snapshot
    pub fn update(&mut self, snapshot: &StateSnapshot) {
        let minutes = snapshot.time_secs as f64 / 60.0;
        let stats = &snapshot.stats;

        self.delivery_history
            .push([minutes, stats.delivery_ratio * 100.0]);
        self.stored_history.push([minutes, stats.stored as f64]);
        self.in_transit_history
            .push([minutes, stats.in_transit as f64]);

        if self.delivery_history.len() > self.max_history {
            self.delivery_history.remove(0);
            self.stored_history.remove(0);
            self.in_transit_history.remove(0);
        }
    }

    pub fn show(&mut self, ui: &mut Ui, snapshot: &StateSnapshot) {
        let stats = &snapshot.stats;

        egui::CollapsingHeader::new("Statistics")
            .default_open(true)
            .show(ui, |ui| {
                egui::Grid::new("stats_grid")
                    .num_columns(2)
                    .spacing([20.0, 4.0])
                    .show(ui, |ui| {
                        ui.label("Time:");
                        ui.label(format_sim_time(snapshot.time_secs));
                        ui.end_row();

                        ui.label("Created:");
                        ui.label(format!("{}", stats.created));
                        ui.end_row();

                        ui.label("Delivered:");
                        ui.label(format!(
                            "{} ({:.1}%)",
                            stats.delivered,
                            stats.delivery_ratio * 100.0
                        ));
                        ui.end_row();

                        ui.label("Expired / Dropped:");
                        ui.label(format!("{} / {}", stats.expired, stats.dropped));
                        ui.end_row();

                        ui.label("Mean Delay:");
                        ui.label(format!("{:.1}s", stats.mean_delay_secs));
                        ui.end_row();

                        ui.label("Max Stored:");
                        ui.label(format!("{}", stats.max_stored_bundles));
                        ui.end_row();

                        ui.label("Links Down:");
                        ui.label(format!(
                            "{} ({} disruptions)",
                            stats.disrupted_links, stats.disruptions
                        ));
                        ui.end_row();

                        ui.label("Retransmissions:");
                        ui.label(format!("{}", stats.retransmissions));
                        ui.end_row();
                    });
            });

        ui.separator();

        egui::CollapsingHeader::new("Delivery Ratio")
            .default_open(true)
            .show(ui, |ui| {
                let points: PlotPoints = self.delivery_history.iter().copied().collect();
                let line = Line::new(points).color(egui::Color32::GREEN);

                Plot::new("delivery_plot")
                    .height(100.0)
                    .include_y(0.0)
                    .include_y(100.0)
                    .show_axes(true)
                    .show(ui, |plot_ui| {
                        plot_ui.line(line);
                    });
            });

        egui::CollapsingHeader::new("Bundles")
            .default_open(false)
            .show(ui, |ui| {
                let stored: PlotPoints = self.stored_history.iter().copied().collect();
                let flying: PlotPoints = self.in_transit_history.iter().copied().collect();

                Plot::new("bundle_plot")
                    .height(120.0)
                    .legend(Legend::default())
                    .show_axes(true)
                    .show(ui, |plot_ui| {
                        plot_ui.line(
                            Line::new(stored)
                                .color(egui::Color32::LIGHT_BLUE)
                                .name("stored"),
                        );
                        plot_ui.line(
                            Line::new(flying)
                                .color(egui::Color32::YELLOW)
                                .name("in transit"),
                        );
                    });
            });
    }
}

//! Network map: nodes, links and bundles in flight.

use egui::{Align2, Color32, FontId, Pos2, Sense, Stroke, Ui, Vec2};

use crate::snapshot::{NodeView, StateSnapshot};
use crate::topology::NodeKind;

const MARGIN: f32 = 40.0;

/// Draws the topology in the available space
pub struct NetworkView {
    show_labels: bool,
    show_bundles: bool,
}

impl Default for NetworkView {
    fn default() -> Self {
        Self {
            show_labels: true,
            show_bundles: true,
        }
    }
}

impl NetworkView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn show(&mut self, ui: &mut Ui, snapshot: &StateSnapshot) {
        let controls_height = 30.0;
        let available = ui.available_size() - Vec2::new(0.0, controls_height);
        let (response, painter) = ui.allocate_painter(available, Sense::hover());
        let rect = response.rect.shrink(MARGIN);

        // Node positions live in the unit square
        let place = |node: &NodeView| {
            Pos2::new(
                rect.min.x + node.position[0] * rect.width(),
                rect.min.y + node.position[1] * rect.height(),
            )
        };

        for link in &snapshot.links {
            let (Some(a), Some(b)) = (
                snapshot.nodes.get(link.source),
                snapshot.nodes.get(link.target),
            ) else {
                continue;
            };
            let color = if link.up {
                Color32::from_rgb(80, 190, 90)
            } else {
                Color32::from_rgb(200, 60, 60)
            };
            let width = if link.deep_space { 2.5 } else { 1.5 };
            painter.line_segment([place(a), place(b)], Stroke::new(width, color));
        }

        if self.show_bundles {
            for transit in &snapshot.transits {
                let (Some(a), Some(b)) = (
                    snapshot.nodes.get(transit.from),
                    snapshot.nodes.get(transit.to),
                ) else {
                    continue;
                };
                let pos = place(a).lerp(place(b), transit.progress.clamp(0.0, 1.0));
                painter.circle_filled(pos, 3.0, Color32::YELLOW);
            }
        }

        for node in &snapshot.nodes {
            let center = place(node);
            let radius = 10.0;
            painter.circle_filled(center, radius, node_color(node.kind));

            // Ring widens with storage occupancy
            let fill = node.fill().clamp(0.0, 1.0);
            if fill > 0.0 {
                let ring = if fill > 0.8 {
                    Color32::RED
                } else {
                    Color32::WHITE
                };
                painter.circle_stroke(center, radius + 3.0 + 4.0 * fill, Stroke::new(2.0, ring));
            }

            if self.show_labels {
                painter.text(
                    center + Vec2::new(0.0, radius + 12.0),
                    Align2::CENTER_TOP,
                    format!("{} ({}/{})", node.id, node.stored, node.capacity),
                    FontId::proportional(12.0),
                    Color32::LIGHT_GRAY,
                );
            }
        }

        ui.horizontal(|ui| {
            ui.checkbox(&mut self.show_labels, "Labels");
            ui.checkbox(&mut self.show_bundles, "Bundles");
        });
    }
}

fn node_color(kind: NodeKind) -> Color32 {
    match kind {
        NodeKind::Rover => Color32::from_rgb(220, 120, 60),
        NodeKind::Base => Color32::from_rgb(200, 80, 40),
        NodeKind::Orbiter => Color32::from_rgb(230, 180, 60),
        NodeKind::Relay => Color32::from_rgb(160, 100, 220),
        NodeKind::GroundStation => Color32::from_rgb(60, 140, 230),
    }
}

//! GUI view components.

mod network_view;
mod stats_panel;

pub use network_view::NetworkView;
pub use stats_panel::StatsPanel;

//! Run log contents. Kept in its own test binary because the logger is
//! process-wide.

use dtnsim::logging::{self, read_entries};
use dtnsim::results::{ResultsWriter, LOG_FILE};
use dtnsim::{Config, SimulationLoop};
use log::Level;

#[test]
fn test_run_log_records_start_and_completion() {
    let dir = tempfile::tempdir().unwrap();
    let log = logging::init("info", false);
    log.attach(dir.path().join(LOG_FILE)).unwrap();

    let mut config = Config::default();
    config.simulation.steps = 10;
    config.simulation.seed = Some(42);
    config.logging.stats_interval = 5;
    let mut writer = ResultsWriter::open(dir.path().join("records")).unwrap();
    SimulationLoop::new(&config, &mut writer).run().unwrap();
    log.detach();

    let entries = read_entries(dir.path().join(LOG_FILE)).unwrap();
    let started = entries
        .iter()
        .position(|e| e.message.starts_with("Run started: seed 42"))
        .expect("start line");
    let completed = entries
        .iter()
        .position(|e| e.message.starts_with("Run completed: 10 steps"))
        .expect("completion line");

    assert!(started < completed);
    assert_eq!(entries[started].level, Level::Info);
    assert!(entries[completed].message.contains("10 records written"));
    // Stats summaries at steps 5 and 10
    let summaries = entries
        .iter()
        .filter(|e| e.message.starts_with("T:"))
        .count();
    assert_eq!(summaries, 2);
}

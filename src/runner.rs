//! The simulation loop.
//!
//! Owns the state for the duration of a run, steps it, and offers every new
//! state first to the results sink and then to the visualizer. Both are
//! closed on every way out of the loop.

use crate::checkpoint::{CheckpointError, CheckpointManager};
use crate::config::{ConfigError, Config};
use crate::results::{RecordSink, ResultsError};
use crate::snapshot::{ResultRecord, StateSnapshot};
use crate::state::{SimulationState, StateError};
use crate::stats::NetworkStats;
use crate::visual::Visualizer;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that end a run
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid state before step {step_index}: {source}")]
    InvalidState {
        step_index: u64,
        #[source]
        source: StateError,
    },

    #[error(transparent)]
    Results(#[from] ResultsError),

    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

/// Shared stop request, set from Ctrl+C or the GUI
#[derive(Clone, Debug, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Route Ctrl+C to this flag
    pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
        let flag = Arc::clone(&self.0);
        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Stopped on request; `after_step` is the last completed step index
    Interrupted { after_step: Option<u64> },
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub seed: u64,
    pub outcome: RunOutcome,
    /// Index of the first step executed by this run
    pub first_step_index: u64,
    /// Steps executed by this run
    pub steps_run: u64,
    pub records_written: u64,
    pub records_dropped: u64,
    pub frames_rendered: u64,
    pub frames_skipped: u64,
    /// Whether the run went without a visualizer at any point
    pub headless: bool,
    pub elapsed_secs: f64,
    pub final_stats: NetworkStats,
    pub final_state: SimulationState,
}

impl RunSummary {
    pub fn interrupted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Interrupted { .. })
    }
}

/// Skips frames after slow renders so rendering cannot dominate a run.
///
/// Time spent beyond the budget accrues as debt; each skipped frame pays back
/// one budget's worth.
#[derive(Debug, Clone)]
pub struct FramePacer {
    budget: Option<Duration>,
    debt: Duration,
}

impl FramePacer {
    /// `budget_ms == 0` renders every frame
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget: (budget_ms > 0).then(|| Duration::from_millis(budget_ms)),
            debt: Duration::ZERO,
        }
    }

    /// Whether the next frame should be drawn
    pub fn admit(&mut self) -> bool {
        match self.budget {
            Some(budget) if !self.debt.is_zero() => {
                self.debt = self.debt.saturating_sub(budget);
                false
            }
            _ => true,
        }
    }

    /// Account for a frame that took `elapsed`
    pub fn record(&mut self, elapsed: Duration) {
        if let Some(budget) = self.budget {
            self.debt += elapsed.saturating_sub(budget);
        }
    }
}

/// Drives a `SimulationState` through a run
pub struct SimulationLoop<'a> {
    config: &'a Config,
    sink: &'a mut dyn RecordSink,
    visualizer: Option<&'a mut dyn Visualizer>,
    interrupt: Interrupt,
    checkpoints: Option<CheckpointManager>,
    seed: Option<u64>,
    pacer: FramePacer,
    frames_rendered: u64,
    frames_skipped: u64,
}

impl<'a> SimulationLoop<'a> {
    pub fn new(config: &'a Config, sink: &'a mut dyn RecordSink) -> Self {
        Self {
            config,
            sink,
            visualizer: None,
            interrupt: Interrupt::new(),
            checkpoints: None,
            seed: None,
            pacer: FramePacer::new(config.visualization.frame_budget_ms),
            frames_rendered: 0,
            frames_skipped: 0,
        }
    }

    pub fn with_visualizer(mut self, visualizer: &'a mut dyn Visualizer) -> Self {
        self.visualizer = Some(visualizer);
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: CheckpointManager) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Override the configured seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Seed this run will use; drawn at random when none is configured
    pub fn resolve_seed(&mut self) -> u64 {
        let seed = self
            .seed
            .or(self.config.simulation.seed)
            .unwrap_or_else(rand::random);
        self.seed = Some(seed);
        seed
    }

    /// Run `simulation.steps` steps from a fresh state
    pub fn run(mut self) -> Result<RunSummary, SimError> {
        let seed = self.resolve_seed();
        let steps = self.config.simulation.steps;
        let initial = self
            .config
            .validate()
            .map_err(SimError::from)
            .and_then(|_| {
                SimulationState::initialize(self.config, seed).map_err(|source| {
                    SimError::InvalidState {
                        step_index: 0,
                        source,
                    }
                })
            });
        self.execute(initial, steps)
    }

    /// Continue `state` for `additional_steps` more steps
    pub fn resume(
        self,
        state: SimulationState,
        additional_steps: u64,
    ) -> Result<RunSummary, SimError> {
        let initial = self.config.validate().map(|_| state).map_err(SimError::from);
        self.execute(initial, additional_steps)
    }

    fn execute(
        mut self,
        initial: Result<SimulationState, SimError>,
        steps: u64,
    ) -> Result<RunSummary, SimError> {
        let started = Instant::now();
        let headless = !self.open_visualizer();

        let result = initial.and_then(|state| {
            let first_step_index = state.steps_taken;
            let (state, outcome) = self.drive(state, steps)?;
            if let Some(manager) = self.checkpoints.as_mut() {
                manager.save(self.config, &state)?;
            }
            Ok((first_step_index, state, outcome))
        });

        let closed = self.sink.close();
        let still_visible = self.close_visualizer();
        let elapsed = started.elapsed();

        let (first_step_index, state, outcome) = match result {
            Ok(done) => done,
            Err(e) => {
                if let Err(close_error) = &closed {
                    warn!("Results writer did not close cleanly: {}", close_error);
                }
                error!("Run failed: {}", e);
                return Err(e);
            }
        };
        let report = closed.map_err(|e| {
            error!("Run failed: {}", e);
            SimError::Results(e)
        })?;

        let steps_run = state.steps_taken - first_step_index;
        match outcome {
            RunOutcome::Completed => info!(
                "Run completed: {} steps in {:.2}s ({:.1} steps/s), {} records written",
                steps_run,
                elapsed.as_secs_f64(),
                steps_run as f64 / elapsed.as_secs_f64().max(1e-9),
                report.written
            ),
            RunOutcome::Interrupted { after_step } => info!(
                "Run interrupted after step {}: {} records written",
                after_step.map_or_else(|| "none".to_string(), |s| s.to_string()),
                report.written
            ),
        }

        Ok(RunSummary {
            seed: state.seed,
            outcome,
            first_step_index,
            steps_run,
            records_written: report.written,
            records_dropped: report.dropped,
            frames_rendered: self.frames_rendered,
            frames_skipped: self.frames_skipped,
            headless: headless || !still_visible,
            elapsed_secs: elapsed.as_secs_f64(),
            final_stats: state.stats.clone(),
            final_state: state,
        })
    }

    /// Step until done, interrupted or broken
    fn drive(
        &mut self,
        mut state: SimulationState,
        steps: u64,
    ) -> Result<(SimulationState, RunOutcome), SimError> {
        let config = self.config;
        let first_index = state.steps_taken;
        let end = first_index + steps;
        let last_index = end.saturating_sub(1);
        let mut last_persisted = None;

        info!(
            "Run started: seed {}, {} steps of {}s from step {}",
            state.seed, steps, config.simulation.step_secs, first_index
        );

        while state.steps_taken < end {
            if self.interrupt.is_triggered() {
                let after_step = state.steps_taken.checked_sub(1).filter(|&k| k >= first_index);
                if let Some(k) = after_step {
                    if last_persisted != Some(k) {
                        let record = ResultRecord::new(k, StateSnapshot::capture(&state, config));
                        self.sink.write_final(record)?;
                    }
                }
                warn!("Interrupt received, stopping");
                return Ok((state, RunOutcome::Interrupted { after_step }));
            }

            let step_index = state.steps_taken;
            let next = state
                .step(config)
                .map_err(|source| SimError::InvalidState { step_index, source })?;
            next.validate(config)
                .map_err(|source| SimError::InvalidState {
                    step_index: step_index + 1,
                    source,
                })?;
            state = next;

            let snapshot = StateSnapshot::capture(&state, config);

            if config.output.persist_cadence.is_due(step_index, last_index) {
                let record = ResultRecord::new(step_index, snapshot.clone());
                let accepted = if step_index == last_index {
                    self.sink.write_final(record)?;
                    true
                } else {
                    self.sink.write(record)?
                };
                if accepted {
                    last_persisted = Some(step_index);
                }
            }

            if config
                .visualization
                .render_cadence
                .is_due(step_index, last_index)
            {
                self.render(&snapshot);
            }

            if let Some(manager) = self.checkpoints.as_mut() {
                if let Err(e) = manager.maybe_save(config, &state) {
                    warn!("Checkpoint at step {} failed: {}", state.steps_taken, e);
                }
            }

            let interval = config.logging.stats_interval;
            if interval > 0 && state.steps_taken % interval == 0 {
                info!("{}", state.stats.summary());
            }
        }

        Ok((state, RunOutcome::Completed))
    }

    /// Returns whether a visualizer is attached and open
    fn open_visualizer(&mut self) -> bool {
        let Some(visualizer) = self.visualizer.as_deref_mut() else {
            return false;
        };
        match visualizer.open() {
            Ok(()) => {
                info!("Visualization: {}", visualizer.name());
                true
            }
            Err(e) => {
                warn!("Visualization unavailable, running headless: {}", e);
                self.visualizer = None;
                false
            }
        }
    }

    fn render(&mut self, snapshot: &StateSnapshot) {
        let Some(visualizer) = self.visualizer.as_deref_mut() else {
            return;
        };
        if !self.pacer.admit() {
            self.frames_skipped += 1;
            return;
        }

        let started = Instant::now();
        match visualizer.render(snapshot) {
            Ok(()) => {
                self.frames_rendered += 1;
                self.pacer.record(started.elapsed());
            }
            Err(e) => {
                warn!(
                    "Visualizer '{}' failed, continuing headless: {}",
                    visualizer.name(),
                    e
                );
                if let Err(e) = visualizer.close() {
                    warn!("Failed to close visualizer: {}", e);
                }
                self.visualizer = None;
            }
        }
    }

    /// Returns whether a visualizer was still attached
    fn close_visualizer(&mut self) -> bool {
        match self.visualizer.take() {
            Some(visualizer) => {
                if let Err(e) = visualizer.close() {
                    warn!("Failed to close visualizer: {}", e);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::SinkReport;
    use crate::visual::VisualError;

    #[derive(Default)]
    struct MemorySink {
        records: Vec<ResultRecord>,
        finals: usize,
        closes: usize,
        /// Discard every non-final record, like a full drop queue
        refuse_intermediate: bool,
    }

    impl RecordSink for MemorySink {
        fn write(&mut self, record: ResultRecord) -> Result<bool, ResultsError> {
            if self.refuse_intermediate {
                return Ok(false);
            }
            self.records.push(record);
            Ok(true)
        }

        fn write_final(&mut self, record: ResultRecord) -> Result<(), ResultsError> {
            self.finals += 1;
            self.records.push(record);
            Ok(())
        }

        fn close(&mut self) -> Result<SinkReport, ResultsError> {
            self.closes += 1;
            Ok(SinkReport {
                written: self.records.len() as u64,
                dropped: 0,
            })
        }
    }

    struct FailingVisualizer {
        fail_after: usize,
        renders: usize,
        closed: bool,
    }

    impl Visualizer for FailingVisualizer {
        fn name(&self) -> &str {
            "failing"
        }

        fn open(&mut self) -> Result<(), VisualError> {
            Ok(())
        }

        fn render(&mut self, _snapshot: &StateSnapshot) -> Result<(), VisualError> {
            if self.renders == self.fail_after {
                return Err(VisualError::Disconnected);
            }
            self.renders += 1;
            Ok(())
        }

        fn close(&mut self) -> Result<(), VisualError> {
            self.closed = true;
            Ok(())
        }
    }

    fn config(steps: u64) -> Config {
        let mut config = Config::default();
        config.simulation.steps = steps;
        config.simulation.seed = Some(42);
        config.visualization.frame_budget_ms = 0;
        config
    }

    #[test]
    fn test_cadence_every_three_keeps_final() {
        let mut config = config(10);
        config.output.persist_cadence = crate::config::Cadence::Every(3);
        let mut sink = MemorySink::default();

        let summary = SimulationLoop::new(&config, &mut sink).run().unwrap();

        let indices: Vec<u64> = sink.records.iter().map(|r| r.step_index).collect();
        assert_eq!(indices, vec![2, 5, 8, 9]);
        assert_eq!(sink.finals, 1);
        assert_eq!(sink.closes, 1);
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert!(summary.headless);
    }

    #[test]
    fn test_render_failure_goes_headless() {
        let config = config(6);
        let mut sink = MemorySink::default();
        let mut visual = FailingVisualizer {
            fail_after: 2,
            renders: 0,
            closed: false,
        };

        let summary = SimulationLoop::new(&config, &mut sink)
            .with_visualizer(&mut visual)
            .run()
            .unwrap();

        assert_eq!(sink.records.len(), 6);
        assert_eq!(summary.frames_rendered, 2);
        assert!(summary.headless);
        assert!(visual.closed);
    }

    #[test]
    fn test_pre_triggered_interrupt_runs_nothing() {
        let config = config(5);
        let mut sink = MemorySink::default();
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let summary = SimulationLoop::new(&config, &mut sink)
            .with_interrupt(interrupt)
            .run()
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Interrupted { after_step: None });
        assert!(sink.records.is_empty());
        assert_eq!(sink.closes, 1);
    }

    #[test]
    fn test_resume_continues_numbering() {
        let config = config(4);
        let mut first = MemorySink::default();
        let summary = SimulationLoop::new(&config, &mut first).run().unwrap();

        let mut second = MemorySink::default();
        let resumed = SimulationLoop::new(&config, &mut second)
            .resume(summary.final_state, 3)
            .unwrap();

        let indices: Vec<u64> = second.records.iter().map(|r| r.step_index).collect();
        assert_eq!(indices, vec![4, 5, 6]);
        assert_eq!(resumed.first_step_index, 4);
        assert_eq!(resumed.final_state.steps_taken, 7);
    }

    #[test]
    fn test_invalid_state_halts_and_closes() {
        let config = config(3);
        let mut sink = MemorySink::default();
        let mut state = SimulationState::initialize(&config, 1).unwrap();
        state.time_secs += 5;

        let result = SimulationLoop::new(&config, &mut sink).resume(state, 3);

        assert!(matches!(
            result,
            Err(SimError::InvalidState { step_index: 0, .. })
        ));
        assert!(sink.records.is_empty());
        assert_eq!(sink.closes, 1);
    }

    struct StopAfter {
        steps_taken: u64,
        interrupt: Interrupt,
    }

    impl Visualizer for StopAfter {
        fn name(&self) -> &str {
            "stop-after"
        }

        fn open(&mut self) -> Result<(), VisualError> {
            Ok(())
        }

        fn render(&mut self, snapshot: &StateSnapshot) -> Result<(), VisualError> {
            if snapshot.steps_taken == self.steps_taken {
                self.interrupt.trigger();
            }
            Ok(())
        }

        fn close(&mut self) -> Result<(), VisualError> {
            Ok(())
        }
    }

    #[test]
    fn test_interrupt_writes_step_the_sink_discarded() {
        let config = config(10);
        let mut sink = MemorySink {
            refuse_intermediate: true,
            ..Default::default()
        };
        let interrupt = Interrupt::new();
        let mut visual = StopAfter {
            steps_taken: 4,
            interrupt: interrupt.clone(),
        };

        let summary = SimulationLoop::new(&config, &mut sink)
            .with_visualizer(&mut visual)
            .with_interrupt(interrupt)
            .run()
            .unwrap();

        assert_eq!(summary.outcome, RunOutcome::Interrupted { after_step: Some(3) });
        let indices: Vec<u64> = sink.records.iter().map(|r| r.step_index).collect();
        assert_eq!(indices, vec![3]);
        assert_eq!(sink.finals, 1);
    }

    #[test]
    fn test_frame_pacer_skips_after_slow_frame() {
        let mut pacer = FramePacer::new(10);
        assert!(pacer.admit());
        pacer.record(Duration::from_millis(35));
        // 25ms over budget: three frames skipped
        assert!(!pacer.admit());
        assert!(!pacer.admit());
        assert!(!pacer.admit());
        assert!(pacer.admit());

        let mut unlimited = FramePacer::new(0);
        unlimited.record(Duration::from_secs(5));
        assert!(unlimited.admit());
    }
}

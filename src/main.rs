//! dtnsim - CLI Entry Point
//!
//! Mars-Earth delay-tolerant networking simulator.

use clap::{Parser, Subcommand, ValueEnum};
use crossterm::tty::IsTty;
use dtnsim::analysis::{delivery_series, RunReport, SUMMARY_FILE};
use dtnsim::checkpoint::{Checkpoint, CheckpointManager};
use dtnsim::config::{PersistenceMode, VisualBackend};
use dtnsim::logging::{self, RunLog};
use dtnsim::results::{self, BackgroundWriter, RecordSink, ResultsWriter, CONFIG_FILE, LOG_FILE};
use dtnsim::routing::Router;
use dtnsim::visual::{TerminalVisualizer, Visualizer};
use dtnsim::{Config, Interrupt, RunOutcome, RunSummary, SimError, SimulationLoop, SimulationState};
use log::{error, info, warn, Level, LevelFilter};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

type CliResult = Result<ExitCode, Box<dyn Error>>;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(name = "dtnsim")]
#[command(version)]
#[command(about = "Delay-tolerant networking simulator for a Mars-Earth relay network")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum VisualArg {
    Gui,
    Terminal,
    None,
}

impl From<VisualArg> for VisualBackend {
    fn from(arg: VisualArg) -> Self {
        match arg {
            VisualArg::Gui => VisualBackend::Gui,
            VisualArg::Terminal => VisualBackend::Terminal,
            VisualArg::None => VisualBackend::Headless,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a new simulation
    Run {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Number of steps to simulate
        #[arg(short, long)]
        steps: Option<u64>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Root directory for run results
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Live visualization backend
        #[arg(long, value_enum)]
        visual: Option<VisualArg>,

        /// Quiet mode (no console output)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Continue a run from its checkpoint
    Resume {
        /// Checkpoint file to resume from
        #[arg(short, long)]
        checkpoint: PathBuf,

        /// Number of additional steps
        #[arg(short, long)]
        steps: Option<u64>,

        /// Root directory for run results
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Live visualization backend
        #[arg(long, value_enum)]
        visual: Option<VisualArg>,

        /// Quiet mode (no console output)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Generate default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Analyze a finished run directory
    Inspect {
        /// Run directory
        run_dir: PathBuf,
    },

    /// Rank alternative routes between two nodes
    Routes {
        /// Configuration file (YAML)
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Maximum number of routes to list
        #[arg(long, default_value = "5")]
        max: usize,
    },
}

/// Where a run starts from
enum Start {
    Fresh,
    Resume { state: SimulationState, steps: u64 },
}

fn main() -> CliResult {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            steps,
            seed,
            output,
            visual,
            quiet,
        } => {
            let mut config = match load_config(&config, quiet) {
                Ok(config) => config,
                Err(e) => {
                    init_logging_default(quiet);
                    return Err(fatal(e));
                }
            };
            if let Some(steps) = steps {
                config.simulation.steps = steps;
            }
            if seed.is_some() {
                config.simulation.seed = seed;
            }
            apply_overrides(&mut config, output, visual);

            let log = init_logging(&config, quiet);
            config.validate().map_err(fatal)?;
            let seed = config.simulation.seed.unwrap_or_else(rand::random);
            config.simulation.seed = Some(seed);
            execute(&config, Start::Fresh, &log, quiet)
        }

        Commands::Resume {
            checkpoint,
            steps,
            output,
            visual,
            quiet,
        } => {
            let loaded = match Checkpoint::load(&checkpoint) {
                Ok(loaded) => loaded,
                Err(e) => {
                    init_logging_default(quiet);
                    return Err(fatal(e));
                }
            };
            let mut config = loaded.config;
            apply_overrides(&mut config, output, visual);

            let log = init_logging(&config, quiet);
            config.validate().map_err(fatal)?;
            info!(
                "Resuming at step {} from {}",
                loaded.state.steps_taken,
                checkpoint.display()
            );
            let steps = steps.unwrap_or(config.simulation.steps);
            config.simulation.seed = Some(loaded.state.seed);
            execute(
                &config,
                Start::Resume {
                    state: loaded.state,
                    steps,
                },
                &log,
                quiet,
            )
        }

        Commands::Init { output } => generate_config(output),

        Commands::Inspect { run_dir } => inspect_run(run_dir),

        Commands::Routes {
            config,
            from,
            to,
            max,
        } => show_routes(config, from, to, max),
    }
}

fn load_config(path: &Path, quiet: bool) -> Result<Config, Box<dyn Error>> {
    if path.exists() {
        if !quiet {
            println!("Loading config from: {:?}", path);
        }
        Ok(Config::from_file(path)?)
    } else {
        if !quiet {
            println!("Using default configuration");
        }
        Ok(Config::default())
    }
}

fn apply_overrides(config: &mut Config, output: Option<PathBuf>, visual: Option<VisualArg>) {
    if let Some(output) = output {
        config.output.results_dir = output;
    }
    if let Some(visual) = visual {
        config.visualization.backend = visual.into();
    }
}

/// Console output is off in quiet mode and while frames own the terminal.
/// An unusable configured level falls back to `info` so the error naming it
/// still gets logged.
fn init_logging(config: &Config, quiet: bool) -> RunLog {
    let terminal_frames = config.visualization.backend == VisualBackend::Terminal
        && std::io::stdout().is_tty();
    let level = match config.logging.log_level.parse::<LevelFilter>() {
        Ok(_) => config.logging.log_level.as_str(),
        Err(_) => DEFAULT_LOG_LEVEL,
    };
    logging::init(level, !quiet && !terminal_frames)
}

/// Logging for failures that happen before a config is available
fn init_logging_default(quiet: bool) -> RunLog {
    logging::init(DEFAULT_LOG_LEVEL, !quiet)
}

/// Log an error that ends the process, then hand it back for `main`
fn fatal<E: Into<Box<dyn Error>>>(e: E) -> Box<dyn Error> {
    let e = e.into();
    error!("{}", e);
    e
}

fn execute(config: &Config, start: Start, log: &RunLog, quiet: bool) -> CliResult {
    let seed = config.simulation.seed.unwrap_or_default();
    let run_dir = results::create_run_dir(&config.output.results_dir, &results::run_id(seed))
        .map_err(fatal)?;
    let run_name = run_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Err(e) = log.attach(run_dir.join(LOG_FILE)) {
        warn!("Cannot write run log: {}", e);
    }
    info!("Results directory: {}", run_dir.display());

    let finished = run_in_dir(config, start, &run_dir);
    log.detach();
    let summary = finished?;

    let report = RunReport::from_summary(&run_name, &summary);
    if let Err(e) = report.save(&run_dir) {
        warn!("Failed to save run summary: {}", e);
    }

    if !quiet {
        println!();
        print!("{}", report.render_text());
        println!();
        if let RunOutcome::Interrupted { after_step } = summary.outcome {
            match after_step {
                Some(step) => println!("Interrupted after step {}", step),
                None => println!("Interrupted before the first step"),
            }
        }
        println!("Results: {}", run_dir.display());
    }

    Ok(ExitCode::SUCCESS)
}

/// Everything that happens while the run log is attached. Errors are logged
/// here; the loop logs its own.
fn run_in_dir(config: &Config, start: Start, run_dir: &Path) -> Result<RunSummary, Box<dyn Error>> {
    config.save(run_dir.join(CONFIG_FILE)).map_err(fatal)?;

    let writer = ResultsWriter::open(run_dir).map_err(fatal)?;
    let mut sink: Box<dyn RecordSink + Send> = match config.output.persistence {
        PersistenceMode::Sync => Box::new(writer),
        PersistenceMode::Background => Box::new(
            BackgroundWriter::spawn(writer, config.output.queue_capacity, config.output.overflow)
                .map_err(fatal)?,
        ),
    };

    let interrupt = Interrupt::new();
    if let Err(e) = interrupt.install_ctrlc() {
        warn!("Ctrl+C handler not installed: {}", e);
    }
    let checkpoints = CheckpointManager::in_run_dir(run_dir, config.output.checkpoint_interval);

    Ok(drive(config, start, sink.as_mut(), interrupt, checkpoints)?)
}

fn drive(
    config: &Config,
    start: Start,
    sink: &mut (dyn RecordSink + Send),
    interrupt: Interrupt,
    checkpoints: CheckpointManager,
) -> Result<RunSummary, SimError> {
    match config.visualization.backend {
        VisualBackend::Headless => run_loop(config, start, sink, None, interrupt, checkpoints),
        VisualBackend::Terminal => {
            let mut terminal = TerminalVisualizer::stdout();
            run_loop(
                config,
                start,
                sink,
                Some(&mut terminal),
                interrupt,
                checkpoints,
            )
        }
        VisualBackend::Gui => run_with_gui(config, start, sink, interrupt, checkpoints),
    }
}

fn run_loop(
    config: &Config,
    start: Start,
    sink: &mut dyn RecordSink,
    visualizer: Option<&mut dyn Visualizer>,
    interrupt: Interrupt,
    checkpoints: CheckpointManager,
) -> Result<RunSummary, SimError> {
    let mut simulation = SimulationLoop::new(config, sink)
        .with_interrupt(interrupt)
        .with_checkpoints(checkpoints);
    if let Some(visualizer) = visualizer {
        simulation = simulation.with_visualizer(visualizer);
    }

    match start {
        Start::Fresh => simulation.run(),
        Start::Resume { state, steps } => simulation.resume(state, steps),
    }
}

/// The window owns the main thread; the loop runs on a scoped worker
#[cfg(feature = "gui")]
fn run_with_gui(
    config: &Config,
    start: Start,
    sink: &mut (dyn RecordSink + Send),
    interrupt: Interrupt,
    checkpoints: CheckpointManager,
) -> Result<RunSummary, SimError> {
    use dtnsim::gui::{self, GuiVisualizer};

    if !gui::display_available() {
        warn!("Visualization unavailable, running headless: no display");
        return run_loop(config, start, sink, None, interrupt, checkpoints);
    }

    let (mut visual, frames) = GuiVisualizer::new(config.visualization.channel_capacity);
    let window_interrupt = interrupt.clone();

    std::thread::scope(|scope| {
        let simulation = scope.spawn(move || {
            run_loop(
                config,
                start,
                sink,
                Some(&mut visual as &mut dyn Visualizer),
                interrupt,
                checkpoints,
            )
        });

        if let Err(e) = gui::open_window(frames, window_interrupt) {
            warn!("GUI window failed: {}", e);
        }

        simulation
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    })
}

#[cfg(not(feature = "gui"))]
fn run_with_gui(
    config: &Config,
    start: Start,
    sink: &mut (dyn RecordSink + Send),
    interrupt: Interrupt,
    checkpoints: CheckpointManager,
) -> Result<RunSummary, SimError> {
    warn!("Visualization unavailable, running headless: built without the `gui` feature");
    run_loop(config, start, sink, None, interrupt, checkpoints)
}

fn generate_config(output: PathBuf) -> CliResult {
    let config = Config::default();
    config.save(&output)?;
    println!("Configuration saved to: {:?}", output);
    Ok(ExitCode::SUCCESS)
}

fn inspect_run(run_dir: PathBuf) -> CliResult {
    println!("=== Run Analysis ===");
    println!("Directory: {}", run_dir.display());
    println!();

    let records = results::read_records(&run_dir)?;
    let run_name = run_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let report = if run_dir.join(SUMMARY_FILE).exists() {
        Some(RunReport::load(&run_dir)?)
    } else {
        records.last().map(|last| {
            let seed = Config::from_file(run_dir.join(CONFIG_FILE))
                .ok()
                .and_then(|c| c.simulation.seed)
                .unwrap_or_default();
            RunReport::from_stats(&run_name, seed, &last.snapshot.stats)
        })
    };

    match (records.first(), records.last()) {
        (Some(first), Some(last)) => {
            let span = last.step_index - first.step_index + 1;
            println!(
                "Records: {} (steps {}..={}, {} not persisted)",
                records.len(),
                first.step_index,
                last.step_index,
                span - records.len() as u64
            );
        }
        _ => println!("Records: none"),
    }

    let series = delivery_series(&records);
    if !series.is_empty() {
        println!("Delivery ratio:");
        let stride = (series.len() / 10).max(1);
        for (step, ratio) in series.iter().step_by(stride) {
            println!("  step {:>8}  {:>5.1}%", step, ratio * 100.0);
        }
    }

    let log_path = run_dir.join(LOG_FILE);
    if log_path.exists() {
        let entries = logging::read_entries(&log_path)?;
        let problems: Vec<_> = entries
            .iter()
            .filter(|e| e.level <= Level::Warn)
            .collect();
        println!(
            "Run log: {} entries, {} warnings/errors",
            entries.len(),
            problems.len()
        );
        for entry in problems {
            println!("  {} {} {}", entry.timestamp, entry.level, entry.message);
        }
    }
    println!();

    match report {
        Some(report) => print!("{}", report.render_text()),
        None => println!("No results found"),
    }

    Ok(ExitCode::SUCCESS)
}

fn show_routes(config_path: PathBuf, from: String, to: String, max: usize) -> CliResult {
    let config = load_config(&config_path, true)?;
    let topology = &config.topology;

    let source = topology
        .node_index(&from)
        .ok_or_else(|| format!("unknown node '{}'", from))?;
    let destination = topology
        .node_index(&to)
        .ok_or_else(|| format!("unknown node '{}'", to))?;

    let endpoints = topology.endpoints()?;
    let router = Router::full(topology, &endpoints);
    let routes = router.alternative_routes(source, destination, max);

    if routes.is_empty() {
        println!("No route from {} to {}", from, to);
        return Ok(ExitCode::FAILURE);
    }

    println!("Routes from {} to {}:", from, to);
    for (rank, route) in routes.iter().enumerate() {
        println!("{}. {}", rank + 1, route.describe(topology));
        println!(
            "   hops {}  delay {:.2}s  reliability {:.1}%  score {:.2}",
            route.hop_count(),
            route.delay_secs,
            route.reliability * 100.0,
            route.score()
        );
    }

    Ok(ExitCode::SUCCESS)
}

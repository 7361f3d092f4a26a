//! Command-line interface for the Strider model checker.

use clap::{Parser, Subcommand};
use miette::{Diagnostic, NamedSource, SourceSpan};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strider_mc::{
    run, BoundReason, CheckConfig, Explorer, LocationCoverage, ProgressCounters,
    RandomDelayPolicy, RunStatus, SimulateOutcome,
};
use strider_model::{parse_model, Model, ModelError};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// CLI error with source context for pretty printing.
#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error("failed to read file: {message}")]
    IoError { message: String },

    #[error("model error: {message}")]
    #[diagnostic(code(strider::model_error))]
    ModelError {
        message: String,
        #[source_code]
        src: NamedSource<Arc<String>>,
        #[label("here")]
        span: SourceSpan,
    },

    #[error("check error: {message}")]
    CheckError { message: String },

    #[error("trace replay failed: {message}")]
    ReplayError { message: String },

    #[error("{message}")]
    Other { message: String },
}

impl CliError {
    fn from_model_error(e: ModelError, source: Arc<String>, filename: &str) -> Self {
        let span = match &e {
            ModelError::Malformed { line, column, .. } => {
                let offset = offset_at(&source, *line, *column);
                (offset, 1).into()
            }
            // Validation errors have no source position; point at the start.
            _ => (0, 0).into(),
        };
        CliError::ModelError {
            message: e.to_string(),
            src: NamedSource::new(filename, source),
            span,
        }
    }
}

/// Byte offset of a 1-based (line, column) position.
fn offset_at(source: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, text) in source.lines().enumerate() {
        if i + 1 == line {
            return offset + column.saturating_sub(1).min(text.len());
        }
        offset += text.len() + 1;
    }
    source.len()
}

type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "strider", version)]
#[command(about = "Strider finite-state model checker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a model file and show its structure
    Info {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Exhaustively check a model's assertions and deadlock freedom
    Check {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum number of states to explore (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_states: usize,

        /// Wall-clock budget in seconds (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_time: u64,

        /// Disable deadlock detection
        #[arg(long)]
        no_deadlock: bool,

        /// Randomized delaying schedule: delay budget (requires --seed for
        /// reproducibility across runs)
        #[arg(long, value_name = "BUDGET")]
        delays: Option<u64>,

        /// Seed for the delaying schedule
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Track and report control-location coverage
        #[arg(long)]
        coverage: bool,

        /// Re-execute the counterexample trace and confirm it reproduces
        #[arg(long)]
        verify_trace: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Random walk through the model's transitions
    Simulate {
        /// Input file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum number of steps
        #[arg(long, default_value = "1000")]
        steps: usize,

        /// Walk seed
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    let cli = Cli::parse();

    let filter = if matches!(
        &cli.command,
        Commands::Info { verbose: true, .. }
            | Commands::Check { verbose: true, .. }
            | Commands::Simulate { verbose: true, .. }
    ) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let result = match cli.command {
        Commands::Info { file, verbose } => cmd_info(&file, verbose),
        Commands::Check {
            file,
            max_states,
            max_time,
            no_deadlock,
            delays,
            seed,
            coverage,
            verify_trace,
            verbose,
        } => cmd_check(
            &file,
            max_states,
            max_time,
            !no_deadlock,
            delays,
            seed,
            coverage,
            verify_trace,
            verbose,
        ),
        Commands::Simulate {
            file,
            steps,
            seed,
            verbose: _,
        } => cmd_simulate(&file, steps, seed),
    };

    if let Err(e) = result {
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(1);
    }
}

fn load(file: &PathBuf) -> CliResult<Model> {
    let filename = file.display().to_string();
    let source = Arc::new(fs::read_to_string(file).map_err(|e| CliError::IoError {
        message: e.to_string(),
    })?);
    parse_model(&source).map_err(|e| CliError::from_model_error(e, source.clone(), &filename))
}

fn cmd_info(file: &PathBuf, verbose: bool) -> CliResult<()> {
    let model = load(file)?;

    if verbose {
        println!("{:#?}", model);
    } else {
        println!("model {}", model.name);
        for g in &model.globals {
            println!("  global {} = {}", g.name, g.init);
        }
        for tmpl in &model.templates {
            println!(
                "  template {} ({} locations, {} commands)",
                tmpl.name,
                tmpl.locations,
                tmpl.commands.len()
            );
            for cmd in &tmpl.commands {
                println!("    command {} @ {}", cmd.label, cmd.at);
            }
        }
        let instances: Vec<&str> = model
            .instances
            .iter()
            .map(|&t| model.templates[t].name.as_str())
            .collect();
        println!("  instances: [{}]", instances.join(", "));
        for a in &model.assertions {
            println!("  assertion {}", a.name);
        }
    }

    println!("load: ok");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_check(
    file: &PathBuf,
    max_states: usize,
    max_time: u64,
    report_deadlock: bool,
    delays: Option<u64>,
    seed: u64,
    coverage: bool,
    verify_trace: bool,
    verbose: bool,
) -> CliResult<()> {
    let model = load(file)?;

    let config = CheckConfig {
        max_states,
        max_time: (max_time > 0).then(|| Duration::from_secs(max_time)),
        report_deadlock,
        policy: delays.map(|budget| {
            Box::new(RandomDelayPolicy::new(seed, budget)) as Box<dyn strider_mc::SchedulingPolicy>
        }),
        coverage: coverage.then(|| Box::new(LocationCoverage::new()) as Box<dyn strider_mc::CoverageTracker>),
        progress: verbose.then(|| Arc::new(ProgressCounters::new())),
    };

    let progress = config.progress.clone();
    let progress_guard = progress.map(spawn_progress_printer);

    info!("checking {}...", model.name);
    let start = Instant::now();

    let report = run(model.clone(), config).map_err(|e| CliError::CheckError {
        message: e.to_string(),
    })?;

    let elapsed = start.elapsed();
    drop(progress_guard);

    let mut exit = 0;
    match &report.status {
        RunStatus::Exhausted => {
            println!();
            println!("Result: OK");
            println!("  States explored: {}", report.states_explored);
            println!("  Max depth: {}", report.max_depth);
            println!("  Back edges: {}", report.back_edges);
            println!("  Time: {:.2}s", elapsed.as_secs_f64());
            println!(
                "  States/sec: {:.0}",
                report.states_explored as f64 / elapsed.as_secs_f64()
            );
        }
        RunStatus::Violated { assertion } => {
            println!();
            println!("Result: ASSERTION VIOLATION");
            println!("  Assertion: {}", assertion);
            if let Some(trace) = &report.trace {
                println!("  Trace ({} steps):", trace.len());
                print!("{}", trace);
            }
            exit = 1;
        }
        RunStatus::Deadlocked => {
            println!();
            println!("Result: DEADLOCK");
            if let Some(trace) = &report.trace {
                println!("  Trace ({} steps):", trace.len());
                print!("{}", trace);
            }
            exit = 1;
        }
        RunStatus::Bounded { reason } => {
            println!();
            println!(
                "Result: BOUND REACHED ({})",
                match reason {
                    BoundReason::States => "state limit",
                    BoundReason::Time => "time limit",
                    BoundReason::Cancelled => "cancelled",
                }
            );
            println!("  States explored: {}", report.states_explored);
            println!("  Max depth: {}", report.max_depth);
            println!("  Time: {:.2}s", elapsed.as_secs_f64());
            exit = 2;
        }
    }

    if report.property_errors > 0 {
        println!(
            "  Warning: {} branches pruned by assertion evaluation errors",
            report.property_errors
        );
    }
    if let Some(summary) = &report.coverage {
        println!("  Coverage: {}", summary);
    }

    if verify_trace {
        if let Some(trace) = &report.trace {
            trace.replay(&model).map_err(|e| CliError::ReplayError {
                message: e.to_string(),
            })?;
            println!("  Trace replay: ok");
        }
    }

    if exit != 0 {
        std::process::exit(exit);
    }
    Ok(())
}

/// Print progress on a timer until dropped.
fn spawn_progress_printer(progress: Arc<ProgressCounters>) -> ProgressPrinter {
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    let handle = std::thread::spawn(move || {
        while !stop_clone.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_secs(2));
            if stop_clone.load(Ordering::Relaxed) {
                break;
            }
            info!(
                states = progress.states.load(Ordering::Relaxed),
                depth = progress.depth.load(Ordering::Relaxed),
                frontier = progress.frontier.load(Ordering::Relaxed),
                "progress"
            );
        }
    });
    ProgressPrinter {
        stop,
        handle: Some(handle),
    }
}

struct ProgressPrinter {
    stop: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Drop for ProgressPrinter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn cmd_simulate(file: &PathBuf, steps: usize, seed: u64) -> CliResult<()> {
    let model = load(file)?;

    let mut explorer = Explorer::new(model, CheckConfig::default());
    let outcome = explorer
        .simulate(steps, seed)
        .map_err(|e| CliError::CheckError {
            message: e.to_string(),
        })?;

    match outcome {
        SimulateOutcome::Ok { steps, trace } => {
            println!("Result: OK ({} steps)", steps);
            print!("{}", trace);
        }
        SimulateOutcome::Violated { assertion, trace } => {
            println!("Result: ASSERTION VIOLATION");
            println!("  Assertion: {}", assertion);
            println!("  Trace ({} steps):", trace.len());
            print!("{}", trace);
            std::process::exit(1);
        }
        SimulateOutcome::Deadlocked { trace } => {
            println!("Result: DEADLOCK after {} steps", trace.len());
            print!("{}", trace);
            std::process::exit(1);
        }
    }

    Ok(())
}

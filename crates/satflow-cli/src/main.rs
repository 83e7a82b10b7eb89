//! CLI binary for planning, validating and running satflow workflows.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use satflow_pipeline::{
    validate, EngineConfig, Executor, RunSummary, Severity, TaskGraph, Workflow,
};

#[derive(Parser)]
#[command(name = "satflow", version, about = "Checkpoint-aware workflow runner for satellite-repeat pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute a workflow
    Run {
        /// Path to the workflow .json file
        workflow: PathBuf,

        /// Samples to build (default: all)
        targets: Vec<String>,

        #[command(flatten)]
        engine: EngineArgs,

        /// Stop scheduling new tasks after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Keep every task's scratch directory
        #[arg(long)]
        keep_tmp: bool,

        /// Never delete outputs flagged temp
        #[arg(long)]
        keep_temp_outputs: bool,

        /// Print the planned tasks without running them
        #[arg(long)]
        dry_run: bool,

        /// Write the run summary as JSON to this file
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to the workflow .json file
        workflow: PathBuf,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Print the task graph a run would start with
    Plan {
        /// Path to the workflow .json file
        workflow: PathBuf,

        /// Samples to plan for (default: all)
        targets: Vec<String>,

        #[command(flatten)]
        engine: EngineArgs,
    },
}

/// Overrides for the workflow file's `engine` section.
#[derive(Args, Clone, Default)]
struct EngineArgs {
    /// Total thread budget
    #[arg(short, long)]
    cores: Option<u32>,

    /// Maximum concurrently running tasks
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Total memory budget in MiB
    #[arg(long)]
    mem_mb: Option<u64>,

    /// Working directory all task paths are relative to
    #[arg(short, long)]
    workdir: Option<PathBuf>,
}

impl EngineArgs {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(cores) = self.cores {
            config.cores = cores;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = Some(jobs);
        }
        if let Some(mem) = self.mem_mb {
            config.mem_mb = Some(mem);
        }
        if let Some(dir) = &self.workdir {
            config.workdir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            workflow,
            targets,
            engine,
            fail_fast,
            keep_tmp,
            keep_temp_outputs,
            dry_run,
            summary,
        } => {
            let mut wf = load_workflow(&workflow, &engine)?;
            if fail_fast {
                wf.engine.keep_going = false;
            }
            wf.engine.keep_tmp |= keep_tmp;
            wf.engine.keep_temp_outputs |= keep_temp_outputs;
            let ok = cmd_run(&wf, &targets, dry_run, summary.as_deref()).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Validate { workflow, engine } => {
            let wf = load_workflow(&workflow, &engine)?;
            if !cmd_validate(&wf) {
                std::process::exit(1);
            }
        }
        Commands::Plan {
            workflow,
            targets,
            engine,
        } => {
            let wf = load_workflow(&workflow, &engine)?;
            let graph = plan(&wf, &targets)?;
            print_plan(&graph)?;
        }
    }

    Ok(())
}

fn load_workflow(path: &Path, overrides: &EngineArgs) -> anyhow::Result<Workflow> {
    let mut wf = Workflow::load(path)
        .with_context(|| format!("loading workflow {}", path.display()))?;
    overrides.apply(&mut wf.engine);
    Ok(wf)
}

fn plan(wf: &Workflow, selection: &[String]) -> anyhow::Result<TaskGraph> {
    let targets = wf.select_targets(selection)?;
    if targets.is_empty() {
        anyhow::bail!("no targets selected; declare \"targets\" in the workflow");
    }
    let graph = wf.planner().plan(&targets).context("planning failed")?;
    Ok(graph)
}

fn cmd_validate(wf: &Workflow) -> bool {
    let diagnostics = validate(wf, &wf.engine);
    if diagnostics.is_empty() {
        println!("Workflow is valid ({} rules)", wf.registry.len());
        return true;
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.lint, diag.message);
        if let Some(fix) = &diag.fix {
            println!("        fix: {fix}");
        }
    }
    !has_error
}

fn print_plan(graph: &TaskGraph) -> anyhow::Result<()> {
    let order = graph.topological_order()?;
    println!("{} tasks", order.len());
    for id in &order {
        let Some(task) = graph.task(id) else { continue };
        let marker = if task.is_checkpoint() { " (checkpoint)" } else { "" };
        println!("  {id}{marker}  [{}]", task.resources);
        for output in task.output_paths() {
            println!("      -> {}", output.display());
        }
        for dep in task.deps() {
            println!("      after {dep}");
        }
    }
    if order.iter().any(|id| graph.task(id).is_some_and(|t| t.is_checkpoint())) {
        println!("Checkpoint tasks may add further tasks once they finish.");
    }
    Ok(())
}

async fn cmd_run(
    wf: &Workflow,
    selection: &[String],
    dry_run: bool,
    summary_path: Option<&Path>,
) -> anyhow::Result<bool> {
    let diagnostics = validate(wf, &wf.engine);
    for diag in diagnostics.iter().filter(|d| d.severity == Severity::Warning) {
        tracing::warn!(lint = %diag.lint, "{}", diag.message);
    }
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        for diag in &errors {
            eprintln!("[ERROR] {}: {}", diag.lint, diag.message);
        }
        anyhow::bail!("workflow has {} validation error(s)", errors.len());
    }

    let mut graph = plan(wf, selection)?;
    println!("Working directory: {}", wf.engine.workdir.display());
    println!("Budget: {} (jobs {})", wf.engine.budget(), wf.engine.max_jobs());

    if dry_run {
        println!("(dry run: nothing is executed)");
        print_plan(&graph)?;
        return Ok(true);
    }
    if graph.is_empty() {
        println!("Nothing to do: all targets exist");
        return Ok(true);
    }

    let executor = Executor::new(wf.planner());
    let mut summary = executor.run(&mut graph).await?;
    for failure in &mut summary.failures {
        if let Some(log) = failure.log_path.take() {
            failure.log_path = Some(full_path(&wf.engine, &log));
        }
    }
    report(&summary);

    if let Some(path) = summary_path {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing summary to {}", path.display()))?;
    }
    Ok(summary.is_success())
}

/// `path` resolved against the workdir and made absolute.
fn full_path(config: &EngineConfig, path: &Path) -> PathBuf {
    let resolved = config.resolve(path);
    std::path::absolute(&resolved).unwrap_or(resolved)
}

fn report(summary: &RunSummary) {
    for failure in &summary.failures {
        eprintln!("\nTask {} failed: {}", failure.task, failure.message);
        if let Some(log) = &failure.log_path {
            eprintln!("  log: {}", log.display());
        }
        if !failure.log_tail.is_empty() {
            eprintln!("  last lines:");
            for line in failure.log_tail.lines() {
                eprintln!("    {line}");
            }
        }
    }

    println!(
        "\nRun finished in {:.1}s (started {})",
        summary.duration.as_secs_f64(),
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!(
        "  succeeded: {}  failed: {}  skipped: {}",
        summary.succeeded, summary.failed, summary.skipped
    );
    for failure in &summary.failures {
        let log = failure
            .log_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into());
        println!("  FAILED {}  log: {}", failure.task, log);
    }
}

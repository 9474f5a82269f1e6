//! cirun - CI trigger gating and test-job execution
//!
//! ## Commands
//!
//! - `gate`: evaluate the head-ref gate
//! - `run`: filter, gate, provision, compile and test a workspace
//! - `env`: show the run environment and discovered tool paths
//! - `cache-key`: show the dependency cache key for a workspace
//! - `schedule`: show the next scheduled tick

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cirun_core::env::discover_tools;
use cirun_core::telemetry;
use cirun_core::{
    compute_cache_key, CiPipeline, ProcessExecutor, RefGate, RunEnvironment, RunOutcome,
    RunReport, TriggerEvent, TriggerFilter, WorkflowConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "cirun")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Gate and run the workspace test job", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Workflow config file (JSON); defaults reproduce the macOS job
    #[arg(short, long, global = true, env = "CIRUN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the gate for a head ref and print `run` or `skip`
    Gate {
        /// Head ref of the triggering event (empty for schedule/push)
        #[arg(long, default_value = "", env = "GITHUB_HEAD_REF")]
        ref_name: String,
    },

    /// Run the job for an event
    Run {
        /// Kind of triggering event
        #[arg(long, value_enum, default_value = "schedule")]
        event: EventArg,

        /// Branch the event refers to (pushed branch, or default branch)
        #[arg(long, default_value = "master")]
        branch: String,

        /// Head ref of the event
        #[arg(long, default_value = "")]
        head_ref: String,

        /// Base ref of a pull request
        #[arg(long, default_value = "")]
        base_ref: String,

        /// Read the event from GITHUB_* variables instead of flags
        #[arg(long)]
        from_github_env: bool,

        /// Workspace path (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Dependency cache directory (overrides config)
        #[arg(long, env = "CIRUN_CACHE_DIR")]
        cache_dir: Option<PathBuf>,

        /// Write the JSON run report here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Print the gate decision and stage plan without executing anything
        #[arg(long)]
        dry_run: bool,

        /// Capture stage output instead of streaming it
        #[arg(short, long)]
        quiet: bool,
    },

    /// Show the run environment, including discovered tool paths
    Env,

    /// Show the dependency cache key for a workspace
    CacheKey {
        /// Workspace path (default: current directory)
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,
    },

    /// Show the next scheduled tick
    Schedule {
        /// Reference time (RFC 3339); defaults to now
        #[arg(long)]
        after: Option<String>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EventArg {
    Schedule,
    Push,
    PullRequest,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_tracing(cli.json, level);

    let config = WorkflowConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load workflow config")?;

    match cli.command {
        Commands::Gate { ref_name } => {
            println!("{}", gate_decision(&config, &ref_name));
            Ok(())
        }
        Commands::Run {
            event,
            branch,
            head_ref,
            base_ref,
            from_github_env,
            workspace,
            cache_dir,
            report,
            dry_run,
            quiet,
        } => {
            let trigger = if from_github_env {
                TriggerEvent::from_github_env().context("Failed to read event from environment")?
            } else {
                build_event(event, branch, head_ref, base_ref)
            };
            let config = match cache_dir {
                Some(dir) => config.with_cache_dir(dir),
                None => config,
            };

            if dry_run {
                cmd_plan(config, &workspace, &trigger);
                Ok(())
            } else {
                cmd_run(config, &workspace, &trigger, report.as_deref(), !quiet).await
            }
        }
        Commands::Env => cmd_env(&config).await,
        Commands::CacheKey { workspace } => cmd_cache_key(&config, &workspace),
        Commands::Schedule { after } => cmd_schedule(&config, after.as_deref()),
    }
}

fn build_event(event: EventArg, branch: String, head_ref: String, base_ref: String) -> TriggerEvent {
    match event {
        EventArg::Schedule => TriggerEvent::schedule(branch),
        EventArg::Push => TriggerEvent::push_with_head_ref(branch, head_ref),
        EventArg::PullRequest => TriggerEvent::pull_request(head_ref, base_ref),
    }
}

fn gate_decision(config: &WorkflowConfig, ref_name: &str) -> &'static str {
    if RefGate::new(&config.gate_prefix).allows(ref_name) {
        "run"
    } else {
        "skip"
    }
}

/// Print what a run would do without executing it
fn cmd_plan(config: WorkflowConfig, workspace: &Path, trigger: &TriggerEvent) {
    let triggered = TriggerFilter::new(&config.push_branch).accepts(trigger);
    let verdict = RefGate::new(&config.gate_prefix).evaluate(trigger);

    println!("Event: {}", trigger);
    println!("Triggered: {}", if triggered { "yes" } else { "no" });
    println!("Gate: {}", verdict.message);
    if !(triggered && verdict.passed) {
        println!("\nNothing would run.");
        return;
    }

    let timeout = config.test_timeout();
    let pipeline = CiPipeline::new(config, workspace);
    println!("\nEnvironment:");
    for (key, value) in &pipeline.config().env {
        println!("  {}={}", key, value);
    }

    println!("\nStages:");
    for (i, stage) in pipeline.plan().iter().enumerate() {
        let budget = stage
            .timeout()
            .map(|t| format!(" (timeout {}m)", t.as_secs() / 60))
            .unwrap_or_default();
        println!("  {}. [{}] {}{}", i + 1, stage.kind.name(), stage.command_line(), budget);
    }
    println!("\nTest budget: {}s", timeout.as_secs());
}

/// Run the job and report the outcome
async fn cmd_run(
    config: WorkflowConfig,
    workspace: &Path,
    trigger: &TriggerEvent,
    report_path: Option<&Path>,
    stream: bool,
) -> Result<()> {
    println!("Running CI job for workspace: {:?}", workspace);
    println!("Event: {}", trigger);
    println!();

    let pipeline = CiPipeline::new(config, workspace).streaming(stream);
    let report = pipeline.run(trigger).await;

    print_report(&report);

    if let Some(path) = report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        info!(path = %path.display(), "wrote run report");
    }

    match (&report.outcome, &report.failure) {
        (RunOutcome::Failed, Some(failure)) if report.timed_out() => {
            anyhow::bail!("CI run timed out: {}", failure.message)
        }
        (RunOutcome::Failed, Some(failure)) => {
            anyhow::bail!("CI run failed ({}): {}", failure.kind, failure.message)
        }
        (RunOutcome::Failed, None) => anyhow::bail!("CI run failed"),
        _ => Ok(()),
    }
}

fn print_report(report: &RunReport) {
    println!("Run ID: {}", report.run_id);
    let status = match report.outcome {
        RunOutcome::Passed => "✓ PASSED",
        RunOutcome::Failed => "✗ FAILED",
        RunOutcome::Skipped => "- SKIPPED",
    };
    println!("Status: {}", status);
    if let Some(gate) = &report.gate {
        println!("Gate: {}", gate.message);
    }
    println!("Duration: {}ms", report.duration_ms);

    if let Some(cache) = &report.cache {
        let key = cache.key.as_ref().map(|k| k.short()).unwrap_or("-");
        println!("Cache: key={} restore={:?} save={:?}", key, cache.restore, cache.save);
    }
    println!();

    for stage in &report.stages {
        let status = if stage.passed() { "✓" } else { "✗" };
        let note = if stage.timed_out { ", timed out" } else { "" };
        println!(
            "  {} {} ({}ms, exit code: {}{})",
            status, stage.stage_name, stage.duration_ms, stage.exit_code, note
        );
    }

    if !report.stages.is_empty() {
        println!();
        println!(
            "Summary: {}/{} stages passed",
            report.passed_count(),
            report.stages.len()
        );
    }
}

/// Show environment configuration and discovered tools
async fn cmd_env(config: &WorkflowConfig) -> Result<()> {
    let env = RunEnvironment::from_config(config);

    println!("Run Environment");
    println!("===============");
    for (key, value) in env.vars() {
        println!("  {}={}", key, value);
    }
    println!();

    match discover_tools(&ProcessExecutor, &config.git_program, &env).await {
        Ok(tools) => {
            for (key, value) in tools.to_env() {
                println!("  {}={}", key, value);
            }
            Ok(())
        }
        Err(e) => {
            println!("  Tool discovery failed: {}", e);
            Err(anyhow::Error::new(e).context("git is required by the test stage"))
        }
    }
}

fn cmd_cache_key(config: &WorkflowConfig, workspace: &Path) -> Result<()> {
    let key = compute_cache_key(workspace, &config.toolchain)
        .with_context(|| format!("Failed to compute cache key for {:?}", workspace))?;

    println!("Cache Key: {}", key);
    println!("Short: {}", key.short());
    Ok(())
}

fn cmd_schedule(config: &WorkflowConfig, after: Option<&str>) -> Result<()> {
    let after = match after {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid RFC 3339 time: {}", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    println!("Schedule: {} (UTC)", config.schedule);
    println!("Next run: {}", config.schedule.next_after(after).to_rfc3339());
    Ok(())
}

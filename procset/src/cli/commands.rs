//! CLI command execution.

use std::io::Write;

use anyhow::{Context, Result};
use tracing::{debug, info};

use procset::{ChildProcess, CommandSpec, ExitStatus, RunSummary, Runner, RunnerConfig};

use super::args::Cli;

/// Install the stderr log subscriber.
///
/// `RUST_LOG` wins over the `-v` level.
pub fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    debug!("Tracing initialized with level: {level}");
    Ok(())
}

/// Merge the manifest (if any) with command-line overrides.
fn build_config(cli: Cli) -> Result<RunnerConfig> {
    let mut config = match &cli.file {
        Some(path) => RunnerConfig::from_file(path)?,
        None => RunnerConfig::default(),
    };

    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    if let Some(keep_going) = cli.keep_going {
        config.keep_going = keep_going;
    }
    config
        .commands
        .extend(cli.console.into_iter().map(CommandSpec::console));
    config
        .commands
        .extend(cli.commands.into_iter().map(CommandSpec::new));

    config.validate()?;
    Ok(config)
}

/// Print one finished command: its captured output on stdout, plus a
/// failure line on stderr.
fn report(spec: &CommandSpec, child: &ChildProcess, status: ExitStatus) {
    let mut stdout = std::io::stdout().lock();
    // A closed stdout must not abort the run.
    let _ = stdout.write_all(child.output());
    let _ = stdout.flush();

    match status {
        ExitStatus::Success => {}
        ExitStatus::Failure => eprintln!("procset: FAILED: {}", spec.command),
        ExitStatus::Interrupted => eprintln!("procset: INTERRUPTED: {}", spec.command),
    }
}

/// Run the commands described by `cli` and return the process exit code.
pub fn execute(cli: Cli) -> Result<i32> {
    let json = cli.json;
    let config = build_config(cli)?;
    info!(commands = config.commands.len(), jobs = config.jobs, "Running");

    let summary: RunSummary = Runner::new(config)
        .context("Failed to set up process multiplexer")?
        .run(report)
        .context("Failed to run commands")?;

    if json {
        println!("{}", serde_json::to_string(&summary)?);
    } else if summary.interrupted {
        eprintln!("procset: interrupted by user");
    } else if summary.not_started > 0 {
        eprintln!(
            "procset: stopped after {} failure(s); {} command(s) not started",
            summary.failed, summary.not_started
        );
    }

    Ok(summary.exit_code())
}

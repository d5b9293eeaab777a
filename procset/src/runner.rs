//! Scheduler-side driver for a [`ProcessMultiplexer`].
//!
//! Launches configured commands up to the job limit, collects finished
//! children in completion order, and stops early on failures or an
//! interruption signal.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, RunnerConfig};
use crate::error::Result;
use crate::process::{
    ChildProcess, DefaultReadiness, ExitStatus, InlineShell, ProcessId, ProcessMultiplexer,
    Readiness,
};

/// Outcome counts for one [`Runner::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Commands that exited successfully.
    pub succeeded: usize,

    /// Commands that failed or were interrupted on their own.
    pub failed: usize,

    /// Whether SIGINT, SIGTERM or SIGHUP ended the run.
    pub interrupted: bool,

    /// Running commands that were signalled and discarded on interruption.
    pub aborted: usize,

    /// Commands never launched.
    pub not_started: usize,
}

impl RunSummary {
    /// Exit code for the binary: 2 when interrupted, 1 when anything
    /// failed or was left undone, 0 otherwise.
    pub const fn exit_code(&self) -> i32 {
        if self.interrupted {
            2
        } else if self.failed > 0 || self.not_started > 0 {
            1
        } else {
            0
        }
    }
}

/// Runs a [`RunnerConfig`] to completion.
pub struct Runner<R: Readiness = DefaultReadiness> {
    config: RunnerConfig,
    mux: ProcessMultiplexer<R>,
}

impl Runner<DefaultReadiness> {
    /// Create a runner with a fresh multiplexer.
    ///
    /// This takes over SIGINT, SIGTERM and SIGHUP for the calling thread
    /// until the runner is dropped.
    pub fn new(config: RunnerConfig) -> Result<Self> {
        Ok(Self::with_multiplexer(config, ProcessMultiplexer::new()?))
    }

    /// Create a runner that executes every command through `shim`.
    pub fn with_shim(config: RunnerConfig, shim: impl InlineShell + 'static) -> Result<Self> {
        Ok(Self::with_multiplexer(
            config,
            ProcessMultiplexer::with_shim(shim)?,
        ))
    }
}

impl<R: Readiness> Runner<R> {
    pub const fn with_multiplexer(config: RunnerConfig, mux: ProcessMultiplexer<R>) -> Self {
        Self { config, mux }
    }

    /// Run every command, calling `on_finished` for each one in the order
    /// their output closes.
    pub fn run<F>(mut self, mut on_finished: F) -> Result<RunSummary>
    where
        F: FnMut(&CommandSpec, &ChildProcess, ExitStatus),
    {
        let jobs = self.config.jobs.max(1);
        let keep_going = self.config.keep_going;
        let commands = std::mem::take(&mut self.config.commands);

        let mut pending: VecDeque<usize> = (0..commands.len()).collect();
        let mut launched: HashMap<ProcessId, usize> = HashMap::new();
        let mut console: Option<ProcessId> = None;
        let mut stopping = false;
        let mut summary = RunSummary::default();

        info!(commands = commands.len(), jobs, keep_going, "Starting run");

        loop {
            // Step 1: report everything that finished, so the failure budget
            // is up to date before anything new starts.
            while let Some(mut child) = self.mux.next_finished() {
                let status = child.retrieve_exit_status()?;
                let Some(index) = launched.remove(&child.id()) else {
                    continue;
                };
                if console == Some(child.id()) {
                    console = None;
                }

                if status.is_success() {
                    summary.succeeded += 1;
                } else {
                    summary.failed += 1;
                    if keep_going > 0 && summary.failed >= keep_going && !stopping {
                        warn!(failed = summary.failed, "Too many failures, not starting new commands");
                        stopping = true;
                    }
                }
                on_finished(&commands[index], &child, status);
            }

            // Step 2: fill free slots, keeping launch order.
            let free = jobs.saturating_sub(self.mux.running_len());
            for _ in 0..free {
                if stopping {
                    break;
                }
                let Some(&index) = pending.front() else { break };
                let spec = &commands[index];
                if spec.console && console.is_some() {
                    break;
                }
                pending.pop_front();

                let id = self.mux.launch(spec.command.clone(), spec.console)?;
                if spec.console {
                    console = Some(id);
                }
                launched.insert(id, index);
            }

            if self.mux.running_len() == 0 {
                // Inline launches finish immediately; report them next pass.
                if self.mux.finished_len() > 0 {
                    continue;
                }
                break;
            }

            // Step 3: wait for output or completion.
            if self.mux.wait_for_progress()? {
                summary.interrupted = true;
                summary.aborted = self.mux.running_len();
                self.mux.shutdown()?;
                break;
            }
        }

        summary.not_started = pending.len();
        debug!(?summary, "Run finished");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::InlineRun;
    use nix::sys::signal::{raise, Signal};
    use serial_test::serial;
    use std::time::{Duration, Instant};

    fn config(jobs: usize, keep_going: usize, commands: &[&str]) -> RunnerConfig {
        RunnerConfig {
            jobs,
            keep_going,
            commands: commands.iter().copied().map(CommandSpec::new).collect(),
        }
    }

    /// Run `config` and return the summary plus `(command, output, status)`
    /// in reporting order.
    fn run(config: RunnerConfig) -> (RunSummary, Vec<(String, String, ExitStatus)>) {
        let mut reports = Vec::new();
        let summary = Runner::new(config)
            .unwrap()
            .run(|spec, child, status| {
                reports.push((spec.command.clone(), child.output_lossy().into_owned(), status));
            })
            .unwrap();
        (summary, reports)
    }

    #[test]
    fn test_exit_codes() {
        let ok = RunSummary {
            succeeded: 2,
            ..RunSummary::default()
        };
        assert_eq!(ok.exit_code(), 0);
        assert_eq!(RunSummary { failed: 1, ..ok }.exit_code(), 1);
        assert_eq!(RunSummary { not_started: 1, ..ok }.exit_code(), 1);
        assert_eq!(RunSummary { interrupted: true, failed: 1, ..ok }.exit_code(), 2);
    }

    #[test]
    #[serial]
    fn test_all_commands_succeed() {
        let (summary, reports) = run(config(4, 1, &["echo one", "echo two", "echo three"]));

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.exit_code(), 0);
        let mut outputs: Vec<_> = reports.iter().map(|(_, out, _)| out.as_str()).collect();
        outputs.sort_unstable();
        assert_eq!(outputs, ["one\n", "three\n", "two\n"]);
    }

    #[test]
    #[serial]
    fn test_failure_stops_new_launches() {
        let (summary, reports) = run(config(1, 1, &["exit 1", "echo never"]));

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_started, 1);
        assert!(!summary.interrupted);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].2, ExitStatus::Failure);
    }

    #[test]
    #[serial]
    fn test_running_commands_finish_after_failure() {
        let (summary, reports) = run(config(2, 1, &["sleep 0.3; echo slow", "exit 1", "echo never"]));

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.not_started, 1);
        assert_eq!(reports[1].1, "slow\n");
    }

    #[test]
    #[serial]
    fn test_keep_going_zero_runs_everything() {
        let (summary, _) = run(config(1, 0, &["exit 1", "exit 2", "true"]));

        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.not_started, 0);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    #[serial]
    fn test_job_limit_is_respected() {
        let start = Instant::now();
        let (summary, _) = run(config(2, 1, &["sleep 0.3"; 4]));

        assert_eq!(summary.succeeded, 4);
        assert!(start.elapsed() >= Duration::from_millis(550));
    }

    #[test]
    #[serial]
    fn test_console_commands_run_one_at_a_time() {
        let mut config = config(4, 1, &[]);
        config.commands = vec![CommandSpec::console("sleep 0.3"), CommandSpec::console("sleep 0.3")];

        let start = Instant::now();
        let (summary, _) = run(config);

        assert_eq!(summary.succeeded, 2);
        assert!(start.elapsed() >= Duration::from_millis(550));
    }

    #[test]
    #[serial]
    fn test_interruption_aborts_run() {
        let runner = Runner::new(config(2, 0, &["sleep 30", "sleep 30", "echo never"])).unwrap();
        // Stays pending until the first wait unblocks it.
        raise(Signal::SIGTERM).unwrap();

        let start = Instant::now();
        let summary = runner.run(|_, _, _| {}).unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.aborted, 2);
        assert_eq!(summary.not_started, 1);
        assert_eq!(summary.exit_code(), 2);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    #[serial]
    fn test_shim_runs_inline() {
        let shim = |command: &str| InlineRun {
            output: format!("ran {command}\n").into_bytes(),
            status: if command == "bad" {
                ExitStatus::Failure
            } else {
                ExitStatus::Success
            },
        };

        let mut seen = Vec::new();
        let summary = Runner::with_shim(config(1, 0, &["good", "bad"]), shim)
            .unwrap()
            .run(|spec, child, _| seen.push((spec.command.clone(), child.output_lossy().into_owned())))
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            seen,
            [
                ("good".to_string(), "ran good\n".to_string()),
                ("bad".to_string(), "ran bad\n".to_string())
            ]
        );
    }

    #[test]
    #[serial]
    fn test_failure_budget_checked_before_next_inline_launch() {
        let shim = |command: &str| InlineRun {
            output: Vec::new(),
            status: if command == "bad" {
                ExitStatus::Failure
            } else {
                ExitStatus::Success
            },
        };

        let mut seen = Vec::new();
        let summary = Runner::with_shim(config(1, 1, &["bad", "good"]), shim)
            .unwrap()
            .run(|spec, _, _| seen.push(spec.command.clone()))
            .unwrap();

        assert_eq!(seen, ["bad"]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_started, 1);
    }
}

//! procset - run shell commands in parallel the way a build tool does.
//!
//! The core is [`ProcessMultiplexer`]: it spawns commands through
//! `/bin/sh -c`, captures their merged stdout/stderr, waits on all of them
//! at once, and turns SIGINT, SIGTERM and SIGHUP into an orderly shutdown.
//! [`Runner`] drives a multiplexer from a [`RunnerConfig`] with a job limit
//! and a failure budget.

pub mod config;
pub mod error;
pub mod process;
pub mod runner;

pub use config::{CommandSpec, RunnerConfig};
pub use error::{Error, Result};
pub use process::{ChildProcess, ExitStatus, ProcessId, ProcessMultiplexer};
pub use runner::{RunSummary, Runner};

//! Synchronous stand-in for environments without fork/exec.
//!
//! A multiplexer configured with an [`InlineShell`] runs each command to
//! completion inside `launch` and queues the result as already finished.

use super::status::ExitStatus;

/// Result of running a command inline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineRun {
    /// Combined stdout/stderr.
    pub output: Vec<u8>,
    /// How the command ended.
    pub status: ExitStatus,
}

/// Runs a shell command synchronously and captures its output.
pub trait InlineShell {
    fn run(&mut self, command: &str) -> InlineRun;
}

impl<F> InlineShell for F
where
    F: FnMut(&str) -> InlineRun,
{
    fn run(&mut self, command: &str) -> InlineRun {
        self(command)
    }
}

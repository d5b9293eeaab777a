//! Multiplexing output and completion across many running children.
//!
//! A [`ProcessMultiplexer`] owns every launched [`ChildProcess`] until the
//! scheduler collects it, plus the process-wide interruption-signal state.
//!
//! # Example
//!
//! ```rust,no_run
//! use procset::{ExitStatus, ProcessMultiplexer};
//!
//! fn main() -> procset::Result<()> {
//!     let mut mux = ProcessMultiplexer::new()?;
//!     mux.launch("echo hi", false)?;
//!
//!     while mux.running_len() > 0 {
//!         if mux.wait_for_progress()? {
//!             break; // Ctrl-C, SIGTERM or SIGHUP
//!         }
//!     }
//!
//!     while let Some(mut child) = mux.next_finished() {
//!         let status = child.retrieve_exit_status()?;
//!         print!("{}", child.output_lossy());
//!         assert_eq!(status, ExitStatus::Success);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::VecDeque;
use std::os::fd::BorrowedFd;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use tracing::{debug, warn};

use super::child::{ChildProcess, ProcessId};
use super::readiness::{DefaultReadiness, Readiness};
use super::shim::InlineShell;
use super::signals::SignalGuard;
use crate::error::{fatal, Error, Result};

/// Launches commands and reports their progress to a scheduler.
///
/// Only one multiplexer may be live per process, since it owns the SIGINT,
/// SIGTERM and SIGHUP handlers. Those signals stay blocked for the
/// multiplexer's lifetime except inside [`wait_for_progress`], so an
/// interruption is never lost between two calls.
///
/// The signals are blocked only on the thread that created the multiplexer,
/// so it must be driven from that thread. In a multi-threaded host a
/// terminal signal may be handled on another thread: the interruption is
/// still recorded, but a wait already in progress only notices it once some
/// child produces output or exits.
///
/// [`wait_for_progress`]: ProcessMultiplexer::wait_for_progress
pub struct ProcessMultiplexer<R: Readiness = DefaultReadiness> {
    /// Children whose output is still open, in launch order.
    running: Vec<ChildProcess>,

    /// Children whose output has closed, in closing order.
    finished: VecDeque<ChildProcess>,

    signals: SignalGuard,
    readiness: R,

    /// Runs commands inline instead of spawning them, if set.
    shim: Option<Box<dyn InlineShell>>,

    next_id: ProcessId,
    shut_down: bool,
}

impl ProcessMultiplexer<DefaultReadiness> {
    /// Create a multiplexer using the platform's preferred readiness strategy.
    pub fn new() -> Result<Self> {
        Self::with_readiness(DefaultReadiness::default())
    }

    /// Create a multiplexer that runs every command through `shim`.
    pub fn with_shim(shim: impl InlineShell + 'static) -> Result<Self> {
        let mut mux = Self::new()?;
        mux.shim = Some(Box::new(shim));
        Ok(mux)
    }
}

impl<R: Readiness> ProcessMultiplexer<R> {
    /// Create a multiplexer using the given readiness strategy.
    pub fn with_readiness(readiness: R) -> Result<Self> {
        let signals = SignalGuard::acquire()?;
        debug!(strategy = readiness.name(), "Process multiplexer ready");
        Ok(Self {
            running: Vec::new(),
            finished: VecDeque::new(),
            signals,
            readiness,
            shim: None,
            next_id: 0,
            shut_down: false,
        })
    }

    /// Start `command` and track it as running.
    ///
    /// Console commands share the terminal and process group of this
    /// process; their output is not captured.
    pub fn launch(&mut self, command: impl Into<String>, console: bool) -> Result<ProcessId> {
        if self.shut_down {
            return Err(Error::ShutDown);
        }
        let id = self.next_id;
        self.next_id += 1;
        let command = command.into();

        if let Some(shim) = self.shim.as_mut() {
            let run = shim.run(&command);
            debug!(id, status = %run.status, "Ran {command:?} inline");
            self.finished
                .push_back(ChildProcess::completed(id, command, run));
            return Ok(id);
        }

        // Children start with the mask from before the signals were blocked.
        let child = ChildProcess::spawn(
            id,
            command,
            console,
            self.signals.saved_mask(),
            &self.readiness,
        )?;
        self.running.push(child);
        Ok(id)
    }

    /// Block until some running child has output or closes its pipe, then
    /// drain ready children and move closed ones to the finished queue.
    ///
    /// Returns `true` if SIGINT, SIGTERM or SIGHUP arrived; nothing is
    /// drained in that case. Returns immediately when nothing is running.
    pub fn wait_for_progress(&mut self) -> Result<bool> {
        if self.running.is_empty() {
            self.signals.reset();
            self.signals.record_pending()?;
            return Ok(self.report_interruption());
        }

        loop {
            self.signals.reset();

            let ready = {
                let fds: Vec<BorrowedFd<'_>> = self
                    .running
                    .iter()
                    .filter_map(ChildProcess::pipe_fd)
                    .collect();
                debug_assert_eq!(fds.len(), self.running.len());
                self.readiness.wait(&fds, self.signals.saved_mask())
            };

            match ready {
                Err(Errno::EINTR) => {
                    if self.report_interruption() {
                        return Ok(true);
                    }
                    // Some other signal woke us up.
                    continue;
                }
                Err(errno) => return Err(Error::os(self.readiness.name(), errno)),
                Ok(ready) => {
                    self.signals.record_pending()?;
                    if self.report_interruption() {
                        return Ok(true);
                    }
                    self.dispatch(&ready)?;
                    return Ok(false);
                }
            }
        }
    }

    fn report_interruption(&self) -> bool {
        match self.signals.interrupted() {
            Some(signal) => {
                warn!(%signal, running = self.running.len(), "Interrupted");
                true
            }
            None => false,
        }
    }

    /// Drain every ready child; move the ones whose output closed.
    fn dispatch(&mut self, ready: &[bool]) -> Result<()> {
        let mut index = 0;
        for &is_ready in ready {
            if is_ready {
                self.running[index].drain()?;
                if self.running[index].is_output_closed() {
                    let child = self.running.remove(index);
                    debug!(id = child.id(), "Finished {:?}", child.command());
                    self.finished.push_back(child);
                    continue;
                }
            }
            index += 1;
        }
        Ok(())
    }

    /// Pop the oldest finished child, if any.
    pub fn next_finished(&mut self) -> Option<ChildProcess> {
        self.finished.pop_front()
    }

    /// Number of children whose output is still open.
    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    /// Number of finished children awaiting collection.
    pub fn finished_len(&self) -> usize {
        self.finished.len()
    }

    /// The interruption observed by the last [`wait_for_progress`] call.
    ///
    /// [`wait_for_progress`]: ProcessMultiplexer::wait_for_progress
    pub fn interrupted(&self) -> Option<Signal> {
        self.signals.interrupted()
    }

    /// Signal and reap every running child, then restore the signal state.
    ///
    /// Non-console children get the last observed interruption signal sent
    /// to their whole process group; with no interruption observed nothing
    /// is sent and the reap waits for them to exit on their own. Console
    /// children already received the signal from the terminal. Unread output
    /// is discarded. Calling this again is a no-op.
    pub fn shutdown(&mut self) -> Result<()> {
        let signal = self.signals.interrupted();
        self.shutdown_with(signal)
    }

    /// Like [`shutdown`](Self::shutdown), but sends `signal` instead of the
    /// last observed one.
    pub fn shutdown_with(&mut self, signal: Option<Signal>) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        for child in self.running.iter().filter(|c| !c.is_console()) {
            let Some(pid) = child.pid() else { continue };
            match killpg(pid, signal) {
                Ok(()) => debug!(pgid = pid.as_raw(), ?signal, "Signalled process group"),
                Err(Errno::ESRCH) => debug!(pgid = pid.as_raw(), "Process group already exited"),
                Err(e) => warn!(pgid = pid.as_raw(), "Failed to signal process group: {e}"),
            }
        }

        for mut child in std::mem::take(&mut self.running) {
            child.discard_output();
            child.retrieve_exit_status()?;
        }

        self.signals.release()
    }
}

impl<R: Readiness> Drop for ProcessMultiplexer<R> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            fatal(&err);
        }
    }
}

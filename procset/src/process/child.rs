//! A single spawned shell command.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::signal::SigSet;
use nix::sys::wait::waitpid;
use nix::unistd::{pipe, Pid};
use tracing::{debug, trace};

use super::readiness::Readiness;
use super::shim::InlineRun;
use super::spawn::{spawn_shell, OutputPipe};
use super::status::{self, ExitStatus};
use crate::error::{fatal, Error, Result};

/// A unique identifier for a launched command.
pub type ProcessId = usize;

/// Size of a single read from the output pipe.
const READ_CHUNK: usize = 4 << 10;

/// One spawned command: its output pipe, process id, and captured output.
///
/// The handle exclusively owns the read end of the child's merged
/// stdout/stderr pipe. Output is closed once the pipe reports end-of-stream;
/// the process is fully done only after [`retrieve_exit_status`] has reaped
/// it. Dropping a handle that still owns a process reaps it (blocking).
///
/// [`retrieve_exit_status`]: ChildProcess::retrieve_exit_status
#[derive(Debug)]
pub struct ChildProcess {
    id: ProcessId,
    command: String,
    pipe: Option<File>,
    pid: Option<Pid>,
    output: Vec<u8>,
    console: bool,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// Spawn `command` through `/bin/sh -c`.
    ///
    /// `mask` becomes the child's signal mask. The pipe's read end must be
    /// watchable by `readiness`, otherwise the launch fails with
    /// [`Error::DescriptorLimit`].
    pub fn spawn(
        id: ProcessId,
        command: impl Into<String>,
        console: bool,
        mask: &SigSet,
        readiness: &impl Readiness,
    ) -> Result<Self> {
        let command = command.into();
        let (read, write) = pipe().map_err(|e| Error::os("pipe", e))?;

        if !readiness.accepts(read.as_fd()) {
            return Err(Error::DescriptorLimit {
                fd: read.as_raw_fd(),
                limit: readiness.capacity().unwrap_or(usize::MAX),
            });
        }
        fcntl(read.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| Error::os("fcntl", e))?;

        let pid = spawn_shell(
            &command,
            console,
            mask,
            OutputPipe {
                read: read.as_fd(),
                write: write.as_fd(),
            },
        )?;
        // The child holds the only remaining copies of the write end.
        drop(write);

        debug!(id, pid = pid.as_raw(), console, "Started {command:?}");
        Ok(Self {
            id,
            command,
            pipe: Some(File::from(read)),
            pid: Some(pid),
            output: Vec::new(),
            console,
            status: None,
        })
    }

    /// A handle for a command that already ran to completion elsewhere.
    pub(crate) fn completed(id: ProcessId, command: impl Into<String>, run: InlineRun) -> Self {
        Self {
            id,
            command: command.into(),
            pipe: None,
            pid: None,
            output: run.output,
            console: false,
            status: Some(run.status),
        }
    }

    /// Read whatever is available from the pipe into the output buffer.
    ///
    /// End-of-stream closes the pipe. Meant to be called when the pipe was
    /// reported readable; otherwise it blocks until data or EOF arrives.
    pub fn drain(&mut self) -> Result<()> {
        let Some(pipe) = self.pipe.as_mut() else {
            return Ok(());
        };

        let mut buf = [0u8; READ_CHUNK];
        match pipe.read(&mut buf) {
            Ok(0) => {
                trace!(id = self.id, "Output closed");
                self.pipe = None;
            }
            Ok(len) => {
                trace!(id = self.id, len, "Drained output");
                self.output.extend_from_slice(&buf[..len]);
            }
            // Readiness is level-triggered; the data will be reported again.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(Error::Os { op: "read", source }),
        }
        Ok(())
    }

    /// Close the pipe without reading what is left in it.
    pub(crate) fn discard_output(&mut self) {
        self.pipe = None;
    }

    /// Whether the output pipe has reached end-of-stream.
    pub const fn is_output_closed(&self) -> bool {
        self.pipe.is_none()
    }

    /// Borrow the read end for readiness waiting, while output is open.
    pub fn pipe_fd(&self) -> Option<BorrowedFd<'_>> {
        self.pipe.as_ref().map(AsFd::as_fd)
    }

    /// Block until the process has terminated and classify how it ended.
    ///
    /// The first call reaps the process; later calls return the same status.
    pub fn retrieve_exit_status(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let Some(pid) = self.pid else {
            return Err(Error::NotStarted);
        };

        let raw = waitpid(pid, None).map_err(|e| Error::os("waitpid", e))?;
        self.pid = None;

        let status = status::decode(raw);
        debug!(id = self.id, pid = pid.as_raw(), %status, "Reaped {:?}", self.command);
        self.status = Some(status);
        Ok(status)
    }

    /// Everything read from the pipe so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// The captured output as text, replacing invalid UTF-8.
    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }

    pub const fn id(&self) -> ProcessId {
        self.id
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// OS process id, until the process is reaped.
    pub const fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub const fn is_console(&self) -> bool {
        self.console
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Close the pipe first so a child blocked on a full pipe gets EPIPE
        // instead of deadlocking the reap below.
        self.discard_output();
        if self.pid.is_some() {
            if let Err(err) = self.retrieve_exit_status() {
                fatal(&err);
            }
        }
    }
}

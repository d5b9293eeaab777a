//! Exit-status classification.
//!
//! Decoding happens in two steps: the raw wait status is turned into a
//! [`Termination`], which is then classified into an [`ExitStatus`]. The only
//! platform-specific step (AIX's shell signal convention) lives in
//! [`Termination::normalize`].

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use serde::Serialize;

/// Signals treated as a request to stop the build gracefully.
pub const INTERRUPTION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Final disposition of a child command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExitStatus {
    /// Exited normally with code 0.
    Success,
    /// Killed by one of the interruption signals.
    Interrupted,
    /// Any other outcome.
    Failure,
}

impl ExitStatus {
    /// Short lowercase label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Interrupted => "interrupted",
            Self::Failure => "failure",
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a reaped process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Normal exit with the given code.
    Exited(i32),
    /// Killed by the given raw signal number.
    Signaled(i32),
    /// Anything else reported by `waitpid` (stop/continue events).
    Other,
}

impl Termination {
    /// Apply the platform's exit-status conventions.
    pub const fn normalize(self) -> Self {
        if cfg!(target_os = "aix") {
            self.reinterpret_shell_signal()
        } else {
            self
        }
    }

    /// Map a shell's `128 + N` "died from signal N" exit code back to a
    /// signal termination.
    const fn reinterpret_shell_signal(self) -> Self {
        match self {
            Self::Exited(code) if code & 0x80 != 0 => Self::Signaled(code & 0x7f),
            other => other,
        }
    }

    /// Classify into the scheduler-facing status.
    pub const fn classify(self) -> ExitStatus {
        match self {
            Self::Signaled(signo) if is_interruption(signo) => ExitStatus::Interrupted,
            Self::Exited(0) => ExitStatus::Success,
            _ => ExitStatus::Failure,
        }
    }
}

impl From<WaitStatus> for Termination {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => Self::Exited(code),
            WaitStatus::Signaled(_, signal, _) => Self::Signaled(signal as i32),
            _ => Self::Other,
        }
    }
}

const fn is_interruption(signo: i32) -> bool {
    signo == libc::SIGINT || signo == libc::SIGTERM || signo == libc::SIGHUP
}

/// Decode a raw wait status into an [`ExitStatus`].
pub fn decode(status: WaitStatus) -> ExitStatus {
    Termination::from(status).normalize().classify()
}

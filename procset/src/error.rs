//! Error types for the process engine.
//!
//! Every variant here belongs to the fatal tier: a failing system call the
//! scheduler cannot recover from mid-build. A child command's own failure is
//! never an `Error`; it is reported as [`crate::ExitStatus`] data instead.

use std::io;

use thiserror::Error;
use tracing::error;

/// Errors raised by the process engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A system call required for correctness failed.
    #[error("{op}: {source}")]
    Os {
        /// Name of the failing operation (e.g. `pipe`, `posix_spawn`).
        op: &'static str,
        /// The OS-level error.
        #[source]
        source: io::Error,
    },

    /// A pipe descriptor cannot be watched by the bounded readiness strategy.
    #[error("pipe: descriptor {fd} exceeds readiness capacity {limit}")]
    DescriptorLimit { fd: i32, limit: usize },

    /// Another multiplexer already owns the process-wide signal state.
    #[error("signal state is already owned by a live process multiplexer")]
    SignalGuardHeld,

    /// Exit status was requested for a handle that never spawned.
    #[error("process was never started")]
    NotStarted,

    /// The multiplexer was already shut down.
    #[error("process multiplexer has been shut down")]
    ShutDown,
}

impl Error {
    /// Build an [`Error::Os`] from a nix errno.
    pub fn os(op: &'static str, errno: nix::errno::Errno) -> Self {
        Self::Os {
            op,
            source: errno.into(),
        }
    }

    /// Build an [`Error::Os`] from a raw error number returned by a
    /// `posix_spawn*` call (those report errors through the return value).
    pub fn from_code(op: &'static str, code: libc::c_int) -> Self {
        Self::Os {
            op,
            source: io::Error::from_raw_os_error(code),
        }
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Report a fatal condition and terminate the whole process.
///
/// Used on destructor paths where an error cannot be propagated.
pub fn fatal(err: &Error) -> ! {
    error!("procset: {err}");
    eprintln!("procset: fatal: {err}");
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::errno::Errno;

    #[test]
    fn test_os_error_names_operation() {
        let err = Error::os("waitpid", Errno::ECHILD);
        let text = err.to_string();
        assert!(text.starts_with("waitpid: "));
        assert!(text.to_lowercase().contains("child"));
    }

    #[test]
    fn test_spawn_code_error() {
        let err = Error::from_code("posix_spawn", libc::ENOENT);
        assert!(err.to_string().starts_with("posix_spawn: "));
        match err {
            Error::Os { source, .. } => assert_eq!(source.raw_os_error(), Some(libc::ENOENT)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_descriptor_limit_display() {
        let err = Error::DescriptorLimit { fd: 2048, limit: 1024 };
        assert_eq!(
            err.to_string(),
            "pipe: descriptor 2048 exceeds readiness capacity 1024"
        );
    }
}

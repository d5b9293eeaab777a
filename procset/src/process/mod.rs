//! Child-process execution engine.
//!
//! [`ProcessMultiplexer`] launches shell commands, multiplexes their output,
//! and hands finished [`ChildProcess`] handles back to the scheduler.

mod child;
mod multiplexer;
mod readiness;
mod shim;
mod signals;
mod spawn;
mod status;

pub use child::{ChildProcess, ProcessId};
pub use multiplexer::ProcessMultiplexer;
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub use readiness::PollReadiness;
pub use readiness::{DefaultReadiness, Readiness, SelectReadiness};
pub use shim::{InlineRun, InlineShell};
pub use status::{ExitStatus, Termination, INTERRUPTION_SIGNALS};

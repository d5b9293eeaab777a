//! Readiness multiplexing strategies.
//!
//! Two interchangeable implementations of [`Readiness`]:
//!
//! - [`PollReadiness`] uses `ppoll` and has no descriptor capacity limit.
//! - [`SelectReadiness`] uses `pselect` and can only watch descriptors below
//!   `FD_SETSIZE`.
//!
//! Both swap in the caller's signal mask for the duration of the wait only,
//! so a blocked signal is either delivered during the wait (making it fail
//! with `EINTR`) or is still pending afterwards.

use std::os::fd::{AsRawFd, BorrowedFd};

use nix::sys::select::{pselect, FdSet};
use nix::sys::signal::SigSet;

/// Waits until at least one of a set of descriptors is readable.
pub trait Readiness {
    /// Highest descriptor value (exclusive) this strategy can watch, if bounded.
    fn capacity(&self) -> Option<usize>;

    /// Block until one of `fds` is ready or a signal unblocked by `mask`
    /// arrives.
    ///
    /// Returns one flag per input descriptor, in order.
    fn wait(&mut self, fds: &[BorrowedFd<'_>], mask: &SigSet) -> nix::Result<Vec<bool>>;

    /// Name of the underlying system call, used in error reports.
    fn name(&self) -> &'static str;

    /// Whether `fd` can be watched by this strategy.
    fn accepts(&self, fd: BorrowedFd<'_>) -> bool {
        self.capacity()
            .is_none_or(|limit| usize::try_from(fd.as_raw_fd()).is_ok_and(|raw| raw < limit))
    }
}

/// `ppoll`-based readiness with no capacity limit.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
#[derive(Debug, Default, Clone, Copy)]
pub struct PollReadiness;

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
impl Readiness for PollReadiness {
    fn capacity(&self) -> Option<usize> {
        None
    }

    fn wait(&mut self, fds: &[BorrowedFd<'_>], mask: &SigSet) -> nix::Result<Vec<bool>> {
        use nix::poll::{ppoll, PollFd, PollFlags};

        let mut pollfds: Vec<PollFd<'_>> = fds
            .iter()
            .map(|fd| PollFd::new(*fd, PollFlags::POLLIN | PollFlags::POLLPRI))
            .collect();

        ppoll(&mut pollfds, None, Some(*mask))?;

        Ok(pollfds
            .iter()
            .map(|pfd| pfd.revents().is_some_and(|r| !r.is_empty()))
            .collect())
    }

    fn name(&self) -> &'static str {
        "ppoll"
    }
}

/// `pselect`-based readiness bounded by `FD_SETSIZE`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectReadiness;

impl Readiness for SelectReadiness {
    fn capacity(&self) -> Option<usize> {
        Some(libc::FD_SETSIZE as usize)
    }

    fn wait(&mut self, fds: &[BorrowedFd<'_>], mask: &SigSet) -> nix::Result<Vec<bool>> {
        let mut set = FdSet::new();
        for fd in fds {
            set.insert(*fd);
        }

        pselect(None, &mut set, None, None, None, mask)?;

        Ok(fds.iter().map(|fd| set.contains(*fd)).collect())
    }

    fn name(&self) -> &'static str {
        "pselect"
    }
}

/// The strategy used when none is chosen explicitly.
#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
pub type DefaultReadiness = PollReadiness;

/// The strategy used when none is chosen explicitly.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "dragonfly"
)))]
pub type DefaultReadiness = SelectReadiness;

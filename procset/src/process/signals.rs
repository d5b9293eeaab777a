//! Ownership of the process-wide interruption-signal state.
//!
//! [`SignalGuard`] blocks SIGINT, SIGTERM and SIGHUP on the calling thread,
//! installs a flag-setting handler for each, and remembers what was there
//! before. Only one guard may be live at a time; dropping it (or calling
//! [`SignalGuard::release`]) restores the previous handlers, then the
//! previous mask.
//!
//! The blocked mask is what makes interruption race-free: the signals can
//! only be delivered while a readiness wait has atomically swapped in the
//! saved mask.

// Installing handlers and inspecting the pending set needs raw sigaction and
// sigpending calls.
#![allow(unsafe_code)]

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{
    pthread_sigmask, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use tracing::debug;

use super::status::INTERRUPTION_SIGNALS;
use crate::error::{fatal, Error, Result};

/// Set while a guard owns the signal state.
static GUARD_HELD: AtomicBool = AtomicBool::new(false);

/// Last interruption signal caught by the handler; 0 means none.
static INTERRUPTED: AtomicI32 = AtomicI32::new(0);

extern "C" fn set_interrupted_flag(signum: libc::c_int) {
    INTERRUPTED.store(signum, Ordering::SeqCst);
}

fn interruption_set() -> SigSet {
    let mut set = SigSet::empty();
    for signal in INTERRUPTION_SIGNALS {
        set.add(signal);
    }
    set
}

/// Signals blocked and awaiting delivery on this thread.
fn pending_signals() -> Result<libc::sigset_t> {
    let mut pending = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initialises the set before sigpending fills it.
    unsafe {
        libc::sigemptyset(pending.as_mut_ptr());
        if libc::sigpending(pending.as_mut_ptr()) == -1 {
            return Err(Error::os("sigpending", Errno::last()));
        }
        Ok(pending.assume_init())
    }
}

fn is_member(set: &libc::sigset_t, signal: Signal) -> bool {
    // SAFETY: `set` is an initialised signal set.
    unsafe { libc::sigismember(set, signal as libc::c_int) == 1 }
}

/// Scoped acquisition of the interruption-signal state.
#[derive(Debug)]
pub struct SignalGuard {
    old_mask: SigSet,
    old_actions: Vec<(Signal, SigAction)>,
    released: bool,
}

impl SignalGuard {
    /// Block the interruption signals and install the flag handler.
    ///
    /// Fails with [`Error::SignalGuardHeld`] if another guard is live.
    pub fn acquire() -> Result<Self> {
        if GUARD_HELD
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::SignalGuardHeld);
        }

        let mut old_mask = SigSet::empty();
        if let Err(errno) = pthread_sigmask(
            SigmaskHow::SIG_BLOCK,
            Some(&interruption_set()),
            Some(&mut old_mask),
        ) {
            GUARD_HELD.store(false, Ordering::SeqCst);
            return Err(Error::os("sigprocmask", errno));
        }

        let mut guard = Self {
            old_mask,
            old_actions: Vec::with_capacity(INTERRUPTION_SIGNALS.len()),
            released: false,
        };

        let action = SigAction::new(
            SigHandler::Handler(set_interrupted_flag),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for signal in INTERRUPTION_SIGNALS {
            // SAFETY: the handler only performs an atomic store.
            match unsafe { sigaction(signal, &action) } {
                Ok(previous) => guard.old_actions.push((signal, previous)),
                Err(errno) => {
                    // Undo whatever was installed so far; a failure here is
                    // reported by the error below.
                    let _ = guard.release();
                    return Err(Error::os("sigaction", errno));
                }
            }
        }

        INTERRUPTED.store(0, Ordering::SeqCst);
        debug!("Interruption signals blocked and handlers installed");
        Ok(guard)
    }

    /// The signal mask in effect before acquisition.
    ///
    /// Readiness waits run with this mask, and spawned children start with it.
    pub const fn saved_mask(&self) -> &SigSet {
        &self.old_mask
    }

    /// Forget any previously observed interruption.
    pub fn reset(&self) {
        INTERRUPTED.store(0, Ordering::SeqCst);
    }

    /// The interruption observed since the last [`reset`](Self::reset).
    pub fn interrupted(&self) -> Option<Signal> {
        match INTERRUPTED.load(Ordering::SeqCst) {
            0 => None,
            signum => Signal::try_from(signum).ok(),
        }
    }

    /// Record an interruption signal that is pending (blocked, undelivered)
    /// on this thread.
    ///
    /// Priority is SIGINT, then SIGTERM, then SIGHUP. A recorded signal is
    /// also taken off the pending set through the flag handler, so restoring
    /// the default actions later cannot deliver it.
    pub fn record_pending(&self) -> Result<()> {
        let pending = pending_signals()?;
        let Some(signal) = INTERRUPTION_SIGNALS
            .into_iter()
            .find(|signal| is_member(&pending, *signal))
        else {
            return Ok(());
        };

        // Pending signals are delivered before the unblocking call returns.
        let set = interruption_set();
        pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&set), None)
            .map_err(|e| Error::os("sigprocmask", e))?;
        pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None)
            .map_err(|e| Error::os("sigprocmask", e))?;

        debug!(%signal, "Consumed pending interruption");
        INTERRUPTED.store(signal as i32, Ordering::SeqCst);
        Ok(())
    }

    /// Restore the previous handlers, then the previous mask.
    ///
    /// Calling this more than once is a no-op.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        for (signal, previous) in self.old_actions.drain(..) {
            // SAFETY: restoring an action previously returned by sigaction.
            unsafe { sigaction(signal, &previous) }.map_err(|e| Error::os("sigaction", e))?;
        }
        pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.old_mask), None)
            .map_err(|e| Error::os("sigprocmask", e))?;

        GUARD_HELD.store(false, Ordering::SeqCst);
        debug!("Interruption signal state restored");
        Ok(())
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            fatal(&err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;
    use serial_test::serial;

    fn current_mask() -> SigSet {
        let mut mask = SigSet::empty();
        pthread_sigmask(SigmaskHow::SIG_BLOCK, None, Some(&mut mask)).unwrap();
        mask
    }

    #[test]
    #[serial]
    fn test_acquire_blocks_and_release_restores() {
        let before = current_mask();
        let mut guard = SignalGuard::acquire().unwrap();

        let during = current_mask();
        for signal in INTERRUPTION_SIGNALS {
            assert!(during.contains(signal));
        }
        assert_eq!(
            guard.saved_mask().contains(Signal::SIGINT),
            before.contains(Signal::SIGINT)
        );

        guard.release().unwrap();
        let after = current_mask();
        for signal in INTERRUPTION_SIGNALS {
            assert_eq!(after.contains(signal), before.contains(signal));
        }
    }

    #[test]
    #[serial]
    fn test_nested_acquisition_is_rejected() {
        let _guard = SignalGuard::acquire().unwrap();
        assert!(matches!(SignalGuard::acquire(), Err(Error::SignalGuardHeld)));
    }

    #[test]
    #[serial]
    fn test_release_is_idempotent() {
        let mut guard = SignalGuard::acquire().unwrap();
        guard.release().unwrap();
        guard.release().unwrap();
        drop(guard);

        // The slot is free again.
        let _again = SignalGuard::acquire().unwrap();
    }

    #[test]
    #[serial]
    fn test_pending_signal_priority() {
        let guard = SignalGuard::acquire().unwrap();
        guard.reset();
        assert_eq!(guard.interrupted(), None);

        // Blocked on this thread, so both stay pending.
        raise(Signal::SIGHUP).unwrap();
        raise(Signal::SIGTERM).unwrap();
        guard.record_pending().unwrap();
        assert_eq!(guard.interrupted(), Some(Signal::SIGTERM));
    }

    #[test]
    #[serial]
    fn test_recorded_signal_is_no_longer_pending() {
        let mut guard = SignalGuard::acquire().unwrap();
        raise(Signal::SIGINT).unwrap();
        guard.record_pending().unwrap();
        assert_eq!(guard.interrupted(), Some(Signal::SIGINT));

        assert!(!is_member(&pending_signals().unwrap(), Signal::SIGINT));

        // With the default action back in place, a stale SIGINT would kill
        // the test binary here.
        guard.release().unwrap();
    }
}

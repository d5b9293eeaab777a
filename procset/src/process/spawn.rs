//! Shell command spawning via `posix_spawn`.
//!
//! The child's descriptor layout is described up front as spawn file actions,
//! so nothing runs in the parent's descriptor space and no user code runs
//! between fork and exec.

// posix_spawn and its attribute/file-action objects are only exposed by libc.
#![allow(unsafe_code)]

use std::ffi::{CStr, CString};
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use nix::sys::signal::SigSet;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{Error, Result};

const SHELL: &CStr = c"/bin/sh";
const DEV_NULL: &CStr = c"/dev/null";

/// Turn a `posix_spawn*` return code into a result.
fn check(op: &'static str, code: libc::c_int) -> Result<()> {
    if code == 0 {
        Ok(())
    } else {
        Err(Error::from_code(op, code))
    }
}

/// Owned `posix_spawn_file_actions_t`.
struct FileActions(libc::posix_spawn_file_actions_t);

impl FileActions {
    fn new() -> Result<Self> {
        let mut raw = MaybeUninit::uninit();
        // SAFETY: init fully initialises the object on success.
        check("posix_spawn_file_actions_init", unsafe {
            libc::posix_spawn_file_actions_init(raw.as_mut_ptr())
        })?;
        Ok(Self(unsafe { raw.assume_init() }))
    }

    fn add_close(&mut self, fd: RawFd) -> Result<()> {
        // SAFETY: self.0 was initialised by posix_spawn_file_actions_init.
        check("posix_spawn_file_actions_addclose", unsafe {
            libc::posix_spawn_file_actions_addclose(&mut self.0, fd)
        })
    }

    fn add_open(&mut self, fd: RawFd, path: &CStr, oflag: libc::c_int) -> Result<()> {
        // SAFETY: path is a valid NUL-terminated string that outlives the call.
        check("posix_spawn_file_actions_addopen", unsafe {
            libc::posix_spawn_file_actions_addopen(&mut self.0, fd, path.as_ptr(), oflag, 0)
        })
    }

    fn add_dup2(&mut self, fd: RawFd, target: RawFd) -> Result<()> {
        // SAFETY: self.0 was initialised by posix_spawn_file_actions_init.
        check("posix_spawn_file_actions_adddup2", unsafe {
            libc::posix_spawn_file_actions_adddup2(&mut self.0, fd, target)
        })
    }
}

impl Drop for FileActions {
    fn drop(&mut self) {
        // SAFETY: destroying an initialised object exactly once.
        let code = unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
        if code != 0 {
            warn!(
                "posix_spawn_file_actions_destroy: {}",
                io::Error::from_raw_os_error(code)
            );
        }
    }
}

/// Owned `posix_spawnattr_t`.
struct SpawnAttr(libc::posix_spawnattr_t);

impl SpawnAttr {
    fn new() -> Result<Self> {
        let mut raw = MaybeUninit::uninit();
        // SAFETY: init fully initialises the object on success.
        check("posix_spawnattr_init", unsafe {
            libc::posix_spawnattr_init(raw.as_mut_ptr())
        })?;
        Ok(Self(unsafe { raw.assume_init() }))
    }

    fn set_sigmask(&mut self, mask: &SigSet) -> Result<()> {
        // SAFETY: the mask is copied into the attribute object.
        check("posix_spawnattr_setsigmask", unsafe {
            libc::posix_spawnattr_setsigmask(&mut self.0, mask.as_ref())
        })
    }

    fn set_flags(&mut self, flags: libc::c_short) -> Result<()> {
        // SAFETY: self.0 was initialised by posix_spawnattr_init.
        check("posix_spawnattr_setflags", unsafe {
            libc::posix_spawnattr_setflags(&mut self.0, flags)
        })
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        // SAFETY: destroying an initialised object exactly once.
        let code = unsafe { libc::posix_spawnattr_destroy(&mut self.0) };
        if code != 0 {
            warn!(
                "posix_spawnattr_destroy: {}",
                io::Error::from_raw_os_error(code)
            );
        }
    }
}

/// Snapshot of the caller's environment as `KEY=VALUE` strings.
fn environment() -> Vec<CString> {
    std::env::vars_os()
        .filter_map(|(key, value)| {
            let mut entry = key.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(value.as_bytes());
            CString::new(entry).ok()
        })
        .collect()
}

/// Null-terminated pointer array over `strings`.
fn pointer_array(strings: &[CString]) -> Vec<*mut libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr().cast_mut())
        .chain(std::iter::once(ptr::null_mut()))
        .collect()
}

/// Pipe ends handed to a spawned shell.
#[derive(Debug, Clone, Copy)]
pub struct OutputPipe<'fd> {
    /// Parent's read end; closed in the child.
    pub read: BorrowedFd<'fd>,
    /// Write end; becomes the child's stdout and stderr.
    pub write: BorrowedFd<'fd>,
}

/// Spawn `/bin/sh -c <command>`.
///
/// The child starts with `mask` as its signal mask. Unless `console` is set,
/// it gets its own process group, stdin from `/dev/null`, and stdout/stderr
/// redirected into `pipe.write`. In console mode it inherits the terminal,
/// the process group, and the write end, which it closes on exit.
pub fn spawn_shell(
    command: &str,
    console: bool,
    mask: &SigSet,
    pipe: OutputPipe<'_>,
) -> Result<Pid> {
    let read_fd = pipe.read.as_raw_fd();
    let write_fd = pipe.write.as_raw_fd();

    let mut actions = FileActions::new()?;
    actions.add_close(read_fd)?;

    let mut attr = SpawnAttr::new()?;
    attr.set_sigmask(mask)?;
    // Caught signals revert to their default action in the new image, so
    // POSIX_SPAWN_SETSIGDEF is not needed.
    let mut flags = libc::POSIX_SPAWN_SETSIGMASK;

    if !console {
        // Own process group (pgroup 0 = the child's pid), so a terminal's
        // Ctrl-C does not reach it.
        flags |= libc::POSIX_SPAWN_SETPGROUP;

        actions.add_open(libc::STDIN_FILENO, DEV_NULL, libc::O_RDONLY)?;
        actions.add_dup2(write_fd, libc::STDOUT_FILENO)?;
        actions.add_dup2(write_fd, libc::STDERR_FILENO)?;
        actions.add_close(write_fd)?;
    }
    #[allow(clippy::cast_possible_truncation, clippy::unnecessary_cast)]
    let flags = flags as libc::c_short;
    attr.set_flags(flags)?;

    let command = CString::new(command).map_err(|e| Error::Os {
        op: "posix_spawn",
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })?;
    let args = [SHELL.to_owned(), c"-c".to_owned(), command];
    let argv = pointer_array(&args);
    let env = environment();
    let envp = pointer_array(&env);

    let mut pid: libc::pid_t = 0;
    // SAFETY: argv and envp are null-terminated arrays of valid C strings
    // that outlive the call; actions and attr are initialised.
    check("posix_spawn", unsafe {
        libc::posix_spawn(
            &mut pid,
            SHELL.as_ptr(),
            &actions.0,
            &attr.0,
            argv.as_ptr(),
            envp.as_ptr(),
        )
    })?;

    debug!(pid, console, "Spawned /bin/sh -c {:?}", args[2]);
    Ok(Pid::from_raw(pid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use std::io::Read;
    use std::os::fd::AsFd;

    fn run(command: &str) -> (String, WaitStatus) {
        let (read, write) = nix::unistd::pipe().unwrap();
        let pid = spawn_shell(
            command,
            false,
            &SigSet::empty(),
            OutputPipe {
                read: read.as_fd(),
                write: write.as_fd(),
            },
        )
        .unwrap();
        drop(write);

        let mut output = String::new();
        std::fs::File::from(read).read_to_string(&mut output).unwrap();
        (output, waitpid(pid, None).unwrap())
    }

    #[test]
    fn test_spawn_merges_streams() {
        let (output, status) = run("echo out; echo err 1>&2");
        assert_eq!(output, "out\nerr\n");
        assert!(matches!(status, WaitStatus::Exited(_, 0)));
    }

    #[test]
    fn test_spawn_stdin_is_null() {
        let (output, _) = run("cat; echo done");
        assert_eq!(output, "done\n");
    }

    #[test]
    fn test_spawn_passes_environment() {
        let (output, _) = run("echo ${PATH:+set}");
        assert_eq!(output, "set\n");
    }

    #[test]
    fn test_spawn_exit_code() {
        let (_, status) = run("exit 7");
        assert!(matches!(status, WaitStatus::Exited(_, 7)));
    }

    #[test]
    fn test_spawn_rejects_interior_nul() {
        let (read, write) = nix::unistd::pipe().unwrap();
        let err = spawn_shell(
            "echo a\0b",
            false,
            &SigSet::empty(),
            OutputPipe {
                read: read.as_fd(),
                write: write.as_fd(),
            },
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("posix_spawn: "));
    }
}

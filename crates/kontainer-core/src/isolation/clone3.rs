//! clone3 syscall wrapper and child reaping

use crate::{KontainerError, Result};
use nix::sched::CloneFlags;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fmt;

/// clone3 clone_args structure (from linux/sched.h)
#[repr(C)]
#[derive(Debug, Default)]
pub struct CloneArgs {
    /// Flags for the new process
    pub flags: u64,
    /// File descriptor for pidfd
    pub pidfd: u64,
    /// Pointer to the parent's copy of the child tid
    pub child_tid: u64,
    /// Pointer to the child's copy of the child tid
    pub parent_tid: u64,
    /// Signal to deliver on child termination
    pub exit_signal: u64,
    /// Stack pointer (0 = copy parent stack)
    pub stack: u64,
    /// Stack size (0 if using parent stack)
    pub stack_size: u64,
    /// TLS pointer
    pub tls: u64,
}

/// clone3 syscall number
const SYS_CLONE3: libc::c_long = 435;

/// Wrapper around the clone3 syscall
///
/// # Safety
/// This function makes a raw syscall and forks the process. The caller must
/// be single-threaded, since the child only inherits the calling thread.
pub unsafe fn clone3(args: &CloneArgs) -> Result<libc::pid_t> {
    // SAFETY: Making clone3 syscall with valid args
    let ret = unsafe {
        libc::syscall(
            SYS_CLONE3,
            std::ptr::from_ref(args),
            std::mem::size_of::<CloneArgs>(),
        )
    };

    if ret == -1 {
        return Err(KontainerError::Bootstrap(format!(
            "clone3 failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    libc::pid_t::try_from(ret)
        .map_err(|_| KontainerError::Bootstrap(format!("clone3 returned bad pid {ret}")))
}

/// Fork into new namespaces and run `child_fn` in the child.
///
/// The child `_exit`s with the code `child_fn` returns; it normally execs
/// before that. The parent drops `child_fn` unused.
pub fn clone_into_namespaces(
    namespace_flags: CloneFlags,
    child_fn: impl FnOnce() -> i32,
) -> Result<Pid> {
    let args = CloneArgs {
        flags: namespace_flags.bits() as u64,
        exit_signal: libc::SIGCHLD as u64,
        ..Default::default()
    };

    // SAFETY: We're forking the process with clone3
    let pid = unsafe { clone3(&args)? };

    if pid == 0 {
        // Child process
        let code = child_fn();
        // SAFETY: Exiting child process without running parent destructors
        unsafe { libc::_exit(code) };
    }

    // Parent process
    drop(child_fn);
    Ok(Pid::from_raw(pid))
}

/// How the child phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited(i32),
    Signaled(i32),
}

impl ExitOutcome {
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit status {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// Block until `pid` terminates
pub fn wait_child(pid: Pid) -> Result<ExitOutcome> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ExitOutcome::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                return Ok(ExitOutcome::Signaled(signal as i32));
            }
            Ok(_) | Err(nix::Error::EINTR) => {}
            Err(e) => {
                return Err(KontainerError::Execution(format!(
                    "failed to wait for child {pid}: {e}"
                )));
            }
        }
    }
}

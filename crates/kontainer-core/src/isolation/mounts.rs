//! Filesystem jail: hostname, chroot and the proc mount

use crate::{KontainerError, Result};
use nix::mount::{MsFlags, mount, umount};
use std::path::Path;

/// Mount point of proc, relative to the new root
pub const PROC_TARGET: &str = "proc";

/// Absolute proc path once the root has changed
pub const PROC_ABSOLUTE: &str = "/proc";

/// Set the hostname seen inside the UTS namespace
pub fn set_hostname(name: &str) -> Result<()> {
    tracing::debug!(hostname = name, "setting hostname");
    nix::unistd::sethostname(name)
        .map_err(|e| KontainerError::Bootstrap(format!("failed to set hostname {name}: {e}")))
}

/// Change root to `rootfs`, then move the working directory onto it.
///
/// Relative paths resolve against the old tree until the chdir, so the two
/// calls are never separated.
pub fn enter_root(rootfs: &Path) -> Result<()> {
    tracing::debug!(root = %rootfs.display(), "chroot");

    nix::unistd::chroot(rootfs).map_err(|e| {
        KontainerError::Bootstrap(format!("failed to chroot to {}: {e}", rootfs.display()))
    })?;

    nix::unistd::chdir("/")
        .map_err(|e| KontainerError::Bootstrap(format!("failed to chdir to /: {e}")))?;

    Ok(())
}

/// Mount a fresh procfs for the new pid namespace
pub fn mount_proc() -> Result<()> {
    tracing::debug!(path = PROC_TARGET, "mounting proc");
    mount(
        Some("proc"),
        PROC_TARGET,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| KontainerError::Bootstrap(format!("failed to mount proc: {e}")))
}

/// Unmount the procfs mounted by `mount_proc`
pub fn unmount_proc() -> Result<()> {
    tracing::debug!(path = PROC_ABSOLUTE, "unmounting proc");
    umount(PROC_ABSOLUTE)
        .map_err(|e| KontainerError::Teardown(format!("failed to unmount {PROC_ABSOLUTE}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{WaitStatus, waitpid};
    use nix::unistd::{ForkResult, fork};

    /// Run `f` in a forked child so the chroot does not leak into the test runner
    fn in_child(f: impl FnOnce() -> i32) -> i32 {
        // SAFETY: the child only makes syscalls and exits
        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                let code = f();
                // SAFETY: leave the forked test runner without unwinding
                unsafe { libc::_exit(code) }
            }
            ForkResult::Parent { child } => match waitpid(child, None).unwrap() {
                WaitStatus::Exited(_, code) => code,
                other => panic!("child did not exit: {other:?}"),
            },
        }
    }

    #[test]
    #[ignore = "needs CAP_SYS_CHROOT"]
    fn relative_paths_resolve_against_the_new_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("rootfs")).unwrap();
        std::fs::write(dir.path().join("rootfs/inside"), "").unwrap();
        std::fs::write(dir.path().join("outside"), "").unwrap();
        let workdir = dir.path().to_path_buf();

        let code = in_child(move || {
            if nix::unistd::chdir(&workdir).is_err() || enter_root(Path::new("./rootfs")).is_err() {
                return 2;
            }
            if !Path::new("inside").exists() {
                return 3;
            }
            if Path::new("outside").exists() || Path::new("rootfs").exists() {
                return 4;
            }
            0
        });

        assert_eq!(code, 0);
    }

    #[test]
    fn missing_root_is_bootstrap_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = enter_root(&dir.path().join("absent")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Bootstrap);
    }
}

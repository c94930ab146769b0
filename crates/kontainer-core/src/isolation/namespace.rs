//! Linux namespace isolation

use nix::sched::CloneFlags;

/// Namespaces requested when the child phase is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Create new user namespace
    pub user: bool,
    /// Create new PID namespace
    pub pid: bool,
    /// Create new mount namespace
    pub mount: bool,
    /// Create new UTS namespace
    pub uts: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            user: true,
            pid: true,
            mount: true,
            uts: true,
        }
    }
}

impl NamespaceConfig {
    /// Convert to nix CloneFlags
    #[must_use]
    pub fn to_clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();

        if self.user {
            flags |= CloneFlags::CLONE_NEWUSER;
        }
        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }

        flags
    }

    /// Flags unshared again by the new process before it execs
    #[must_use]
    pub fn unshare_flags(&self) -> CloneFlags {
        if self.mount {
            CloneFlags::CLONE_NEWNS
        } else {
            CloneFlags::empty()
        }
    }

    /// Apply the unshare flags to the calling process.
    ///
    /// Runs in the cloned child before exec, where only an errno can be
    /// reported back. A fresh mount namespace still shares propagation with
    /// the host, so `/` is made recursively private right after.
    pub fn unshare(&self) -> nix::Result<()> {
        let flags = self.unshare_flags();
        if flags.is_empty() {
            return Ok(());
        }

        nix::sched::unshare(flags)?;
        nix::mount::mount(
            None::<&str>,
            "/",
            None::<&str>,
            nix::mount::MsFlags::MS_REC | nix::mount::MsFlags::MS_PRIVATE,
            None::<&str>,
        )
    }
}

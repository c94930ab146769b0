//! Child phase: finish the jail inside the prepared namespaces and run the command

use crate::isolation::{Credentials, mounts};
use crate::{IsolationRequest, KontainerError, LaunchConfig, Mode, Result};
use std::path::Path;
use std::process::Command;

/// Kernel operations the child phase is made of
pub trait Jail {
    /// Whether the process is init of a fresh pid namespace
    fn is_namespace_init(&self) -> bool;
    fn set_hostname(&mut self, name: &str) -> Result<()>;
    /// chroot followed by chdir("/")
    fn enter_root(&mut self, rootfs: &Path) -> Result<()>;
    fn mount_proc(&mut self) -> Result<()>;
    /// Run to completion with inherited stdio; non-zero exit is an error
    fn run_command(&mut self, program: &str, args: &[String]) -> Result<()>;
    fn unmount_proc(&mut self) -> Result<()>;
}

/// The real thing
#[derive(Debug, Default)]
pub struct LinuxJail;

impl Jail for LinuxJail {
    fn is_namespace_init(&self) -> bool {
        std::process::id() == 1
    }

    fn set_hostname(&mut self, name: &str) -> Result<()> {
        mounts::set_hostname(name)
    }

    fn enter_root(&mut self, rootfs: &Path) -> Result<()> {
        mounts::enter_root(rootfs)
    }

    fn mount_proc(&mut self) -> Result<()> {
        mounts::mount_proc()
    }

    fn run_command(&mut self, program: &str, args: &[String]) -> Result<()> {
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| KontainerError::Execution(format!("failed to start {program}: {e}")))?;

        if status.success() {
            Ok(())
        } else {
            Err(KontainerError::Execution(format!("{program} {status}")))
        }
    }

    fn unmount_proc(&mut self) -> Result<()> {
        mounts::unmount_proc()
    }
}

/// Progress of the child phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrantState {
    Started,
    HostnameSet,
    Rooted,
    ProcMounted,
    Running,
    ProcUnmounted,
    Terminated { failed: bool },
}

/// Child phase of a launch
#[derive(Debug)]
pub struct Entrant<J = LinuxJail> {
    config: LaunchConfig,
    jail: J,
    state: EntrantState,
}

impl Entrant {
    #[must_use]
    pub fn new(config: LaunchConfig) -> Self {
        Self::with_jail(config, LinuxJail)
    }
}

impl<J: Jail> Entrant<J> {
    #[must_use]
    pub const fn with_jail(config: LaunchConfig, jail: J) -> Self {
        Self {
            config,
            jail,
            state: EntrantState::Started,
        }
    }

    #[must_use]
    pub const fn state(&self) -> EntrantState {
        self.state
    }

    /// Build the jail, run the command and unmount proc again.
    ///
    /// Refuses to start unless the process is init of its pid namespace,
    /// which holds exactly when the launcher created it.
    pub fn run(&mut self, request: &IsolationRequest) -> Result<()> {
        let result = self.enter_and_run(request);
        self.state = EntrantState::Terminated {
            failed: result.is_err(),
        };
        result
    }

    fn enter_and_run(&mut self, request: &IsolationRequest) -> Result<()> {
        if request.mode() != Mode::Child {
            return Err(KontainerError::Invocation(format!(
                "entrant cannot handle mode {}",
                request.mode()
            )));
        }
        if !self.jail.is_namespace_init() {
            return Err(KontainerError::Invocation(
                "child mode is internal; use run".into(),
            ));
        }

        let creds = Credentials::current();
        tracing::info!(
            pid = std::process::id(),
            uid = creds.uid,
            gid = creds.gid,
            program = request.program(),
            args = ?request.args(),
            "running command child"
        );

        self.jail.set_hostname(&self.config.hostname)?;
        self.state = EntrantState::HostnameSet;

        self.jail.enter_root(&self.config.rootfs)?;
        self.state = EntrantState::Rooted;

        self.jail.mount_proc()?;
        self.state = EntrantState::ProcMounted;

        tracing::info!(hostname = %self.config.hostname, "creating kontainer");
        self.state = EntrantState::Running;
        let ran = self.jail.run_command(request.program(), request.args());
        tracing::info!(ok = ran.is_ok(), "exiting kontainer");

        let unmounted = self.jail.unmount_proc();
        if unmounted.is_ok() {
            self.state = EntrantState::ProcUnmounted;
        }

        match (ran, unmounted) {
            (Err(e), Err(u)) => {
                tracing::warn!(error = %u, "proc unmount also failed");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(()), unmounted) => unmounted,
        }
    }
}

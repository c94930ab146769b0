//! Parent phase: re-execute into new namespaces and own the cgroup

use crate::isolation::clone3::{self, ExitOutcome};
use crate::isolation::{CgroupHandle, Credentials, IdMapping, NamespaceConfig};
use crate::pipe::{ChildFailure, ChildStage, SpawnPipes};
use crate::{IsolationRequest, KontainerError, LaunchConfig, Mode, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

/// Everything the kernel needs to create the child phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPlan {
    /// Executable to re-invoke
    pub exe: PathBuf,
    /// Arguments after argv[0]
    pub argv: Vec<String>,
    /// Namespaces attached at creation
    pub namespaces: NamespaceConfig,
    /// Written before the child is allowed to exec
    pub id_mapping: IdMapping,
}

/// Creates the child phase and waits for it
pub trait Spawn {
    fn spawn_and_wait(&mut self, plan: &SpawnPlan) -> Result<ExitOutcome>;
}

/// clone3 into the planned namespaces, then exec the plan
#[derive(Debug, Default)]
pub struct NamespacedSpawner;

impl Spawn for NamespacedSpawner {
    fn spawn_and_wait(&mut self, plan: &SpawnPlan) -> Result<ExitOutcome> {
        let pid = spawn(plan)?;
        tracing::debug!(%pid, "waiting for child");
        clone3::wait_child(pid)
    }
}

fn spawn(plan: &SpawnPlan) -> Result<Pid> {
    let exe = CString::new(plan.exe.as_os_str().as_bytes())
        .map_err(|e| KontainerError::Invocation(format!("invalid executable path: {e}")))?;
    let mut argv = Vec::with_capacity(plan.argv.len() + 1);
    argv.push(exe.clone());
    for arg in &plan.argv {
        argv.push(
            CString::new(arg.as_bytes())
                .map_err(|e| KontainerError::Invocation(format!("invalid argument {arg:?}: {e}")))?,
        );
    }

    let (mut parent, mut child) = SpawnPipes::new()?.split();
    let namespaces = plan.namespaces.clone();

    let pid = clone3::clone_into_namespaces(plan.namespaces.to_clone_flags(), move || {
        if !child.wait_release() {
            return 1;
        }
        if let Err(errno) = namespaces.unshare() {
            child.report(ChildFailure {
                stage: ChildStage::Unshare,
                errno: errno as i32,
            });
            return 127;
        }
        let errno = match nix::unistd::execv(&exe, &argv) {
            Ok(never) => match never {},
            Err(errno) => errno,
        };
        child.report(ChildFailure {
            stage: ChildStage::Exec,
            errno: errno as i32,
        });
        127
    })?;
    tracing::debug!(%pid, flags = ?plan.namespaces.to_clone_flags(), "child cloned");

    if let Err(e) = plan.id_mapping.apply(pid) {
        parent.abandon_child();
        reap(pid);
        return Err(e);
    }
    if let Err(e) = parent.release_child() {
        reap(pid);
        return Err(e);
    }

    settle_exec(parent.wait_exec(), pid)
}

/// Turn the exec report into the spawned pid; every failure leaves no child behind
fn settle_exec(report: Result<Option<ChildFailure>>, pid: Pid) -> Result<Pid> {
    match report {
        Ok(None) => Ok(pid),
        Ok(Some(failure)) => {
            // Already exiting with 127; only collect it.
            drop(clone3::wait_child(pid));
            let stage = match failure.stage {
                ChildStage::Unshare => "unshare mount namespace",
                ChildStage::Exec => "exec",
            };
            Err(KontainerError::Bootstrap(format!(
                "child failed to {stage}: {}",
                nix::errno::Errno::from_raw(failure.errno)
            )))
        }
        Err(e) => {
            reap(pid);
            Err(e)
        }
    }
}

fn reap(pid: Pid) {
    if let Err(e) = kill(pid, Signal::SIGKILL) {
        tracing::warn!(%pid, error = %e, "failed to kill child");
    }
    drop(clone3::wait_child(pid));
}

/// Parent phase of a launch
#[derive(Debug)]
pub struct Launcher<S = NamespacedSpawner> {
    config: LaunchConfig,
    creds: Credentials,
    spawner: S,
}

impl Launcher {
    /// Launcher for the calling process
    #[must_use]
    pub fn new(config: LaunchConfig) -> Self {
        Self::with_spawner(config, Credentials::current(), NamespacedSpawner)
    }
}

impl<S: Spawn> Launcher<S> {
    #[must_use]
    pub const fn with_spawner(config: LaunchConfig, creds: Credentials, spawner: S) -> Self {
        Self {
            config,
            creds,
            spawner,
        }
    }

    /// Plan the child phase for `request`
    #[must_use]
    pub fn plan(&self, request: &IsolationRequest) -> SpawnPlan {
        SpawnPlan {
            exe: self.config.self_exe.clone(),
            argv: request.child_argv(),
            namespaces: NamespaceConfig::default(),
            id_mapping: IdMapping::for_invoker(&self.creds),
        }
    }

    /// Run the request to completion.
    ///
    /// The cgroup, when provisioned, is released on every path out of the
    /// spawn. A child failure wins over a teardown failure; the latter is
    /// then only logged.
    pub fn run(&mut self, request: &IsolationRequest) -> Result<()> {
        if request.mode() != Mode::Run {
            return Err(KontainerError::Invocation(format!(
                "launcher cannot handle mode {}",
                request.mode()
            )));
        }

        tracing::info!(
            pid = std::process::id(),
            uid = self.creds.uid,
            gid = self.creds.gid,
            program = request.program(),
            args = ?request.args(),
            "running command parent"
        );

        let plan = self.plan(request);

        let cgroup = if self.creds.is_root() {
            Some(self.config.cgroup.create(std::process::id())?)
        } else {
            tracing::debug!(euid = self.creds.euid, "not host root, skipping cgroup");
            None
        };

        let outcome = self.spawner.spawn_and_wait(&plan);
        let teardown = cgroup.map_or(Ok(()), CgroupHandle::release);

        let failure = match outcome {
            Ok(outcome) if outcome.success() => None,
            Ok(outcome) => Some(KontainerError::Execution(format!("child {outcome}"))),
            Err(e) => Some(e),
        };

        match (failure, teardown) {
            (Some(e), Err(t)) => {
                tracing::warn!(error = %t, "teardown also failed");
                Err(e)
            }
            (Some(e), Ok(())) => Err(e),
            (None, teardown) => teardown,
        }
    }
}

//! UID/GID mappings for the user namespace

use crate::{KontainerError, Result};
use nix::unistd::{Gid, Pid, Uid};
use std::fmt;
use std::path::{Path, PathBuf};

/// Host identity of the invoking process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
}

impl Credentials {
    /// Credentials of the calling process
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: Uid::current().as_raw(),
            gid: Gid::current().as_raw(),
            euid: Uid::effective().as_raw(),
        }
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.euid == 0
    }
}

/// One row of `/proc/<pid>/uid_map` or `gid_map`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdMap {
    /// First id inside the namespace
    pub container_id: u32,
    /// First id on the host
    pub host_id: u32,
    /// Number of consecutive ids mapped
    pub size: u32,
}

impl fmt::Display for IdMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.container_id, self.host_id, self.size)
    }
}

/// UID and GID tables written for the child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdMapping {
    pub uid_map: Vec<IdMap>,
    pub gid_map: Vec<IdMap>,
}

impl IdMapping {
    /// Map container root to the invoking host uid/gid, one id each
    #[must_use]
    pub fn for_invoker(creds: &Credentials) -> Self {
        Self {
            uid_map: vec![IdMap {
                container_id: 0,
                host_id: creds.uid,
                size: 1,
            }],
            gid_map: vec![IdMap {
                container_id: 0,
                host_id: creds.gid,
                size: 1,
            }],
        }
    }

    /// Write the mappings for a running process
    pub fn apply(&self, pid: Pid) -> Result<()> {
        self.write_to(&PathBuf::from(format!("/proc/{pid}")))
    }

    /// Write `uid_map`, `setgroups` and `gid_map` under `proc_dir`.
    ///
    /// An unprivileged writer may only set `gid_map` once `setgroups` is denied.
    pub fn write_to(&self, proc_dir: &Path) -> Result<()> {
        write_file(&proc_dir.join("uid_map"), &render(&self.uid_map))?;
        write_file(&proc_dir.join("setgroups"), "deny")?;
        write_file(&proc_dir.join("gid_map"), &render(&self.gid_map))?;

        tracing::debug!(
            dir = %proc_dir.display(),
            uid_map = %render(&self.uid_map).trim_end(),
            gid_map = %render(&self.gid_map).trim_end(),
            "wrote id mappings"
        );
        Ok(())
    }
}

fn render(entries: &[IdMap]) -> String {
    entries.iter().map(|entry| format!("{entry}\n")).collect()
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|e| {
        KontainerError::Bootstrap(format!("failed to write {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(uid: u32, gid: u32) -> Credentials {
        Credentials { uid, gid, euid: uid }
    }

    #[test]
    fn maps_root_to_the_invoking_ids() {
        let mapping = IdMapping::for_invoker(&creds(1000, 100));
        assert_eq!(
            mapping.uid_map,
            vec![IdMap {
                container_id: 0,
                host_id: 1000,
                size: 1
            }]
        );
        assert_eq!(mapping.gid_map[0].host_id, 100);
        assert_eq!(mapping.gid_map.len(), 1);
    }

    #[test]
    fn different_invokers_get_different_tables() {
        let a = IdMapping::for_invoker(&creds(1000, 1000));
        let b = IdMapping::for_invoker(&creds(1001, 1001));
        assert_ne!(a, b);
    }

    #[test]
    fn writes_proc_files() {
        let dir = tempfile::tempdir().unwrap();
        IdMapping::for_invoker(&creds(1000, 50))
            .write_to(dir.path())
            .unwrap();

        let read = |name: &str| std::fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("uid_map"), "0 1000 1\n");
        assert_eq!(read("setgroups"), "deny");
        assert_eq!(read("gid_map"), "0 50 1\n");
    }

    #[test]
    fn missing_proc_dir_is_bootstrap_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = IdMapping::for_invoker(&creds(1, 1))
            .write_to(&dir.path().join("gone"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Bootstrap);
    }
}

//! Process-count control group scoped to one launch

use crate::{KontainerError, Result};
use std::io;
use std::path::{Path, PathBuf};

const PIDS_MAX: &str = "pids.max";
const NOTIFY_ON_RELEASE: &str = "notify_on_release";
const CGROUP_PROCS: &str = "cgroup.procs";

/// Where and how the pids control group is created
#[derive(Debug, Clone)]
pub struct CgroupConfig {
    /// Mounted pids controller hierarchy
    pub root: PathBuf,
    /// Directory name of the group under `root`
    pub name: String,
    /// Maximum number of processes (pids.max)
    pub pids_max: u32,
    /// Kernel release notification (notify_on_release)
    pub notify_on_release: bool,
}

impl Default for CgroupConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sys/fs/cgroup/pids"),
            name: "kontainer".into(),
            pids_max: 20,
            notify_on_release: true,
        }
    }
}

impl CgroupConfig {
    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.root.join(&self.name)
    }

    /// Group `pid` currently belongs to in this hierarchy, per `/proc/<pid>/cgroup`.
    ///
    /// Falls back to the hierarchy root when the pids controller is not listed.
    #[must_use]
    pub fn membership_of(&self, pid: u32) -> PathBuf {
        std::fs::read_to_string(format!("/proc/{pid}/cgroup"))
            .ok()
            .and_then(|contents| pids_membership(&contents).map(str::to_owned))
            .map_or_else(
                || self.root.clone(),
                |group| self.root.join(group.trim_start_matches('/')),
            )
    }

    /// Create the group, apply limits and move `pid` into it.
    ///
    /// A group left behind by an earlier run is reused. If any write fails
    /// the returned error is a bootstrap error and the directory is removed
    /// again when the half-built handle drops.
    pub fn create(&self, pid: u32) -> Result<CgroupHandle> {
        self.create_from(pid, self.membership_of(pid))
    }

    /// As `create`, with `origin` as the group `pid` returns to on release
    pub fn create_from(&self, pid: u32, origin: PathBuf) -> Result<CgroupHandle> {
        let path = self.path();
        tracing::debug!(
            path = %path.display(),
            pids = self.pids_max,
            notify_on_release = self.notify_on_release,
            "creating cgroup"
        );

        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "reusing existing cgroup");
            }
            Err(e) => {
                return Err(KontainerError::Bootstrap(format!(
                    "failed to create cgroup {}: {e}",
                    path.display()
                )));
            }
        }

        let handle = CgroupHandle {
            origin,
            path,
            pid,
            released: false,
        };
        handle.write(PIDS_MAX, &self.pids_max.to_string())?;
        handle.write(
            NOTIFY_ON_RELEASE,
            if self.notify_on_release { "1" } else { "0" },
        )?;
        handle.write(CGROUP_PROCS, &pid.to_string())?;

        tracing::info!(cgroup = %handle.path.display(), pid, "cgroup provisioned");
        Ok(handle)
    }
}

/// Live control group; removed by `release` or, failing that, on drop
#[derive(Debug)]
pub struct CgroupHandle {
    /// Group the member came from
    origin: PathBuf,
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl CgroupHandle {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, file: &str, value: &str) -> Result<()> {
        let target = self.path.join(file);
        std::fs::write(&target, value).map_err(|e| {
            KontainerError::Bootstrap(format!("failed to write {}: {e}", target.display()))
        })
    }

    /// Destroy the cgroup
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove().map_err(|e| {
            KontainerError::Teardown(format!(
                "failed to remove cgroup {}: {e}",
                self.path.display()
            ))
        })?;
        tracing::info!(cgroup = %self.path.display(), "cgroup removed");
        Ok(())
    }

    fn remove(&self) -> io::Result<()> {
        // rmdir is refused while a member remains, and the launcher is one.
        if let Err(e) = std::fs::write(self.origin.join(CGROUP_PROCS), self.pid.to_string()) {
            tracing::warn!(
                pid = self.pid,
                origin = %self.origin.display(),
                error = %e,
                "failed to return to original cgroup"
            );
        }

        match std::fs::remove_dir(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

/// Path of the pids controller line in a `/proc/<pid>/cgroup` listing
fn pids_membership(contents: &str) -> Option<&str> {
    contents.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        let _id = fields.next()?;
        let controllers = fields.next()?;
        let path = fields.next()?;
        controllers
            .split(',')
            .any(|controller| controller == "pids")
            .then_some(path)
    })
}

impl Drop for CgroupHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove() {
            tracing::warn!(cgroup = %self.path.display(), error = %e, "failed to remove cgroup on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn config(root: &Path) -> CgroupConfig {
        CgroupConfig {
            root: root.to_path_buf(),
            ..CgroupConfig::default()
        }
    }

    /// cgroupfs drops its control files with the directory; a tempdir does not.
    fn forget_control_files(group: &Path) {
        for file in [PIDS_MAX, NOTIFY_ON_RELEASE, CGROUP_PROCS] {
            drop(std::fs::remove_file(group.join(file)));
        }
    }

    #[test]
    fn create_writes_limits_and_membership() {
        let root = tempfile::tempdir().unwrap();
        let origin = root.path().join("user.slice");
        std::fs::create_dir(&origin).unwrap();
        let handle = config(root.path()).create_from(4242, origin.clone()).unwrap();

        let read = |name: &str| std::fs::read_to_string(handle.path().join(name)).unwrap();
        assert_eq!(read("pids.max"), "20");
        assert_eq!(read("notify_on_release"), "1");
        assert_eq!(read("cgroup.procs"), "4242");

        let path = handle.path().to_path_buf();
        forget_control_files(&path);
        handle.release().unwrap();
        assert!(!path.exists());
        assert_eq!(
            std::fs::read_to_string(origin.join("cgroup.procs")).unwrap(),
            "4242"
        );
        assert!(!root.path().join("cgroup.procs").exists());
    }

    #[test]
    fn existing_group_is_reused() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("kontainer")).unwrap();
        let handle = config(root.path()).create(1).unwrap();
        forget_control_files(handle.path());
        handle.release().unwrap();
        assert!(!root.path().join("kontainer").exists());
    }

    #[test]
    fn dropped_handle_removes_group() {
        let root = tempfile::tempdir().unwrap();
        let handle = config(root.path()).create(7).unwrap();
        let path = handle.path().to_path_buf();
        forget_control_files(&path);
        drop(handle);
        assert!(!path.exists());
    }

    #[test]
    fn leftover_files_make_release_a_teardown_error() {
        let root = tempfile::tempdir().unwrap();
        let handle = config(root.path()).create(7).unwrap();
        let err = handle.release().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Teardown);
    }

    #[test]
    fn failed_write_is_bootstrap_error() {
        let root = tempfile::tempdir().unwrap();
        let group = root.path().join("kontainer");
        std::fs::create_dir(&group).unwrap();
        // A directory where a control file should be makes the write fail.
        std::fs::create_dir(group.join("notify_on_release")).unwrap();

        let err = config(root.path()).create(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bootstrap);
        assert!(err.to_string().contains("notify_on_release"));
    }

    #[test]
    fn missing_hierarchy_is_bootstrap_error() {
        let root = tempfile::tempdir().unwrap();
        let err = config(&root.path().join("absent")).create(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Bootstrap);
    }

    #[test]
    fn pids_line_is_found_among_v1_controllers() {
        let listing = "\
12:memory:/user.slice
7:pids:/user.slice/user-1000.slice/session-2.scope
3:cpu,cpuacct:/
";
        assert_eq!(
            pids_membership(listing),
            Some("/user.slice/user-1000.slice/session-2.scope")
        );
    }

    #[test]
    fn unified_hierarchy_has_no_pids_line() {
        assert_eq!(pids_membership("0::/user.slice\n"), None);

        let config = config(Path::new("/sys/fs/cgroup/pids"));
        // No such process: falls back to the hierarchy root.
        assert_eq!(
            config.membership_of(u32::MAX),
            Path::new("/sys/fs/cgroup/pids")
        );
    }

    #[test]
    fn membership_is_joined_under_the_hierarchy_root() {
        let config = config(Path::new("/sys/fs/cgroup/pids"));
        let listing = "5:pids:/system.slice\n";
        let group = pids_membership(listing).unwrap();
        assert_eq!(
            config.root.join(group.trim_start_matches('/')),
            Path::new("/sys/fs/cgroup/pids/system.slice")
        );
    }
}

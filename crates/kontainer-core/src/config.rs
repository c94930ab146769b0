//! Launch configuration

use crate::isolation::CgroupConfig;
use std::path::PathBuf;

/// Fixed parameters of one container launch
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// Executable re-invoked for the child phase
    pub self_exe: PathBuf,

    /// Root filesystem, relative to the launcher's working directory
    pub rootfs: PathBuf,

    /// Hostname set inside the UTS namespace
    pub hostname: String,

    /// Process-count control group, only used when running as host root
    pub cgroup: CgroupConfig,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            self_exe: PathBuf::from("/proc/self/exe"),
            rootfs: PathBuf::from("./rootfs"),
            hostname: "kontainer".into(),
            cgroup: CgroupConfig::default(),
        }
    }
}

impl LaunchConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> LaunchConfigBuilder {
        LaunchConfigBuilder::default()
    }
}

/// Builder for `LaunchConfig`
#[derive(Debug, Default)]
pub struct LaunchConfigBuilder {
    config: LaunchConfig,
}

impl LaunchConfigBuilder {
    #[must_use]
    pub fn self_exe(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.self_exe = path.into();
        self
    }

    #[must_use]
    pub fn rootfs(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.rootfs = path.into();
        self
    }

    #[must_use]
    pub fn hostname(mut self, name: impl Into<String>) -> Self {
        self.config.hostname = name.into();
        self
    }

    /// Parent directory the control group is created under
    #[must_use]
    pub fn cgroup_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.cgroup.root = path.into();
        self
    }

    #[must_use]
    pub fn pids_max(mut self, max: u32) -> Self {
        self.config.cgroup.pids_max = max;
        self
    }

    #[must_use]
    pub fn build(self) -> LaunchConfig {
        self.config
    }
}

//! Linux isolation primitives
//!
//! This module contains the pieces the two bootstrap phases are built from:
//! - `clone3` - clone3 syscall for creating the child phase
//! - `namespace` - namespace flags requested at creation time
//! - `idmap` - UID/GID mappings for the user namespace
//! - `cgroups` - pids control group scoped to one launch
//! - `mounts` - hostname, chroot and proc mount inside the jail

pub mod cgroups;
pub mod clone3;
pub mod idmap;
pub mod mounts;
pub mod namespace;

pub use self::cgroups::{CgroupConfig, CgroupHandle};
pub use self::clone3::ExitOutcome;
pub use self::idmap::{Credentials, IdMap, IdMapping};
pub use self::namespace::NamespaceConfig;

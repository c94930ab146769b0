//! # kontainer-core
//!
//! Two-phase bootstrap for a minimal Linux container.
//!
//! - `run`: the launcher re-executes itself via clone3 into new UTS, PID,
//!   mount and user namespaces, maps container root to the invoking user and,
//!   when running as host root, confines itself and the child to a pids
//!   cgroup for the length of the run.
//! - `child`: the entrant, already inside those namespaces, sets the
//!   hostname, chroots into `./rootfs`, mounts proc, runs the command and
//!   unmounts proc again.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod entrant;
pub mod error;
pub mod isolation;
pub mod launcher;
pub mod pipe;
pub mod request;

pub use config::LaunchConfig;
pub use entrant::{Entrant, EntrantState};
pub use error::{ErrorKind, KontainerError};
pub use launcher::Launcher;
pub use request::{IsolationRequest, Mode};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, KontainerError>;

/// Run whichever phase `request` selects
pub fn dispatch(request: &IsolationRequest, config: LaunchConfig) -> Result<()> {
    match request.mode() {
        Mode::Run => Launcher::new(config).run(request),
        Mode::Child => Entrant::new(config).run(request),
    }
}

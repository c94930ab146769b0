//! Error types for kontainer-core
//!
//! Every failure is fatal. The variants only say which stage of the
//! bootstrap produced it, so the top-level handler can report
//! "your command failed" apart from "cleanup failed".

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KontainerError {
    #[error("invocation error: {0}")]
    Invocation(String),

    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("teardown error: {0}")]
    Teardown(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
}

/// Stage of the bootstrap an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Invocation,
    Bootstrap,
    Execution,
    Teardown,
}

impl KontainerError {
    /// Classify the error. Bare io/nix errors only surface from setup code.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Invocation(_) => ErrorKind::Invocation,
            Self::Bootstrap(_) | Self::Io(_) | Self::Nix(_) => ErrorKind::Bootstrap,
            Self::Execution(_) => ErrorKind::Execution,
            Self::Teardown(_) => ErrorKind::Teardown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Invocation => "invocation",
            Self::Bootstrap => "bootstrap",
            Self::Execution => "execution",
            Self::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_nix_errors_count_as_bootstrap() {
        let io = KontainerError::from(std::io::Error::other("boom"));
        assert_eq!(io.kind(), ErrorKind::Bootstrap);

        let nix = KontainerError::from(nix::Error::EPERM);
        assert_eq!(nix.kind(), ErrorKind::Bootstrap);
    }

    #[test]
    fn teardown_is_distinct_from_execution() {
        let teardown = KontainerError::Teardown("rmdir failed".into());
        let execution = KontainerError::Execution("exit status 1".into());
        assert_ne!(teardown.kind(), execution.kind());
        assert_eq!(teardown.to_string(), "teardown error: rmdir failed");
    }
}

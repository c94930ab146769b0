//! Pipe handshake between the launcher and the freshly cloned child
//!
//! Two close-on-exec pipes:
//! - sync: the launcher releases the child once its id mappings are written
//! - error: the child reports a failed pre-exec step; EOF means exec succeeded

use crate::{KontainerError, Result};
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::OwnedFd;

/// Pre-exec step that failed in the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStage {
    Unshare,
    Exec,
}

impl ChildStage {
    const fn to_byte(self) -> u8 {
        match self {
            Self::Unshare => 1,
            Self::Exec => 2,
        }
    }

    const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Unshare),
            2 => Some(Self::Exec),
            _ => None,
        }
    }
}

/// Failure reported by the child before it became the entrant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildFailure {
    pub stage: ChildStage,
    pub errno: i32,
}

impl ChildFailure {
    fn encode(self) -> [u8; 5] {
        let mut buf = [0u8; 5];
        buf[0] = self.stage.to_byte();
        buf[1..].copy_from_slice(&self.errno.to_be_bytes());
        buf
    }

    fn decode(buf: [u8; 5]) -> Option<Self> {
        let stage = ChildStage::from_byte(buf[0])?;
        let errno = i32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        Some(Self { stage, errno })
    }
}

/// Both pipes, before the process splits
#[derive(Debug)]
pub struct SpawnPipes {
    sync_rx: File,
    sync_tx: File,
    error_rx: File,
    error_tx: File,
}

impl SpawnPipes {
    /// Create both pipes
    pub fn new() -> Result<Self> {
        let (sync_rx, sync_tx) = create_pipe()?;
        let (error_rx, error_tx) = create_pipe()?;

        Ok(Self {
            sync_rx,
            sync_tx,
            error_rx,
            error_tx,
        })
    }

    /// Split into launcher and child ends
    pub fn split(self) -> (ParentPipe, ChildPipe) {
        let parent = ParentPipe {
            sync_tx: Some(self.sync_tx),
            error_rx: self.error_rx,
        };

        let child = ChildPipe {
            sync_rx: self.sync_rx,
            error_tx: self.error_tx,
        };

        (parent, child)
    }
}

/// Launcher end
#[derive(Debug)]
pub struct ParentPipe {
    sync_tx: Option<File>,
    error_rx: File,
}

impl ParentPipe {
    /// Let the child continue towards exec
    pub fn release_child(&mut self) -> Result<()> {
        let mut tx = self
            .sync_tx
            .take()
            .ok_or_else(|| KontainerError::Bootstrap("child already released".into()))?;
        tx.write_all(&[1])?;
        tx.flush()?;
        Ok(())
    }

    /// Abort the handshake; the child sees EOF and exits
    pub fn abandon_child(&mut self) {
        drop(self.sync_tx.take());
    }

    /// Block until the child has exec'd (`None`) or reported a failure.
    ///
    /// Must only be called once the launcher's copy of the child end is closed.
    pub fn wait_exec(mut self) -> Result<Option<ChildFailure>> {
        drop(self.sync_tx.take());

        let mut buf = [0u8; 5];
        let mut filled = 0;
        while filled < buf.len() {
            match self.error_rx.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        match filled {
            0 => Ok(None),
            5 => ChildFailure::decode(buf).map(Some).ok_or_else(|| {
                KontainerError::Bootstrap("malformed failure report from child".into())
            }),
            n => Err(KontainerError::Bootstrap(format!(
                "truncated failure report from child ({n} bytes)"
            ))),
        }
    }
}

/// Child end
#[derive(Debug)]
pub struct ChildPipe {
    sync_rx: File,
    error_tx: File,
}

impl ChildPipe {
    /// Wait for the launcher; false if it gave up instead
    pub fn wait_release(&mut self) -> bool {
        let mut byte = [0u8; 1];
        loop {
            match self.sync_rx.read(&mut byte) {
                Ok(1) => return true,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                _ => return false,
            }
        }
    }

    /// Tell the launcher which step failed
    pub fn report(&mut self, failure: ChildFailure) {
        // Nothing left to do with a write error: the child exits next.
        let _ = self.error_tx.write_all(&failure.encode());
    }
}

/// Create a pipe (returns read end, write end)
fn create_pipe() -> Result<(File, File)> {
    let (read_end, write_end): (OwnedFd, OwnedFd) =
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)?;

    Ok((File::from(read_end), File::from(write_end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_error_pipe_means_exec_succeeded() {
        let (parent, child) = SpawnPipes::new().unwrap().split();
        drop(child);
        assert_eq!(parent.wait_exec().unwrap(), None);
    }

    #[test]
    fn reported_failure_reaches_the_launcher() {
        let (mut parent, mut child) = SpawnPipes::new().unwrap().split();
        parent.release_child().unwrap();
        assert!(child.wait_release());

        child.report(ChildFailure {
            stage: ChildStage::Exec,
            errno: libc::ENOENT,
        });
        drop(child);

        let failure = parent.wait_exec().unwrap().unwrap();
        assert_eq!(failure.stage, ChildStage::Exec);
        assert_eq!(failure.errno, libc::ENOENT);
    }

    #[test]
    fn abandoned_child_is_not_released() {
        let (mut parent, mut child) = SpawnPipes::new().unwrap().split();
        parent.abandon_child();
        assert!(!child.wait_release());
    }
}

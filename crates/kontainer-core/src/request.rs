//! Isolation request: the positional invocation split into its parts

use crate::{KontainerError, Result};
use std::fmt;
use std::str::FromStr;

/// Selector for the two bootstrap phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// User-facing entry point
    Run,
    /// Internal re-entry point, only valid inside namespaces prepared by `Run`
    Child,
}

impl Mode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Child => "child",
        }
    }
}

impl FromStr for Mode {
    type Err = KontainerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "run" => Ok(Self::Run),
            "child" => Ok(Self::Child),
            other => Err(KontainerError::Invocation(format!(
                "unexpected command -> {other}"
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{mode, program, args}` as supplied by the invoker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsolationRequest {
    mode: Mode,
    program: String,
    args: Vec<String>,
}

impl IsolationRequest {
    /// Build a request from an already split invocation.
    ///
    /// Fails with an invocation error for an unknown mode or an empty program.
    pub fn new(mode: &str, program: impl Into<String>, args: Vec<String>) -> Result<Self> {
        let mode = mode.parse()?;
        let program = program.into();
        if program.is_empty() {
            return Err(KontainerError::Invocation("missing command".into()));
        }
        Ok(Self {
            mode,
            program,
            args,
        })
    }

    /// Parse `<mode> <command> [args...]`, without the executable name.
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let mode = args
            .next()
            .ok_or_else(|| KontainerError::Invocation("missing mode".into()))?;
        let program = args
            .next()
            .ok_or_else(|| KontainerError::Invocation("missing command".into()))?;
        Self::new(&mode, program, args.collect())
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Arguments for the re-executed child phase
    #[must_use]
    pub fn child_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(Mode::Child.as_str().to_owned());
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn unknown_modes_are_invocation_errors() {
        for mode in ["", "Run", "exec", "children", "--run"] {
            let err = IsolationRequest::new(mode, "echo", vec![]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Invocation, "mode {mode:?}");
        }
    }

    #[test]
    fn child_argv_keeps_command_and_args_in_order() {
        let request =
            IsolationRequest::from_args(["run", "ls", "-la", "/tmp", "--", "x"]).unwrap();
        assert_eq!(request.mode(), Mode::Run);
        assert_eq!(
            request.child_argv(),
            vec!["child", "ls", "-la", "/tmp", "--", "x"]
        );
    }

    #[test]
    fn missing_command_is_rejected() {
        let err = IsolationRequest::from_args(["run"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invocation);
        let err = IsolationRequest::from_args(Vec::<String>::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invocation);
    }

    #[test]
    fn child_mode_round_trips_through_display() {
        let mode: Mode = Mode::Child.to_string().parse().unwrap();
        assert_eq!(mode, Mode::Child);
    }
}

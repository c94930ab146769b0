//! kontainer CLI - run a command in a minimal container

use clap::Parser;
use kontainer_core::{IsolationRequest, LaunchConfig};
use std::io::IsTerminal;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kontainer")]
#[command(author, version, about = "Run a command in new namespaces rooted at ./rootfs")]
// Flags after the mode belong to the user command, so clap must not claim them.
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Cli {
    /// `run` (`child` is internal and only used by `run`)
    mode: String,

    /// Command to execute in the container, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kontainer=info")),
        )
        .init();

    let cli = Cli::parse();

    let result = IsolationRequest::from_args(std::iter::once(cli.mode).chain(cli.command))
        .and_then(|request| kontainer_core::dispatch(&request, LaunchConfig::default()));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(kind = %e.kind(), "fatal");
            eprintln!("kontainer: {e}");
            ExitCode::FAILURE
        }
    }
}

//! qsession CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use qsession_cli::commands::{dispatch, exit_code_for, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr, the guest console owns stdout
    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code_for(e.as_ref())
        }
    };
    std::process::exit(code);
}

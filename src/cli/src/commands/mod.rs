//! CLI command definitions and dispatch.

mod mac;
mod run;

pub use run::{build_config, RunArgs};

use clap::{Parser, Subcommand};
use qsession_core::error::SessionError;

/// Exit code for a session aborted by SIGINT / SIGTERM.
pub const EXIT_ABORTED: i32 = 130;

/// qsession - QEMU session orchestrator.
#[derive(Parser)]
#[command(name = "qsession", version, about)]
pub struct Cli {
    /// Verbose output (debug logs, helper daemon logs)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Boot a disk image and wait for the VM to exit
    Run(run::RunArgs),
    /// Print the guest MAC address derived for this host
    Mac(mac::MacArgs),
}

/// Dispatch a parsed CLI and return the process exit code.
pub async fn dispatch(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Run(args) => run::execute(args, cli.verbose).await,
        Command::Mac(args) => mac::execute(args).await,
    }
}

/// Exit code for an error that ended the command.
pub fn exit_code_for(error: &(dyn std::error::Error + 'static)) -> i32 {
    match error.downcast_ref::<SessionError>() {
        Some(SessionError::Aborted) => EXIT_ABORTED,
        Some(e) => {
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {hint}");
            }
            1
        }
        None => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_for_aborted() {
        let err: Box<dyn std::error::Error> = Box::new(SessionError::Aborted);
        assert_eq!(exit_code_for(err.as_ref()), EXIT_ABORTED);
    }

    #[test]
    fn test_exit_code_for_config_error() {
        let err: Box<dyn std::error::Error> =
            Box::new(SessionError::ConfigError("bad forward".to_string()));
        assert_eq!(exit_code_for(err.as_ref()), 1);

        let err: Box<dyn std::error::Error> = "plain".into();
        assert_eq!(exit_code_for(err.as_ref()), 1);
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "qsession",
            "-v",
            "run",
            "disk.qcow2",
            "--forward",
            "8080:80",
            "--",
            "-serial",
            "mon:stdio",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.forward.as_deref(), Some("8080:80"));
                assert_eq!(args.extra, vec!["-serial", "mon:stdio"]);
            }
            Command::Mac(_) => panic!("expected run"),
        }
    }
}

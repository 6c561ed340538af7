//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`] or [`validate`]. Each handler lives in its
//! own submodule.

pub mod run;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::RelayError;

pub async fn dispatch(cli: Cli) -> Result<(), RelayError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Validate(ref args)) => validate::execute(args),
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  mtls-relay v{version}: mutual-TLS capable reverse proxy\n\n  \
         No command provided. To get started:\n\n    \
         mtls-relay run                    Start the relay (auto-detects ./mtls-relay.yaml)\n    \
         mtls-relay run -c relay.yaml      Start with a specific config file\n    \
         mtls-relay validate relay.yaml    Check a config file\n    \
         mtls-relay --help                 See all commands and options\n"
    );
}

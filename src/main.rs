//! The `server` binary
//!
//! Resolves configuration (defaults, JSON file, CLI flags, environment),
//! installs logging, and runs the dual-protocol server with the built-in
//! router. Configuration problems go to stderr with a non-zero exit.

use h2serve::config::{self, CliAction, Config, USAGE};
use h2serve::logging;
use h2serve::router::DefaultRouter;
use h2serve::server::Server;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let cli = match config::parse_args(&args) {
        Ok(CliAction::Help) => {
            print!("{}", USAGE);
            return ExitCode::SUCCESS;
        }
        Ok(CliAction::Run(overrides)) => overrides,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!();
            eprint!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    let env = match config::from_env() {
        Ok(overrides) => overrides,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = match Config::resolve(cli, env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    logging::init(config.log_level, config.log_format);

    let server = match Server::new(config, Arc::new(DefaultRouter)) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run() {
        error!(error = %e, "server terminated");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

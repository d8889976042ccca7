//! Universal-variable daemon entrypoint.

use clap::Parser;
use core_uvar::{DaemonConfig, SocketSetup};
use std::process::ExitCode;
use tracing::error;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "brined", version, about = "universal variable daemon")]
struct Args {
    /// Stay attached to the terminal instead of daemonising.
    #[arg(long, short = 'F')]
    foreground: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = DaemonConfig {
        socket_path: core_config::socket_path(),
        legacy_socket_path: Some(core_config::legacy_socket_path()),
        vars_dir: core_config::config_dir(),
        machine_id: core_uvar::machine_identifier(),
    };

    let listener = match core_uvar::acquire_socket(&config) {
        // A live sibling already serves this user.
        Ok(SocketSetup::SiblingRunning) => return ExitCode::SUCCESS,
        Ok(SocketSetup::Listener(listener)) => listener,
        Err(e) => {
            error!(target: "uvar.daemon", %e, "socket_setup_failed");
            return ExitCode::FAILURE;
        }
    };

    if !args.foreground {
        if let Err(e) = core_uvar::daemonize() {
            error!(target: "uvar.daemon", %e, "daemonize_failed");
            return ExitCode::FAILURE;
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(target: "uvar.daemon", %e, "runtime_build_failed");
            return ExitCode::FAILURE;
        }
    };
    match runtime.block_on(core_uvar::run(listener, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "uvar.daemon", %e, "daemon_failed");
            ExitCode::FAILURE
        }
    }
}

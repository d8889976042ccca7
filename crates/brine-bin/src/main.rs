//! brine entrypoint: interactive reader composition.

use anyhow::Result;
use clap::Parser;
use core_argspec::ArgSpecRegistry;
use core_events::{EVENT_CHANNEL_CAP, Event, EventSourceRegistry, TickEventSource};
use core_functions::{Autoload, FunctionRegistry};
use core_history::HistorySession;
use core_terminal::CrosstermBackend;
use core_uvar::UvarClient;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod executor;
mod pager;
mod reader;

use reader::{Flow, Reader};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "brine", version, about = "brine interactive shell")]
struct Args {
    /// Prompt string.
    #[arg(long, default_value = "> ")]
    prompt: String,
    /// Configuration file path (overrides discovery of `brine.toml`).
    #[arg(long = "config")]
    config: Option<std::path::PathBuf>,
    /// Skip connecting to the universal-variable broker.
    #[arg(long)]
    no_universal: bool,
}

/// Grammar for the `set` builtin; registered at startup so switch
/// validation and option completion have something to consult out of the
/// box.
const SET_DOC: &str = "\
Usage: set [options] <name> <value>...
Options:
  -U, --universal  Share the variable with all sessions
  -x, --export  Export to child processes
  -e, --erase  Erase the variable
  -l, --local  Scope the variable to the current block
";

async fn connect_uvar() -> Option<UvarClient> {
    let path = core_config::socket_path();
    match UvarClient::connect(&path).await {
        Ok(client) => Some(client),
        Err(_) => {
            // No broker yet: start one and retry briefly.
            let _ = std::process::Command::new("brined").spawn();
            for _ in 0..10 {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                if let Ok(client) = UvarClient::connect(&path).await {
                    return Some(client);
                }
            }
            warn!(target: "uvar", "broker_unreachable");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = core_config::config_dir();
    let _ = std::fs::create_dir_all(&log_path);
    let file_appender = tracing_appender::rolling::never(&log_path, "brine.log");
    let (nb_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .init();
    info!(target: "runtime", "startup");

    // Log panics before the terminal guard restores cooked mode.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!(target: "runtime.panic", ?info, "panic");
        default_panic(info);
    }));

    let config = core_config::load_editor_config(args.config.clone())?;
    let history = HistorySession::open("fish", core_config::history_file("fish"))
        .with_thresholds(config.history_save_count, config.history_save_interval_secs);

    let argspecs = Arc::new(ArgSpecRegistry::new());
    if let Err(errors) = argspecs.register("set", "builtin", SET_DOC) {
        error!(target: "argspec", ?errors, "builtin_spec_rejected");
    }
    let functions = Arc::new(FunctionRegistry::new());
    let autoload = Arc::new(Autoload::new("fish_function_path"));

    let uvar = if args.no_universal {
        None
    } else {
        let mut client = connect_uvar().await;
        if let Some(client) = client.as_mut() {
            // Synchronise and mirror exported variables into our
            // environment before the first prompt.
            if client.barrier().await.is_ok() {
                for (key, entry) in client.table().iter() {
                    if entry.exported {
                        unsafe { std::env::set_var(key, &entry.value) };
                    }
                }
            }
        }
        client
    };

    let mut term = CrosstermBackend::new();
    let _term_guard = term.enter_guard()?;

    let (tx, mut rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAP);
    let (_input_handle, input_shutdown) = core_input::spawn_input_task(tx.clone());
    let mut registry = EventSourceRegistry::new();
    registry.register(TickEventSource::new(std::time::Duration::from_secs(30)));
    let _source_handles = registry.spawn_all(&tx);

    // SIGINT clears the line instead of killing the shell.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            let Ok(mut sigint) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            else {
                return;
            };
            while sigint.recv().await.is_some() {
                if tx.send(Event::Interrupt).await.is_err() {
                    break;
                }
            }
        });
    }

    let width = crossterm::terminal::size().map(|(w, _)| w as usize).unwrap_or(80);
    let mut reader = Reader::new(
        args.prompt,
        history,
        config,
        argspecs,
        functions,
        autoload,
        uvar,
        tx.clone(),
        width,
    );
    reader.repaint()?;

    while let Some(event) = rx.recv().await {
        match reader.handle(event).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break,
            Err(e) => {
                error!(target: "runtime", %e, "event_error");
            }
        }
    }

    reader.shutdown();
    input_shutdown.signal();
    info!(target: "runtime", "shutdown_complete");
    Ok(())
}

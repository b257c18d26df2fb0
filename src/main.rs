//! stagehand - a JACK session orchestrator.
//!
//! Starts the child audio clients found under a root directory, watches
//! the JACK server's client/port lifecycle, and applies a declarative
//! patch file to wire ports together as they appear.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use stagehand::bus::EventBus;
use stagehand::children::ChildManager;
use stagehand::engine::JackEngine;
use stagehand::patch::Patch;
use stagehand::signals::SignalWatcher;
use stagehand::Orchestrator;

#[derive(Parser)]
#[command(name = "stagehand", version, about)]
struct Args {
    /// This orchestrator's global client name (e.g. orchestra.strings)
    client_name: Option<String>,

    /// Patch file with the routing specification
    #[arg(long, default_value = "patch")]
    patch: PathBuf,

    /// Directory scanned for child client subdirectories
    #[arg(long, default_value = ".")]
    root: PathBuf,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let Some(client_name) = args.client_name else {
        // No name is not an error: print usage and leave quietly.
        let _ = Args::command().print_help();
        return ExitCode::SUCCESS;
    };

    match run(&client_name, &args.patch, &args.root) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stagehand: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(client_name: &str, patch_path: &Path, root: &Path) -> anyhow::Result<()> {
    let (bus, handle) = EventBus::new();

    // Handlers must be installed before the engine spawns callback
    // threads and before any child exists.
    let watcher = SignalWatcher::spawn(&handle).context("starting signal watcher")?;

    let engine = JackEngine::connect(client_name, &handle).context("connecting to JACK")?;
    let patch = Patch::load(patch_path).context("loading patch")?;
    let children = ChildManager::new(root, client_name);

    let mut orchestrator = Orchestrator::new(engine, patch, children, client_name);
    orchestrator.run(&bus).context("session orchestration")?;

    // run() only returns cleanly after a termination signal, which is
    // also the watcher's exit condition, so the join cannot hang. On the
    // error path above the watcher is deliberately left running; the
    // process is about to exit anyway.
    orchestrator.into_engine().close();
    watcher.join();
    Ok(())
}

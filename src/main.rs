//! VRM Viewer - desktop viewer for VRM avatar models
//!
//! Main entry point.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vrm_viewer::{
    bridge,
    config::Config,
    shell::{
        self,
        instance::{self, Acquired, Endpoint},
        Shell,
    },
};

/// Bridge requests buffered before the shell answers.
const BRIDGE_CAPACITY: usize = 32;

/// VRM Viewer - open and inspect VRM avatar models
#[derive(Parser, Debug)]
#[command(name = "vrm-viewer", version, about, long_about = None, ignore_errors = true)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Model file to open; anything else is ignored
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    files: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", vrm_viewer::NAME, vrm_viewer::VERSION);
    debug!("Positional arguments: {:?}", args.files);

    let config = Config::load(args.config.as_deref())?;
    config.validate()?;

    // Build tokio runtime manually so the main thread stays free for the UI event loop
    let runtime = tokio::runtime::Runtime::new()?;

    let argv: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    let listener = if config.instance.enabled {
        let endpoint = Endpoint::for_name(&config.instance.name);
        match runtime.block_on(instance::acquire(&endpoint, &argv)) {
            Ok(Acquired::Primary(listener)) => Some(listener),
            Ok(Acquired::Forwarded) => {
                debug!("Launch forwarded to the running instance");
                return Ok(());
            }
            Err(e) => {
                debug!("Could not take the instance lock, exiting: {}", e);
                return Ok(());
            }
        }
    } else {
        None
    };

    let (viewer_bridge, host, requests) = bridge::channel(BRIDGE_CAPACITY);
    let shell = Shell::new(viewer_bridge, host);

    runtime.spawn(Arc::clone(&shell).serve(requests));
    if let Some(listener) = listener {
        runtime.spawn(listener.run(Arc::clone(&shell)));
    }

    shell.claim_startup_args(&argv);

    // Enter the tokio runtime context so the viewer can spawn load tasks
    let guard = runtime.enter();

    // eframe::run_native blocks the main thread (winit requirement)
    if let Err(e) = shell::window::run_window(&shell, &config, runtime.handle().clone()) {
        error!("Window error: {}", e);
    }
    shell.window_closed();

    drop(guard);
    // Give async tasks a moment to finish
    runtime.shutdown_timeout(std::time::Duration::from_secs(3));

    info!("VRM Viewer stopped");
    Ok(())
}

//! # MARC Control Binary
//!
//! Command-line front end for the SLM build coordinator.
//!
//! # Usage
//!
//! ```bash
//! # Production run against a slice file and parameter library
//! marc_control production --slice part.marc --styles config.json
//!
//! # Synthetic test run, laser off
//! marc_control test --thickness 0.2 --layers 3
//!
//! # One-shot PLC actions
//! marc_control startup
//! marc_control powder-fill --layers 40 --delta-source 150 --delta-sink -150
//! marc_control snapshot
//! ```

#![deny(warnings)]

use clap::{Parser, Subcommand};
use marc_common::config::{ConfigError, ConfigLoader, MachineConfig};
use marc_common::events::EventBus;
use marc_control::ProcessController;
use marc_plc::PlcClient;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// MARC Control - SLM build coordinator
#[derive(Parser, Debug)]
#[command(name = "marc_control")]
#[command(author = "MaTe DLMS")]
#[command(version)]
#[command(about = "Coordinates slice streaming, PLC handshake and scanner execution")]
struct Args {
    /// Path to machine.toml (defaults are used when the file is absent)
    #[arg(short, long, default_value = "machine.toml")]
    config: PathBuf,

    /// Override the OPC UA endpoint URL
    #[arg(long, value_name = "URL")]
    opc_url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a slice-file-driven production build
    Production {
        /// Path to the .marc slice file
        #[arg(long)]
        slice: PathBuf,
        /// Path to the build-style parameter library (JSON)
        #[arg(long)]
        styles: PathBuf,
    },
    /// Run a synthetic test build (laser off, no PLC coupling)
    Test {
        /// Layer thickness [mm]
        #[arg(long, default_value_t = 0.2)]
        thickness: f32,
        /// Number of synthetic layers
        #[arg(long, default_value_t = 1)]
        layers: u32,
    },
    /// Trigger the PLC startup sequence
    Startup,
    /// Trigger the PLC powder-fill sequence
    PowderFill {
        /// Number of fill stacks
        #[arg(long)]
        layers: i32,
        /// Source cylinder step per stack
        #[arg(long)]
        delta_source: i32,
        /// Sink cylinder step per stack
        #[arg(long)]
        delta_sink: i32,
    },
    /// Trigger the slow-paced bottom-layer preparation sequence
    BottomLayers {
        /// Number of layer stacks
        #[arg(long)]
        layers: i32,
        /// Source cylinder step
        #[arg(long)]
        delta_source: i32,
        /// Sink cylinder step
        #[arg(long)]
        delta_sink: i32,
    },
    /// Write one cylinder's actual-position tag
    Cylinder {
        /// Target the source cylinder (sink otherwise)
        #[arg(long)]
        source: bool,
        /// Position value to write
        #[arg(long)]
        position: i32,
    },
    /// Read and print one PLC snapshot
    Snapshot,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    if let Err(e) = run(args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("MARC Control v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config)?;
    config.plc.apply_env_overrides();
    if let Some(url) = &args.opc_url {
        config.plc.endpoint_url = url.clone();
    }
    config.validate()?;

    match args.command {
        Command::Production { slice, styles } => {
            run_build(config, move |controller| {
                controller.start_production(slice, styles)
            })?;
        }
        Command::Test { thickness, layers } => {
            run_build(config, move |controller| {
                controller.start_test(thickness, layers)
            })?;
        }
        Command::Startup => {
            let client = connect_plc(&config)?;
            client.write_startup(true)?;
            info!("startup sequence requested");
        }
        Command::PowderFill {
            layers,
            delta_source,
            delta_sink,
        } => {
            let client = connect_plc(&config)?;
            client.write_powder_fill(layers, delta_source, delta_sink)?;
            info!("powder fill requested ({layers} stacks)");
        }
        Command::BottomLayers {
            layers,
            delta_source,
            delta_sink,
        } => {
            let client = connect_plc(&config)?;
            client.write_bottom_layer_parameters(layers, delta_source, delta_sink)?;
            info!("bottom layer preparation requested ({layers} stacks)");
        }
        Command::Cylinder { source, position } => {
            let client = connect_plc(&config)?;
            client.write_cylinder_position(source, position)?;
        }
        Command::Snapshot => {
            let client = connect_plc(&config)?;
            let snapshot = client.read_snapshot()?;
            println!("{snapshot:#?}");
        }
    }
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Missing config file is fine (defaults apply); a broken one is not.
fn load_config(path: &PathBuf) -> Result<MachineConfig, ConfigError> {
    match MachineConfig::load(path) {
        Ok(config) => {
            info!("configuration loaded from {}", path.display());
            Ok(config)
        }
        Err(ConfigError::FileNotFound) => {
            info!("no {} found, using defaults", path.display());
            Ok(MachineConfig::default())
        }
        Err(e) => Err(e),
    }
}

fn connect_plc(config: &MachineConfig) -> Result<Arc<PlcClient>, Box<dyn std::error::Error>> {
    let client = Arc::new(PlcClient::new(config.plc.clone(), EventBus::new()));
    client.initialize()?;
    Ok(client)
}

/// Start a run, mirror its progress to the log, and block until it
/// finishes or Ctrl-C stops it.
fn run_build(
    config: MachineConfig,
    start: impl FnOnce(&ProcessController) -> Result<(), marc_control::ControlError>,
) -> Result<(), Box<dyn std::error::Error>> {
    let controller = Arc::new(ProcessController::new(config));

    let mut finished = controller.events().subscribe_finished();
    let mut progress = controller.events().subscribe_progress();
    let mut errors = controller.events().subscribe_error();

    {
        let controller = Arc::clone(&controller);
        ctrlc::set_handler(move || {
            info!("received shutdown signal");
            if let Err(e) = controller.stop() {
                error!("stop failed: {e}");
            }
        })?;
    }

    start(&controller)?;

    // Progress mirror; the thread ends with the process (the signal
    // handler keeps a bus sender alive, so the channel never closes).
    std::thread::spawn(move || {
        while let Ok(update) = progress.blocking_recv() {
            info!("progress: {}/{} layers", update.done, update.total);
        }
    });

    let _ = finished.blocking_recv();
    while let Ok(report) = errors.try_recv() {
        error!("run error [{}]: {}", report.kind, report.text);
    }

    controller.stop()?;

    info!("MARC Control shutdown complete");
    Ok(())
}

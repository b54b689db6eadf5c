//! # MARC PLC Simulator Binary
//!
//! Hosts the simulated machine PLC over OPC UA.
//!
//! # Usage
//!
//! ```bash
//! # Default endpoint opc.tcp://localhost:4840
//! marc_plc_sim
//!
//! # Custom port, verbose logging
//! marc_plc_sim --port 48400 -v
//! ```

#![deny(warnings)]

use clap::Parser;
use marc_common::tags;
use marc_plc_sim::{SimConfig, SimTiming};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// MARC PLC simulator - OPC UA server mirroring the machine PLC
#[derive(Parser, Debug)]
#[command(name = "marc_plc_sim")]
#[command(author = "MaTe DLMS")]
#[command(version)]
#[command(about = "OPC UA simulator for the MARC machine PLC")]
struct Args {
    /// Hostname to bind and advertise
    #[arg(long, default_value = "localhost")]
    host: String,

    /// TCP port of the OPC UA endpoint
    #[arg(short, long, default_value_t = 4840)]
    port: u16,

    /// Namespace URI to register
    #[arg(long, default_value = tags::SIMULATION_NAMESPACE_URI)]
    namespace: String,

    /// Layer preparation delay in milliseconds
    #[arg(long, default_value_t = 2000)]
    prep_delay_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("MARC PLC simulator v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = SimConfig {
        host: args.host.clone(),
        port: args.port,
        namespace_uri: args.namespace.clone(),
        timing: SimTiming {
            layer_prep_delay: Duration::from_millis(args.prep_delay_ms),
            ..SimTiming::default()
        },
        ..SimConfig::default()
    };

    let mut handle = match marc_plc_sim::spawn(config) {
        Ok(handle) => handle,
        Err(e) => {
            error!("simulator startup failed: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "simulator ready at {} (namespace index {})",
        handle.endpoint_url(),
        handle.namespace_index
    );

    let running = Arc::new(AtomicBool::new(true));
    let running_flag = Arc::clone(&running);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("received shutdown signal");
        running_flag.store(false, Ordering::SeqCst);
    }) {
        error!("cannot install signal handler: {e}");
    }

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    handle.stop();
    info!("MARC PLC simulator shutdown complete");
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

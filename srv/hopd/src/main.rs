use clap::Parser;
use hop::logging;
use hopsrv::{MemStore, Server, ServerConfig};
use sloggers::Config;
use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;

mod config;

use crate::config::HopdConfig;

/// Hop key-value server
#[derive(Debug, Parser)]
struct Args {
    /// Path to the TOML configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[clap(long)]
    address: Option<String>,

    /// Worker thread count, overriding the configuration
    #[clap(long)]
    workers: Option<usize>,

    /// Trace every frame received and sent
    #[clap(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HopdConfig::load(path),
        None => HopdConfig::default(),
    };
    if let Some(address) = args.address {
        config.server.address = Some(address);
    }
    if let Some(workers) = args.workers {
        config.server.workers = workers;
    }
    if args.debug {
        config.server.debug = true;
    }

    let log = config.log.build_logger().expect("logger construction failed");
    let address = config
        .server
        .address
        .clone()
        .unwrap_or_else(|| format!("0.0.0.0:{}", config::DEFAULT_PORT));

    let listener = TcpListener::bind(&address).expect("Error binding listen address");
    logging::info!(log, "hopd listening"; "address" => %address, "workers" => config.server.workers);

    let server = Server::new(
        Arc::new(MemStore::new()),
        ServerConfig {
            workers: config.server.workers,
            debug: config.server.debug,
        },
        &log,
    );

    if let Err(err) = server.serve(listener) {
        logging::error!(log, "server failed: {}", err);
        std::process::exit(1);
    }
}

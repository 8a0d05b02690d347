//! Modbus Plant Simulator
//!
//! Loads a plant topology, serves its register bank over Modbus TCP and runs
//! the device simulations until Ctrl-C.
//!
//! Usage: plant_sim --topology <dir> [--port 5020] [--simulate-all]
//! Example: plant_sim --topology topology --port 5020 --simulate WTP/WTP_Inlet_Valve

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use modbus_plant_sim::constants::{DEFAULT_POLL_MS, DEFAULT_REGISTER_COUNT, DEFAULT_TICK_MS};
use modbus_plant_sim::{
    info as library_info, server, Plant, PlantRuntime, Poller, RegisterStore, Scheduler,
    SimConfig, Topology, DEFAULT_TCP_PORT,
};

/// Modbus TCP plant simulator
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Directory holding project.json, devices.json and places.json
    #[clap(long, default_value = ".")]
    topology: String,

    /// Address to bind the Modbus server to
    #[clap(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Modbus server port
    #[clap(long, default_value_t = DEFAULT_TCP_PORT)]
    port: u16,

    /// Size of the holding register bank
    #[clap(long, default_value_t = DEFAULT_REGISTER_COUNT)]
    registers: usize,

    /// Scheduler tick period in milliseconds
    #[clap(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,

    /// Display poll period in milliseconds
    #[clap(long, default_value_t = DEFAULT_POLL_MS)]
    poll_ms: u64,

    /// Apply the declared device links
    #[clap(long)]
    link: bool,

    /// Enable simulation of a device, as place/alias (repeatable)
    #[clap(long, value_name = "PLACE/ALIAS")]
    simulate: Vec<String>,

    /// Enable simulation of every device that allows it
    #[clap(long)]
    simulate_all: bool,

    /// Device to sample and log, as place/alias
    #[clap(long, value_name = "PLACE/ALIAS")]
    select: Option<String>,
}

impl Args {
    fn config(&self) -> SimConfig {
        SimConfig::new()
            .with_topology_dir(&self.topology)
            .with_register_count(self.registers)
            .with_bind_address(self.bind)
            .with_port(self.port)
            .with_tick_interval(Duration::from_millis(self.tick_ms))
            .with_poll_interval(Duration::from_millis(self.poll_ms))
            .with_link_devices(self.link)
    }
}

fn split_path(path: &str) -> Result<(&str, &str), Box<dyn Error>> {
    path.split_once('/')
        .ok_or_else(|| format!("expected place/alias, got {}", path).into())
}

fn build_runtime(args: &Args, config: &SimConfig) -> Result<PlantRuntime, Box<dyn Error>> {
    let topology = Topology::load_dir(&config.topology_dir)?;
    let store = RegisterStore::new(config.register_count);
    let mut plant = Plant::build(&topology, &store)?;
    if config.link_devices {
        let linked = plant.link_devices()?;
        info!("{} device links applied", linked);
    }

    let mut runtime = PlantRuntime::new(plant, store);
    if args.simulate_all {
        let enabled = runtime.enable_all();
        info!("Simulation enabled for {} devices", enabled);
    }
    for path in &args.simulate {
        let (place, alias) = split_path(path)?;
        let device = runtime.find(place, alias)?;
        runtime.enable_simulation(device)?;
    }
    if let Some(path) = &args.select {
        let (place, alias) = split_path(path)?;
        let device = runtime.find(place, alias)?;
        runtime.select(Some(device))?;
    }
    Ok(runtime)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();
    let config = args.config();
    info!("{}", library_info());

    let runtime = match build_runtime(&args, &config) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e);
        }
    };
    let store = runtime.store().clone();
    let shared = runtime.into_shared();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let address = SocketAddr::new(config.bind_address, config.port);
    let server_task = tokio::spawn(server::serve(address, store, shutdown_rx.clone()));
    let scheduler_task = tokio::spawn(
        Scheduler::new(shared.clone(), config.tick_interval).run(shutdown_rx.clone()),
    );
    let (poller, mut samples) = Poller::new(shared, config.poll_interval);
    let poller_task = tokio::spawn(poller.run(shutdown_rx));

    let display_task = tokio::spawn(async move {
        while samples.changed().await.is_ok() {
            let sample = samples.borrow_and_update().clone();
            if let Some(snapshot) = sample {
                match serde_json::to_string(&snapshot) {
                    Ok(json) => info!(target: "plant_sim::display", "{}", json),
                    Err(e) => warn!("Snapshot not serialisable: {}", e),
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    shutdown_tx.send_replace(true);

    match server_task.await {
        Ok(Err(e)) => error!("Modbus server failed: {}", e),
        Err(e) => error!("Modbus server task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    scheduler_task.await?;
    poller_task.await?;
    display_task.await?;
    Ok(())
}

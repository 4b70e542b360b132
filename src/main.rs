use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use omni_base_runtime::base::SimulatedBus;
use omni_base_runtime::config::{
    BaseConfig, DEFAULT_CONFIG_PATH, LOOP_HZ, MAX_LOOP_HZ, loop_period,
};

/// Omni base runtime: teleop commands in, odometry and drive status out
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Robot parameter file (JSON)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Control loop rate (Hz)
    #[arg(
        long,
        default_value_t = LOOP_HZ,
        value_parser = clap::value_parser!(u64).range(1..=MAX_LOOP_HZ)
    )]
    loop_hz: u64,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let config = match BaseConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    info!("Loaded robot parameters from {}", args.config);

    // No hardware bus master is linked in; drive the simulated one at loop rate
    let bus = SimulatedBus::new(loop_period(args.loop_hz));

    if let Err(e) = omni_base_runtime::runtime::run(bus, &config, args.loop_hz).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

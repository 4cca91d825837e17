//! orchd entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use orchd::daemon::{OrchDaemon, OrchDaemonConfig};
use swsync_bus::{Bus, RedisBus, RedisBusConfig};
use swsync_sai::mock::MockSwitch;
use swsync_types::MacAddress;

/// Switch-state reconciliation daemon (ASIC side)
#[derive(Parser, Debug)]
#[command(name = "orchd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Switch MAC address
    #[arg(short = 'm', long)]
    mac_address: MacAddress,

    /// Consumer pop batch size
    #[arg(short = 'b', long, default_value = "128")]
    batch_size: usize,

    /// Per-delta audit recording: 0 disables, 1 enables
    #[arg(short = 'r', long, default_value = "1")]
    record: u8,

    /// Directory for the audit record file (must be writable)
    #[arg(short = 'd', long, default_value = ".")]
    record_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Bus host
    #[arg(long, default_value = "127.0.0.1")]
    bus_host: String,

    /// Bus port
    #[arg(long, default_value = "6379")]
    bus_port: u16,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let record = args.record != 0;
    if record && !args.record_dir.is_dir() {
        anyhow::bail!("record directory {:?} is not writable", args.record_dir);
    }

    let bus: Arc<dyn Bus> = Arc::new(
        RedisBus::connect(RedisBusConfig {
            host: args.bus_host.clone(),
            port: args.bus_port,
        })
        .await
        .context("bus connection failed")?,
    );

    // The vendor driver is out of tree; the in-process backend stands in
    // and records everything it is asked to program.
    let backend = Arc::new(MockSwitch::new());

    let config = OrchDaemonConfig {
        switch_mac: args.mac_address,
        batch_size: args.batch_size,
        record,
        record_dir: args.record_dir.clone(),
        ..OrchDaemonConfig::default()
    };

    let daemon = OrchDaemon::build(
        bus,
        backend.clone(),
        backend.clone(),
        backend,
        config,
    )
    .await
    .context("daemon bootstrap failed")?;

    info!("orchd: started (mac {})", args.mac_address);
    daemon.run().await
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&args.log_level),
    )
    .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("orchd: runtime init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("orchd: fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

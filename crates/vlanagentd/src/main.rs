//! vlanagentd entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use swsync_bus::{Bus, DbId, RedisBus, RedisBusConfig};
use swsync_orch::{Orch, Recorder, SelectorLoop};
use swsync_types::MacAddress;
use vlanagentd::{
    SystemShell, VlanAgent, CFG_INTERFACE_TABLE, CFG_SWITCH_TABLE, CFG_VLAN_MEMBER_TABLE,
    CFG_VLAN_TABLE,
};

/// Switch-state reconciliation daemon (kernel side)
#[derive(Parser, Debug)]
#[command(name = "vlanagentd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Switch MAC address
    #[arg(short = 'm', long)]
    mac_address: MacAddress,

    /// Per-delta audit recording: 0 disables, 1 enables
    #[arg(short = 'r', long, default_value = "1")]
    record: u8,

    /// Directory for the audit record file (must be writable)
    #[arg(short = 'd', long, default_value = ".")]
    record_dir: PathBuf,

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

    let mut agent = VlanAgent::new(bus.clone(), Arc::new(SystemShell));
    agent.set_switch_mac(args.mac_address);
    agent.init_bridge().await.context("bridge init failed")?;

    let mut selector = SelectorLoop::new(Duration::from_secs(1));
    let notify = selector.notify_handle();
    let recorder = if record {
        Some(Arc::new(
            Recorder::open(&args.record_dir, "vlanagentd").context("audit file open failed")?,
        ))
    } else {
        None
    };

    for table in [
        CFG_VLAN_TABLE,
        CFG_VLAN_MEMBER_TABLE,
        CFG_INTERFACE_TABLE,
        CFG_SWITCH_TABLE,
    ] {
        let subscription = bus
            .subscribe(DbId::Config, table, notify.clone())
            .await
            .context("table subscription failed")?;
        if let Some(consumer) = agent.core_mut().consumer_mut(table) {
            consumer.attach_subscription(subscription);
            if let Some(recorder) = &recorder {
                consumer.attach_recorder(recorder.clone());
            }
        }
    }

    selector.register(Box::new(agent));
    info!("vlanagentd: started (mac {})", args.mac_address);
    selector.run().await
}

fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("vlanagentd: tracing init failed");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("runtime init failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

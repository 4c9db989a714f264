use anyhow::{Context, Result};
use avalon_rs::config::{Args, MonitorConfig};
use avalon_rs::miners::backends::traits::GetMinerData;
use avalon_rs::monitor::{Monitor, MonitorEvent};
use avalon_rs::tracing::prelude::*;
use clap::Parser;
use futures::future::join_all;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    avalon_rs::tracing::init(&args.log_level);

    let mut config = MonitorConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    config.merge_args(&args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        devices = config.devices.len(),
        config = %args.config.display(),
        "Starting Avalon monitor"
    );

    if args.once {
        query_once(&config).await;
        return Ok(());
    }

    let (mut monitor, mut events) = Monitor::new(config.poll_settings());
    for device in &config.devices {
        monitor.add_device(device.id.clone(), config.build_miner(device), device.profile.clone())?;
    }

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                info!("Received ctrl-c");
                break;
            }
            Some(event) = events.recv() => log_event(&event),
        }
    }

    monitor.shutdown().await;
    info!("Stopped");
    Ok(())
}

async fn query_once(config: &MonitorConfig) {
    let queries = config.devices.iter().map(|device| async move {
        let miner = config.build_miner(device);
        (device, miner.get_data().await)
    });

    for (device, result) in join_all(queries).await {
        match result {
            Ok(data) => println!("{}: {data:#?}", device.id),
            Err(e) => error!(device = %device.id, error = %e, "Query failed"),
        }
    }
}

fn log_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::AvailabilityChanged { device_id, old, new } => {
            info!(device = %device_id, %old, %new, "Availability changed")
        }
        MonitorEvent::SnapshotReady { device_id, snapshot } => {
            info!(
                device = %device_id,
                hashrate = ?snapshot.hashrate_30s.as_ref().map(ToString::to_string),
                power = ?snapshot.wattage.map(|p| p.as_watts()),
                max_temp = ?snapshot.max_temperature.map(|t| t.as_celsius()),
                mining = snapshot.is_mining(),
                "Snapshot"
            )
        }
        MonitorEvent::AutoStartFinished {
            device_id,
            outcome,
            state,
        } => {
            info!(
                device = %device_id,
                ?outcome,
                checks = state.checks,
                hashrate_30s = ?state.last_hashrate_30s,
                "Auto-start finished"
            )
        }
    }
}

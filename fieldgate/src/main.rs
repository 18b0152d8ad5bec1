//! fieldgate bridge binary.
//!
//! Polls Modbus devices, listens for sensor-node messages and forwards
//! their telemetry to an MQTT IoT gateway.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fieldgate::{GatewayConfig, ModbusSource, SensorNodeListener};
use fieldgate_pipeline::{BridgeArgs, BridgeConfig, MqttTransport, Pipeline, wait_for_shutdown};
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = BridgeArgs::parse_with_default("fieldgate.json5");

    let config = GatewayConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut log_config = config.logging().clone();
    if let Some(level) = &args.log_level {
        log_config.level = level.clone();
    }
    fieldgate_common::init_tracing(&log_config).context("Failed to init tracing")?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting fieldgate");
    info!("Loaded configuration from {:?}", args.config);

    let source = Arc::new(ModbusSource::new(&config.modbus));
    let pipeline = Pipeline::new(
        config.broker().clone(),
        config.poll_interval(),
        Arc::new(MqttTransport::default()),
        source,
    )
    .context("Failed to build pipeline")?;

    pipeline
        .start()
        .await
        .context("Failed to start telemetry pipeline")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener_task = config.sensor_nodes.clone().map(|sensor_nodes| {
        let listener = SensorNodeListener::new(sensor_nodes, pipeline.queue().clone());
        tokio::spawn(listener.run(shutdown_rx))
    });

    info!(
        devices = config.modbus.devices.len(),
        sensor_nodes = listener_task.is_some(),
        "fieldgate running. Press Ctrl+C to stop."
    );

    wait_for_shutdown().await;

    // Producers first, then the forwarder.
    let _ = shutdown_tx.send(true);
    if let Some(task) = listener_task {
        if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
            warn!("Sensor node listener did not stop in time");
        }
    }
    pipeline.stop().await;

    info!("fieldgate stopped");
    Ok(())
}

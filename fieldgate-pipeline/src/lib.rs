//! fieldgate pipeline
//!
//! Producer/consumer pipeline moving field telemetry to an IoT gateway.
//!
//! # Overview
//!
//! - [`Source`] yields raw readings; [`Poller`] turns them into packets
//! - [`PacketQueue`] hands packets from producers to the consumer
//! - [`Forwarder`] announces devices via [`ConnectionTracker`] and
//!   publishes packets through a [`Transport`] ([`MqttTransport`])
//! - [`Pipeline`] wires the above together and owns their lifecycle
//! - [`BridgeConfig`] and [`BridgeArgs`] cover configuration and CLI
//!
//! # Example
//!
//! ```ignore
//! use fieldgate_pipeline::{BridgeArgs, BridgeConfig, MqttTransport, Pipeline, wait_for_shutdown};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = BridgeArgs::parse_with_default("mybridge.json5");
//!     let config = MyBridgeConfig::load(&args.config)?;
//!
//!     let pipeline = Pipeline::new(
//!         config.broker().clone(),
//!         config.poll_interval(),
//!         Arc::new(MqttTransport::default()),
//!         Arc::new(MySource::new()),
//!     )?;
//!
//!     pipeline.start().await?;
//!     wait_for_shutdown().await;
//!     pipeline.stop().await;
//!     Ok(())
//! }
//! ```

mod args;
mod config;
mod error;
mod forwarder;
mod poller;
mod queue;
mod runner;
mod source;
mod tracker;
mod transport;

pub use args::BridgeArgs;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result, SourceError};
pub use forwarder::{Forwarder, ForwarderConfig, ForwarderState, PublishStats};
pub use poller::Poller;
pub use queue::PacketQueue;
pub use runner::{Pipeline, wait_for_shutdown};
pub use source::{Reading, Source};
pub use tracker::ConnectionTracker;
pub use transport::{MqttTransport, Transport, qos_from_level};

// Re-export commonly used types from fieldgate-common
pub use fieldgate_common::{
    BrokerConfig, GatewayJson, GatewayTopics, LogFormat, LoggingConfig, TelemetryPacket,
    WireFormat,
};
pub use rumqttc::QoS;

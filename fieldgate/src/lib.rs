//! Field telemetry bridge to an MQTT IoT gateway.
//!
//! Polls Modbus devices (TCP or RTU/serial) and listens for mesh sensor
//! node messages, then forwards everything to a ThingsBoard-style gateway
//! API over MQTT.
//!
//! # Gateway topics
//!
//! ```text
//! v1/gateway/connect      {"device":"<name>"}
//! v1/gateway/disconnect   {"device":"<name>"}
//! v1/gateway/telemetry    {"<name>":[{"ts":"<millis>","values":{...}}]}
//! ```
//!
//! Modbus field names come from the register name, then the
//! `register_names` mapping (`<type>:<address>`), then the address.

pub mod config;
pub mod modbus;
pub mod sensor_nodes;

pub use config::GatewayConfig;
pub use modbus::ModbusSource;
pub use sensor_nodes::{SensorNodeConfig, SensorNodeListener};

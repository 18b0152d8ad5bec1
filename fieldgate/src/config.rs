//! Configuration for the fieldgate bridge.

use std::collections::HashMap;
use std::time::Duration;

use fieldgate_pipeline::{BridgeConfig, BridgeError, BrokerConfig, LoggingConfig, Result};
use serde::{Deserialize, Serialize};

use crate::sensor_nodes::SensorNodeConfig;

/// Complete bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Remote gateway broker
    pub broker: BrokerConfig,

    /// Polling schedule
    #[serde(default)]
    pub poller: PollerConfig,

    /// Modbus devices to poll
    #[serde(default)]
    pub modbus: ModbusConfig,

    /// Local sensor-node broker, disabled when absent
    #[serde(default)]
    pub sensor_nodes: Option<SensorNodeConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Polling schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Delay between poll cycles in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    5000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

/// Modbus protocol configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// Devices to poll
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Named register groups (reusable across devices)
    #[serde(default)]
    pub register_groups: HashMap<String, RegisterGroup>,

    /// Field names keyed by `<type>:<address>`, e.g. `holding:0`
    #[serde(default)]
    pub register_names: HashMap<String, String>,
}

/// One Modbus slave polled every cycle.
///
/// `name` is the device name announced to the gateway, so it must be unique
/// across Modbus devices and sensor nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,

    pub connection: ConnectionConfig,

    /// Slave address on the bus, 1-247
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    #[serde(default)]
    pub registers: Vec<RegisterConfig>,

    /// Extra registers taken from `modbus.register_groups`
    #[serde(default)]
    pub register_group: Option<String>,

    /// Applies to the TCP connect and to the serial port
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_unit_id() -> u8 {
    1
}

fn default_timeout_ms() -> u64 {
    1000
}

/// How to reach a device, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ConnectionConfig {
    /// `{ type: "tcp", host, port = 502 }`
    Tcp {
        host: String,
        #[serde(default = "default_modbus_port")]
        port: u16,
    },
    /// `{ type: "rtu", port: "/dev/ttyUSB0" }` with 9600 8N1 unless overridden.
    Rtu {
        port: String,
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
        #[serde(default = "default_data_bits")]
        data_bits: u8,
        /// `none`, `even` or `odd`
        #[serde(default = "default_parity")]
        parity: String,
        #[serde(default = "default_stop_bits")]
        stop_bits: u8,
    },
}

fn default_modbus_port() -> u16 {
    502
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> u8 {
    1
}

/// Registers shared by several devices of the same model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterGroup {
    pub registers: Vec<RegisterConfig>,
}

/// A block of `count` consecutive values read with a single request.
///
/// Each value becomes one telemetry field. The field is called `name`
/// (then `name_1`, `name_2`, ...) when set, otherwise it is looked up in
/// `modbus.register_names` and finally falls back to the address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterConfig {
    #[serde(rename = "type")]
    pub register_type: RegisterType,

    /// First address of the block, as sent on the wire
    pub address: u16,

    /// Values, not registers: two `f32` values span four registers
    #[serde(default = "default_count")]
    pub count: u16,

    pub name: Option<String>,

    /// Ignored for coils and discrete inputs
    #[serde(default)]
    pub data_type: DataType,

    /// Reported value is `raw * scale + offset`
    #[serde(default = "default_scale")]
    pub scale: f64,

    #[serde(default)]
    pub offset: f64,
}

fn default_count() -> u16 {
    1
}

fn default_scale() -> f64 {
    1.0
}

impl RegisterConfig {
    /// Addresses covered by the block: bits for coils and discrete inputs,
    /// 16-bit words otherwise.
    pub fn span(&self) -> u32 {
        match self.register_type {
            RegisterType::Coil | RegisterType::Discrete => u32::from(self.count),
            RegisterType::Input | RegisterType::Holding => {
                u32::from(self.count) * u32::from(self.data_type.width())
            }
        }
    }
}

/// The four Modbus data tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    Coil,
    Discrete,
    Input,
    Holding,
}

impl RegisterType {
    /// Key prefix used in `modbus.register_names`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RegisterType::Coil => "coil",
            RegisterType::Discrete => "discrete",
            RegisterType::Input => "input",
            RegisterType::Holding => "holding",
        }
    }

    /// Largest quantity one read request may ask for.
    pub fn max_read(&self) -> u32 {
        match self {
            RegisterType::Coil | RegisterType::Discrete => 2000,
            RegisterType::Input | RegisterType::Holding => 125,
        }
    }
}

/// How register words are turned into a number.
///
/// 32-bit types take two registers. The plain variants expect the high
/// word first; the `le` variants expect the low word first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    #[default]
    U16,
    I16,
    U32,
    I32,
    F32,
    U32Le,
    I32Le,
    F32Le,
}

impl DataType {
    /// Number of 16-bit registers holding one value.
    pub fn width(&self) -> u16 {
        match self {
            DataType::U16 | DataType::I16 => 1,
            _ => 2,
        }
    }
}

impl BridgeConfig for GatewayConfig {
    fn broker(&self) -> &BrokerConfig {
        &self.broker
    }

    fn logging(&self) -> &LoggingConfig {
        &self.logging
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poller.poll_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        self.broker
            .validate()
            .map_err(|e| BridgeError::validation(e.to_string()))?;

        if self.poller.poll_interval_ms == 0 {
            return Err(BridgeError::validation("Poll interval must be positive"));
        }

        if self.modbus.devices.is_empty() && self.sensor_nodes.is_none() {
            return Err(BridgeError::validation(
                "At least one Modbus device or a sensor_nodes broker must be configured",
            ));
        }

        self.modbus.validate()?;

        if let Some(sensor_nodes) = &self.sensor_nodes {
            if sensor_nodes.host.trim().is_empty() {
                return Err(BridgeError::validation("Sensor node broker host is required"));
            }
        }

        Ok(())
    }
}

impl ModbusConfig {
    /// Validate device definitions and register groups.
    pub fn validate(&self) -> Result<()> {
        for (group_name, group) in &self.register_groups {
            for register in &group.registers {
                validate_register(&format!("Register group '{}'", group_name), register)?;
            }
        }

        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(BridgeError::validation("Device name cannot be empty"));
            }

            if device.unit_id == 0 || device.unit_id > 247 {
                return Err(BridgeError::validation(format!(
                    "Device '{}': unit_id must be 1-247",
                    device.name
                )));
            }

            if device.registers.is_empty() && device.register_group.is_none() {
                return Err(BridgeError::validation(format!(
                    "Device '{}': must specify either registers or register_group",
                    device.name
                )));
            }

            for register in &device.registers {
                validate_register(&format!("Device '{}'", device.name), register)?;
            }

            if let Some(group_name) = &device.register_group {
                if !self.register_groups.contains_key(group_name) {
                    return Err(BridgeError::validation(format!(
                        "Device '{}': unknown register_group '{}'",
                        device.name, group_name
                    )));
                }
            }

            if let ConnectionConfig::Rtu { parity, .. } = &device.connection {
                match parity.to_lowercase().as_str() {
                    "none" | "even" | "odd" => {}
                    _ => {
                        return Err(BridgeError::validation(format!(
                            "Device '{}': invalid parity '{}' (use none, even, or odd)",
                            device.name, parity
                        )));
                    }
                }
            }
        }

        Ok(())
    }
}

/// A register block must fit in one read request and in the address space.
fn validate_register(owner: &str, register: &RegisterConfig) -> Result<()> {
    let kind = register.register_type.as_str();

    if register.count == 0 {
        return Err(BridgeError::validation(format!(
            "{}: {} register {} has a count of 0",
            owner, kind, register.address
        )));
    }

    let span = register.span();
    let limit = register.register_type.max_read();
    if span > limit {
        return Err(BridgeError::validation(format!(
            "{}: {} register {} spans {} addresses, more than the {} allowed per read",
            owner, kind, register.address, span, limit
        )));
    }

    if u32::from(register.address) + span > 0x1_0000 {
        return Err(BridgeError::validation(format!(
            "{}: {} register {} runs past address 65535",
            owner, kind, register.address
        )));
    }

    Ok(())
}

impl DeviceConfig {
    /// Get all registers for this device, including those from register groups.
    pub fn all_registers(&self, groups: &HashMap<String, RegisterGroup>) -> Vec<RegisterConfig> {
        let mut registers = self.registers.clone();

        if let Some(group) = self
            .register_group
            .as_ref()
            .and_then(|name| groups.get(name))
        {
            registers.extend(group.registers.iter().cloned());
        }

        registers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BROKER: &str = r#"broker: { host: "tb.local", access_token: "A1", client_id: "gw" }"#;

    fn parse(body: &str) -> GatewayConfig {
        json5::from_str(&format!("{{ {}, {} }}", BROKER, body)).unwrap()
    }

    #[test]
    fn test_parse_tcp_config() {
        let config = parse(
            r#"modbus: {
                devices: [
                    {
                        name: "plc01",
                        connection: { type: "tcp", host: "192.168.1.10" },
                        registers: [ { type: "holding", address: 0, count: 10 } ]
                    }
                ]
            }"#,
        );

        config.validate().unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.modbus.devices[0].name, "plc01");

        let ConnectionConfig::Tcp { host, port } = &config.modbus.devices[0].connection else {
            panic!("Expected TCP connection");
        };
        assert_eq!(host, "192.168.1.10");
        assert_eq!(*port, 502);
    }

    #[test]
    fn test_parse_rtu_config() {
        let config = parse(
            r#"poller: { poll_interval_ms: 250 },
            modbus: {
                devices: [
                    {
                        name: "sensor01",
                        connection: { type: "rtu", port: "/dev/ttyUSB0", baud_rate: 19200, parity: "even" },
                        unit_id: 5,
                        registers: [ { type: "input", address: 0, count: 4, data_type: "f32" } ]
                    }
                ]
            }"#,
        );

        config.validate().unwrap();
        let device = &config.modbus.devices[0];
        assert_eq!(device.unit_id, 5);
        assert_eq!(device.registers[0].data_type, DataType::F32);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));

        let ConnectionConfig::Rtu {
            port,
            baud_rate,
            parity,
            stop_bits,
            ..
        } = &device.connection
        else {
            panic!("Expected RTU connection");
        };
        assert_eq!(port, "/dev/ttyUSB0");
        assert_eq!(*baud_rate, 19200);
        assert_eq!(parity, "even");
        assert_eq!(*stop_bits, 1);
    }

    #[test]
    fn test_register_groups() {
        let config = parse(
            r#"modbus: {
                devices: [
                    {
                        name: "meter01",
                        connection: { type: "tcp", host: "10.0.0.7" },
                        registers: [ { type: "coil", address: 3, name: "breaker" } ],
                        register_group: "power_meter"
                    }
                ],
                register_groups: {
                    power_meter: {
                        registers: [
                            { type: "holding", address: 0, count: 2, name: "voltage", data_type: "f32" },
                            { type: "holding", address: 4, count: 2, name: "current", data_type: "f32" }
                        ]
                    }
                }
            }"#,
        );

        config.validate().unwrap();
        let registers = config.modbus.devices[0].all_registers(&config.modbus.register_groups);
        let names: Vec<_> = registers.iter().filter_map(|r| r.name.as_deref()).collect();
        assert_eq!(names, vec!["breaker", "voltage", "current"]);
    }

    #[test]
    fn test_sensor_nodes_only() {
        let config = parse(r#"sensor_nodes: { host: "localhost" }"#);
        config.validate().unwrap();

        let sensor_nodes = config.sensor_nodes.unwrap();
        assert_eq!(sensor_nodes.port, 1883);
        assert!(sensor_nodes.username.is_empty());
    }

    #[test]
    fn test_validate_nothing_to_bridge() {
        let config = parse(r#"modbus: { devices: [] }"#);
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_missing_registers() {
        let config = parse(
            r#"modbus: { devices: [ { name: "plc01", connection: { type: "tcp", host: "10.0.0.1" } } ] }"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_group_and_bad_parity() {
        let config = parse(
            r#"modbus: { devices: [ { name: "plc01", connection: { type: "tcp", host: "10.0.0.1" }, register_group: "nope" } ] }"#,
        );
        assert!(config.validate().is_err());

        let config = parse(
            r#"modbus: { devices: [ {
                name: "plc01",
                connection: { type: "rtu", port: "/dev/ttyS0", parity: "mark" },
                registers: [ { type: "holding", address: 0 } ]
            } ] }"#,
        );
        assert!(config.validate().is_err());
    }

    fn single_register(register: &str) -> GatewayConfig {
        parse(&format!(
            r#"modbus: {{ devices: [ {{
                name: "plc01",
                connection: {{ type: "tcp", host: "10.0.0.1" }},
                registers: [ {} ]
            }} ] }}"#,
            register
        ))
    }

    #[test]
    fn test_validate_register_count_overflow() {
        let config =
            single_register(r#"{ type: "holding", address: 0, count: 40000, data_type: "u32" }"#);
        assert_eq!(config.modbus.devices[0].registers[0].span(), 80000);
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_validate_zero_count() {
        let config = single_register(r#"{ type: "coil", address: 0, count: 0 }"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_words_per_read() {
        let config = single_register(r#"{ type: "input", address: 0, count: 125 }"#);
        config.validate().unwrap();

        let config = single_register(r#"{ type: "input", address: 0, count: 126 }"#);
        assert!(config.validate().is_err());

        let config =
            single_register(r#"{ type: "holding", address: 0, count: 62, data_type: "f32" }"#);
        config.validate().unwrap();

        let config =
            single_register(r#"{ type: "holding", address: 0, count: 63, data_type: "f32" }"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bits_per_read() {
        let config =
            single_register(r#"{ type: "discrete", address: 0, count: 2000, data_type: "u32" }"#);
        config.validate().unwrap();

        let config = single_register(r#"{ type: "coil", address: 0, count: 2001 }"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_address_range() {
        let config = single_register(r#"{ type: "holding", address: 65534, data_type: "f32" }"#);
        config.validate().unwrap();

        let config = single_register(r#"{ type: "holding", address: 65535, data_type: "f32" }"#);
        assert!(config.validate().is_err());

        let config = single_register(r#"{ type: "coil", address: 65000, count: 1000 }"#);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_group_registers() {
        let config = parse(
            r#"modbus: {
                devices: [ { name: "meter01", connection: { type: "tcp", host: "10.0.0.7" }, register_group: "meter" } ],
                register_groups: {
                    meter: { registers: [ { type: "holding", address: 0, count: 0 } ] }
                }
            }"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_broker() {
        let config: GatewayConfig = json5::from_str(
            r#"{ broker: { host: "tb.local", client_id: "gw" }, sensor_nodes: { host: "localhost" } }"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(BridgeError::ConfigValidation(_))
        ));
    }

    #[test]
    fn test_data_type_width() {
        assert_eq!(DataType::default(), DataType::U16);
        assert_eq!(DataType::I16.width(), 1);
        assert_eq!(DataType::F32Le.width(), 2);
    }
}

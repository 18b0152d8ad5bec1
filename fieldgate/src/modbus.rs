//! Modbus device polling.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use fieldgate_pipeline::{Reading, Source, SourceError};
use tokio_modbus::Slave;
use tokio_modbus::client::{Context, Reader, rtu, tcp};
use tracing::{debug, warn};

use crate::config::{
    ConnectionConfig, DataType, DeviceConfig, ModbusConfig, RegisterConfig, RegisterType,
};

/// A decoded register value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    Bool(bool),
    Number(f64),
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::Bool(b) => write!(f, "{}", b),
            RegisterValue::Number(n) => write!(f, "{}", n),
        }
    }
}

/// One device and the registers resolved for it.
#[derive(Debug, Clone)]
struct PolledDevice {
    config: DeviceConfig,
    registers: Vec<RegisterConfig>,
}

/// [`Source`] reading every configured Modbus device.
///
/// Each cycle opens a fresh connection per device. A device that cannot
/// be reached yields a failed reading for each of its registers; the
/// other devices are still read.
pub struct ModbusSource {
    devices: Vec<PolledDevice>,
    register_names: HashMap<String, String>,
}

impl ModbusSource {
    pub fn new(config: &ModbusConfig) -> Self {
        let devices = config
            .devices
            .iter()
            .map(|device| PolledDevice {
                config: device.clone(),
                registers: device.all_registers(&config.register_groups),
            })
            .collect();

        Self {
            devices,
            register_names: config.register_names.clone(),
        }
    }

    /// Number of configured devices.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    async fn read_device(&self, device: &PolledDevice, readings: &mut Vec<Reading>) {
        let name = &device.config.name;

        let mut ctx = match connect(&device.config).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(device = %name, error = %e, "Could not connect to Modbus device");
                for register in &device.registers {
                    readings.push(Reading::failed(
                        name,
                        self.field_name(register, register.address.into()),
                        e.clone(),
                    ));
                }
                return;
            }
        };

        for register in &device.registers {
            match read_register(&mut ctx, register).await {
                Ok(values) => {
                    for (index, value) in values.into_iter().enumerate() {
                        let address = u32::from(register.address)
                            + index as u32 * u32::from(value_width(register));
                        readings.push(Reading::ok(
                            name,
                            self.field_name(register, address),
                            value.to_string(),
                        ));
                    }
                }
                Err(e) => {
                    readings.push(Reading::failed(
                        name,
                        self.field_name(register, register.address.into()),
                        e,
                    ));
                }
            }
        }
    }

    /// Field name for a register address.
    ///
    /// The register's own name wins, then the `<type>:<address>` mapping,
    /// then the bare address. Multi-value named registers get an index
    /// suffix after the first value.
    fn field_name(&self, register: &RegisterConfig, address: u32) -> String {
        if let Some(name) = &register.name {
            let index = address.saturating_sub(register.address.into())
                / u32::from(value_width(register));
            return if index == 0 {
                name.clone()
            } else {
                format!("{}_{}", name, index)
            };
        }

        let lookup_key = format!("{}:{}", register.register_type.as_str(), address);
        if let Some(name) = self.register_names.get(&lookup_key) {
            return name.clone();
        }

        address.to_string()
    }
}

#[async_trait]
impl Source for ModbusSource {
    fn name(&self) -> &str {
        "modbus"
    }

    fn is_ready(&self) -> bool {
        !self.devices.is_empty()
    }

    async fn read(&self) -> Result<Vec<Reading>, SourceError> {
        let mut readings = Vec::new();

        for device in &self.devices {
            self.read_device(device, &mut readings).await;
        }

        debug!(
            devices = self.devices.len(),
            readings = readings.len(),
            "Modbus read cycle complete"
        );
        Ok(readings)
    }
}

/// Connect to a Modbus device within its configured timeout.
async fn connect(device: &DeviceConfig) -> Result<Context, SourceError> {
    let timeout = Duration::from_millis(device.timeout_ms);
    let slave = Slave(device.unit_id);

    match &device.connection {
        ConnectionConfig::Tcp { host, port } => {
            let addr = tokio::net::lookup_host((host.as_str(), *port))
                .await
                .map_err(|e| SourceError::Unavailable(format!("Invalid address: {}", e)))?
                .next()
                .ok_or_else(|| {
                    SourceError::Unavailable(format!("No address for {}:{}", host, port))
                })?;

            tokio::time::timeout(timeout, tcp::connect_slave(addr, slave))
                .await
                .map_err(|_| SourceError::Unavailable("Connection timeout".to_string()))?
                .map_err(|e| SourceError::Unavailable(e.to_string()))
        }
        ConnectionConfig::Rtu {
            port,
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        } => {
            let parity = match parity.to_lowercase().as_str() {
                "even" => tokio_serial::Parity::Even,
                "odd" => tokio_serial::Parity::Odd,
                _ => tokio_serial::Parity::None,
            };

            let stop_bits = match stop_bits {
                2 => tokio_serial::StopBits::Two,
                _ => tokio_serial::StopBits::One,
            };

            let data_bits = match data_bits {
                5 => tokio_serial::DataBits::Five,
                6 => tokio_serial::DataBits::Six,
                7 => tokio_serial::DataBits::Seven,
                _ => tokio_serial::DataBits::Eight,
            };

            let builder = tokio_serial::new(port, *baud_rate)
                .parity(parity)
                .stop_bits(stop_bits)
                .data_bits(data_bits)
                .timeout(timeout);

            let serial = tokio_serial::SerialStream::open(&builder)
                .map_err(|e| SourceError::Unavailable(format!("Serial open failed: {}", e)))?;

            Ok(rtu::attach_slave(serial, slave))
        }
    }
}

/// Read a register or range of registers.
async fn read_register(
    ctx: &mut Context,
    register: &RegisterConfig,
) -> Result<Vec<RegisterValue>, SourceError> {
    match register.register_type {
        RegisterType::Coil => {
            let bits = ctx
                .read_coils(register.address, register.count)
                .await
                .map_err(|e| SourceError::Read(e.to_string()))?
                .map_err(|e| SourceError::Read(format!("Exception: {:?}", e)))?;

            Ok(bits.into_iter().map(RegisterValue::Bool).collect())
        }
        RegisterType::Discrete => {
            let bits = ctx
                .read_discrete_inputs(register.address, register.count)
                .await
                .map_err(|e| SourceError::Read(e.to_string()))?
                .map_err(|e| SourceError::Read(format!("Exception: {:?}", e)))?;

            Ok(bits.into_iter().map(RegisterValue::Bool).collect())
        }
        RegisterType::Input => {
            let words = ctx
                .read_input_registers(register.address, registers_needed(register)?)
                .await
                .map_err(|e| SourceError::Read(e.to_string()))?
                .map_err(|e| SourceError::Read(format!("Exception: {:?}", e)))?;

            Ok(decode_registers(&words, register))
        }
        RegisterType::Holding => {
            let words = ctx
                .read_holding_registers(register.address, registers_needed(register)?)
                .await
                .map_err(|e| SourceError::Read(e.to_string()))?
                .map_err(|e| SourceError::Read(format!("Exception: {:?}", e)))?;

            Ok(decode_registers(&words, register))
        }
    }
}

/// 16-bit registers spanned by `register.count` values.
fn registers_needed(register: &RegisterConfig) -> Result<u16, SourceError> {
    let span = register.span();
    u16::try_from(span).map_err(|_| {
        SourceError::Read(format!(
            "{} registers at {} do not fit in one request",
            span, register.address
        ))
    })
}

/// Address stride between two consecutive values.
fn value_width(register: &RegisterConfig) -> u16 {
    match register.register_type {
        RegisterType::Coil | RegisterType::Discrete => 1,
        RegisterType::Input | RegisterType::Holding => register.data_type.width(),
    }
}

/// Decode raw words per the configured data type, then scale and offset.
///
/// A trailing partial value is ignored.
pub fn decode_registers(words: &[u16], register: &RegisterConfig) -> Vec<RegisterValue> {
    let width = register.data_type.width() as usize;

    words
        .chunks_exact(width)
        .map(|chunk| {
            let raw = match register.data_type {
                DataType::U16 => chunk[0] as f64,
                DataType::I16 => chunk[0] as i16 as f64,
                DataType::U32 => join_words(chunk[0], chunk[1]) as f64,
                DataType::I32 => join_words(chunk[0], chunk[1]) as i32 as f64,
                DataType::F32 => f32::from_bits(join_words(chunk[0], chunk[1])) as f64,
                DataType::U32Le => join_words(chunk[1], chunk[0]) as f64,
                DataType::I32Le => join_words(chunk[1], chunk[0]) as i32 as f64,
                DataType::F32Le => f32::from_bits(join_words(chunk[1], chunk[0])) as f64,
            };
            RegisterValue::Number(raw * register.scale + register.offset)
        })
        .collect()
}

fn join_words(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | (low as u32)
}

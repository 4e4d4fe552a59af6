use std::{fmt, str::FromStr};

use crate::measurement::Material;

/// Logical device parameters, independent of the wire profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    // Identity
    Vendor,
    ProductName,
    Version,
    SerialNumber,
    // Link identity of a bus device
    BaudRate,
    Address,
    // Secondary RS485 sub-port of a USB-direct device
    Rs485BaudRate,
    Rs485Address,
    // Gate
    GateTime,
    PrescalerCount,
    McuFrequency,
    // Averaging
    Averaging,
    AveragingProgress,
    // Measurement
    Reading,
    FrequencyInstant,
    Counter,
    // Material and scale
    Material,
    Scale,
    Target,
}

impl Parameter {
    /// Parameters that can only be read.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Parameter::Vendor
                | Parameter::ProductName
                | Parameter::Version
                | Parameter::PrescalerCount
                | Parameter::McuFrequency
                | Parameter::AveragingProgress
                | Parameter::Reading
                | Parameter::FrequencyInstant
                | Parameter::Counter
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Parameter::Vendor => "vendor",
            Parameter::ProductName => "product_name",
            Parameter::Version => "version",
            Parameter::SerialNumber => "serial_number",
            Parameter::BaudRate => "baud_rate",
            Parameter::Address => "address",
            Parameter::Rs485BaudRate => "rs485_baud_rate",
            Parameter::Rs485Address => "rs485_address",
            Parameter::GateTime => "gate_time",
            Parameter::PrescalerCount => "gate_prescaler_count",
            Parameter::McuFrequency => "mcu_frequency",
            Parameter::Averaging => "averaging",
            Parameter::AveragingProgress => "averaging_progress",
            Parameter::Reading => "reading",
            Parameter::FrequencyInstant => "frequency_instant",
            Parameter::Counter => "counter",
            Parameter::Material => "material",
            Parameter::Scale => "scale",
            Parameter::Target => "target_thickness",
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Firmware version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(format!("Invalid version: {}", s));
        }
        let num = |p: &str| {
            p.parse::<u16>()
                .map_err(|e| format!("Invalid version {}: {}", s, e))
        };
        Ok(Self {
            major: num(parts[0])?,
            minor: num(parts[1])?,
            patch: num(parts[2])?,
        })
    }
}

/// Typed value of a parameter as it travels over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Version(Version),
    Int(u32),
    Float(f64),
    /// Averaged frequency in Hz together with the raw gate counter.
    Reading { frequency: f64, counter: u32 },
    Material(Material),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Version(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Reading { frequency, counter } => {
                write!(f, "{} Hz (counter {})", frequency, counter)
            }
            Value::Material(m) => write!(f, "{}", m),
        }
    }
}

/// One logical operation against the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Read(Parameter),
    Write(Parameter, Value),
    StartMeasurement,
    StopMeasurement,
}

impl Command {
    pub fn is_read(&self) -> bool {
        matches!(self, Command::Read(_))
    }

    pub fn parameter(&self) -> Option<Parameter> {
        match self {
            Command::Read(p) | Command::Write(p, _) => Some(*p),
            Command::StartMeasurement | Command::StopMeasurement => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Read(p) => write!(f, "get {}", p),
            Command::Write(p, v) => write!(f, "set {} = {}", p, v),
            Command::StartMeasurement => f.write_str("start measurement"),
            Command::StopMeasurement => f.write_str("stop measurement"),
        }
    }
}

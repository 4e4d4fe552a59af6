use std::{io, time::Duration};

use self::command::{Command, Parameter, Value};

pub mod codec;
pub mod command;
pub mod conv;
pub mod line;
pub mod response;
pub mod rtu;
pub mod usb;

#[cfg(test)]
pub mod fake;

use thiserror::Error;

/// Malformed or mismatched response frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolFault {
    #[error("Checksum mismatch: expected {expected:#06x}, received {received:#06x}")]
    Checksum { expected: u16, received: u16 },
    #[error("Address mismatch: expected {expected}, received {received}")]
    AddressMismatch { expected: u8, received: u8 },
    #[error("Function code mismatch: expected {expected:#04x}, received {received:#04x}")]
    FunctionMismatch { expected: u8, received: u8 },
    #[error("Reply does not belong to request: expected {expected}, received {received}")]
    UnexpectedReply { expected: String, received: String },
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Value out of range for {param}: {reason}")]
    OutOfRange { param: Parameter, reason: String },
    #[error("Response without a pending request")]
    NoRequest,
}

/// Error type of the frame codecs.
///
/// The codecs only know about frames. Context (which command, which
/// attempt) is added by the line.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Fault(#[from] ProtocolFault),
    #[error("{0} is not available on this profile")]
    Unsupported(Parameter),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid value for {param}: {reason}")]
    InvalidParameter { param: Parameter, reason: String },

    #[error("No response to '{command}' within {timeout:?}")]
    TransportTimeout { command: Command, timeout: Duration },

    #[error("Link fault during '{command}': {source}")]
    TransportIo {
        command: Command,
        #[source]
        source: io::Error,
    },

    #[error("Serial I/O error: {:?}", _0)]
    Serial(#[from] tokio_serial::Error),

    #[error("Protocol error during '{command}': {fault}")]
    Protocol {
        command: Command,
        fault: ProtocolFault,
    },

    #[error("Device rejected '{command}' (code {code}), current value: {}", fmt_current(.current))]
    DeviceRejected {
        command: Command,
        code: u8,
        current: Option<Value>,
    },

    #[error("Device unreachable: '{command}' failed after {attempts} attempts")]
    DeviceUnreachable { command: Command, attempts: u32 },

    #[error("Device accepted {param} = {applied} but the link could not follow: {source}")]
    StaleBinding {
        param: Parameter,
        applied: Value,
        #[source]
        source: io::Error,
    },

    #[error("'{0}' is not supported by this device")]
    Unsupported(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

fn fmt_current(current: &Option<Value>) -> String {
    match current {
        Some(v) => v.to_string(),
        None => "unknown".to_string(),
    }
}

impl Error {
    /// Wrap a codec error with the command it happened on.
    pub(crate) fn from_codec(command: &Command, err: CodecError) -> Self {
        match err {
            CodecError::Io(source) => Self::TransportIo {
                command: command.clone(),
                source,
            },
            CodecError::Fault(fault) => Self::Protocol {
                command: command.clone(),
                fault,
            },
            CodecError::Unsupported(param) => Self::Unsupported(param.to_string()),
        }
    }

    pub(crate) fn invalid(param: Parameter, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param,
            reason: reason.into(),
        }
    }

    /// True for failures that leave the device state unknown and need a
    /// re-discovery before the session can be trusted again.
    pub fn is_stale_binding(&self) -> bool {
        matches!(self, Self::StaleBinding { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Changing the baud rate and address a device is reached at.
//!
//! On a bus device these are the parameters of the link the session itself
//! talks over. [`Reconfigurator`] holds the line from sending the write
//! until the session follows the change, so no other request can slip in
//! at the wrong rate or address. USB-direct devices expose the same settings
//! for their secondary RS485 port through [`Rs485Port`], which never affects
//! the USB link.

use std::time::Duration;
use tracing::{info, warn};

use crate::proto::{
    codec::FrameCodec,
    command::{Command, Parameter, Value},
    line::Line,
    Error, ProtocolFault, Result,
};
use crate::session::{check_address, check_baud_rate, int, Session};

/// Transport reconfiguration of a bus device.
pub struct Reconfigurator<'a> {
    session: &'a mut Session,
}

impl<'a> Reconfigurator<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    pub async fn baud_rate(&mut self) -> Result<u32> {
        let value = self.session.read(Parameter::BaudRate).await?;
        int(Parameter::BaudRate, value)
    }

    pub async fn address(&mut self) -> Result<u8> {
        let value = self.session.read(Parameter::Address).await?;
        reported_address(Parameter::Address, value)
    }

    /// Move device and line to `baud_rate`.
    ///
    /// Fails with [`Error::StaleBinding`] if the device acknowledged but the
    /// port could not be switched. The device is then only reachable at the
    /// new rate.
    pub async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        check_baud_rate(Parameter::BaudRate, baud_rate)?;
        let value = Value::Int(baud_rate);
        let Session {
            bus,
            codec,
            settings,
            ..
        } = &mut *self.session;

        let mut line = bus.lock().await;
        if line.baud_rate() == baud_rate {
            return Ok(());
        }
        let others = bus.handles() - 1;
        if others > 0 {
            warn!(port = bus.name(), others, baud_rate, "Changing baud rate of a shared line");
        }

        let command = Command::Write(Parameter::BaudRate, value.clone());
        write_once(codec.as_mut(), &mut line, &command, settings.timeout).await?;

        line.rebind(baud_rate)
            .map_err(|source| Error::StaleBinding {
                param: Parameter::BaudRate,
                applied: value,
                source,
            })?;
        Ok(())
    }

    /// Move the device to bus `address` and address it there from now on.
    pub async fn set_address(&mut self, address: u8) -> Result<()> {
        check_address(Parameter::Address, address.into())?;
        let Session {
            bus,
            codec,
            settings,
            ..
        } = &mut *self.session;
        if codec.address() == Some(address) {
            return Ok(());
        }

        let mut line = bus.lock().await;
        let command = Command::Write(Parameter::Address, Value::Int(address.into()));
        write_once(codec.as_mut(), &mut line, &command, settings.timeout).await?;

        let previous = codec.address();
        codec.set_address(address);
        info!(port = bus.name(), ?previous, address, "Device readdressed");
        Ok(())
    }
}

/// An address read back from the device. Anything beyond a byte is a
/// malformed reply.
fn reported_address(param: Parameter, value: Value) -> Result<u8> {
    let address = int(param, value)?;
    u8::try_from(address).map_err(|_| Error::Protocol {
        command: Command::Read(param),
        fault: ProtocolFault::OutOfRange {
            param,
            reason: format!("address {}", address),
        },
    })
}

/// Send a reconfiguration write exactly once. A lost acknowledgement leaves
/// the device state unknown, so a timeout is reported as unreachable
/// rather than retried at parameters that may no longer be valid.
async fn write_once(
    codec: &mut dyn FrameCodec,
    line: &mut Line,
    command: &Command,
    timeout: Duration,
) -> Result<()> {
    match Session::exchange_held(codec, line, command, timeout).await {
        Ok(_) => Ok(()),
        Err(Error::TransportTimeout { .. }) => {
            warn!(port = line.name(), %command, "No acknowledgement, device state unknown");
            Err(Error::DeviceUnreachable {
                command: command.clone(),
                attempts: 1,
            })
        }
        Err(err) => Err(err),
    }
}

/// Secondary RS485 port of a USB-direct device.
pub struct Rs485Port<'a> {
    session: &'a mut Session,
}

impl<'a> Rs485Port<'a> {
    pub(crate) fn new(session: &'a mut Session) -> Self {
        Self { session }
    }

    pub async fn baud_rate(&mut self) -> Result<u32> {
        let value = self.session.read(Parameter::Rs485BaudRate).await?;
        int(Parameter::Rs485BaudRate, value)
    }

    pub async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        check_baud_rate(Parameter::Rs485BaudRate, baud_rate)?;
        self.session
            .write(Parameter::Rs485BaudRate, Value::Int(baud_rate))
            .await?;
        Ok(())
    }

    pub async fn address(&mut self) -> Result<u8> {
        let value = self.session.read(Parameter::Rs485Address).await?;
        reported_address(Parameter::Rs485Address, value)
    }

    pub async fn set_address(&mut self, address: u8) -> Result<()> {
        check_address(Parameter::Rs485Address, address.into())?;
        self.session
            .write(Parameter::Rs485Address, Value::Int(address.into()))
            .await?;
        Ok(())
    }
}

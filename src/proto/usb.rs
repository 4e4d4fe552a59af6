//! USB-direct frame profile.
//!
//! Every frame is a line of ASCII terminated by CARRIAGE RETURN (0x0D):
//!
//! ```text
//! request   ?GT*2C\r            read gate time
//!           :GT,500*30\r        write gate time
//!           :GO*32\r            start measurement
//! response  =GT,500*37\r        value / accepted write (echo)
//!           !GT,2,1000*01\r     rejected, code 2, device keeps 1000
//! ```
//!
//! The two hex digits after `*` are the XOR of all bytes before it.

use bytes::BytesMut;
use std::{
    fmt::{self, Write},
    io, str,
};
use tokio_util::codec::{Decoder, Encoder};

use super::codec::{FrameCodec, Profile};
use super::command::{Command, Parameter, Value, Version};
use super::response::Response;
use super::{CodecError, ProtocolFault};
use crate::measurement::Material;

/// Longest line accepted before the buffer is considered garbage.
pub(crate) const MAX_FRAME_LEN: usize = 128;

const START_MNEMONIC: &str = "GO";
const STOP_MNEMONIC: &str = "HL";

const MNEMONICS: &[(Parameter, &str)] = &[
    (Parameter::Vendor, "VN"),
    (Parameter::ProductName, "PN"),
    (Parameter::Version, "VR"),
    (Parameter::SerialNumber, "SN"),
    (Parameter::Rs485BaudRate, "RB"),
    (Parameter::Rs485Address, "RA"),
    (Parameter::GateTime, "GT"),
    (Parameter::PrescalerCount, "GP"),
    (Parameter::McuFrequency, "MF"),
    (Parameter::Averaging, "AW"),
    (Parameter::AveragingProgress, "AP"),
    (Parameter::Reading, "FQ"),
    (Parameter::FrequencyInstant, "FI"),
    (Parameter::Counter, "CN"),
    (Parameter::Material, "MT"),
    (Parameter::Scale, "SF"),
    (Parameter::Target, "TT"),
];

pub(crate) fn mnemonic(param: Parameter) -> Option<&'static str> {
    MNEMONICS
        .iter()
        .find(|(p, _)| *p == param)
        .map(|(_, m)| *m)
}

pub(crate) fn parameter_for(mnemonic: &str) -> Option<Parameter> {
    MNEMONICS
        .iter()
        .find(|(_, m)| *m == mnemonic)
        .map(|(p, _)| *p)
}

pub(crate) fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0, |acc, b| acc ^ b)
}

fn malformed(msg: impl Into<String>) -> ProtocolFault {
    ProtocolFault::Malformed(msg.into())
}

fn parse_num<T: str::FromStr>(param: Parameter, s: &str) -> Result<T, ProtocolFault>
where
    T::Err: fmt::Display,
{
    s.trim().parse::<T>().map_err(|e| ProtocolFault::OutOfRange {
        param,
        reason: format!("{:?}: {}", s, e),
    })
}

/// Parse the payload text of `param`.
pub(crate) fn parse_payload(param: Parameter, payload: &str) -> Result<Value, ProtocolFault> {
    match param {
        Parameter::Vendor | Parameter::ProductName => Ok(Value::Text(payload.to_string())),
        Parameter::Version => payload
            .parse::<Version>()
            .map(Value::Version)
            .map_err(|reason| ProtocolFault::OutOfRange { param, reason }),
        Parameter::FrequencyInstant | Parameter::Scale | Parameter::Target => {
            parse_num::<f64>(param, payload).map(Value::Float)
        }
        Parameter::Reading => {
            let (f, c) = payload
                .split_once(',')
                .ok_or_else(|| malformed(format!("reading payload {:?}", payload)))?;
            Ok(Value::Reading {
                frequency: parse_num(param, f)?,
                counter: parse_num(param, c)?,
            })
        }
        Parameter::Material => {
            let (d, z) = payload
                .split_once(',')
                .ok_or_else(|| malformed(format!("material payload {:?}", payload)))?;
            Ok(Value::Material(Material {
                density: parse_num(param, d)?,
                z_ratio: parse_num(param, z)?,
            }))
        }
        Parameter::SerialNumber
        | Parameter::BaudRate
        | Parameter::Address
        | Parameter::Rs485BaudRate
        | Parameter::Rs485Address
        | Parameter::GateTime
        | Parameter::PrescalerCount
        | Parameter::McuFrequency
        | Parameter::Averaging
        | Parameter::AveragingProgress
        | Parameter::Counter => parse_num::<u32>(param, payload).map(Value::Int),
    }
}

/// Format a value as payload text. Floats use the shortest representation
/// that parses back to the same `f64`.
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        Value::Version(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Reading { frequency, counter } => format!("{},{}", frequency, counter),
        Value::Material(m) => format!("{},{}", m.density, m.z_ratio),
    }
}

/// Append checksum and terminator to `body`.
pub(crate) fn frame(body: &str) -> String {
    format!("{}*{:02X}\r", body, checksum(body.as_bytes()))
}

#[derive(Debug)]
struct Pending {
    command: Command,
    mnemonic: &'static str,
    argument: String,
}

#[derive(Default)]
pub struct UsbCodec {
    pending: Option<Pending>,
}

fn write_fmt_guarded(dst: &mut BytesMut, args: fmt::Arguments<'_>) -> Result<(), io::Error> {
    dst.write_fmt(args)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

impl Encoder<Command> for UsbCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let lookup = |p: Parameter| mnemonic(p).ok_or(CodecError::Unsupported(p));
        let (op, mnemonic, argument) = match &item {
            Command::Read(p) => ('?', lookup(*p)?, String::new()),
            Command::Write(p, v) => (':', lookup(*p)?, format_value(v)),
            Command::StartMeasurement => (':', START_MNEMONIC, String::new()),
            Command::StopMeasurement => (':', STOP_MNEMONIC, String::new()),
        };
        let body = if argument.is_empty() {
            format!("{}{}", op, mnemonic)
        } else {
            format!("{}{},{}", op, mnemonic, argument)
        };
        write_fmt_guarded(dst, format_args!("{}", frame(&body)))?;
        self.pending = Some(Pending {
            command: item,
            mnemonic,
            argument,
        });
        Ok(())
    }
}

impl Decoder for UsbCodec {
    type Item = Response;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let end = match src.iter().position(|b| *b == b'\r') {
            Some(end) => end,
            None if src.len() > MAX_FRAME_LEN => {
                return Err(malformed(format!("no terminator within {} bytes", src.len())).into())
            }
            None => return Ok(None),
        };
        let line = src.split_to(end + 1);
        let pending = self.pending.take().ok_or(ProtocolFault::NoRequest)?;

        let text = str::from_utf8(&line[..end]).map_err(|e| malformed(e.to_string()))?;
        let (body, cs) = text
            .rsplit_once('*')
            .ok_or_else(|| malformed(format!("missing checksum in {:?}", text)))?;
        let received = u8::from_str_radix(cs, 16)
            .map_err(|_| malformed(format!("invalid checksum field {:?}", cs)))?;
        let expected = checksum(body.as_bytes());
        if expected != received {
            return Err(ProtocolFault::Checksum {
                expected: expected.into(),
                received: received.into(),
            }
            .into());
        }

        let mut chars = body.chars();
        let status = chars
            .next()
            .ok_or_else(|| malformed("empty response"))?;
        let rest = chars.as_str();
        let (mnemonic, payload) = match rest.split_once(',') {
            Some((m, p)) => (m, Some(p)),
            None => (rest, None),
        };
        if mnemonic != pending.mnemonic {
            return Err(ProtocolFault::UnexpectedReply {
                expected: pending.mnemonic.to_string(),
                received: mnemonic.to_string(),
            }
            .into());
        }
        let require_payload =
            || payload.ok_or_else(|| malformed(format!("{} reply without payload", mnemonic)));

        match status {
            '=' => match &pending.command {
                Command::Read(p) => Ok(Some(Response::Value(parse_payload(
                    *p,
                    require_payload()?,
                )?))),
                Command::Write(p, _) => {
                    let echo = parse_payload(*p, require_payload()?)?;
                    let sent = parse_payload(*p, &pending.argument)?;
                    if echo == sent {
                        Ok(Some(Response::Ack(Some(echo))))
                    } else {
                        // Device kept a different value than requested.
                        Ok(Some(Response::Rejected {
                            code: 0,
                            current: Some(echo),
                        }))
                    }
                }
                Command::StartMeasurement | Command::StopMeasurement => {
                    Ok(Some(Response::Ack(None)))
                }
            },
            '!' => {
                let payload = require_payload()?;
                let (code, current) = match payload.split_once(',') {
                    Some((c, cur)) => (c, Some(cur)),
                    None => (payload, None),
                };
                let code = code
                    .parse::<u8>()
                    .map_err(|_| malformed(format!("invalid reject code {:?}", code)))?;
                let current = match (current, pending.command.parameter()) {
                    (Some(cur), Some(p)) => Some(parse_payload(p, cur)?),
                    _ => None,
                };
                Ok(Some(Response::Rejected { code, current }))
            }
            other => Err(malformed(format!("unknown status {:?}", other)).into()),
        }
    }
}

impl FrameCodec for UsbCodec {
    fn profile(&self) -> Profile {
        Profile::Usb
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}

//! Bus frame profile (Modbus RTU framing).
//!
//! ```text
//! request   [addr][fc][start hi][start lo][count hi][count lo][crc lo][crc hi]   fc 0x03 / 0x04
//!           [addr][0x06][reg hi][reg lo][value hi][value lo][crc lo][crc hi]
//!           [addr][0x10][start][count][byte count][data...][crc]
//! response  [addr][fc][byte count][data...][crc]                                 fc 0x03 / 0x04
//!           echo of request without data                                          fc 0x06 / 0x10
//!           [addr][fc | 0x80][exception code][crc]
//! ```
//!
//! Registers are big endian. Values spanning two registers define their own
//! word order, see [`WordOrder`].

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_16_MODBUS};
use std::io::Cursor;
use tokio_util::codec::{Decoder, Encoder};

use super::codec::{FrameCodec, Profile};
use super::command::{Command, Parameter, Value, Version};
use super::response::Response;
use super::{CodecError, ProtocolFault};
use crate::measurement::Material;
use crate::session::BAUD_RATES;

pub(crate) const FC_READ_HOLDING: u8 = 0x03;
pub(crate) const FC_READ_INPUT: u8 = 0x04;
pub(crate) const FC_WRITE_SINGLE: u8 = 0x06;
pub(crate) const FC_WRITE_MULTIPLE: u8 = 0x10;
pub(crate) const EXCEPTION_FLAG: u8 = 0x80;

pub(crate) const EXC_ILLEGAL_ADDRESS: u8 = 0x02;
pub(crate) const EXC_ILLEGAL_VALUE: u8 = 0x03;

/// Holding register taking 1 (start) or 0 (stop).
pub(crate) const CONTROL_REGISTER: u16 = 0x0100;

const CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

pub(crate) fn crc16(data: &[u8]) -> u16 {
    CRC.checksum(data)
}

/// Append the CRC, low byte first.
pub(crate) fn seal(frame: &mut BytesMut) {
    let crc = crc16(frame);
    frame.put_u16_le(crc);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Table {
    Input,
    Holding,
}

impl Table {
    pub(crate) fn read_function(&self) -> u8 {
        match self {
            Table::Input => FC_READ_INPUT,
            Table::Holding => FC_READ_HOLDING,
        }
    }
}

/// Order of the two 16 bit words of a 32 bit field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WordOrder {
    HighFirst,
    LowFirst,
}

impl WordOrder {
    fn join(&self, words: &[u16]) -> u32 {
        let (hi, lo) = match self {
            WordOrder::HighFirst => (words[0], words[1]),
            WordOrder::LowFirst => (words[1], words[0]),
        };
        (u32::from(hi) << 16) | u32::from(lo)
    }

    fn split(&self, value: u32) -> [u16; 2] {
        let hi = (value >> 16) as u16;
        let lo = value as u16;
        match self {
            WordOrder::HighFirst => [hi, lo],
            WordOrder::LowFirst => [lo, hi],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Field {
    /// Two characters per register, NUL padded.
    Ascii,
    /// major, minor, patch
    Version,
    U16,
    U32(WordOrder),
    /// Unsigned value times the factor.
    Fixed16(f64),
    FixedU32(WordOrder, f64),
    /// Index into [`BAUD_RATES`].
    BaudCode,
    /// Frequency in centi-Hz (high word first) and counter (low word first).
    Reading,
    /// Density and Z-ratio, both in thousandths.
    Material,
}

fn out_of_range(param: Parameter, reason: impl Into<String>) -> ProtocolFault {
    ProtocolFault::OutOfRange {
        param,
        reason: reason.into(),
    }
}

/// Scale `value` to a register integer. Values the register cannot hold
/// exactly are refused rather than rounded, so a positive setting never
/// reads back as something else.
fn to_fixed(param: Parameter, value: f64, factor: f64, max: f64) -> Result<u32, ProtocolFault> {
    let raw = (value * factor).round();
    if !raw.is_finite() || raw < 0.0 || raw > max {
        return Err(out_of_range(
            param,
            format!("{} does not fit the register", value),
        ));
    }
    if (raw / factor - value).abs() > value.abs() * 1e-9 {
        return Err(out_of_range(
            param,
            format!("{} is not a multiple of the register resolution {}", value, 1.0 / factor),
        ));
    }
    Ok(raw as u32)
}

impl Field {
    pub(crate) fn decode(&self, param: Parameter, words: &[u16]) -> Result<Value, ProtocolFault> {
        let value = match self {
            Field::Ascii => {
                let mut bytes = Vec::with_capacity(words.len() * 2);
                for w in words {
                    bytes.write_u16::<BigEndian>(*w).map_err(|e| {
                        ProtocolFault::Malformed(e.to_string())
                    })?;
                }
                let text = String::from_utf8_lossy(&bytes);
                Value::Text(text.trim_end_matches('\0').trim().to_string())
            }
            Field::Version => Value::Version(Version {
                major: words[0],
                minor: words[1],
                patch: words[2],
            }),
            Field::U16 => Value::Int(words[0].into()),
            Field::U32(order) => Value::Int(order.join(words)),
            Field::Fixed16(factor) => Value::Float(f64::from(words[0]) / factor),
            Field::FixedU32(order, factor) => Value::Float(f64::from(order.join(words)) / factor),
            Field::BaudCode => {
                let baud = BAUD_RATES
                    .get(usize::from(words[0]))
                    .ok_or_else(|| out_of_range(param, format!("baud code {}", words[0])))?;
                Value::Int(*baud)
            }
            Field::Reading => Value::Reading {
                frequency: f64::from(WordOrder::HighFirst.join(&words[0..2])) / 100.0,
                counter: WordOrder::LowFirst.join(&words[2..4]),
            },
            Field::Material => Value::Material(Material {
                density: f64::from(words[0]) / 1000.0,
                z_ratio: f64::from(words[1]) / 1000.0,
            }),
        };
        Ok(value)
    }

    pub(crate) fn encode(
        &self,
        param: Parameter,
        value: &Value,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolFault> {
        let mismatch = || out_of_range(param, format!("unexpected value {}", value));
        let words = match (self, value) {
            (Field::Ascii, Value::Text(s)) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.resize(usize::from(count) * 2, 0);
                let mut cur = Cursor::new(bytes);
                let mut words = Vec::with_capacity(count.into());
                for _ in 0..count {
                    words.push(
                        cur.read_u16::<BigEndian>()
                            .map_err(|e| ProtocolFault::Malformed(e.to_string()))?,
                    );
                }
                words
            }
            (Field::Version, Value::Version(v)) => vec![v.major, v.minor, v.patch],
            (Field::U16, Value::Int(v)) => {
                vec![u16::try_from(*v).map_err(|e| out_of_range(param, e.to_string()))?]
            }
            (Field::U32(order), Value::Int(v)) => order.split(*v).to_vec(),
            (Field::Fixed16(factor), Value::Float(v)) => {
                vec![to_fixed(param, *v, *factor, u16::MAX.into())? as u16]
            }
            (Field::FixedU32(order, factor), Value::Float(v)) => order
                .split(to_fixed(param, *v, *factor, u32::MAX.into())?)
                .to_vec(),
            (Field::BaudCode, Value::Int(v)) => {
                let code = BAUD_RATES
                    .iter()
                    .position(|b| b == v)
                    .ok_or_else(|| out_of_range(param, format!("baud rate {}", v)))?;
                vec![code as u16]
            }
            (
                Field::Reading,
                Value::Reading {
                    frequency,
                    counter,
                },
            ) => {
                let mut words = WordOrder::HighFirst
                    .split(to_fixed(param, *frequency, 100.0, u32::MAX.into())?)
                    .to_vec();
                words.extend(WordOrder::LowFirst.split(*counter));
                words
            }
            (Field::Material, Value::Material(m)) => vec![
                to_fixed(param, m.density, 1000.0, u16::MAX.into())? as u16,
                to_fixed(param, m.z_ratio, 1000.0, u16::MAX.into())? as u16,
            ],
            _ => return Err(mismatch()),
        };
        Ok(words)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Register {
    pub param: Parameter,
    pub table: Table,
    pub start: u16,
    pub count: u16,
    pub field: Field,
}

const fn reg(param: Parameter, table: Table, start: u16, count: u16, field: Field) -> Register {
    Register {
        param,
        table,
        start,
        count,
        field,
    }
}

pub(crate) const REGISTERS: &[Register] = &[
    reg(Parameter::Vendor, Table::Input, 0x0000, 8, Field::Ascii),
    reg(Parameter::ProductName, Table::Input, 0x0008, 8, Field::Ascii),
    reg(Parameter::Version, Table::Input, 0x0010, 3, Field::Version),
    reg(Parameter::SerialNumber, Table::Input, 0x0013, 2, Field::U32(WordOrder::HighFirst)),
    reg(Parameter::McuFrequency, Table::Input, 0x0015, 2, Field::U32(WordOrder::HighFirst)),
    reg(Parameter::Reading, Table::Input, 0x0020, 4, Field::Reading),
    reg(Parameter::Counter, Table::Input, 0x0022, 2, Field::U32(WordOrder::LowFirst)),
    reg(
        Parameter::FrequencyInstant,
        Table::Input,
        0x0024,
        2,
        Field::FixedU32(WordOrder::HighFirst, 100.0),
    ),
    reg(Parameter::AveragingProgress, Table::Input, 0x0026, 1, Field::U16),
    reg(Parameter::GateTime, Table::Holding, 0x0101, 1, Field::U16),
    reg(Parameter::Averaging, Table::Holding, 0x0102, 1, Field::U16),
    reg(Parameter::Material, Table::Holding, 0x0103, 2, Field::Material),
    reg(
        Parameter::Scale,
        Table::Holding,
        0x0105,
        2,
        Field::FixedU32(WordOrder::HighFirst, 1000.0),
    ),
    reg(
        Parameter::Target,
        Table::Holding,
        0x0107,
        2,
        Field::FixedU32(WordOrder::HighFirst, 10.0),
    ),
    reg(Parameter::BaudRate, Table::Holding, 0x0110, 1, Field::BaudCode),
    reg(Parameter::Address, Table::Holding, 0x0111, 1, Field::U16),
];

pub(crate) fn register_for(param: Parameter) -> Option<&'static Register> {
    REGISTERS.iter().find(|r| r.param == param)
}

pub(crate) fn register_at(table: Table, start: u16, count: u16) -> Option<&'static Register> {
    REGISTERS
        .iter()
        .find(|r| r.table == table && r.start == start && r.count == count)
}

#[derive(Debug)]
struct Pending {
    command: Command,
    function: u8,
    start: u16,
    words: Vec<u16>,
    register: Option<&'static Register>,
}

/// Total length of the frame at the head of `src`, once known.
fn frame_len(src: &[u8]) -> Result<Option<usize>, ProtocolFault> {
    if src.len() < 3 {
        return Ok(None);
    }
    let function = src[1];
    let len = if function & EXCEPTION_FLAG != 0 {
        5
    } else {
        match function {
            FC_READ_HOLDING | FC_READ_INPUT => 5 + usize::from(src[2]),
            FC_WRITE_SINGLE | FC_WRITE_MULTIPLE => 8,
            other => {
                return Err(ProtocolFault::Malformed(format!(
                    "unknown function code {:#04x}",
                    other
                )))
            }
        }
    };
    Ok((src.len() >= len).then_some(len))
}

pub struct RtuCodec {
    address: u8,
    pending: Option<Pending>,
}

impl RtuCodec {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            pending: None,
        }
    }
}

impl Encoder<Command> for RtuCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Command, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut frame = BytesMut::with_capacity(32);
        frame.put_u8(self.address);

        let pending = match &item {
            Command::Read(p) => {
                let r = register_for(*p).ok_or(CodecError::Unsupported(*p))?;
                let function = r.table.read_function();
                frame.put_u8(function);
                frame.put_u16(r.start);
                frame.put_u16(r.count);
                Pending {
                    command: item.clone(),
                    function,
                    start: r.start,
                    words: Vec::new(),
                    register: Some(r),
                }
            }
            Command::Write(p, v) => {
                let r = register_for(*p).ok_or(CodecError::Unsupported(*p))?;
                if r.table != Table::Holding {
                    return Err(CodecError::Unsupported(*p));
                }
                let words = r.field.encode(*p, v, r.count)?;
                let function = if words.len() == 1 {
                    frame.put_u8(FC_WRITE_SINGLE);
                    frame.put_u16(r.start);
                    frame.put_u16(words[0]);
                    FC_WRITE_SINGLE
                } else {
                    frame.put_u8(FC_WRITE_MULTIPLE);
                    frame.put_u16(r.start);
                    frame.put_u16(r.count);
                    frame.put_u8((words.len() * 2) as u8);
                    for w in &words {
                        frame.put_u16(*w);
                    }
                    FC_WRITE_MULTIPLE
                };
                Pending {
                    command: item.clone(),
                    function,
                    start: r.start,
                    words,
                    register: Some(r),
                }
            }
            Command::StartMeasurement | Command::StopMeasurement => {
                let value = u16::from(item == Command::StartMeasurement);
                frame.put_u8(FC_WRITE_SINGLE);
                frame.put_u16(CONTROL_REGISTER);
                frame.put_u16(value);
                Pending {
                    command: item.clone(),
                    function: FC_WRITE_SINGLE,
                    start: CONTROL_REGISTER,
                    words: vec![value],
                    register: None,
                }
            }
        };

        seal(&mut frame);
        dst.extend_from_slice(&frame);
        self.pending = Some(pending);
        Ok(())
    }
}

impl Decoder for RtuCodec {
    type Item = Response;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match frame_len(src)? {
            Some(len) => len,
            None => return Ok(None),
        };
        let frame = src.split_to(len);
        let pending = self.pending.take().ok_or(ProtocolFault::NoRequest)?;

        let (body, crc) = frame.split_at(len - 2);
        let received = LittleEndian::read_u16(crc);
        let expected = crc16(body);
        if expected != received {
            return Err(ProtocolFault::Checksum { expected, received }.into());
        }
        if body[0] != self.address {
            return Err(ProtocolFault::AddressMismatch {
                expected: self.address,
                received: body[0],
            }
            .into());
        }

        let function = body[1];
        if function == pending.function | EXCEPTION_FLAG {
            return Ok(Some(Response::Rejected {
                code: body[2],
                current: None,
            }));
        }
        if function != pending.function {
            return Err(ProtocolFault::FunctionMismatch {
                expected: pending.function,
                received: function,
            }
            .into());
        }

        match function {
            FC_READ_HOLDING | FC_READ_INPUT => {
                let Some(r) = pending.register else {
                    return Err(ProtocolFault::NoRequest.into());
                };
                let byte_count = usize::from(body[2]);
                if byte_count != usize::from(r.count) * 2 {
                    return Err(ProtocolFault::Malformed(format!(
                        "{} data bytes for {} registers",
                        byte_count, r.count
                    ))
                    .into());
                }
                let mut cur = Cursor::new(&body[3..]);
                let mut words = Vec::with_capacity(r.count.into());
                for _ in 0..r.count {
                    words.push(cur.read_u16::<BigEndian>()?);
                }
                Ok(Some(Response::Value(r.field.decode(r.param, &words)?)))
            }
            FC_WRITE_SINGLE => {
                let register = BigEndian::read_u16(&body[2..4]);
                let echoed = BigEndian::read_u16(&body[4..6]);
                if register != pending.start {
                    return Err(ProtocolFault::UnexpectedReply {
                        expected: format!("register {:#06x}", pending.start),
                        received: format!("register {:#06x}", register),
                    }
                    .into());
                }
                let Some(r) = pending.register else {
                    // Control register, nothing to echo back to the caller.
                    return Ok(Some(Response::Ack(None)));
                };
                let value = r.field.decode(r.param, &[echoed])?;
                if pending.words.first() == Some(&echoed) {
                    Ok(Some(Response::Ack(Some(value))))
                } else {
                    Ok(Some(Response::Rejected {
                        code: 0,
                        current: Some(value),
                    }))
                }
            }
            _ => {
                let start = BigEndian::read_u16(&body[2..4]);
                let count = BigEndian::read_u16(&body[4..6]);
                let expected_count = pending.words.len() as u16;
                if start != pending.start || count != expected_count {
                    return Err(ProtocolFault::UnexpectedReply {
                        expected: format!("{} registers at {:#06x}", expected_count, pending.start),
                        received: format!("{} registers at {:#06x}", count, start),
                    }
                    .into());
                }
                Ok(Some(Response::Ack(None)))
            }
        }
    }
}

impl FrameCodec for RtuCodec {
    fn profile(&self) -> Profile {
        Profile::Bus
    }

    fn address(&self) -> Option<u8> {
        Some(self.address)
    }

    fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    fn reset(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealed(bytes: &[u8]) -> BytesMut {
        let mut frame = BytesMut::from(bytes);
        seal(&mut frame);
        frame
    }

    fn encode(codec: &mut RtuCodec, cmd: Command) -> Vec<u8> {
        let mut buf = BytesMut::new();
        codec.encode(cmd, &mut buf).expect("encode");
        buf.to_vec()
    }

    #[test]
    fn crc_matches_reference_frame() {
        // Read 2 holding registers at 0x0000 from slave 1.
        let frame = sealed(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(&frame[6..], &[0xC4, 0x0B]);
    }

    #[test]
    fn encode_read() {
        let mut codec = RtuCodec::new(3);
        let frame = encode(&mut codec, Command::Read(Parameter::GateTime));
        assert_eq!(&frame[..6], &[0x03, 0x03, 0x01, 0x01, 0x00, 0x01]);
        assert_eq!(frame.len(), 8);
    }

    #[test]
    fn encode_material_as_one_write() {
        let mut codec = RtuCodec::new(1);
        let frame = encode(
            &mut codec,
            Command::Write(
                Parameter::Material,
                Value::Material(Material {
                    density: 7.2,
                    z_ratio: 0.31,
                }),
            ),
        );
        // 7200 = 0x1C20, 310 = 0x0136
        assert_eq!(
            &frame[..11],
            &[0x01, 0x10, 0x01, 0x03, 0x00, 0x02, 0x04, 0x1C, 0x20, 0x01, 0x36]
        );
    }

    #[test]
    fn decode_reading_word_orders() {
        let mut codec = RtuCodec::new(1);
        encode(&mut codec, Command::Read(Parameter::Reading));
        // 500000025 centi-Hz = 0x1DCD_6519, counter 0x0001_E240 low word first
        let mut frame = sealed(&[
            0x01, 0x04, 0x08, 0x1D, 0xCD, 0x65, 0x19, 0xE2, 0x40, 0x00, 0x01,
        ]);
        assert_eq!(
            codec.decode(&mut frame).expect("decode"),
            Some(Response::Value(Value::Reading {
                frequency: 5000000.25,
                counter: 123456
            }))
        );
    }

    #[test]
    fn decode_waits_for_full_frame() {
        let mut codec = RtuCodec::new(1);
        encode(&mut codec, Command::Read(Parameter::Averaging));
        let full = sealed(&[0x01, 0x03, 0x02, 0x00, 0x05]);
        let mut buf = BytesMut::from(&full[..4]);
        assert!(codec.decode(&mut buf).expect("partial").is_none());
        buf.extend_from_slice(&full[4..]);
        assert_eq!(
            codec.decode(&mut buf).expect("complete"),
            Some(Response::Value(Value::Int(5)))
        );
    }

    #[test]
    fn decode_address_mismatch() {
        let mut codec = RtuCodec::new(1);
        encode(&mut codec, Command::Read(Parameter::Averaging));
        let mut frame = sealed(&[0x02, 0x03, 0x02, 0x00, 0x05]);
        assert!(matches!(
            codec.decode(&mut frame),
            Err(CodecError::Fault(ProtocolFault::AddressMismatch {
                expected: 1,
                received: 2
            }))
        ));
    }

    #[test]
    fn decode_bad_crc() {
        let mut codec = RtuCodec::new(1);
        encode(&mut codec, Command::Read(Parameter::Averaging));
        let mut frame = sealed(&[0x01, 0x03, 0x02, 0x00, 0x05]);
        frame[4] ^= 0xFF;
        assert!(matches!(
            codec.decode(&mut frame),
            Err(CodecError::Fault(ProtocolFault::Checksum { .. }))
        ));
    }

    #[test]
    fn decode_exception() {
        let mut codec = RtuCodec::new(1);
        encode(
            &mut codec,
            Command::Write(Parameter::GateTime, Value::Int(900)),
        );
        let mut frame = sealed(&[0x01, 0x86, EXC_ILLEGAL_VALUE]);
        assert_eq!(
            codec.decode(&mut frame).expect("decode"),
            Some(Response::Rejected {
                code: EXC_ILLEGAL_VALUE,
                current: None
            })
        );
    }

    #[test]
    fn decode_single_write_echo_mismatch() {
        let mut codec = RtuCodec::new(1);
        encode(
            &mut codec,
            Command::Write(Parameter::GateTime, Value::Int(500)),
        );
        let mut frame = sealed(&[0x01, 0x06, 0x01, 0x01, 0x03, 0xE8]);
        assert_eq!(
            codec.decode(&mut frame).expect("decode"),
            Some(Response::Rejected {
                code: 0,
                current: Some(Value::Int(1000))
            })
        );
    }

    #[test]
    fn field_round_trips() {
        let target = register_for(Parameter::Target).expect("target");
        let words = target
            .field
            .encode(Parameter::Target, &Value::Float(1000.0), target.count)
            .expect("encode");
        assert_eq!(words, vec![0x0000, 10000]);
        assert_eq!(
            target.field.decode(Parameter::Target, &words).expect("decode"),
            Value::Float(1000.0)
        );

        let vendor = register_for(Parameter::Vendor).expect("vendor");
        let words = vendor
            .field
            .encode(Parameter::Vendor, &Value::Text("Acme".into()), vendor.count)
            .expect("encode");
        assert_eq!(words.len(), 8);
        assert_eq!(
            vendor.field.decode(Parameter::Vendor, &words).expect("decode"),
            Value::Text("Acme".into())
        );
    }

    #[test]
    fn fixed_point_refuses_unrepresentable_values() {
        let material = register_for(Parameter::Material).expect("material");
        let encode = |density: f64, z_ratio: f64| {
            material.field.encode(
                Parameter::Material,
                &Value::Material(Material { density, z_ratio }),
                material.count,
            )
        };
        assert!(matches!(
            encode(0.0004, 0.3),
            Err(ProtocolFault::OutOfRange {
                param: Parameter::Material,
                ..
            })
        ));
        assert!(encode(7.2345, 0.31).is_err());
        assert!(encode(7.2, 0.3106).is_err());
        assert_eq!(encode(7.235, 0.311), Ok(vec![7235, 311]));

        let scale = register_for(Parameter::Scale).expect("scale");
        let words = scale
            .field
            .encode(Parameter::Scale, &Value::Float(0.1), scale.count)
            .expect("encode");
        assert_eq!(
            scale.field.decode(Parameter::Scale, &words),
            Ok(Value::Float(0.1))
        );
    }

    #[test]
    fn baud_code_rejects_unknown_rate() {
        let baud = register_for(Parameter::BaudRate).expect("baud");
        assert!(baud
            .field
            .encode(Parameter::BaudRate, &Value::Int(12345), 1)
            .is_err());
        assert_eq!(
            baud.field.encode(Parameter::BaudRate, &Value::Int(19200), 1),
            Ok(vec![2])
        );
    }

    #[test]
    fn usb_only_parameters_unsupported() {
        let mut codec = RtuCodec::new(1);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(Command::Read(Parameter::PrescalerCount), &mut buf),
            Err(CodecError::Unsupported(Parameter::PrescalerCount))
        ));
        assert!(matches!(
            codec.encode(
                Command::Write(Parameter::SerialNumber, Value::Int(1)),
                &mut buf
            ),
            Err(CodecError::Unsupported(Parameter::SerialNumber))
        ));
    }
}

//! Simulated instruments behind an in-memory port.
//!
//! A [`Sim`] is one physical line with one (USB) or several (bus) devices.
//! Requests written to a [`FakePort`] are answered immediately or after
//! `reply_delay`. Faults are injected by mutating the line or device state.

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    future::Future,
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
    time::Duration,
};
use tokio::time::{Instant, Sleep};

use super::codec::Profile;
use super::command::{Parameter, Value, Version};
use super::line::{Bus, Port};
use super::{rtu, usb};
use crate::measurement::Material;

pub(crate) const START_FREQUENCY: f64 = 5_000_000.0;

pub(crate) struct SimDevice {
    pub address: u8,
    pub baud_rate: u32,
    pub vendor: String,
    pub product: String,
    pub version: Version,
    pub serial: u32,
    pub mcu_hz: u32,
    pub gate_ms: u32,
    pub averaging: u32,
    pub progress: u32,
    pub measuring: bool,
    pub instant_hz: f64,
    pub averaged_hz: f64,
    /// Frequency drop per gate while measuring.
    pub step_hz: f64,
    pub counter: u32,
    pub material: Material,
    pub scale: f64,
    pub target: f64,
    pub rs485_baud: u32,
    pub rs485_address: u32,
    /// Writes to these parameters are refused.
    pub rejects: Vec<Parameter>,
    /// Number of upcoming requests to ignore.
    pub silent: u32,
    /// Answer with this address instead of the own one.
    pub reply_as: Option<u8>,
    /// Number of upcoming replies sent with a broken checksum.
    pub corrupt: u32,
    pub requests: u32,
}

impl SimDevice {
    fn new(address: u8) -> Self {
        Self {
            address,
            baud_rate: 19200,
            vendor: "Sim Instruments".to_string(),
            product: "FTM-1".to_string(),
            version: Version {
                major: 1,
                minor: 4,
                patch: 2,
            },
            serial: 4711,
            mcu_hz: 72_000_000,
            gate_ms: 1000,
            averaging: 0,
            progress: 0,
            measuring: false,
            instant_hz: START_FREQUENCY,
            averaged_hz: START_FREQUENCY,
            step_hz: 2.0,
            counter: START_FREQUENCY as u32,
            material: Material {
                density: 2.7,
                z_ratio: 1.08,
            },
            scale: 1.0,
            target: 0.0,
            rs485_baud: 19200,
            rs485_address: 1,
            rejects: Vec::new(),
            silent: 0,
            reply_as: None,
            corrupt: 0,
            requests: 0,
        }
    }

    /// One gate period while counting.
    fn gate(&mut self) {
        if !self.measuring {
            return;
        }
        self.instant_hz -= self.step_hz;
        self.counter = (self.instant_hz * f64::from(self.gate_ms) / 1000.0) as u32;
        self.progress += 1;
        if self.averaging == 0 || self.progress >= self.averaging {
            self.averaged_hz = self.instant_hz;
            self.progress = 0;
        }
    }

    fn read(&mut self, param: Parameter) -> Option<Value> {
        let value = match param {
            Parameter::Vendor => Value::Text(self.vendor.clone()),
            Parameter::ProductName => Value::Text(self.product.clone()),
            Parameter::Version => Value::Version(self.version),
            Parameter::SerialNumber => Value::Int(self.serial),
            Parameter::BaudRate => Value::Int(self.baud_rate),
            Parameter::Address => Value::Int(self.address.into()),
            Parameter::Rs485BaudRate => Value::Int(self.rs485_baud),
            Parameter::Rs485Address => Value::Int(self.rs485_address),
            Parameter::GateTime => Value::Int(self.gate_ms),
            Parameter::PrescalerCount => {
                Value::Int((u64::from(self.mcu_hz / 1000) * u64::from(self.gate_ms) / 65536) as u32)
            }
            Parameter::McuFrequency => Value::Int(self.mcu_hz),
            Parameter::Averaging => Value::Int(self.averaging),
            Parameter::AveragingProgress => Value::Int(self.progress),
            Parameter::Reading => {
                self.gate();
                Value::Reading {
                    frequency: self.averaged_hz,
                    counter: self.counter,
                }
            }
            Parameter::FrequencyInstant => Value::Float(self.instant_hz),
            Parameter::Counter => Value::Int(self.counter),
            Parameter::Material => Value::Material(self.material),
            Parameter::Scale => Value::Float(self.scale),
            Parameter::Target => Value::Float(self.target),
        };
        Some(value)
    }

    /// Apply a write. On refusal returns the unchanged current value.
    fn write(&mut self, param: Parameter, value: Value) -> Result<Value, Option<Value>> {
        if self.rejects.contains(&param) || param.is_read_only() {
            return Err(self.read(param));
        }
        match (param, &value) {
            (Parameter::SerialNumber, Value::Int(v)) => self.serial = *v,
            (Parameter::BaudRate, Value::Int(v)) => self.baud_rate = *v,
            (Parameter::Address, Value::Int(v)) => self.address = *v as u8,
            (Parameter::Rs485BaudRate, Value::Int(v)) => self.rs485_baud = *v,
            (Parameter::Rs485Address, Value::Int(v)) => self.rs485_address = *v,
            (Parameter::GateTime, Value::Int(v)) => self.gate_ms = *v,
            (Parameter::Averaging, Value::Int(v)) => {
                self.averaging = *v;
                self.progress = 0;
            }
            (Parameter::Material, Value::Material(m)) => self.material = *m,
            (Parameter::Scale, Value::Float(v)) => self.scale = *v,
            (Parameter::Target, Value::Float(v)) => self.target = *v,
            _ => return Err(self.read(param)),
        }
        Ok(value)
    }

    fn control(&mut self, start: bool) {
        self.measuring = start;
        if start {
            self.progress = 0;
        }
    }
}

pub(crate) struct SimLine {
    pub profile: Profile,
    pub devices: Vec<SimDevice>,
    pub port_baud: u32,
    pub reply_delay: Duration,
    pub disconnected: bool,
    pub fail_rebind: bool,
    /// A request arrived while a reply was still unread.
    pub overlap: bool,
    pub requests: u32,
    inbox: BytesMut,
    outbox: VecDeque<(Instant, Vec<u8>)>,
    waker: Option<Waker>,
}

impl SimLine {
    fn device_mut(&mut self, address: u8) -> Option<&mut SimDevice> {
        let port_baud = self.port_baud;
        let profile = self.profile;
        self.devices
            .iter_mut()
            .find(|d| d.address == address)
            .filter(|d| profile == Profile::Usb || d.baud_rate == port_baud)
    }

    fn take_request(&mut self) -> Option<Vec<u8>> {
        let len = match self.profile {
            Profile::Usb => self.inbox.iter().position(|b| *b == b'\r')? + 1,
            Profile::Bus => {
                if self.inbox.len() < 8 {
                    return None;
                }
                match self.inbox[1] {
                    rtu::FC_WRITE_MULTIPLE if self.inbox.len() >= 7 => {
                        9 + usize::from(self.inbox[6])
                    }
                    _ => 8,
                }
            }
        };
        (self.inbox.len() >= len).then(|| self.inbox.split_to(len).to_vec())
    }

    fn process(&mut self) {
        while let Some(request) = self.take_request() {
            self.requests += 1;
            if !self.outbox.is_empty() {
                self.overlap = true;
            }
            let reply = match self.profile {
                Profile::Usb => self.usb_reply(&request),
                Profile::Bus => self.rtu_reply(&request),
            };
            if let Some(reply) = reply {
                self.outbox
                    .push_back((Instant::now() + self.reply_delay, reply));
                if let Some(waker) = self.waker.take() {
                    waker.wake();
                }
            }
        }
    }

    fn usb_reply(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let text = std::str::from_utf8(request).ok()?.trim_end_matches('\r');
        let (body, cs) = text.rsplit_once('*')?;
        if u8::from_str_radix(cs, 16).ok()? != usb::checksum(body.as_bytes()) {
            return None;
        }
        let device = self.devices.first_mut()?;
        device.requests += 1;
        if device.silent > 0 {
            device.silent -= 1;
            return None;
        }

        let op = body.chars().next()?;
        let rest = &body[1..];
        let (mnemonic, argument) = match rest.split_once(',') {
            Some((m, a)) => (m, Some(a)),
            None => (rest, None),
        };
        let reply = match (op, mnemonic) {
            (':', "GO") | (':', "HL") => {
                device.control(mnemonic == "GO");
                format!("={}", mnemonic)
            }
            (op, _) => match (op, usb::parameter_for(mnemonic), argument) {
                ('?', Some(p), None) => {
                    let value = device.read(p)?;
                    format!("={},{}", mnemonic, usb::format_value(&value))
                }
                (':', Some(p), Some(arg)) => match usb::parse_payload(p, arg) {
                    Ok(value) => match device.write(p, value) {
                        Ok(applied) => format!("={},{}", mnemonic, usb::format_value(&applied)),
                        Err(Some(current)) => {
                            format!("!{},2,{}", mnemonic, usb::format_value(&current))
                        }
                        Err(None) => format!("!{},2", mnemonic),
                    },
                    Err(_) => format!("!{},3", mnemonic),
                },
                _ => format!("!{},1", mnemonic),
            },
        };

        let mut frame = usb::frame(&reply).into_bytes();
        if device.corrupt > 0 {
            device.corrupt -= 1;
            frame[1] ^= 0x20;
        }
        Some(frame)
    }

    fn rtu_reply(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let (body, crc) = request.split_at(request.len() - 2);
        if u16::from_le_bytes([crc[0], crc[1]]) != rtu::crc16(body) {
            return None;
        }
        let device = self.device_mut(body[0])?;
        device.requests += 1;
        if device.silent > 0 {
            device.silent -= 1;
            return None;
        }
        let reply_address = device.reply_as.unwrap_or(device.address);
        let function = body[1];
        let start = u16::from_be_bytes([body[2], body[3]]);
        let word = u16::from_be_bytes([body[4], body[5]]);

        let mut frame = BytesMut::new();
        frame.put_u8(reply_address);
        let exception = |frame: &mut BytesMut, code: u8| {
            frame.put_u8(function | rtu::EXCEPTION_FLAG);
            frame.put_u8(code);
        };

        match function {
            rtu::FC_READ_HOLDING | rtu::FC_READ_INPUT => {
                let table = if function == rtu::FC_READ_INPUT {
                    rtu::Table::Input
                } else {
                    rtu::Table::Holding
                };
                match rtu::register_at(table, start, word) {
                    Some(r) => {
                        let value = device.read(r.param)?;
                        let words = r.field.encode(r.param, &value, r.count).ok()?;
                        frame.put_u8(function);
                        frame.put_u8((words.len() * 2) as u8);
                        for w in words {
                            frame.put_u16(w);
                        }
                    }
                    None => exception(&mut frame, rtu::EXC_ILLEGAL_ADDRESS),
                }
            }
            rtu::FC_WRITE_SINGLE if start == rtu::CONTROL_REGISTER => {
                device.control(word == 1);
                frame.extend_from_slice(&body[1..6]);
            }
            rtu::FC_WRITE_SINGLE => match rtu::register_at(rtu::Table::Holding, start, 1) {
                Some(r) => {
                    let value = r.field.decode(r.param, &[word]).ok()?;
                    match device.write(r.param, value) {
                        Ok(applied) => {
                            let words = r.field.encode(r.param, &applied, 1).ok()?;
                            frame.put_u8(function);
                            frame.put_u16(start);
                            frame.put_u16(words[0]);
                        }
                        Err(_) => exception(&mut frame, rtu::EXC_ILLEGAL_VALUE),
                    }
                }
                None => exception(&mut frame, rtu::EXC_ILLEGAL_ADDRESS),
            },
            rtu::FC_WRITE_MULTIPLE => match rtu::register_at(rtu::Table::Holding, start, word) {
                Some(r) => {
                    let words: Vec<u16> = body[7..]
                        .chunks(2)
                        .map(|c| u16::from_be_bytes([c[0], c[1]]))
                        .collect();
                    let value = r.field.decode(r.param, &words).ok()?;
                    match device.write(r.param, value) {
                        Ok(_) => frame.extend_from_slice(&body[1..6]),
                        Err(_) => exception(&mut frame, rtu::EXC_ILLEGAL_VALUE),
                    }
                }
                None => exception(&mut frame, rtu::EXC_ILLEGAL_ADDRESS),
            },
            _ => exception(&mut frame, 0x01),
        }

        let corrupt = device.corrupt > 0;
        if corrupt {
            device.corrupt -= 1;
        }
        rtu::seal(&mut frame);
        if corrupt {
            let last = frame.len() - 1;
            frame[last] ^= 0xFF;
        }
        Some(frame.to_vec())
    }
}

/// Handle to a simulated line, shared between the test and its ports.
#[derive(Clone)]
pub(crate) struct Sim(Arc<Mutex<SimLine>>);

impl Sim {
    fn new(profile: Profile, devices: Vec<SimDevice>) -> Self {
        Self(Arc::new(Mutex::new(SimLine {
            profile,
            devices,
            port_baud: 19200,
            reply_delay: Duration::ZERO,
            disconnected: false,
            fail_rebind: false,
            overlap: false,
            requests: 0,
            inbox: BytesMut::new(),
            outbox: VecDeque::new(),
            waker: None,
        })))
    }

    /// A single USB-direct device.
    pub(crate) fn usb() -> Self {
        Self::new(Profile::Usb, vec![SimDevice::new(0)])
    }

    /// Bus devices at `addresses`, all at 19200 baud.
    pub(crate) fn rs485(addresses: &[u8]) -> Self {
        Self::new(
            Profile::Bus,
            addresses.iter().map(|a| SimDevice::new(*a)).collect(),
        )
    }

    pub(crate) fn port(&self) -> FakePort {
        FakePort {
            sim: self.clone(),
            sleep: None,
        }
    }

    /// A new handle on the line. Each call opens a separate port.
    pub(crate) fn bus(&self) -> Bus {
        let baud = self.0.lock().port_baud;
        Bus::from_port("sim", self.port(), baud)
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut SimLine) -> R) -> R {
        f(&mut self.0.lock())
    }

    /// Run `f` on the device currently at `address` (0 for USB).
    pub(crate) fn device<R>(&self, address: u8, f: impl FnOnce(&mut SimDevice) -> R) -> R {
        let mut line = self.0.lock();
        let device = line
            .devices
            .iter_mut()
            .find(|d| d.address == address)
            .expect("no simulated device at address");
        f(device)
    }

    pub(crate) fn requests(&self) -> u32 {
        self.0.lock().requests
    }
}

pub(crate) struct FakePort {
    sim: Sim,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Port for FakePort {
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        let mut line = self.sim.0.lock();
        if line.fail_rebind {
            return Err(io::Error::new(io::ErrorKind::Other, "port refused baud rate"));
        }
        line.port_baud = baud_rate;
        Ok(())
    }
}

impl tokio::io::AsyncRead for FakePort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let ready_at = {
                let mut line = self.sim.0.lock();
                if line.disconnected {
                    return Poll::Ready(Ok(()));
                }
                match line.outbox.front_mut() {
                    None => {
                        line.waker = Some(cx.waker().clone());
                        return Poll::Pending;
                    }
                    Some((ready_at, bytes)) if *ready_at <= Instant::now() => {
                        let n = buf.remaining().min(bytes.len());
                        buf.put_slice(&bytes[..n]);
                        bytes.drain(..n);
                        if bytes.is_empty() {
                            line.outbox.pop_front();
                        }
                        return Poll::Ready(Ok(()));
                    }
                    Some((ready_at, _)) => *ready_at,
                }
            };
            let sleep = self
                .sleep
                .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(ready_at)));
            if sleep.deadline() != ready_at {
                sleep.as_mut().reset(ready_at);
            }
            match sleep.as_mut().poll(cx) {
                Poll::Ready(()) => continue,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl tokio::io::AsyncWrite for FakePort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut line = self.sim.0.lock();
        line.inbox.extend_from_slice(buf);
        line.process();
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

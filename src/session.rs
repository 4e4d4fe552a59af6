//! One logical request at a time against a line and a codec.
//!
//! The session owns validation limits and the retry policy. It turns device
//! rejections into [`Error::DeviceRejected`] and exhausted timeouts into
//! [`Error::DeviceUnreachable`].

use std::{ops::RangeInclusive, time::Duration};
use tracing::{debug, warn};

use crate::proto::{
    codec::{new_codec, FrameCodec, Profile},
    command::{Command, Parameter, Value},
    line::{Bus, Line},
    response::Response,
    Error, ProtocolFault, Result,
};

/// Baud rates accepted by the devices, in order of their register code.
pub const BAUD_RATES: [u32; 6] = [4800, 9600, 19200, 38400, 57600, 115200];

/// Valid bus addresses.
pub const ADDRESSES: RangeInclusive<u32> = 1..=247;

/// Value ranges of one device profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub gate_min_ms: u32,
    pub gate_max_ms: u32,
    pub gate_step_ms: u32,
    pub max_averaging: u32,
}

impl Limits {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Usb => Self {
                gate_min_ms: 10,
                gate_max_ms: 10_000,
                gate_step_ms: 10,
                max_averaging: 100,
            },
            Profile::Bus => Self {
                gate_min_ms: 100,
                gate_max_ms: 10_000,
                gate_step_ms: 100,
                max_averaging: 100,
            },
        }
    }

    pub fn check_gate_time(&self, ms: u32) -> Result<()> {
        if !(self.gate_min_ms..=self.gate_max_ms).contains(&ms) {
            return Err(Error::invalid(
                Parameter::GateTime,
                format!(
                    "{} ms outside {}..={} ms",
                    ms, self.gate_min_ms, self.gate_max_ms
                ),
            ));
        }
        if ms % self.gate_step_ms != 0 {
            return Err(Error::invalid(
                Parameter::GateTime,
                format!("{} ms is not a multiple of {} ms", ms, self.gate_step_ms),
            ));
        }
        Ok(())
    }

    pub fn check_averaging(&self, window: u32) -> Result<()> {
        if window > self.max_averaging {
            return Err(Error::invalid(
                Parameter::Averaging,
                format!("window {} exceeds {}", window, self.max_averaging),
            ));
        }
        Ok(())
    }
}

pub fn check_baud_rate(param: Parameter, baud_rate: u32) -> Result<()> {
    if BAUD_RATES.contains(&baud_rate) {
        Ok(())
    } else {
        Err(Error::invalid(
            param,
            format!("{} baud, expected one of {:?}", baud_rate, BAUD_RATES),
        ))
    }
}

pub fn check_address(param: Parameter, address: u32) -> Result<()> {
    if ADDRESSES.contains(&address) {
        Ok(())
    } else {
        Err(Error::invalid(
            param,
            format!("address {} outside {:?}", address, ADDRESSES),
        ))
    }
}

/// Density, Z-ratio, scale and target must be positive finite numbers.
pub fn check_positive(param: Parameter, what: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::invalid(
            param,
            format!("{} must be positive, got {}", what, value),
        ))
    }
}

/// Delay between two attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// Doubles after every retry, never exceeding `max`.
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay before retry number `retry` (1 based).
    pub fn delay(&self, retry: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32
                    .checked_shl(retry.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts on timeouts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_millis(100)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Time to wait for a complete response.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

/// Typed requests to one device on one line.
pub struct Session {
    pub(crate) bus: Bus,
    pub(crate) codec: Box<dyn FrameCodec>,
    pub(crate) settings: SessionSettings,
    limits: Limits,
}

impl Session {
    /// `address` is only used by the bus profile.
    pub fn new(bus: Bus, profile: Profile, address: u8, settings: SessionSettings) -> Self {
        Self {
            bus,
            codec: new_codec(profile, address),
            settings,
            limits: Limits::for_profile(profile),
        }
    }

    pub fn profile(&self) -> Profile {
        self.codec.profile()
    }

    pub fn address(&self) -> Option<u8> {
        self.codec.address()
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: SessionSettings) {
        self.settings = settings;
    }

    pub async fn read(&mut self, param: Parameter) -> Result<Value> {
        let command = Command::Read(param);
        match self.transact(&command).await? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected(&command, "value", &other)),
        }
    }

    /// Write `value`. Returns the applied value if the device echoes it.
    pub async fn write(&mut self, param: Parameter, value: Value) -> Result<Option<Value>> {
        let command = Command::Write(param, value);
        match self.transact(&command).await? {
            Response::Ack(applied) => Ok(applied),
            other => Err(unexpected(&command, "acknowledge", &other)),
        }
    }

    /// Start or stop measurement.
    pub async fn run(&mut self, command: Command) -> Result<()> {
        match self.transact(&command).await? {
            Response::Ack(_) => Ok(()),
            other => Err(unexpected(&command, "acknowledge", &other)),
        }
    }

    /// Single round trip without retries, on a line the caller already holds.
    pub(crate) async fn exchange_held(
        codec: &mut dyn FrameCodec,
        line: &mut Line,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response> {
        let response = line.exchange(codec, command, timeout).await?;
        accept(command, response)
    }

    /// Round trip with the retry policy applied.
    ///
    /// Timeouts are retried up to `max_attempts`. A protocol error on a read
    /// is retried once. Writes are never resent after a protocol error since
    /// they may already have been applied.
    async fn transact(&mut self, command: &Command) -> Result<Response> {
        let policy = self.settings.retry;
        let mut attempts = 0;
        let mut timeouts = 0;
        let mut protocol_retried = false;

        loop {
            attempts += 1;
            let result = {
                let mut line = self.bus.lock().await;
                line.exchange(self.codec.as_mut(), command, self.settings.timeout)
                    .await
            };

            match result {
                Ok(response) => {
                    if attempts > 1 {
                        debug!(port = self.bus.name(), address = ?self.address(), %command, attempts, "Recovered");
                    }
                    return accept(command, response);
                }
                Err(Error::TransportTimeout { .. }) => {
                    timeouts += 1;
                    if timeouts >= policy.max_attempts {
                        return Err(Error::DeviceUnreachable {
                            command: command.clone(),
                            attempts,
                        });
                    }
                    let delay = policy.backoff.delay(timeouts);
                    warn!(port = self.bus.name(), address = ?self.address(), %command, attempt = attempts, ?delay, "Timeout, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(Error::Protocol { fault, .. }) if command.is_read() && !protocol_retried => {
                    protocol_retried = true;
                    warn!(port = self.bus.name(), address = ?self.address(), %command, attempt = attempts, %fault, "Protocol error, resending");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn accept(command: &Command, response: Response) -> Result<Response> {
    match response {
        Response::Rejected { code, current } => Err(Error::DeviceRejected {
            command: command.clone(),
            code,
            current,
        }),
        other => Ok(other),
    }
}

fn unexpected(command: &Command, expected: &str, received: &Response) -> Error {
    Error::Protocol {
        command: command.clone(),
        fault: ProtocolFault::UnexpectedReply {
            expected: expected.to_string(),
            received: format!("{:?}", received),
        },
    }
}

fn mismatch(param: Parameter, expected: &str, value: &Value) -> Error {
    Error::Protocol {
        command: Command::Read(param),
        fault: ProtocolFault::UnexpectedReply {
            expected: expected.to_string(),
            received: value.to_string(),
        },
    }
}

pub(crate) fn int(param: Parameter, value: Value) -> Result<u32> {
    match value {
        Value::Int(v) => Ok(v),
        other => Err(mismatch(param, "integer", &other)),
    }
}

pub(crate) fn float(param: Parameter, value: Value) -> Result<f64> {
    match value {
        Value::Float(v) => Ok(v),
        Value::Int(v) => Ok(v.into()),
        other => Err(mismatch(param, "number", &other)),
    }
}

pub(crate) fn text(param: Parameter, value: Value) -> Result<String> {
    match value {
        Value::Text(v) => Ok(v),
        other => Err(mismatch(param, "text", &other)),
    }
}

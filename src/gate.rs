//! Host side view of the gated counting state of one instrument.
//!
//! The device does the counting. This module tracks what the session has
//! observed so far: whether a measurement is running, the last known gate
//! configuration and averaging window, and whether the progress reported
//! by the device is consistent with that window.

use std::fmt;
use tracing::info;

use crate::measurement::Sample;
use crate::proto::ProtocolFault;
use crate::proto::command::Parameter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Idle,
    Measuring,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Idle => f.write_str("idle"),
            GateState::Measuring => f.write_str("measuring"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig {
    pub gate_ms: u32,
    /// Only reported by USB-direct devices.
    pub prescaler: Option<u32>,
}

/// Averaging window `W` and progress `P`, `0 <= P <= W`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AveragingState {
    window: u32,
    progress: u32,
}

impl AveragingState {
    pub fn new(window: u32) -> Self {
        Self {
            window,
            progress: 0,
        }
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    /// A new window always restarts accumulation.
    pub fn set_window(&mut self, window: u32) {
        self.window = window;
        self.progress = 0;
    }

    /// Take over the progress reported by the device.
    pub fn observe(&mut self, progress: u32) -> Result<(), ProtocolFault> {
        if progress > self.window {
            return Err(ProtocolFault::OutOfRange {
                param: Parameter::AveragingProgress,
                reason: format!("progress {} exceeds window {}", progress, self.window),
            });
        }
        self.progress = progress;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct GateEngine {
    state: GateState,
    gate: Option<GateConfig>,
    averaging: Option<AveragingState>,
    frozen: Option<Sample>,
}

impl GateEngine {
    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn is_measuring(&self) -> bool {
        self.state == GateState::Measuring
    }

    pub fn start(&mut self) {
        if self.state == GateState::Idle {
            info!("Measurement started");
        }
        self.state = GateState::Measuring;
        self.frozen = None;
        if let Some(averaging) = self.averaging.as_mut() {
            averaging.set_window(averaging.window());
        }
    }

    /// Stop and keep `last` as the final sample.
    pub fn stop(&mut self, last: Option<Sample>) {
        if self.state == GateState::Measuring {
            info!("Measurement stopped");
        }
        self.state = GateState::Idle;
        self.frozen = last;
    }

    /// Last sample taken before the measurement was stopped.
    pub fn frozen(&self) -> Option<&Sample> {
        self.frozen.as_ref()
    }

    pub fn gate(&self) -> Option<GateConfig> {
        self.gate
    }

    /// Record the gate time. A different value invalidates the cached
    /// prescaler count.
    pub fn set_gate_time(&mut self, gate_ms: u32) {
        let prescaler = self
            .gate
            .filter(|g| g.gate_ms == gate_ms)
            .and_then(|g| g.prescaler);
        self.gate = Some(GateConfig { gate_ms, prescaler });
    }

    pub fn set_prescaler(&mut self, prescaler: u32) {
        if let Some(gate) = self.gate.as_mut() {
            gate.prescaler = Some(prescaler);
        }
    }

    pub fn averaging(&self) -> Option<AveragingState> {
        self.averaging
    }

    /// Record the window read from the device. Progress is kept unless the
    /// window differs from the known one.
    pub fn observe_window(&mut self, window: u32) {
        match self.averaging.as_mut() {
            Some(a) if a.window() == window => {}
            Some(a) => a.set_window(window),
            None => self.averaging = Some(AveragingState::new(window)),
        }
    }

    /// Record a window written to the device.
    pub fn set_window(&mut self, window: u32) {
        self.averaging = Some(AveragingState::new(window));
    }

    /// Check and record the progress reported by the device.
    pub fn observe_progress(&mut self, progress: u32) -> Result<(), ProtocolFault> {
        match self.averaging.as_mut() {
            Some(a) => a.observe(progress),
            None => Ok(()),
        }
    }
}

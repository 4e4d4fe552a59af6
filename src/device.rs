use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::FtmConfig;
use crate::gate::{GateEngine, GateState};
use crate::measurement::{Material, ModelKind, Sample, ThicknessModel, ThicknessTracker};
use crate::proto::{
    codec::Profile,
    command::{Command, Parameter, Value, Version},
    conv::{nm_to_angstrom, um_to_angstrom},
    line::Bus,
    response::Ident,
    Error, ProtocolFault, Result,
};
use crate::reconfig::{Reconfigurator, Rs485Port};
use crate::session::{check_positive, float, int, text, Session, SessionSettings};

/// Optional features of a device, derived from its profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Baud rate and address of the link in use can be changed.
    pub link_reconfiguration: bool,
    /// A secondary RS485 port can be configured.
    pub rs485_subport: bool,
    /// The gate prescaler count can be read.
    pub prescaler: bool,
    pub writable_serial: bool,
}

impl Capabilities {
    pub fn for_profile(profile: Profile) -> Self {
        match profile {
            Profile::Usb => Self {
                link_reconfiguration: false,
                rs485_subport: true,
                prescaler: true,
                writable_serial: true,
            },
            Profile::Bus => Self {
                link_reconfiguration: true,
                rs485_subport: false,
                prescaler: false,
                writable_serial: false,
            },
        }
    }
}

/// A gated film thickness monitor.
pub struct Ftm {
    session: Session,
    capabilities: Capabilities,
    engine: GateEngine,
    tracker: ThicknessTracker,
}

impl Ftm {
    fn new(session: Session) -> Self {
        Self {
            capabilities: Capabilities::for_profile(session.profile()),
            session,
            engine: GateEngine::default(),
            tracker: ThicknessTracker::new(ModelKind::default().build()),
        }
    }

    /// USB-direct device, the only device on `bus`.
    pub fn usb(bus: Bus, settings: SessionSettings) -> Self {
        Self::new(Session::new(bus, Profile::Usb, 0, settings))
    }

    /// Device at `address` on a shared RS485 line.
    pub fn on_bus(bus: Bus, address: u8, settings: SessionSettings) -> Self {
        Self::new(Session::new(bus, Profile::Bus, address, settings))
    }

    pub fn open_usb(
        path: impl AsRef<str>,
        baud_rate: u32,
        settings: SessionSettings,
    ) -> Result<Self> {
        Ok(Self::usb(Bus::open(path, baud_rate)?, settings))
    }

    pub fn open_bus(
        path: impl AsRef<str>,
        baud_rate: u32,
        address: u8,
        settings: SessionSettings,
    ) -> Result<Self> {
        Ok(Self::on_bus(Bus::open(path, baud_rate)?, address, settings))
    }

    pub fn from_config(config: &FtmConfig) -> Result<Self> {
        config.validate()?;
        let c = &config.connection;
        let bus = Bus::open(&c.port, c.baud_rate)?;
        let mut ftm = match c.profile {
            Profile::Usb => Self::usb(bus, config.session_settings()),
            Profile::Bus => Self::on_bus(bus, c.address, config.session_settings()),
        };
        ftm.set_thickness_model(config.thickness.model.build());
        Ok(ftm)
    }

    pub fn profile(&self) -> Profile {
        self.session.profile()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn gate_state(&self) -> GateState {
        self.engine.state()
    }

    pub fn gate_engine(&self) -> &GateEngine {
        &self.engine
    }

    pub fn set_thickness_model(&mut self, model: Box<dyn ThicknessModel>) {
        self.tracker.set_model(model);
    }

    fn require(&self, available: bool, what: &str) -> Result<()> {
        if available {
            Ok(())
        } else {
            Err(Error::Unsupported(format!("{} on {} device", what, self.profile())))
        }
    }

    /// Reads vendor, product, version and serial number (four round trips).
    pub async fn ident(&mut self) -> Result<Ident> {
        Ok(Ident {
            vendor: self.vendor().await?,
            product: self.product_name().await?,
            version: self.version().await?,
            serial: self.serial_number().await?,
        })
    }

    pub async fn vendor(&mut self) -> Result<String> {
        let value = self.session.read(Parameter::Vendor).await?;
        text(Parameter::Vendor, value)
    }

    pub async fn product_name(&mut self) -> Result<String> {
        let value = self.session.read(Parameter::ProductName).await?;
        text(Parameter::ProductName, value)
    }

    pub async fn version(&mut self) -> Result<Version> {
        match self.session.read(Parameter::Version).await? {
            Value::Version(v) => Ok(v),
            other => Err(unexpected(Parameter::Version, "version", &other)),
        }
    }

    pub async fn serial_number(&mut self) -> Result<u32> {
        let value = self.session.read(Parameter::SerialNumber).await?;
        int(Parameter::SerialNumber, value)
    }

    pub async fn set_serial_number(&mut self, serial: u32) -> Result<()> {
        self.require(self.capabilities.writable_serial, "writing the serial number")?;
        self.session
            .write(Parameter::SerialNumber, Value::Int(serial))
            .await?;
        Ok(())
    }

    /// Clock of the counting MCU in Hz.
    pub async fn mcu_frequency(&mut self) -> Result<u32> {
        let value = self.session.read(Parameter::McuFrequency).await?;
        int(Parameter::McuFrequency, value)
    }

    /// Gate time in ms.
    pub async fn gate_time(&mut self) -> Result<u32> {
        let value = self.session.read(Parameter::GateTime).await?;
        let ms = int(Parameter::GateTime, value)?;
        self.engine.set_gate_time(ms);
        Ok(ms)
    }

    /// Takes effect with the next accumulation cycle.
    pub async fn set_gate_time(&mut self, ms: u32) -> Result<()> {
        self.session.limits().check_gate_time(ms)?;
        self.session
            .write(Parameter::GateTime, Value::Int(ms))
            .await?;
        self.engine.set_gate_time(ms);
        Ok(())
    }

    pub async fn gate_prescaler_count(&mut self) -> Result<u32> {
        self.require(self.capabilities.prescaler, "gate prescaler")?;
        let value = self.session.read(Parameter::PrescalerCount).await?;
        let count = int(Parameter::PrescalerCount, value)?;
        self.engine.set_prescaler(count);
        Ok(count)
    }

    /// Averaging window, 0 if disabled.
    pub async fn averaging(&mut self) -> Result<u32> {
        let value = self.session.read(Parameter::Averaging).await?;
        let window = int(Parameter::Averaging, value)?;
        self.engine.observe_window(window);
        Ok(window)
    }

    /// Set the averaging window and return the window the device applied.
    /// Progress restarts at 0.
    pub async fn set_averaging(&mut self, window: u32) -> Result<u32> {
        self.session.limits().check_averaging(window)?;
        let applied = match self
            .session
            .write(Parameter::Averaging, Value::Int(window))
            .await?
        {
            Some(value) => int(Parameter::Averaging, value)?,
            None => window,
        };
        self.engine.set_window(applied);
        Ok(applied)
    }

    /// Gated samples accumulated in the current averaging cycle.
    ///
    /// Reads the window first if it is not known yet. Progress beyond the
    /// known window is checked once more against a freshly read window
    /// before it is reported as a protocol error.
    pub async fn averaging_progress(&mut self) -> Result<u32> {
        if self.engine.averaging().is_none() {
            self.averaging().await?;
        }
        let value = self.session.read(Parameter::AveragingProgress).await?;
        let progress = int(Parameter::AveragingProgress, value)?;
        if self.engine.observe_progress(progress).is_err() {
            // The window may have been changed through another handle.
            self.averaging().await?;
            self.engine
                .observe_progress(progress)
                .map_err(|fault| Error::Protocol {
                    command: Command::Read(Parameter::AveragingProgress),
                    fault,
                })?;
        }
        Ok(progress)
    }

    /// Averaged frequency in Hz.
    ///
    /// While measuring, every call takes a new sample and updates thickness
    /// and rate. A reading of 0 Hz or less (no crystal, crystal failed) is
    /// refused then, thickness and rate keep their last values.
    pub async fn frequency(&mut self) -> Result<f64> {
        let (frequency, counter) = match self.session.read(Parameter::Reading).await? {
            Value::Reading { frequency, counter } => (frequency, counter),
            other => return Err(unexpected(Parameter::Reading, "reading", &other)),
        };
        if self.engine.is_measuring() {
            if !(frequency.is_finite() && frequency > 0.0) {
                return Err(Error::Protocol {
                    command: Command::Read(Parameter::Reading),
                    fault: ProtocolFault::OutOfRange {
                        param: Parameter::Reading,
                        reason: format!("no usable crystal frequency: {} Hz", frequency),
                    },
                });
            }
            let thickness = self.tracker.record(Sample {
                frequency,
                counter,
                at: Instant::now(),
            });
            debug!(frequency, counter, thickness, rate = ?self.tracker.rate(), "Sample");
        }
        Ok(frequency)
    }

    /// Latest single gated frequency in Hz, bypassing averaging.
    pub async fn frequency_instant(&mut self) -> Result<f64> {
        let value = self.session.read(Parameter::FrequencyInstant).await?;
        float(Parameter::FrequencyInstant, value)
    }

    pub async fn counter(&mut self) -> Result<u32> {
        let value = self.session.read(Parameter::Counter).await?;
        int(Parameter::Counter, value)
    }

    /// Last sample, frozen once the measurement is stopped.
    pub fn last_sample(&self) -> Option<Sample> {
        self.engine
            .frozen()
            .or_else(|| self.tracker.last())
            .copied()
    }

    /// Start gated counting. With `reset` the next sample becomes the new
    /// thickness baseline.
    ///
    /// Material and scale are read from the device first so thickness is
    /// computed with the constants the device uses.
    pub async fn start_measurement(&mut self, reset: bool) -> Result<()> {
        let material = self.material().await?;
        let scale = self.scale().await?;
        self.session.run(Command::StartMeasurement).await?;
        if reset {
            self.tracker.clear();
        }
        self.engine.start();
        info!(reset, %material, scale, "Measuring");
        Ok(())
    }

    pub async fn stop_measurement(&mut self) -> Result<()> {
        self.session.run(Command::StopMeasurement).await?;
        self.engine.stop(self.tracker.last().copied());
        Ok(())
    }

    /// Make the latest sample the thickness baseline. Gate and averaging
    /// settings are not touched.
    pub fn reset_thickness(&mut self) {
        self.tracker.rebase();
    }

    /// Thickness in Å since the baseline.
    pub fn thickness(&self) -> f64 {
        self.tracker.thickness()
    }

    /// Deposition rate in Å/s, `None` until two samples followed the
    /// baseline.
    pub fn rate(&self) -> Option<f64> {
        self.tracker.rate()
    }

    pub async fn material(&mut self) -> Result<Material> {
        match self.session.read(Parameter::Material).await? {
            Value::Material(m) => {
                self.tracker.set_material(m);
                Ok(m)
            }
            other => Err(unexpected(Parameter::Material, "material", &other)),
        }
    }

    pub async fn set_material(&mut self, material: Material) -> Result<()> {
        check_positive(Parameter::Material, "density", material.density)?;
        check_positive(Parameter::Material, "Z-ratio", material.z_ratio)?;
        self.session
            .write(Parameter::Material, Value::Material(material))
            .await?;
        self.tracker.set_material(material);
        Ok(())
    }

    pub async fn scale(&mut self) -> Result<f64> {
        let value = self.session.read(Parameter::Scale).await?;
        let scale = float(Parameter::Scale, value)?;
        self.tracker.set_scale(scale);
        Ok(scale)
    }

    pub async fn set_scale(&mut self, scale: f64) -> Result<()> {
        check_positive(Parameter::Scale, "scale", scale)?;
        self.session
            .write(Parameter::Scale, Value::Float(scale))
            .await?;
        self.tracker.set_scale(scale);
        Ok(())
    }

    /// Set the target thickness in µm. Returns the target in Å.
    pub async fn set_target_um(&mut self, um: f64) -> Result<f64> {
        check_positive(Parameter::Target, "target", um)?;
        self.set_target(um_to_angstrom(um)).await
    }

    /// Set the target thickness in nm. Returns the target in Å.
    pub async fn set_target_nm(&mut self, nm: f64) -> Result<f64> {
        check_positive(Parameter::Target, "target", nm)?;
        self.set_target(nm_to_angstrom(nm)).await
    }

    async fn set_target(&mut self, angstrom: f64) -> Result<f64> {
        self.session
            .write(Parameter::Target, Value::Float(angstrom))
            .await?;
        Ok(angstrom)
    }

    /// Target thickness in Å.
    pub async fn target_thickness(&mut self) -> Result<f64> {
        let value = self.session.read(Parameter::Target).await?;
        float(Parameter::Target, value)
    }

    /// Baud rate and address of the link in use. Bus devices only.
    pub fn reconfigure(&mut self) -> Option<Reconfigurator<'_>> {
        if self.capabilities.link_reconfiguration {
            Some(Reconfigurator::new(&mut self.session))
        } else {
            None
        }
    }

    /// Secondary RS485 port. USB-direct devices only.
    pub fn rs485(&mut self) -> Option<Rs485Port<'_>> {
        if self.capabilities.rs485_subport {
            Some(Rs485Port::new(&mut self.session))
        } else {
            None
        }
    }
}

fn unexpected(param: Parameter, expected: &str, value: &Value) -> Error {
    Error::Protocol {
        command: Command::Read(param),
        fault: ProtocolFault::UnexpectedReply {
            expected: expected.to_string(),
            received: value.to_string(),
        },
    }
}

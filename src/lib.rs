//!
//! This library controls gated quartz crystal film thickness monitors (FTM).
//!
//! <br>
//!
//! # Details
//!
//! - Devices are reached either directly over USB (a virtual serial port,
//!   one device per port) or as addressed devices on an RS485 line.
//!
//! - Basic setup and connection
//!
//!   ```no_run
//!   use ftmctrl::{Ftm, SessionSettings, DEFAULT_BAUDRATE};
//!   #[tokio::main]
//!   async fn main() -> ftmctrl::Result<()> {
//!       let path = "/dev/ttyACM0".to_string();
//!       let mut ftm = Ftm::open_usb(&path, DEFAULT_BAUDRATE, SessionSettings::default())?;
//!       eprintln!("Connected to: {}\n", ftm.product_name().await?);
//!       Ok(())
//!   }
//!   ```
//!
//! - Several devices on one RS485 line share a [`Bus`]. Requests of all
//!   devices on the line are serialized.
//!
//!   ```no_run
//!   use ftmctrl::{Bus, Ftm, SessionSettings, DEFAULT_BAUDRATE};
//!   #[tokio::main]
//!   async fn main() -> ftmctrl::Result<()> {
//!       let bus = Bus::open("/dev/ttyUSB0", DEFAULT_BAUDRATE)?;
//!       let mut left = Ftm::on_bus(bus.clone(), 1, SessionSettings::default());
//!       let mut right = Ftm::on_bus(bus, 2, SessionSettings::default());
//!       left.start_measurement(true).await?;
//!       right.start_measurement(true).await?;
//!       Ok(())
//!   }
//!   ```
//!
//! Thickness and rate are computed on the host from the samples taken by
//! [`Ftm::frequency`] while a measurement is running.
//!

pub mod config;
pub mod device;
pub mod gate;
pub mod measurement;
pub mod proto;
pub mod reconfig;
pub mod session;

pub use config::FtmConfig;
pub use device::{Capabilities, Ftm};
pub use measurement::Material;
pub use proto::line::Bus;
pub use proto::{Error, Result};
pub use session::SessionSettings;

#[cfg(unix)]
pub const DEFAULT_TTY: &str = "/dev/ttyUSB0";
#[cfg(windows)]
pub const DEFAULT_TTY: &str = "COM1";

/// Factory default baud rate of USB and RS485 ports.
pub const DEFAULT_BAUDRATE: u32 = 19200;

//! Byte transport to one physical line.
//!
//! A [`Bus`] owns a serial port behind an async mutex. Every round trip
//! holds the mutex from the first request byte to the last response byte, so
//! sessions sharing one RS485 line never interleave frames.
//!
//! ```rust,ignore
//! let bus = Bus::open("/dev/ttyUSB0", 19200)?;
//! let mut qcm_1 = Ftm::on_bus(bus.clone(), 1, SessionSettings::default());
//! let mut qcm_2 = Ftm::on_bus(bus.clone(), 2, SessionSettings::default());
//! ```

use bytes::BytesMut;
use std::{io, sync::Arc, time::Duration};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout_at, Instant};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use super::codec::FrameCodec;
use super::command::Command;
use super::response::Response;
use super::{CodecError, Error, ProtocolFault, Result};

/// Serial port that can follow a baud rate change.
pub trait Port: AsyncRead + AsyncWrite + Unpin + Send {
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;
}

impl Port for tokio_serial::SerialStream {
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        tokio_serial::SerialPort::set_baud_rate(self, baud_rate).map_err(io::Error::from)
    }
}

pub type DynPort = Box<dyn Port>;

/// Silence waited for after a broken or late frame before the next request.
pub(crate) const QUIET_PERIOD: Duration = Duration::from_millis(20);

pub struct Line {
    port: DynPort,
    name: Arc<str>,
    baud_rate: u32,
    rx: BytesMut,
    /// Input arriving before this instant belongs to an earlier exchange.
    discard_until: Option<Instant>,
}

impl Line {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    /// One request/response round trip.
    ///
    /// If the future is dropped before it completes, the line remembers the
    /// deadline and the next exchange discards input until then.
    pub(crate) async fn exchange(
        &mut self,
        codec: &mut dyn FrameCodec,
        command: &Command,
        timeout: Duration,
    ) -> Result<Response> {
        self.settle().await;
        codec.reset();

        let mut request = BytesMut::new();
        codec
            .encode(command.clone(), &mut request)
            .map_err(|e| encode_error(command, e))?;

        let deadline = Instant::now() + timeout;
        self.discard_until = Some(deadline);
        debug!(port = %self.name, %command, len = request.len(), "Request");

        let written = async {
            self.port.write_all(&request).await?;
            self.port.flush().await
        };
        if let Err(source) = written.await {
            return Err(Error::TransportIo {
                command: command.clone(),
                source,
            });
        }

        let result = self.receive(codec, command, deadline, timeout).await;
        match &result {
            Ok(response) => {
                debug!(port = %self.name, %command, ?response, "Response");
                self.discard_until = None;
            }
            Err(Error::TransportTimeout { .. }) | Err(Error::Protocol { .. }) => {
                self.discard_until = Some(Instant::now() + QUIET_PERIOD);
            }
            Err(_) => {}
        }
        result
    }

    async fn receive(
        &mut self,
        codec: &mut dyn FrameCodec,
        command: &Command,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Response> {
        loop {
            if let Some(response) = codec
                .decode(&mut self.rx)
                .map_err(|e| Error::from_codec(command, e))?
            {
                return Ok(response);
            }
            match timeout_at(deadline, self.port.read_buf(&mut self.rx)).await {
                Err(_elapsed) => {
                    return Err(Error::TransportTimeout {
                        command: command.clone(),
                        timeout,
                    })
                }
                Ok(Ok(0)) => {
                    return Err(Error::TransportIo {
                        command: command.clone(),
                        source: io::Error::new(io::ErrorKind::UnexpectedEof, "Link closed"),
                    })
                }
                Ok(Ok(_)) => {}
                Ok(Err(source)) => {
                    return Err(Error::TransportIo {
                        command: command.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// Drop everything still arriving from an abandoned or broken exchange.
    ///
    /// The marker is only cleared once the drain has run to its deadline, so
    /// a caller dropped while settling leaves it for the next one.
    async fn settle(&mut self) {
        self.rx.clear();
        let Some(until) = self.discard_until else {
            return;
        };
        let mut discarded = 0;
        while let Ok(Ok(n)) = timeout_at(until, self.port.read_buf(&mut self.rx)).await {
            if n == 0 {
                break;
            }
            discarded += n;
            self.rx.clear();
        }
        self.discard_until = None;
        if discarded > 0 {
            warn!(port = %self.name, discarded, "Discarded stale input");
        }
    }

    /// Switch the port to a new baud rate.
    pub(crate) fn rebind(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port.set_baud_rate(baud_rate)?;
        info!(port = %self.name, from = self.baud_rate, to = baud_rate, "Rebound line");
        self.baud_rate = baud_rate;
        Ok(())
    }
}

fn encode_error(command: &Command, err: CodecError) -> Error {
    match err {
        CodecError::Fault(ProtocolFault::OutOfRange { param, reason }) => {
            Error::InvalidParameter { param, reason }
        }
        other => Error::from_codec(command, other),
    }
}

/// Cloneable handle to one physical line.
#[derive(Clone)]
pub struct Bus {
    line: Arc<Mutex<Line>>,
    name: Arc<str>,
}

impl Bus {
    /// Open a serial port for the sessions of this bus.
    pub fn open(path: impl AsRef<str>, baud_rate: u32) -> Result<Self> {
        #[allow(unused_mut)]
        let mut port = tokio_serial::new(path.as_ref(), baud_rate).open_native_async()?;

        #[cfg(unix)]
        port.set_exclusive(false)?;

        info!(port = path.as_ref(), baud_rate, "Opened serial port");
        Ok(Self::from_port(path.as_ref(), port, baud_rate))
    }

    /// Wrap an already opened port. `baud_rate` is the rate it is running at.
    pub fn from_port(name: &str, port: impl Port + 'static, baud_rate: u32) -> Self {
        let name: Arc<str> = Arc::from(name);
        let line = Line {
            port: Box::new(port),
            name: name.clone(),
            baud_rate,
            rx: BytesMut::with_capacity(256),
            discard_until: None,
        };
        Self {
            line: Arc::new(Mutex::new(line)),
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn baud_rate(&self) -> u32 {
        self.line.lock().await.baud_rate()
    }

    /// Number of handles (sessions) sharing this line.
    pub fn handles(&self) -> usize {
        Arc::strong_count(&self.line)
    }

    /// Take the line for one or more round trips.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Line> {
        self.line.lock().await
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::codec::{Decoder, Encoder};

use super::command::Command;
use super::response::Response;
use super::rtu::RtuCodec;
use super::usb::UsbCodec;
use super::CodecError;

/// Wire profile of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Command/argument/checksum frames, one device per link.
    Usb,
    /// Modbus-RTU style addressed register frames on a multidrop line.
    Bus,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Usb => f.write_str("usb"),
            Profile::Bus => f.write_str("bus"),
        }
    }
}

/// A request encoder paired with the matching response decoder.
///
/// The encoder remembers the last request so the decoder can check that a
/// response belongs to it. Encoding a new request discards any previous
/// pending request.
pub trait FrameCodec:
    Encoder<Command, Error = CodecError> + Decoder<Item = Response, Error = CodecError> + Send
{
    fn profile(&self) -> Profile;

    /// Bus address the codec frames requests for, if the profile is addressed.
    fn address(&self) -> Option<u8> {
        None
    }

    fn set_address(&mut self, _address: u8) {}

    /// Forget the pending request, e.g. after the line was drained.
    fn reset(&mut self);
}

/// Build the codec for `profile`. `address` is ignored for [`Profile::Usb`].
pub fn new_codec(profile: Profile, address: u8) -> Box<dyn FrameCodec> {
    match profile {
        Profile::Usb => Box::<UsbCodec>::default(),
        Profile::Bus => Box::new(RtuCodec::new(address)),
    }
}

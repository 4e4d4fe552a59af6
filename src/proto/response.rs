use super::command::{Value, Version};

/// Decoded device response to one [`Command`](super::command::Command).
///
/// A rejection is a successfully decoded frame. Whether it becomes an
/// error is decided by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Value returned for a read.
    Value(Value),
    /// Write or action accepted. Carries the applied value when the
    /// protocol echoes it back.
    Ack(Option<Value>),
    /// Device refused the request. `current` is the unchanged device
    /// value if the protocol reports it.
    Rejected { code: u8, current: Option<Value> },
}

/// Device identity as read by [`Ftm::ident`](crate::Ftm::ident).
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub vendor: String,
    pub product: String,
    pub version: Version,
    pub serial: u32,
}

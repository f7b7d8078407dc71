//! Byte channel abstraction.
//!
//! Defines the `Channel` trait for the debug link,
//! allowing different implementations (serial, mock, etc.).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to open {device}: {message}")]
    ChannelUnavailable { device: String, message: String },

    #[error("Failed to configure {device}: {message}")]
    Configuration { device: String, message: String },

    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),
}

/// Blocking byte-duplex link to the target's debug port.
///
/// A channel is configured once when it is opened and released on drop.
pub trait Channel {
    /// Write a complete frame. Returns the number of bytes written.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `buf.len()` bytes, waiting at most one read timeout.
    ///
    /// `Ok(0)` means nothing arrived within the window.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Human readable name of the underlying device.
    fn name(&self) -> &str;
}

impl<C: Channel + ?Sized> Channel for &mut C {
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        (**self).send(data)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).receive(buf)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

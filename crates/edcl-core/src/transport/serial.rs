//! serialport-based debug link implementation.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info, instrument, trace};

use super::traits::{Channel, TransportError};
use crate::session::LinkConfig;

/// Serial debug port configured for raw 8-N-1.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    device: String,
}

impl SerialChannel {
    /// Open and configure the device named in `config`.
    #[instrument(level = "info", skip(config), fields(device = %config.device))]
    pub fn open(config: &LinkConfig) -> Result<Self, TransportError> {
        let port = serialport::new(&config.device, config.baud_rate)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| TransportError::ChannelUnavailable {
                device: config.device.clone(),
                message: e.to_string(),
            })?;

        let mut channel = Self {
            port,
            device: config.device.clone(),
        };
        channel.configure(config.baud_rate, config.read_timeout())?;

        info!(
            device = %channel.device,
            baud = config.baud_rate,
            timeout_ms = config.read_timeout_ms,
            "Debug link opened"
        );
        Ok(channel)
    }

    /// Apply the fixed line discipline: 8 data bits, no parity, one stop
    /// bit, no flow control. The port is already in raw mode after open.
    fn configure(&mut self, baud: u32, timeout: Duration) -> Result<(), TransportError> {
        let device = self.device.clone();
        let fail = |e: serialport::Error| TransportError::Configuration {
            device: device.clone(),
            message: e.to_string(),
        };

        self.port.set_baud_rate(baud).map_err(fail)?;
        self.port.set_data_bits(DataBits::Eight).map_err(fail)?;
        self.port.set_parity(Parity::None).map_err(fail)?;
        self.port.set_stop_bits(StopBits::One).map_err(fail)?;
        self.port.set_flow_control(FlowControl::None).map_err(fail)?;
        self.port.set_timeout(timeout).map_err(fail)?;
        Ok(())
    }
}

impl Channel for SerialChannel {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let written = self
            .port
            .write(data)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        if written != data.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: data.len(),
            });
        }
        self.port
            .flush()
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        trace!(bytes_written = written, "Write complete");
        Ok(written)
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port.read(buf) {
            Ok(n) => {
                trace!(bytes_read = n, "Read complete");
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(0)
            }
            Err(e) => Err(TransportError::ReadFailed(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        &self.device
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        debug!(device = %self.device, "Debug link closed");
    }
}

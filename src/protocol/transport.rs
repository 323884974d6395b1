use anyhow::{anyhow, Result};
use serialport::{DataBits, FlowControl, SerialPort, StopBits};
use std::{
    fmt,
    io::{Read, Write},
    time::{Duration, Instant},
};

/// Byte-stream contract the bench needs from the link to the board.
///
/// Implementations must report a lost or unusable device as a
/// [`TransportFault`] so the sequencer can tell it apart from ordinary
/// stage failures.
pub trait Transport: Send {
    /// Write the whole buffer.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Append whatever bytes are currently available to `buf` without
    /// blocking. Returns the number of bytes appended.
    fn poll(&mut self, buf: &mut Vec<u8>) -> Result<usize>;

    /// Discard everything waiting in the input buffer.
    fn clear_input(&mut self) -> Result<()>;

    /// Read up to and including the next `\n`, giving up after the
    /// configured timeout. A timeout returns whatever was collected.
    fn read_line(&mut self) -> Result<Vec<u8>>;

    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    fn timeout(&self) -> Duration;
}

/// The device behind a transport went away or refused I/O.
///
/// This is the only error class that terminates a whole run.
#[derive(Debug, Clone)]
pub struct TransportFault {
    pub port: String,
    pub reason: String,
}

impl TransportFault {
    pub fn new(port: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            port: port.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport fault on {}: {}", self.port, self.reason)
    }
}

impl std::error::Error for TransportFault {}

/// Whether an error chain carries a [`TransportFault`].
pub fn is_transport_fault(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TransportFault>().is_some()
        || err
            .chain()
            .any(|cause| cause.downcast_ref::<TransportFault>().is_some())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub baud: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: serialport::Parity,
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: 8,
            stop_bits: 1,
            parity: serialport::Parity::None,
            timeout: Duration::from_secs(2),
        }
    }
}

impl SerialConfig {
    pub fn apply_builder(&self, b: serialport::SerialPortBuilder) -> serialport::SerialPortBuilder {
        let b = b.data_bits(match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        });
        let b = b.stop_bits(match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        });
        b.parity(self.parity)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
    }
}

/// [`Transport`] over a real serial device.
pub struct SerialTransport {
    port_name: String,
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port_name", &self.port_name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open a serial port, enabling exclusive access on Unix systems.
    pub fn open(port_name: &str, config: &SerialConfig) -> Result<Self> {
        let builder = config.apply_builder(serialport::new(port_name, config.baud));

        #[cfg(unix)]
        let port: Box<dyn SerialPort> = {
            let mut handle = builder
                .open_native()
                .map_err(|err| TransportFault::new(port_name, format!("failed to open: {err}")))?;
            handle.set_exclusive(true).map_err(|err| {
                TransportFault::new(port_name, format!("failed to acquire exclusive access: {err}"))
            })?;
            Box::new(handle)
        };

        #[cfg(not(unix))]
        let port: Box<dyn SerialPort> = builder
            .open()
            .map_err(|err| TransportFault::new(port_name, format!("failed to open: {err}")))?;

        log::info!("Opened {port_name} at {} baud", config.baud);
        Ok(Self {
            port_name: port_name.to_string(),
            port,
            timeout: config.timeout,
        })
    }

    fn fault(&self, err: impl fmt::Display) -> anyhow::Error {
        anyhow!(TransportFault::new(self.port_name.clone(), err))
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        match self.port.write_all(bytes).and_then(|_| self.port.flush()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                Err(anyhow!("write to {} timed out", self.port_name))
            }
            Err(err) => Err(self.fault(err)),
        }
    }

    fn poll(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
        let waiting = self.port.bytes_to_read().map_err(|err| self.fault(err))? as usize;
        if waiting == 0 {
            return Ok(0);
        }
        let start = buf.len();
        buf.resize(start + waiting, 0);
        match self.port.read(&mut buf[start..]) {
            Ok(n) => {
                buf.truncate(start + n);
                Ok(n)
            }
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                buf.truncate(start);
                Ok(0)
            }
            Err(err) => {
                buf.truncate(start);
                Err(self.fault(err))
            }
        }
    }

    fn clear_input(&mut self) -> Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|err| self.fault(err))
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let deadline = Instant::now() + self.timeout;
        let mut line = Vec::with_capacity(64);
        let mut byte = [0u8; 1];

        // One byte at a time so nothing after the newline is consumed.
        while Instant::now() < deadline {
            match self.port.read(&mut byte) {
                Ok(0) => {}
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => break,
                Err(err) => return Err(self.fault(err)),
            }
        }
        Ok(line)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|err| self.fault(err))?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_is_detected_through_context() {
        let err = anyhow!(TransportFault::new("/dev/ttyUSB0", "device removed"))
            .context("reading telemetry");
        assert!(is_transport_fault(&err));

        let plain = anyhow!("malformed frame");
        assert!(!is_transport_fault(&plain));
    }

    #[test]
    fn default_serial_config_matches_board() {
        let cfg = SerialConfig::default();
        assert_eq!(cfg.baud, 115_200);
        assert_eq!(cfg.data_bits, 8);
        assert_eq!(cfg.stop_bits, 1);
        assert_eq!(cfg.timeout, Duration::from_secs(2));
    }
}

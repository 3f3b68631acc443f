//! The link seam between the session engine and whatever carries bytes to
//! the supply. The engine opens a fresh port on every operator connect, so
//! the transport is a factory rather than a port.

use crate::error::ConnectError;

pub trait Transport: Send + 'static {
    type Port: embedded_io::Read + embedded_io::Write + Send;

    /// Open the link. Called once per connect attempt; dropping the
    /// returned port closes it.
    fn open(&mut self) -> Result<Self::Port, ConnectError>;
}

#[cfg(feature = "serial")]
pub use serial::{SerialPort, SerialTransport};

#[cfg(feature = "serial")]
mod serial {
    use std::io::{Read as _, Write as _};
    use std::time::Duration;

    use super::Transport;
    use crate::error::ConnectError;

    /// Opens a real serial port. The supply wants 115200 baud, 8 data
    /// bits, one stop bit, no parity, which is serialport's default
    /// framing.
    pub struct SerialTransport {
        port_name: String,
        baud_rate: u32,
        read_timeout: Duration,
    }

    impl SerialTransport {
        pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
            Self {
                port_name: port_name.into(),
                baud_rate,
                read_timeout: Duration::from_millis(300),
            }
        }

        /// Per byte read timeout applied to the opened port.
        pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
            self.read_timeout = timeout;
            self
        }
    }

    impl Transport for SerialTransport {
        type Port = SerialPort;

        fn open(&mut self) -> Result<SerialPort, ConnectError> {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(self.read_timeout)
                .open()
                .map_err(|e| ConnectError::Open {
                    port: self.port_name.clone(),
                    reason: e.to_string(),
                })?;
            Ok(SerialPort(port))
        }
    }

    /// Adapts a serialport handle to the [embedded_io] traits the
    /// protocol client is written against.
    pub struct SerialPort(Box<dyn serialport::SerialPort>);

    #[derive(Debug)]
    pub struct SerialIoError(std::io::Error);

    impl core::fmt::Display for SerialIoError {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for SerialIoError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    impl embedded_io::Error for SerialIoError {
        fn kind(&self) -> embedded_io::ErrorKind {
            match self.0.kind() {
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                    embedded_io::ErrorKind::TimedOut
                }
                std::io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
                std::io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
                _ => embedded_io::ErrorKind::Other,
            }
        }
    }

    impl embedded_io::ErrorType for SerialPort {
        type Error = SerialIoError;
    }

    impl embedded_io::Read for SerialPort {
        fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
            self.0.read(buf).map_err(SerialIoError)
        }
    }

    impl embedded_io::Write for SerialPort {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            self.0.write(buf).map_err(SerialIoError)
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            self.0.flush().map_err(SerialIoError)
        }
    }
}

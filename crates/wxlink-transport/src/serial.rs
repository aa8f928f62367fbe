//! Serial port transport for RS-232 weather consoles.
//!
//! [`SerialTransport`] implements [`Transport`] over a `tokio-serial`
//! stream. The WMR928 console streams frames at 9600 baud, 8N1, with no
//! handshake; USB-serial adapters present it as `/dev/ttyUSB*` or `COMn`.
//!
//! # Example
//!
//! ```no_run
//! use wxlink_transport::SerialTransport;
//! use wxlink_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> wxlink_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB0", 9600).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use wxlink_core::error::{Error, Result};
use wxlink_core::transport::Transport;

/// Serial port configuration.
///
/// Defaults match the WMR928: 9600 baud, 8 data bits, no parity, 1 stop
/// bit, no flow control, with DTR and RTS raised.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    /// Raise DTR and RTS after opening. Console cables with a passive
    /// level shifter draw their supply from these lines.
    pub power_control_lines: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
            power_control_lines: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    Seven,
    Eight,
}

impl From<DataBits> for tokio_serial::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Seven => tokio_serial::DataBits::Seven,
            DataBits::Eight => tokio_serial::DataBits::Eight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for tokio_serial::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for tokio_serial::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => tokio_serial::FlowControl::None,
            FlowControl::Software => tokio_serial::FlowControl::Software,
            FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
        }
    }
}

/// Serial transport to a streaming console.
pub struct SerialTransport {
    port: Option<SerialStream>,
    port_name: String,
}

impl SerialTransport {
    /// Open a serial port at `baud_rate` with otherwise default settings.
    pub async fn open(port: &str, baud_rate: u32) -> Result<Self> {
        let config = SerialConfig {
            baud_rate,
            ..Default::default()
        };
        Self::open_with_config(port, &config).await
    }

    /// Open a serial port with full configuration control.
    ///
    /// A missing device node maps to [`Error::DeviceNotFound`] so callers
    /// can tell an unplugged adapter from a busy one.
    pub async fn open_with_config(port: &str, config: &SerialConfig) -> Result<Self> {
        tracing::debug!(
            port = %port,
            baud_rate = config.baud_rate,
            data_bits = ?config.data_bits,
            stop_bits = ?config.stop_bits,
            parity = ?config.parity,
            flow_control = ?config.flow_control,
            "opening serial port"
        );

        let mut stream = tokio_serial::new(port, config.baud_rate)
            .data_bits(config.data_bits.into())
            .stop_bits(config.stop_bits.into())
            .parity(config.parity.into())
            .flow_control(config.flow_control.into())
            .open_native_async()
            .map_err(|e| map_open_error(e, port))?;

        if config.power_control_lines {
            if let Err(e) = stream.write_data_terminal_ready(true) {
                tracing::warn!(port = %port, error = %e, "failed to raise DTR");
            }
            if let Err(e) = stream.write_request_to_send(true) {
                tracing::warn!(port = %port, error = %e, "failed to raise RTS");
            }
        }

        tracing::info!(port = %port, baud_rate = config.baud_rate, "serial port opened");

        Ok(Self {
            port: Some(stream),
            port_name: port.to_string(),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        tracing::trace!(port = %self.port_name, bytes = data.len(), data = ?data, "sending");

        port.write_all(data).await.map_err(map_io_error)?;
        port.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let port = self.port.as_mut().ok_or(Error::NotConnected)?;

        match tokio::time::timeout(timeout, port.read(buf)).await {
            Ok(Ok(0)) => {
                tracing::warn!(port = %self.port_name, "serial port returned end of stream");
                Err(Error::ConnectionLost)
            }
            Ok(Ok(n)) => {
                tracing::trace!(port = %self.port_name, bytes = n, data = ?&buf[..n], "received");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::warn!(port = %self.port_name, error = %e, "serial read failed");
                Err(map_io_error(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.flush().await {
                tracing::debug!(port = %self.port_name, error = %e, "flush before close failed");
            }
            tracing::info!(port = %self.port_name, "serial port closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }
}

fn map_open_error(e: tokio_serial::Error, port: &str) -> Error {
    match e.kind() {
        tokio_serial::ErrorKind::NoDevice => Error::DeviceNotFound(port.to_string()),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
            Error::DeviceNotFound(port.to_string())
        }
        _ => Error::Transport(format!("failed to open serial port {port}: {e}")),
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_9600_8n1() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.flow_control, FlowControl::None);
        assert!(config.power_control_lines);
    }

    #[test]
    fn missing_device_maps_to_device_not_found() {
        let e = tokio_serial::Error::new(tokio_serial::ErrorKind::NoDevice, "gone");
        assert!(matches!(
            map_open_error(e, "/dev/ttyUSB9"),
            Error::DeviceNotFound(p) if p == "/dev/ttyUSB9"
        ));

        let e = tokio_serial::Error::new(
            tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound),
            "no such file",
        );
        assert!(matches!(map_open_error(e, "COM7"), Error::DeviceNotFound(_)));
    }

    #[test]
    fn busy_port_maps_to_transport_error() {
        let e = tokio_serial::Error::new(tokio_serial::ErrorKind::Unknown, "busy");
        assert!(matches!(map_open_error(e, "COM3"), Error::Transport(_)));
    }

    #[test]
    fn broken_pipe_is_connection_lost() {
        let e = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(map_io_error(e), Error::ConnectionLost));
        let e = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(map_io_error(e), Error::Io(_)));
    }

    #[tokio::test]
    async fn open_nonexistent_port_fails() {
        let result = SerialTransport::open("/dev/wxlink-no-such-port", 9600).await;
        assert!(result.is_err());
    }
}

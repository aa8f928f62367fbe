//! USB-HID transport over a Linux `hidraw` device node.
//!
//! USB consoles such as the WMR100 deliver their byte stream as fixed-size
//! input reports. The first byte of each report is the number of valid
//! bytes that follow; the rest is padding:
//!
//! ```text
//! report: [count, b0, b1, .. b6]   -> stream bytes b0..b(count-1)
//! ```
//!
//! [`HidTransport`] unpacks reports on read, so the frame synchronizer sees
//! a plain byte stream, and prefixes writes with the `0x00` report ID that
//! `hidraw` expects for devices without numbered reports.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wxlink_core::error::{Error, Result};
use wxlink_core::transport::Transport;

/// Largest input report we accept. WMR-series consoles use 8-byte reports.
pub const MAX_REPORT_LEN: usize = 64;

/// Report ID prepended to every output report.
const REPORT_ID: u8 = 0x00;

/// Valid payload of one input report.
///
/// The declared count is clamped to the bytes actually present, so a
/// corrupted count never reads past the report.
///
/// # Example
///
/// ```
/// use wxlink_transport::hid::unpack_report;
///
/// assert_eq!(unpack_report(&[2, 0xFF, 0xFF, 0, 0, 0, 0, 0]), &[0xFF, 0xFF]);
/// assert_eq!(unpack_report(&[9, 0x41, 0x42]), &[0x41, 0x42]);
/// assert!(unpack_report(&[]).is_empty());
/// ```
pub fn unpack_report(report: &[u8]) -> &[u8] {
    match report.split_first() {
        Some((&count, payload)) => &payload[..(count as usize).min(payload.len())],
        None => &[],
    }
}

/// Transport to a USB-HID console through `/dev/hidrawN`.
#[derive(Debug)]
pub struct HidTransport {
    file: Option<File>,
    path: String,
    /// Unpacked bytes that did not fit the caller's buffer.
    pending: VecDeque<u8>,
}

impl HidTransport {
    /// Open a hidraw device node for reading and writing.
    pub async fn open(path: &str) -> Result<Self> {
        tracing::debug!(path = %path, "opening HID device");

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::DeviceNotFound(path.to_string()),
                std::io::ErrorKind::PermissionDenied => {
                    Error::Transport(format!("permission denied opening {path}"))
                }
                _ => Error::Io(e),
            })?;

        tracing::info!(path = %path, "HID device opened");

        Ok(Self {
            file: Some(file),
            path: path.to_string(),
            pending: VecDeque::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        n
    }
}

#[async_trait]
impl Transport for HidTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::NotConnected)?;

        let mut report = Vec::with_capacity(data.len() + 1);
        report.push(REPORT_ID);
        report.extend_from_slice(data);

        tracing::trace!(path = %self.path, bytes = data.len(), data = ?data, "sending report");

        file.write_all(&report).await.map_err(map_io_error)?;
        file.flush().await.map_err(map_io_error)?;
        Ok(())
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }
        let file = self.file.as_mut().ok_or(Error::NotConnected)?;

        let mut report = [0u8; MAX_REPORT_LEN];
        let n = match tokio::time::timeout(timeout, file.read(&mut report)).await {
            Ok(Ok(0)) => {
                tracing::warn!(path = %self.path, "HID device returned end of stream");
                return Err(Error::ConnectionLost);
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(path = %self.path, error = %e, "HID read failed");
                return Err(map_io_error(e));
            }
            Err(_) => return Err(Error::Timeout),
        };

        let payload = unpack_report(&report[..n]);
        tracing::trace!(path = %self.path, bytes = payload.len(), data = ?payload, "received report");
        if payload.is_empty() {
            // Idle report. Report as a timeout so the caller polls again.
            return Err(Error::Timeout);
        }

        self.pending.extend(payload);
        Ok(self.drain_pending(buf))
    }

    async fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            self.pending.clear();
            tracing::info!(path = %self.path, "HID device closed");
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.file.is_some()
    }
}

fn map_io_error(e: std::io::Error) -> Error {
    // ENODEV/EIO after the console is unplugged.
    match e.raw_os_error() {
        Some(19) | Some(5) => Error::ConnectionLost,
        _ => match e.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => {
                Error::ConnectionLost
            }
            _ => Error::Io(e),
        },
    }
}

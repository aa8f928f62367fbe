//! Transport trait for station communication.
//!
//! The [`Transport`] trait abstracts over the physical link to a weather
//! station console. Implementations exist for serial ports (WMR928), USB-HID
//! report devices (WMR100), TCP sockets (GW1000 gateways), and mock
//! transports for testing.
//!
//! Protocol engines operate on a `Transport` rather than directly on a
//! device, enabling both real hardware and deterministic unit testing with
//! `MockTransport` from the `wxlink-test-harness` crate.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to a station.
///
/// Implementations handle buffering and error mapping at the physical
/// layer. Framing is never the transport's concern, with one exception:
/// HID transports strip the per-report byte-count header so that callers
/// always see a plain byte stream.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the station.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the station into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives within the deadline.
    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// After calling `close()`, subsequent `send()` and `receive()` calls
    /// should return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&mut self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Factory that opens a fresh [`Transport`] to one endpoint.
///
/// A link keeps its connector for its whole lifetime and calls
/// [`connect`](Connector::connect) once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new transport.
    async fn connect(&self) -> Result<Box<dyn Transport>>;

    /// Endpoint label for logs (port path, device node, `host:port`).
    fn endpoint(&self) -> &str;
}

//! Transport implementations for wxlink.
//!
//! Concrete [`Transport`](wxlink_core::Transport) implementations for the
//! physical links weather stations use, and the [`Link`] that wraps one of
//! them with bounded, cancellable reconnection:
//!
//! - [`SerialTransport`]: RS-232 consoles (WMR928) via `tokio-serial`
//! - [`HidTransport`]: USB-HID consoles (WMR100) via Linux `hidraw`
//! - [`TcpTransport`]: LAN gateways (GW1000)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use wxlink_transport::{Link, ReconnectPolicy, SerialConfig, SerialConnector};
//!
//! # async fn example() -> wxlink_core::Result<()> {
//! let connector = SerialConnector::new("/dev/ttyUSB0", SerialConfig::default());
//! let link = Link::new(Box::new(connector), ReconnectPolicy::default());
//! link.connect(&CancellationToken::new()).await?;
//!
//! let mut buf = [0u8; 256];
//! let n = link.receive(&mut buf, Duration::from_millis(500)).await?;
//! # Ok(())
//! # }
//! ```

pub mod hid;
pub mod link;
pub mod serial;
pub mod tcp;

pub use hid::HidTransport;
pub use link::{HidConnector, Link, ReconnectPolicy, SerialConnector, TcpConnector};
pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
pub use tcp::TcpTransport;

//! Oregon Scientific console drivers for wxlink.
//!
//! Two console families stream unsolicited binary frames:
//!
//! - **WMR928** ([`wmr928`]) -- RS-232, BCD fields, metric values
//! - **WMR100** ([`wmr100`]) -- USB-HID, little-endian binary fields, needs
//!   an init report and a periodic heartbeat to keep streaming
//!
//! Each module pairs a static framing profile with a
//! [`PacketDispatcher`](wxlink_codec::PacketDispatcher). The [`reader`]
//! task drives either one over a reconnecting
//! [`Link`](wxlink_transport::Link), and [`OregonStationBuilder`] wires the
//! pieces together.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wxlink_core::BroadcastSink;
//! use wxlink_oregon::{OregonStationBuilder, StationModel};
//!
//! # async fn example() -> wxlink_core::Result<()> {
//! let station = OregonStationBuilder::new(StationModel::Wmr100)
//!     .hid_device("/dev/hidraw0")
//!     .build()?;
//! let sink = Arc::new(BroadcastSink::new(64));
//! let mut readings = sink.subscribe();
//! let reader = station.spawn(sink);
//!
//! while let Ok(reading) = readings.recv().await {
//!     println!("{reading:?}");
//! }
//! reader.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod reader;
pub mod wmr100;
pub mod wmr928;

pub use builder::{OregonStation, OregonStationBuilder, StationModel};
pub use reader::{spawn_reader, ReaderConfig, ReaderHandle, ReaderStats, Wakeup};
pub use wmr100::Wmr100Dispatcher;
pub use wmr928::Wmr928Dispatcher;

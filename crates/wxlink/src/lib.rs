//! # wxlink -- Weather-Station Telemetry Decoding
//!
//! `wxlink` turns the raw byte streams of weather-station consoles and LAN
//! gateways into validated, typed readings. It survives line noise, partial
//! reads, desynchronised streams and dropped connections without emitting a
//! corrupt or partial frame.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! wxlink = { version = "0.1", features = ["oregon"] }
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Stream readings from a serial WMR928 console:
//!
//! ```no_run
//! use std::sync::Arc;
//! use wxlink::BroadcastSink;
//! use wxlink::oregon::{OregonStationBuilder, StationModel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let station = OregonStationBuilder::new(StationModel::Wmr928)
//!         .serial_port("/dev/ttyS0")
//!         .build()?;
//!
//!     let sink = Arc::new(BroadcastSink::new(64));
//!     let mut readings = sink.subscribe();
//!     let _reader = station.spawn(sink);
//!
//!     while let Ok(reading) = readings.recv().await {
//!         println!("{reading:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                 | Purpose                                              |
//! |-----------------------|------------------------------------------------------|
//! | `wxlink-core`         | Errors, [`Transport`], [`IngestionSink`], reading types |
//! | `wxlink-codec`        | Frame synchronizer, checksums, field decoders        |
//! | `wxlink-transport`    | Serial, USB-HID and TCP transports, reconnecting link |
//! | `wxlink-oregon`       | WMR928 and WMR100 console drivers                    |
//! | `wxlink-ecowitt`      | GW1000 gateway client, poller and discovery          |
//! | **`wxlink`**          | This facade crate -- re-exports everything           |
//!
//! Data flows one way: transport -> [`codec::FrameSynchronizer`] ->
//! checksum -> [`codec::PacketDispatcher`] -> [`IngestionSink`].
//!
//! ## Feature Flags
//!
//! | Feature   | Enables                              | Default |
//! |-----------|--------------------------------------|---------|
//! | `oregon`  | [`oregon`] module (WMR928, WMR100)   | yes     |
//! | `ecowitt` | [`ecowitt`] module (GW1000)          | yes     |
//! | `full`    | All station drivers                  | no      |

pub use wxlink_core::*;

/// Framing, checksums and field decoders shared by every driver.
pub mod codec {
    pub use wxlink_codec::*;
}

/// Physical transports and the reconnecting [`Link`](transport::Link).
pub mod transport {
    pub use wxlink_transport::*;
}

/// Oregon Scientific console drivers.
///
/// Provides [`OregonStationBuilder`](oregon::OregonStationBuilder) for the
/// serial WMR928 and the USB-HID WMR100, both streaming through a
/// free-running reader task.
#[cfg(feature = "oregon")]
pub mod oregon {
    pub use wxlink_oregon::*;
}

/// Ecowitt GW1000 gateway driver.
///
/// Provides [`GatewayBuilder`](ecowitt::GatewayBuilder), the
/// request/response [`GatewayClient`](ecowitt::GatewayClient), a live-data
/// poller and LAN discovery.
#[cfg(feature = "ecowitt")]
pub mod ecowitt {
    pub use wxlink_ecowitt::*;
}

/// A supported station family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StationDefinition {
    pub vendor: &'static str,
    pub model: &'static str,
    /// Physical link, e.g. `"serial"`.
    pub connection: &'static str,
    /// Streams unsolicited frames rather than answering requests.
    pub streaming: bool,
}

/// Every station family supported by the enabled drivers.
///
/// # Example
///
/// ```
/// for station in wxlink::supported_stations() {
///     println!("{} {} ({})", station.vendor, station.model, station.connection);
/// }
/// ```
pub fn supported_stations() -> Vec<StationDefinition> {
    let mut stations = Vec::new();

    #[cfg(feature = "oregon")]
    {
        use oregon::StationModel;
        for model in [StationModel::Wmr928, StationModel::Wmr100] {
            stations.push(StationDefinition {
                vendor: "Oregon Scientific",
                model: model.profile().name,
                connection: if model.is_serial() { "serial" } else { "usb-hid" },
                streaming: true,
            });
        }
    }

    #[cfg(feature = "ecowitt")]
    {
        stations.push(StationDefinition {
            vendor: "Ecowitt",
            model: ecowitt::commands::PROFILE.name,
            connection: "tcp",
            streaming: false,
        });
    }

    stations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(all(feature = "oregon", feature = "ecowitt"))]
    fn lists_all_families() {
        let stations = supported_stations();
        let models: Vec<_> = stations.iter().map(|s| s.model).collect();
        assert_eq!(models, vec!["WMR928", "WMR100", "GW1000"]);
        assert!(stations.iter().filter(|s| s.streaming).count() == 2);
    }
}

//! OregonStationBuilder -- fluent builder for Oregon Scientific consoles.
//!
//! Collects the port or device path, channel assignment, reconnect policy
//! and timing, then produces an [`OregonStation`] whose reader task can be
//! started against any [`IngestionSink`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wxlink_core::BroadcastSink;
//! use wxlink_oregon::{OregonStationBuilder, StationModel};
//!
//! # async fn example() -> wxlink_core::Result<()> {
//! let station = OregonStationBuilder::new(StationModel::Wmr928)
//!     .serial_port("/dev/ttyS0")
//!     .primary_channel(1)
//!     .build()?;
//!
//! let sink = Arc::new(BroadcastSink::new(64));
//! let reader = station.spawn(sink);
//! // ...
//! reader.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wxlink_codec::{PacketDispatcher, ProtocolProfile};
use wxlink_core::error::{Error, Result};
use wxlink_core::transport::Connector;
use wxlink_core::IngestionSink;
use wxlink_transport::{HidConnector, Link, ReconnectPolicy, SerialConfig, SerialConnector};

use crate::reader::{spawn_reader, ReaderConfig, ReaderHandle, Wakeup, DEFAULT_READ_TIMEOUT};
use crate::wmr100::{self, Wmr100Dispatcher};
use crate::wmr928::{self, Wmr928Dispatcher};

/// Supported Oregon Scientific console families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StationModel {
    /// RS-232 console (WMR918/WMR928/WMR968).
    Wmr928,
    /// USB-HID console (WMR100/WMR200 family).
    Wmr100,
}

impl StationModel {
    pub fn profile(self) -> &'static ProtocolProfile {
        match self {
            StationModel::Wmr928 => &wmr928::PROFILE,
            StationModel::Wmr100 => &wmr100::PROFILE,
        }
    }

    /// Channel treated as outdoor when none is configured.
    pub fn default_primary_channel(self) -> u8 {
        match self {
            StationModel::Wmr928 => wmr928::DEFAULT_PRIMARY_CHANNEL,
            StationModel::Wmr100 => wmr100::DEFAULT_PRIMARY_CHANNEL,
        }
    }

    /// Whether the console is reached through a serial port rather than a
    /// HID device node.
    pub fn is_serial(self) -> bool {
        matches!(self, StationModel::Wmr928)
    }

    fn dispatcher(self, primary_channel: u8) -> Box<dyn PacketDispatcher> {
        match self {
            StationModel::Wmr928 => Box::new(Wmr928Dispatcher::new(primary_channel)),
            StationModel::Wmr100 => Box::new(Wmr100Dispatcher::new(primary_channel)),
        }
    }
}

impl std::fmt::Display for StationModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.profile().name)
    }
}

/// Fluent builder for [`OregonStation`].
pub struct OregonStationBuilder {
    model: StationModel,
    serial_port: Option<String>,
    serial_config: SerialConfig,
    hid_device: Option<String>,
    primary_channel: Option<u8>,
    reconnect_policy: ReconnectPolicy,
    read_timeout: Duration,
    heartbeat_interval: Duration,
}

impl OregonStationBuilder {
    pub fn new(model: StationModel) -> Self {
        OregonStationBuilder {
            model,
            serial_port: None,
            serial_config: SerialConfig::default(),
            hid_device: None,
            primary_channel: None,
            reconnect_policy: ReconnectPolicy::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            heartbeat_interval: wmr100::HEARTBEAT_INTERVAL,
        }
    }

    /// Serial port path of a WMR928 (e.g. `/dev/ttyS0`).
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the 9600 8N1 line settings.
    pub fn serial_config(mut self, config: SerialConfig) -> Self {
        self.serial_config = config;
        self
    }

    /// `hidraw` node of a WMR100 (e.g. `/dev/hidraw0`).
    pub fn hid_device(mut self, path: &str) -> Self {
        self.hid_device = Some(path.to_string());
        self
    }

    /// Hardware channel reported as the outdoor sensor.
    pub fn primary_channel(mut self, channel: u8) -> Self {
        self.primary_channel = Some(channel);
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Per-read timeout of the reader task (default: 250ms).
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// WMR100 heartbeat period (default: 30s). Ignored for the WMR928.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Build a station around a caller-provided connector.
    ///
    /// This is the entry point for tests (pass a `MockConnector` from
    /// `wxlink-test-harness`).
    pub fn build_with_connector(self, connector: Box<dyn Connector>) -> OregonStation {
        let primary_channel = self
            .primary_channel
            .unwrap_or(self.model.default_primary_channel());
        let wakeup = match self.model {
            StationModel::Wmr100 => Some(Wakeup {
                init: wmr100::INIT_REPORT.to_vec(),
                heartbeat: wmr100::HEARTBEAT.to_vec(),
                interval: self.heartbeat_interval,
            }),
            StationModel::Wmr928 => None,
        };

        OregonStation {
            model: self.model,
            primary_channel,
            link: Arc::new(Link::new(connector, self.reconnect_policy)),
            config: ReaderConfig {
                read_timeout: self.read_timeout,
                wakeup,
            },
        }
    }

    /// Build a station on the model's physical transport.
    ///
    /// Requires [`serial_port()`](Self::serial_port) for the WMR928 and
    /// [`hid_device()`](Self::hid_device) for the WMR100. Nothing is opened
    /// until the reader task starts.
    pub fn build(self) -> Result<OregonStation> {
        let connector: Box<dyn Connector> = match self.model {
            StationModel::Wmr928 => {
                let port = self.serial_port.as_deref().ok_or_else(|| {
                    Error::InvalidParameter("serial_port is required for the WMR928".into())
                })?;
                Box::new(SerialConnector::new(port, self.serial_config.clone()))
            }
            StationModel::Wmr100 => {
                let path = self.hid_device.as_deref().ok_or_else(|| {
                    Error::InvalidParameter("hid_device is required for the WMR100".into())
                })?;
                Box::new(HidConnector::new(path))
            }
        };
        Ok(self.build_with_connector(connector))
    }
}

/// A configured Oregon Scientific console.
pub struct OregonStation {
    model: StationModel,
    primary_channel: u8,
    link: Arc<Link>,
    config: ReaderConfig,
}

impl OregonStation {
    pub fn model(&self) -> StationModel {
        self.model
    }

    pub fn primary_channel(&self) -> u8 {
        self.primary_channel
    }

    /// The station's link, for state monitoring.
    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn reader_config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Start the reader task, feeding `sink`.
    pub fn spawn(&self, sink: Arc<dyn IngestionSink>) -> ReaderHandle {
        self.spawn_with_cancel(sink, CancellationToken::new())
    }

    /// Start the reader task under an existing cancellation token, e.g. a
    /// child of an application-wide shutdown token.
    pub fn spawn_with_cancel(
        &self,
        sink: Arc<dyn IngestionSink>,
        cancel: CancellationToken,
    ) -> ReaderHandle {
        spawn_reader(
            self.link.clone(),
            self.model.dispatcher(self.primary_channel),
            sink,
            self.config.clone(),
            cancel,
        )
    }
}

impl std::fmt::Debug for OregonStation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OregonStation")
            .field("model", &self.model)
            .field("primary_channel", &self.primary_channel)
            .field("endpoint", &self.link.endpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxlink_core::SensorSlot;
    use wxlink_test_harness::{MockConnector, MockTransport, ReadingLog};

    #[test]
    fn build_requires_port_for_serial_model() {
        let err = OregonStationBuilder::new(StationModel::Wmr928)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn build_requires_hid_device_for_usb_model() {
        let err = OregonStationBuilder::new(StationModel::Wmr100)
            .serial_port("/dev/ttyS0")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn build_does_not_open_the_device() {
        let station = OregonStationBuilder::new(StationModel::Wmr100)
            .hid_device("/dev/hidraw-does-not-exist")
            .build()
            .unwrap();
        assert_eq!(station.link().endpoint(), "/dev/hidraw-does-not-exist");
        assert!(!station.link().is_connected());
    }

    #[test]
    fn model_defaults() {
        let wmr928 = OregonStationBuilder::new(StationModel::Wmr928)
            .build_with_connector(Box::new(MockConnector::new()));
        assert_eq!(wmr928.primary_channel(), 0);
        assert!(wmr928.reader_config().wakeup.is_none());
        assert_eq!(wmr928.link().policy(), ReconnectPolicy::default());

        let wmr100 = OregonStationBuilder::new(StationModel::Wmr100)
            .primary_channel(2)
            .heartbeat_interval(Duration::from_secs(10))
            .build_with_connector(Box::new(MockConnector::new()));
        assert_eq!(wmr100.primary_channel(), 2);
        let wakeup = wmr100.reader_config().wakeup.as_ref().unwrap();
        assert_eq!(wakeup.init, wmr100::INIT_REPORT.to_vec());
        assert_eq!(wakeup.interval, Duration::from_secs(10));
    }

    #[test]
    fn model_display() {
        assert_eq!(StationModel::Wmr928.to_string(), "WMR928");
        assert_eq!(StationModel::Wmr100.to_string(), "WMR100");
    }

    #[tokio::test]
    async fn spawned_station_honours_primary_channel() {
        // WMR928 channel-climate frame from channel 2.
        let mut bytes = vec![0xFF, 0xFF, 0x02, 0x02, 0x34, 0x02, 0x55, 0x00];
        bytes.push(wxlink_codec::checksum::sum8(&bytes));

        let mut mock = MockTransport::streaming();
        mock.push_read(&bytes);
        let connector = MockConnector::new();
        connector.push_transport(mock);

        let station = OregonStationBuilder::new(StationModel::Wmr928)
            .primary_channel(2)
            .read_timeout(Duration::from_millis(10))
            .build_with_connector(Box::new(connector));
        let log = Arc::new(ReadingLog::new());
        let reader = station.spawn(log.clone());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while log.temperature(SensorSlot::Outdoor).is_none() {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(log.humidity(SensorSlot::Outdoor), Some(55.0));

        let stats = reader.shutdown().await;
        assert_eq!(stats.frames_decoded, 1);
    }
}

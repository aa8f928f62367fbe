//! WMR100 USB-HID console protocol.
//!
//! Frames arrive through 8-byte HID reports (see
//! [`HidTransport`](wxlink_transport::HidTransport)) as:
//!
//! ```text
//! FF FF  flags  type  fields..  checksum(lo, hi)
//! ```
//!
//! The published lengths exclude the sync bytes. The checksum is the 16-bit
//! sum of the bytes between the sync marker and the checksum itself. Bit
//! `0x40` of the flags byte is the sending sensor's battery-low flag.
//!
//! The console stays silent until it receives [`INIT_REPORT`] and stops
//! again unless [`HEARTBEAT`] is repeated every [`HEARTBEAT_INTERVAL`].

use std::time::Duration;

use chrono::{DateTime, Utc};

use wxlink_codec::field::signed_magnitude_tenths;
use wxlink_codec::{
    ChannelMap, ChecksumKind, DispatchOutcome, FieldTally, PacketDispatcher, PacketKind,
    PacketSpec, ProtocolProfile, RawFrame,
};
use wxlink_core::{IngestionSink, SensorSlot};

/// Report that starts the data stream after (re)connecting.
pub const INIT_REPORT: [u8; 8] = [0x20, 0x00, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Data request that keeps the stream alive.
pub const HEARTBEAT: [u8; 8] = [0x01, 0xD0, 0x08, 0x01, 0x00, 0x00, 0x00, 0x00];

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Battery-low bit of the flags byte.
const BATTERY_LOW: u8 = 0x40;

const MM_PER_INCH: f64 = 25.4;

/// The console's first remote sensor is the outdoor sensor.
pub const DEFAULT_PRIMARY_CHANNEL: u8 = 1;

static PACKETS: &[PacketSpec] = &[
    PacketSpec {
        code: 0x41,
        length: 17,
        kind: PacketKind::Rain,
    },
    PacketSpec {
        code: 0x42,
        length: 12,
        kind: PacketKind::ChannelClimate,
    },
    PacketSpec {
        code: 0x44,
        length: 12,
        kind: PacketKind::Auxiliary,
    },
    PacketSpec {
        code: 0x46,
        length: 8,
        kind: PacketKind::Pressure,
    },
    PacketSpec {
        code: 0x47,
        length: 6,
        kind: PacketKind::Uv,
    },
    PacketSpec {
        code: 0x48,
        length: 11,
        kind: PacketKind::Wind,
    },
    PacketSpec {
        code: 0x60,
        length: 12,
        kind: PacketKind::Clock,
    },
];

/// Framing profile of the WMR100.
pub static PROFILE: ProtocolProfile = ProtocolProfile {
    name: "WMR100",
    sync: [0xFF, 0xFF],
    type_offset: 1,
    length_includes_sync: false,
    packets: PACKETS,
    checksum: ChecksumKind::Sum16Le,
};

/// Decoder for WMR100 frames.
#[derive(Debug, Clone)]
pub struct Wmr100Dispatcher {
    channels: ChannelMap,
}

impl Wmr100Dispatcher {
    pub fn new(primary_channel: u8) -> Self {
        Self {
            channels: ChannelMap::new(primary_channel),
        }
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    fn climate(&mut self, p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
        let slot = self.channels.resolve(p[2] & 0x0F);
        self.channels.note_seen(slot);
        sink.report_battery_low(slot, p[0] & BATTERY_LOW != 0);
        sink.report_temperature(slot, signed_magnitude_tenths(p[3], p[4]), now);

        let mut tally = FieldTally::new();
        // Temperature-only sensors send humidity 0.
        let humidity = tally.check("humidity", Some(p[5]).filter(|&h| h <= 100));
        if let Some(h) = humidity.filter(|&h| h > 0) {
            sink.report_humidity(slot, h as f64);
        }
        tally.outcome()
    }

    fn auxiliary(&mut self, p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
        let slot = SensorSlot::Auxiliary(p[2] & 0x0F);
        self.channels.note_seen(slot);
        sink.report_battery_low(slot, p[0] & BATTERY_LOW != 0);
        sink.report_temperature(slot, signed_magnitude_tenths(p[3], p[4]), now);
        DispatchOutcome::Decoded { skipped_fields: 0 }
    }
}

impl Default for Wmr100Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_CHANNEL)
    }
}

fn pressure(p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
    let forecast = p[3] >> 4;
    let sea_level = (((p[5] & 0x0F) as u16) << 8) | p[4] as u16;
    sink.report_pressure(sea_level as f64, now);
    sink.report_forecast_code(forecast);
    DispatchOutcome::Decoded { skipped_fields: 0 }
}

fn uv(p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
    sink.report_battery_low(SensorSlot::UvSensor, p[0] & BATTERY_LOW != 0);
    sink.report_uv((p[3] & 0x0F) as f64, now);
    DispatchOutcome::Decoded { skipped_fields: 0 }
}

fn wind(p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
    sink.report_battery_low(SensorSlot::Anemometer, p[0] & BATTERY_LOW != 0);
    let bearing = (p[2] & 0x0F) as f64 * 22.5;
    let gust = ((((p[5] & 0x0F) as u16) << 8) | p[4] as u16) as f64 / 10.0;
    let average = (((p[6] as u16) << 4) | (p[5] >> 4) as u16) as f64 / 10.0;
    sink.report_wind(gust, bearing, average, now);
    DispatchOutcome::Decoded { skipped_fields: 0 }
}

fn rain(p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
    sink.report_battery_low(SensorSlot::RainGauge, p[0] & BATTERY_LOW != 0);
    // Hundredths of an inch (per hour).
    let rate = u16::from_le_bytes([p[2], p[3]]) as f64 / 100.0 * MM_PER_INCH;
    let total = u16::from_le_bytes([p[8], p[9]]) as f64 / 100.0 * MM_PER_INCH;
    sink.report_rain(rate, total, now);
    DispatchOutcome::Decoded { skipped_fields: 0 }
}

impl PacketDispatcher for Wmr100Dispatcher {
    fn profile(&self) -> &'static ProtocolProfile {
        &PROFILE
    }

    fn dispatch(
        &mut self,
        frame: &RawFrame,
        sink: &dyn IngestionSink,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let Some(kind) = PROFILE.kind(frame.frame_type()) else {
            return DispatchOutcome::Unhandled;
        };
        let p = frame.body();
        match PROFILE.body_length(frame.frame_type()) {
            Some(len) if p.len() >= len => {}
            _ => return DispatchOutcome::Unhandled,
        }

        match kind {
            PacketKind::ChannelClimate => self.climate(p, sink, now),
            PacketKind::Auxiliary => self.auxiliary(p, sink, now),
            PacketKind::Pressure => pressure(p, sink, now),
            PacketKind::Uv => uv(p, sink, now),
            PacketKind::Wind => wind(p, sink, now),
            PacketKind::Rain => rain(p, sink, now),
            PacketKind::Clock => DispatchOutcome::NoOp,
            PacketKind::ChannelTemperature
            | PacketKind::OutdoorClimate
            | PacketKind::IndoorClimate
            | PacketKind::ExtendedIndoorClimate => DispatchOutcome::Unhandled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxlink_codec::checksum::{self, sum16};
    use wxlink_codec::FrameSynchronizer;
    use wxlink_core::DecodedReading;
    use wxlink_test_harness::ReadingLog;

    /// Build a complete frame from the flags byte onward, without checksum.
    fn frame_bytes(body: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFF];
        bytes.extend_from_slice(body);
        let cs = sum16(body);
        bytes.extend(cs.to_le_bytes());
        bytes
    }

    fn frame(body: &[u8]) -> RawFrame {
        RawFrame::new(frame_bytes(body), 1).unwrap()
    }

    fn run(body: &[u8]) -> ReadingLog {
        let log = ReadingLog::new();
        let mut dispatcher = Wmr100Dispatcher::default();
        dispatcher.dispatch(&frame(body), &log, Utc::now());
        log
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn lengths_exclude_sync() {
        for spec in PACKETS {
            let mut body = vec![0x00, spec.code];
            body.resize(spec.length - 2, 0x00);
            let bytes = frame_bytes(&body);
            assert_eq!(bytes.len(), spec.length + 2);

            let mut sync = FrameSynchronizer::new(&PROFILE);
            let frames = sync.ingest(&bytes);
            assert_eq!(frames.len(), 1, "type 0x{:02X}", spec.code);
            assert!(checksum::validate(&frames[0], PROFILE.checksum));
        }
    }

    #[test]
    fn outdoor_temperature_negative() {
        // channel 1, -10.5 degC, 80 %
        let log = run(&[0x00, 0x42, 0x01, 0x69, 0x80, 0x50, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(log.temperature(SensorSlot::Outdoor), Some(-10.5));
        assert_eq!(log.humidity(SensorSlot::Outdoor), Some(80.0));
        assert_eq!(log.battery_low(SensorSlot::Outdoor), Some(false));
    }

    #[test]
    fn indoor_and_extra_channels() {
        let log = run(&[0x40, 0x42, 0x00, 0xD2, 0x00, 0x2D, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(log.temperature(SensorSlot::Indoor), Some(21.0));
        assert_eq!(log.humidity(SensorSlot::Indoor), Some(45.0));
        assert_eq!(log.battery_low(SensorSlot::Indoor), Some(true));

        let log = run(&[0x00, 0x42, 0x03, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(log.temperature(SensorSlot::Extra(3)), Some(10.0));
        // Humidity 0: temperature-only sensor.
        assert_eq!(log.humidity(SensorSlot::Extra(3)), None);
    }

    #[test]
    fn impossible_humidity_is_skipped() {
        let log = ReadingLog::new();
        let mut dispatcher = Wmr100Dispatcher::default();
        let outcome = dispatcher.dispatch(
            &frame(&[0x00, 0x42, 0x01, 0x64, 0x00, 0xFA, 0x00, 0x00, 0x00, 0x00]),
            &log,
            Utc::now(),
        );
        assert_eq!(outcome, DispatchOutcome::Decoded { skipped_fields: 1 });
        assert_eq!(log.temperature(SensorSlot::Outdoor), Some(10.0));
        assert_eq!(log.humidity(SensorSlot::Outdoor), None);
    }

    #[test]
    fn pressure_reports_sea_level_and_forecast() {
        let log = run(&[0x00, 0x46, 0xE9, 0x23, 0xF5, 0x03]);
        let readings = log.readings();
        assert!(readings.iter().any(|r| matches!(
            r,
            DecodedReading::Pressure { value, .. } if *value == 1013.0
        )));
        assert!(readings.contains(&DecodedReading::ForecastCode { code: 2 }));
    }

    #[test]
    fn uv_index() {
        let log = run(&[0x00, 0x47, 0x00, 0x07]);
        assert!(log.readings().iter().any(|r| matches!(
            r,
            DecodedReading::Uv { index, .. } if *index == 7.0
        )));
    }

    #[test]
    fn wind_packet() {
        let log = run(&[0x00, 0x48, 0x0C, 0x00, 0x34, 0xF0, 0x01, 0x00, 0x00]);
        let (gust, bearing, average) = log
            .readings()
            .iter()
            .find_map(|r| match r {
                DecodedReading::Wind {
                    gust,
                    bearing,
                    average,
                    ..
                } => Some((*gust, *bearing, *average)),
                _ => None,
            })
            .unwrap();
        assert_close(bearing, 270.0);
        assert_close(gust, 5.2);
        assert_close(average, 3.1);
    }

    #[test]
    fn rain_converted_to_millimetres() {
        let mut body = vec![0x00, 0x41, 0x32, 0x00, 0x00, 0x00, 0x00, 0x00, 0xD2, 0x04];
        body.resize(15, 0x00);
        let log = run(&body);
        let (rate, total) = log
            .readings()
            .iter()
            .find_map(|r| match r {
                DecodedReading::Rain { rate, total, .. } => Some((*rate, *total)),
                _ => None,
            })
            .unwrap();
        assert_close(rate, 12.7);
        assert_close(total, 313.436);
    }

    #[test]
    fn pond_sensor_is_auxiliary() {
        let log = run(&[0x00, 0x44, 0x01, 0x96, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(log.temperature(SensorSlot::Auxiliary(1)), Some(15.0));
    }

    #[test]
    fn clock_is_no_op() {
        let log = ReadingLog::new();
        let mut dispatcher = Wmr100Dispatcher::default();
        let mut body = vec![0x00, 0x60];
        body.resize(10, 0x00);
        assert_eq!(
            dispatcher.dispatch(&frame(&body), &log, Utc::now()),
            DispatchOutcome::NoOp
        );
        assert!(log.is_empty());
    }
}

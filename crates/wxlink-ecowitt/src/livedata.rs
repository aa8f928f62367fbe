//! Live-data (`0x27`) payload decoder.
//!
//! The payload is a flat run of `id value` items. Item values have a fixed
//! size per id and carry no length of their own, so an id missing from
//! [`item_size`] ends the walk: nothing after it can be located.
//!
//! Values are big-endian and already metric: temperatures in tenths of a
//! degree C, pressure in tenths of hPa, wind in tenths of m/s, rain in
//! tenths of mm.

use chrono::{DateTime, Utc};
use tracing::debug;

use wxlink_codec::field::{be_i16, be_u16, be_u32, bit_flags};
use wxlink_core::{IngestionSink, SensorSlot};

const INDOOR_TEMP: u8 = 0x01;
const OUTDOOR_TEMP: u8 = 0x02;
const WIND_CHILL: u8 = 0x04;
const INDOOR_HUMIDITY: u8 = 0x06;
const OUTDOOR_HUMIDITY: u8 = 0x07;
const RELATIVE_BARO: u8 = 0x09;
const WIND_DIRECTION: u8 = 0x0A;
const WIND_SPEED: u8 = 0x0B;
const WIND_GUST: u8 = 0x0C;
const RAIN_RATE: u8 = 0x0E;
const RAIN_YEAR: u8 = 0x13;
const UV_INDEX: u8 = 0x17;
const CHANNEL_TEMP_FIRST: u8 = 0x1A;
const CHANNEL_TEMP_LAST: u8 = 0x21;
const CHANNEL_HUMIDITY_FIRST: u8 = 0x22;
const CHANNEL_HUMIDITY_LAST: u8 = 0x29;
const LOW_BATTERY: u8 = 0x4C;

/// Extra-sensor channel owning each bit of the second low-battery byte.
const CHANNEL_BATTERY_BITS: [u8; 8] = [1, 2, 3, 4, 5, 6, 7, 8];

/// Value size of a live-data item, or `None` for an unknown id.
pub fn item_size(id: u8) -> Option<usize> {
    let size = match id {
        0x01..=0x05 => 2,
        0x06 | 0x07 => 1,
        0x08..=0x11 => 2,
        0x12..=0x15 => 4,
        0x16 => 2,
        0x17 => 1,
        0x18 => 6,
        0x19 => 2,
        0x1A..=0x21 => 2,
        0x22..=0x29 => 1,
        0x2A => 2,
        // Soil channels alternate temperature (2) and moisture (1).
        0x2B..=0x4A => {
            if (id - 0x2B) % 2 == 0 {
                2
            } else {
                1
            }
        }
        0x4C => 16,
        0x4D..=0x53 => 2,
        0x54..=0x58 => 1,
        0x59 | 0x5A => 4,
        0x63..=0x6A => 3,
        0x70 => 16,
        0x72..=0x79 => 1,
        0x80..=0x82 => 2,
        0x83..=0x86 => 4,
        0x87 => 20,
        0x88 => 3,
        _ => return None,
    };
    Some(size)
}

/// Result of walking one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveDataWalk {
    /// Items located (decoded or skipped by size).
    pub items: usize,
    /// Id that ended the walk early, if any.
    pub stopped_at: Option<u8>,
}

impl LiveDataWalk {
    /// Whether every byte of the payload was accounted for.
    pub fn is_complete(&self) -> bool {
        self.stopped_at.is_none()
    }
}

/// Values that are reported together once the whole payload is read.
#[derive(Debug, Default)]
struct Pending {
    wind_direction: Option<f64>,
    wind_speed: Option<f64>,
    wind_gust: Option<f64>,
    rain_rate: Option<f64>,
    rain_year: Option<f64>,
    low_battery: Option<[u8; 2]>,
    channels_seen: [bool; 8],
}

fn tenths(raw: impl Into<f64>) -> f64 {
    raw.into() / 10.0
}

/// Decode a live-data payload and report its readings to `sink`.
pub fn report_live_data(
    payload: &[u8],
    sink: &dyn IngestionSink,
    now: DateTime<Utc>,
) -> LiveDataWalk {
    let mut walk = LiveDataWalk::default();
    let mut pending = Pending::default();
    let mut pos = 0;

    while pos < payload.len() {
        let id = payload[pos];
        let Some(size) = item_size(id) else {
            debug!(
                id = format_args!("0x{id:02X}"),
                offset = pos,
                "unknown live-data item, rest of payload skipped"
            );
            walk.stopped_at = Some(id);
            break;
        };
        let start = pos + 1;
        let Some(value) = payload.get(start..start + size) else {
            debug!(
                id = format_args!("0x{id:02X}"),
                size,
                available = payload.len() - start,
                "live-data item truncated"
            );
            walk.stopped_at = Some(id);
            break;
        };

        decode_item(id, value, sink, now, &mut pending);
        walk.items += 1;
        pos = start + size;
    }

    if let (Some(bearing), Some(average)) = (pending.wind_direction, pending.wind_speed) {
        sink.report_wind(pending.wind_gust.unwrap_or(average), bearing, average, now);
    }
    if let (Some(rate), Some(total)) = (pending.rain_rate, pending.rain_year) {
        sink.report_rain(rate, total, now);
    }
    if let Some([sensors, channels]) = pending.low_battery {
        sink.report_battery_low(SensorSlot::Outdoor, sensors & 0x01 != 0);
        sink.report_battery_low(SensorSlot::Indoor, sensors & 0x02 != 0);
        for (channel, low) in bit_flags(channels, &CHANNEL_BATTERY_BITS).iter() {
            if pending.channels_seen[channel as usize - 1] {
                sink.report_battery_low(SensorSlot::Extra(channel), low);
            }
        }
    }

    walk
}

fn decode_item(
    id: u8,
    value: &[u8],
    sink: &dyn IngestionSink,
    now: DateTime<Utc>,
    pending: &mut Pending,
) {
    match id {
        INDOOR_TEMP | OUTDOOR_TEMP => {
            if let Some(raw) = be_i16(value, 0) {
                let slot = if id == INDOOR_TEMP {
                    SensorSlot::Indoor
                } else {
                    SensorSlot::Outdoor
                };
                sink.report_temperature(slot, tenths(raw), now);
            }
        }
        WIND_CHILL => {
            if let Some(raw) = be_i16(value, 0) {
                sink.report_wind_chill(tenths(raw), now);
            }
        }
        INDOOR_HUMIDITY => sink.report_humidity(SensorSlot::Indoor, value[0] as f64),
        OUTDOOR_HUMIDITY => sink.report_humidity(SensorSlot::Outdoor, value[0] as f64),
        RELATIVE_BARO => {
            if let Some(raw) = be_u16(value, 0) {
                sink.report_pressure(tenths(raw), now);
            }
        }
        WIND_DIRECTION => pending.wind_direction = be_u16(value, 0).map(f64::from),
        WIND_SPEED => pending.wind_speed = be_u16(value, 0).map(tenths),
        WIND_GUST => pending.wind_gust = be_u16(value, 0).map(tenths),
        RAIN_RATE => pending.rain_rate = be_u16(value, 0).map(tenths),
        RAIN_YEAR => pending.rain_year = be_u32(value, 0).map(tenths),
        UV_INDEX => sink.report_uv(value[0] as f64, now),
        CHANNEL_TEMP_FIRST..=CHANNEL_TEMP_LAST => {
            let channel = id - CHANNEL_TEMP_FIRST + 1;
            if let Some(raw) = be_i16(value, 0) {
                pending.channels_seen[channel as usize - 1] = true;
                sink.report_temperature(SensorSlot::Extra(channel), tenths(raw), now);
            }
        }
        CHANNEL_HUMIDITY_FIRST..=CHANNEL_HUMIDITY_LAST => {
            let channel = id - CHANNEL_HUMIDITY_FIRST + 1;
            pending.channels_seen[channel as usize - 1] = true;
            sink.report_humidity(SensorSlot::Extra(channel), value[0] as f64);
        }
        LOW_BATTERY => pending.low_battery = Some([value[0], value[1]]),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxlink_core::DecodedReading;
    use wxlink_test_harness::ReadingLog;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_payload() -> Vec<u8> {
        let mut p = vec![
            0x01, 0x00, 0xD2, // indoor 21.0
            0x06, 0x2D, // indoor 45 %
            0x02, 0xFF, 0x9C, // outdoor -10.0
            0x07, 0x50, // outdoor 80 %
            0x08, 0x27, 0x10, // absolute baro, skipped
            0x09, 0x27, 0x91, // relative 1012.9
            0x0A, 0x00, 0xB4, // 180 degrees
            0x0B, 0x00, 0x1F, // 3.1 m/s
            0x0C, 0x00, 0x2A, // gust 4.2
            0x0E, 0x00, 0x05, // 0.5 mm/h
            0x13, 0x00, 0x00, 0x04, 0xD2, // 123.4 mm this year
            0x15, 0x00, 0x01, 0x00, 0x00, // light, skipped
            0x17, 0x03, // UVI 3
            0x1C, 0x00, 0x64, // ch3 10.0
            0x24, 0x37, // ch3 55 %
            0x2B, 0x00, 0x10, 0x2C, 0x20, // soil ch1, skipped
            0x4C,
        ];
        let mut battery = [0u8; 16];
        battery[0] = 0x01; // outdoor low
        battery[1] = 0x04 | 0x80; // ch3 low, ch8 low but not present
        p.extend_from_slice(&battery);
        p
    }

    #[test]
    fn decodes_full_payload() {
        let log = ReadingLog::new();
        let walk = report_live_data(&sample_payload(), &log, Utc::now());
        assert!(walk.is_complete());
        assert_eq!(walk.items, 18);

        assert_eq!(log.temperature(SensorSlot::Indoor), Some(21.0));
        assert_eq!(log.humidity(SensorSlot::Indoor), Some(45.0));
        assert_eq!(log.temperature(SensorSlot::Outdoor), Some(-10.0));
        assert_eq!(log.humidity(SensorSlot::Outdoor), Some(80.0));
        assert_eq!(log.temperature(SensorSlot::Extra(3)), Some(10.0));
        assert_eq!(log.humidity(SensorSlot::Extra(3)), Some(55.0));

        let readings = log.readings();
        let pressure = readings
            .iter()
            .find_map(|r| match r {
                DecodedReading::Pressure { value, .. } => Some(*value),
                _ => None,
            })
            .unwrap();
        assert_close(pressure, 1012.9);

        let (gust, bearing, average) = readings
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
        assert_close(gust, 4.2);
        assert_close(bearing, 180.0);
        assert_close(average, 3.1);

        let (rate, total) = readings
            .iter()
            .find_map(|r| match r {
                DecodedReading::Rain { rate, total, .. } => Some((*rate, *total)),
                _ => None,
            })
            .unwrap();
        assert_close(rate, 0.5);
        assert_close(total, 123.4);

        assert!(readings
            .iter()
            .any(|r| matches!(r, DecodedReading::Uv { index, .. } if *index == 3.0)));
    }

    #[test]
    fn battery_flags() {
        let log = ReadingLog::new();
        report_live_data(&sample_payload(), &log, Utc::now());
        assert_eq!(log.battery_low(SensorSlot::Outdoor), Some(true));
        assert_eq!(log.battery_low(SensorSlot::Indoor), Some(false));
        assert_eq!(log.battery_low(SensorSlot::Extra(3)), Some(true));
        // Channel 8 never reported, so its bit is not forwarded.
        assert_eq!(log.battery_low(SensorSlot::Extra(8)), None);
    }

    #[test]
    fn unknown_item_stops_walk() {
        let payload = [0x01, 0x00, 0xD2, 0xF0, 0x00, 0x02, 0x00, 0x64];
        let log = ReadingLog::new();
        let walk = report_live_data(&payload, &log, Utc::now());
        assert_eq!(walk.items, 1);
        assert_eq!(walk.stopped_at, Some(0xF0));
        assert_eq!(log.temperature(SensorSlot::Indoor), Some(21.0));
        assert_eq!(log.temperature(SensorSlot::Outdoor), None);
    }

    #[test]
    fn truncated_item_stops_walk() {
        let payload = [0x06, 0x2D, 0x13, 0x00, 0x01];
        let log = ReadingLog::new();
        let walk = report_live_data(&payload, &log, Utc::now());
        assert_eq!(walk.items, 1);
        assert_eq!(walk.stopped_at, Some(0x13));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn wind_without_gust_uses_average() {
        let payload = [0x0A, 0x01, 0x0E, 0x0B, 0x00, 0x0A];
        let log = ReadingLog::new();
        report_live_data(&payload, &log, Utc::now());
        assert!(log.readings().iter().any(|r| matches!(
            r,
            DecodedReading::Wind { gust, bearing, average, .. }
                if *gust == 1.0 && *bearing == 270.0 && *average == 1.0
        )));
    }

    #[test]
    fn soil_sizes_alternate() {
        assert_eq!(item_size(0x2B), Some(2));
        assert_eq!(item_size(0x2C), Some(1));
        assert_eq!(item_size(0x49), Some(2));
        assert_eq!(item_size(0x4A), Some(1));
        assert_eq!(item_size(0x4B), None);
    }

    #[test]
    fn empty_payload() {
        let log = ReadingLog::new();
        let walk = report_live_data(&[], &log, Utc::now());
        assert!(walk.is_complete());
        assert_eq!(walk.items, 0);
        assert!(log.is_empty());
    }
}

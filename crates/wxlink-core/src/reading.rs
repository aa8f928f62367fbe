//! Decoded reading types.
//!
//! A [`DecodedReading`] is one physical-unit value produced by a packet
//! handler. Readings are transient: they are handed to an
//! [`IngestionSink`](crate::sink::IngestionSink) and never retained by the
//! decoder.

use std::fmt;

use chrono::{DateTime, Utc};

/// The logical sensor slot a channel-addressed reading belongs to.
///
/// Hardware channel numbers are resolved into slots by the dispatcher's
/// channel map: channel 0 is always the indoor unit, the configured primary
/// channel is the outdoor sensor, every other channel is an extra sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorSlot {
    /// The console's own indoor sensor.
    Indoor,
    /// The main outdoor sensor.
    Outdoor,
    /// An extra temperature/humidity sensor, by hardware channel.
    Extra(u8),
    /// An auxiliary sensor outside the normal channel set (pond, soil).
    Auxiliary(u8),
    /// The wind sensor. Only battery state is slot-addressed.
    Anemometer,
    /// The rain gauge.
    RainGauge,
    /// The UV sensor.
    UvSensor,
}

impl fmt::Display for SensorSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorSlot::Indoor => write!(f, "indoor"),
            SensorSlot::Outdoor => write!(f, "outdoor"),
            SensorSlot::Extra(ch) => write!(f, "extra{ch}"),
            SensorSlot::Auxiliary(ch) => write!(f, "aux{ch}"),
            SensorSlot::Anemometer => write!(f, "wind"),
            SensorSlot::RainGauge => write!(f, "rain"),
            SensorSlot::UvSensor => write!(f, "uv"),
        }
    }
}

/// A single decoded value in canonical units.
///
/// Units: temperature degC, humidity %, wind m/s, bearing degrees, rain mm
/// and mm/h, pressure hPa, UV index.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedReading {
    Wind {
        gust: f64,
        bearing: f64,
        average: f64,
        timestamp: DateTime<Utc>,
    },
    WindChill {
        value: f64,
        timestamp: DateTime<Utc>,
    },
    Rain {
        rate: f64,
        total: f64,
        timestamp: DateTime<Utc>,
    },
    Temperature {
        slot: SensorSlot,
        value: f64,
        timestamp: DateTime<Utc>,
    },
    Humidity {
        slot: SensorSlot,
        value: f64,
    },
    Pressure {
        value: f64,
        timestamp: DateTime<Utc>,
    },
    ForecastCode {
        code: u8,
    },
    Uv {
        index: f64,
        timestamp: DateTime<Utc>,
    },
    BatteryLow {
        slot: SensorSlot,
        low: bool,
    },
}

impl DecodedReading {
    /// The slot this reading is addressed to, if it is channel-addressed.
    pub fn slot(&self) -> Option<SensorSlot> {
        match self {
            DecodedReading::Temperature { slot, .. }
            | DecodedReading::Humidity { slot, .. }
            | DecodedReading::BatteryLow { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_display() {
        assert_eq!(SensorSlot::Indoor.to_string(), "indoor");
        assert_eq!(SensorSlot::Outdoor.to_string(), "outdoor");
        assert_eq!(SensorSlot::Extra(3).to_string(), "extra3");
        assert_eq!(SensorSlot::Auxiliary(1).to_string(), "aux1");
        assert_eq!(SensorSlot::RainGauge.to_string(), "rain");
    }

    #[test]
    fn channel_addressed_readings_expose_slot() {
        let r = DecodedReading::Humidity {
            slot: SensorSlot::Extra(2),
            value: 55.0,
        };
        assert_eq!(r.slot(), Some(SensorSlot::Extra(2)));

        let r = DecodedReading::ForecastCode { code: 0x0C };
        assert_eq!(r.slot(), None);
    }
}

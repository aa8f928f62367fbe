//! Recording ingestion sink.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use wxlink_core::{DecodedReading, IngestionSink, SensorSlot};

/// An [`IngestionSink`] that records every reading in call order.
#[derive(Debug, Default)]
pub struct ReadingLog {
    readings: Mutex<Vec<DecodedReading>>,
}

impl ReadingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded readings.
    pub fn readings(&self) -> Vec<DecodedReading> {
        self.readings.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.readings.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut r) = self.readings.lock() {
            r.clear();
        }
    }

    /// Temperature last reported for `slot`.
    pub fn temperature(&self, slot: SensorSlot) -> Option<f64> {
        self.readings().iter().rev().find_map(|r| match r {
            DecodedReading::Temperature { slot: s, value, .. } if *s == slot => Some(*value),
            _ => None,
        })
    }

    /// Humidity last reported for `slot`.
    pub fn humidity(&self, slot: SensorSlot) -> Option<f64> {
        self.readings().iter().rev().find_map(|r| match r {
            DecodedReading::Humidity { slot: s, value } if *s == slot => Some(*value),
            _ => None,
        })
    }

    /// Battery state last reported for `slot`.
    pub fn battery_low(&self, slot: SensorSlot) -> Option<bool> {
        self.readings().iter().rev().find_map(|r| match r {
            DecodedReading::BatteryLow { slot: s, low } if *s == slot => Some(*low),
            _ => None,
        })
    }

    fn record(&self, reading: DecodedReading) {
        if let Ok(mut r) = self.readings.lock() {
            r.push(reading);
        }
    }
}

impl IngestionSink for ReadingLog {
    fn report_wind(&self, gust: f64, bearing: f64, average: f64, ts: DateTime<Utc>) {
        self.record(DecodedReading::Wind {
            gust,
            bearing,
            average,
            timestamp: ts,
        });
    }

    fn report_rain(&self, rate: f64, total: f64, ts: DateTime<Utc>) {
        self.record(DecodedReading::Rain {
            rate,
            total,
            timestamp: ts,
        });
    }

    fn report_temperature(&self, slot: SensorSlot, value: f64, ts: DateTime<Utc>) {
        self.record(DecodedReading::Temperature {
            slot,
            value,
            timestamp: ts,
        });
    }

    fn report_humidity(&self, slot: SensorSlot, value: f64) {
        self.record(DecodedReading::Humidity { slot, value });
    }

    fn report_pressure(&self, value: f64, ts: DateTime<Utc>) {
        self.record(DecodedReading::Pressure {
            value,
            timestamp: ts,
        });
    }

    fn report_forecast_code(&self, code: u8) {
        self.record(DecodedReading::ForecastCode { code });
    }

    fn report_battery_low(&self, slot: SensorSlot, low: bool) {
        self.record(DecodedReading::BatteryLow { slot, low });
    }

    fn report_uv(&self, index: f64, ts: DateTime<Utc>) {
        self.record(DecodedReading::Uv {
            index,
            timestamp: ts,
        });
    }

    fn report_wind_chill(&self, value: f64, ts: DateTime<Utc>) {
        self.record(DecodedReading::WindChill {
            value,
            timestamp: ts,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order_and_queries_latest() {
        let log = ReadingLog::new();
        let ts = Utc::now();
        log.report_temperature(SensorSlot::Outdoor, 10.0, ts);
        log.report_humidity(SensorSlot::Outdoor, 80.0);
        log.report_temperature(SensorSlot::Outdoor, 11.5, ts);

        assert_eq!(log.len(), 3);
        assert_eq!(log.temperature(SensorSlot::Outdoor), Some(11.5));
        assert_eq!(log.humidity(SensorSlot::Outdoor), Some(80.0));
        assert_eq!(log.temperature(SensorSlot::Indoor), None);

        log.clear();
        assert!(log.is_empty());
    }
}

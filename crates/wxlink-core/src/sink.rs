//! The ingestion sink surface consumed by packet dispatchers.
//!
//! Dispatchers call the sink on the reader task. Implementations must be
//! `Send + Sync` and take care of their own synchronization; the decoder
//! never locks on their behalf.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::reading::{DecodedReading, SensorSlot};

/// Receiver of decoded readings.
///
/// `report_uv` and `report_wind_chill` have no-op defaults because only
/// some consoles transmit those values.
pub trait IngestionSink: Send + Sync {
    fn report_wind(&self, gust: f64, bearing: f64, average: f64, ts: DateTime<Utc>);

    fn report_rain(&self, rate: f64, total: f64, ts: DateTime<Utc>);

    fn report_temperature(&self, slot: SensorSlot, value: f64, ts: DateTime<Utc>);

    fn report_humidity(&self, slot: SensorSlot, value: f64);

    fn report_pressure(&self, value: f64, ts: DateTime<Utc>);

    fn report_forecast_code(&self, code: u8);

    fn report_battery_low(&self, slot: SensorSlot, low: bool);

    fn report_uv(&self, _index: f64, _ts: DateTime<Utc>) {}

    fn report_wind_chill(&self, _value: f64, _ts: DateTime<Utc>) {}
}

/// A sink that republishes every reading on a tokio broadcast channel.
///
/// Readings are delivered best-effort: with no subscribers they are
/// dropped, and slow subscribers may observe `Lagged`.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<DecodedReading>,
}

impl BroadcastSink {
    /// Create a sink backed by a channel of the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to readings published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DecodedReading> {
        self.tx.subscribe()
    }

    fn publish(&self, reading: DecodedReading) {
        // No subscribers is not an error for a telemetry fan-out.
        let _ = self.tx.send(reading);
    }
}

impl IngestionSink for BroadcastSink {
    fn report_wind(&self, gust: f64, bearing: f64, average: f64, ts: DateTime<Utc>) {
        self.publish(DecodedReading::Wind {
            gust,
            bearing,
            average,
            timestamp: ts,
        });
    }

    fn report_rain(&self, rate: f64, total: f64, ts: DateTime<Utc>) {
        self.publish(DecodedReading::Rain {
            rate,
            total,
            timestamp: ts,
        });
    }

    fn report_temperature(&self, slot: SensorSlot, value: f64, ts: DateTime<Utc>) {
        self.publish(DecodedReading::Temperature {
            slot,
            value,
            timestamp: ts,
        });
    }

    fn report_humidity(&self, slot: SensorSlot, value: f64) {
        self.publish(DecodedReading::Humidity { slot, value });
    }

    fn report_pressure(&self, value: f64, ts: DateTime<Utc>) {
        self.publish(DecodedReading::Pressure {
            value,
            timestamp: ts,
        });
    }

    fn report_forecast_code(&self, code: u8) {
        self.publish(DecodedReading::ForecastCode { code });
    }

    fn report_battery_low(&self, slot: SensorSlot, low: bool) {
        self.publish(DecodedReading::BatteryLow { slot, low });
    }

    fn report_uv(&self, index: f64, ts: DateTime<Utc>) {
        self.publish(DecodedReading::Uv {
            index,
            timestamp: ts,
        });
    }

    fn report_wind_chill(&self, value: f64, ts: DateTime<Utc>) {
        self.publish(DecodedReading::WindChill {
            value,
            timestamp: ts,
        });
    }
}

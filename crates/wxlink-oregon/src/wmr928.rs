//! WMR928 serial console protocol.
//!
//! The console streams BCD-encoded frames at 9600 baud, 8N1:
//!
//! ```text
//! FF FF  type  status  fields..  checksum
//! ```
//!
//! The published lengths count the sync bytes, and the checksum is the
//! 8-bit sum of every byte before it, sync included. Values are already
//! metric: degC, m/s, mm, hPa.
//!
//! Extra sensors carry their channel as a single bit (1, 2 or 4) in the low
//! nibble of the status byte; bit 4 is channel 3.

use chrono::{DateTime, Utc};
use tracing::debug;

use wxlink_codec::field::{bcd_digit, bcd_pair, bcd_signed_tenths, hi_nibble, lo_nibble};
use wxlink_codec::{
    ChannelMap, ChecksumKind, DispatchOutcome, FieldTally, PacketDispatcher, PacketKind,
    PacketSpec, ProtocolProfile, RawFrame,
};
use wxlink_core::{IngestionSink, SensorSlot};

/// Battery-low bit in the status nibble.
const BATTERY_LOW: u8 = 0x4;

/// Wind chill status nibble: value is negative.
const CHILL_NEGATIVE: u8 = 0x8;
/// Wind chill status nibble: no wind chill available.
const CHILL_NO_DATA: u8 = 0x2;

/// Offset added to the raw barometer reading of the indoor packet.
const BARO_OFFSET: f64 = 795.0;
/// Offset added to the raw barometer reading of the extended indoor packet.
const BARO_OFFSET_EXTENDED: f64 = 600.0;

/// Primary channel used when none is configured: only the dedicated
/// outdoor sensor counts as outdoor.
pub const DEFAULT_PRIMARY_CHANNEL: u8 = 0;

static PACKETS: &[PacketSpec] = &[
    PacketSpec {
        code: 0x00,
        length: 11,
        kind: PacketKind::Wind,
    },
    PacketSpec {
        code: 0x01,
        length: 16,
        kind: PacketKind::Rain,
    },
    PacketSpec {
        code: 0x02,
        length: 9,
        kind: PacketKind::ChannelClimate,
    },
    PacketSpec {
        code: 0x03,
        length: 9,
        kind: PacketKind::OutdoorClimate,
    },
    PacketSpec {
        code: 0x04,
        length: 7,
        kind: PacketKind::ChannelTemperature,
    },
    PacketSpec {
        code: 0x05,
        length: 13,
        kind: PacketKind::IndoorClimate,
    },
    PacketSpec {
        code: 0x06,
        length: 14,
        kind: PacketKind::ExtendedIndoorClimate,
    },
    PacketSpec {
        code: 0x0E,
        length: 5,
        kind: PacketKind::Clock,
    },
    PacketSpec {
        code: 0x0F,
        length: 9,
        kind: PacketKind::Clock,
    },
];

/// Framing profile of the WMR928.
pub static PROFILE: ProtocolProfile = ProtocolProfile {
    name: "WMR928",
    sync: [0xFF, 0xFF],
    type_offset: 0,
    length_includes_sync: true,
    packets: PACKETS,
    checksum: ChecksumKind::Sum8 { include_sync: true },
};

/// Map the channel nibble of an extra sensor to its channel number.
///
/// The console reports the third channel as bit value 4; every other
/// nonzero value is taken as the channel number itself. Zero carries no
/// channel and would alias the indoor unit.
pub fn channel_from_bits(bits: u8) -> Option<u8> {
    match bits {
        0 => None,
        4 => Some(3),
        n => Some(n),
    }
}

/// Decoder for WMR928 frames.
#[derive(Debug, Clone)]
pub struct Wmr928Dispatcher {
    channels: ChannelMap,
}

impl Wmr928Dispatcher {
    pub fn new(primary_channel: u8) -> Self {
        Self {
            channels: ChannelMap::new(primary_channel),
        }
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    fn battery(&self, status: u8, slot: SensorSlot, sink: &dyn IngestionSink) {
        sink.report_battery_low(slot, hi_nibble(status) & BATTERY_LOW != 0);
    }

    fn wind(&mut self, p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
        let mut tally = FieldTally::new();
        self.battery(p[1], SensorSlot::Anemometer, sink);

        let bearing = tally.check(
            "wind bearing",
            bcd_pair(p[2]).zip(bcd_digit(lo_nibble(p[3]))),
        );
        let gust = tally.check(
            "wind gust",
            bcd_pair(p[4]).zip(bcd_digit(hi_nibble(p[3]))),
        );
        let average = tally.check(
            "wind average",
            bcd_digit(lo_nibble(p[6]))
                .zip(bcd_digit(hi_nibble(p[5])))
                .zip(bcd_digit(lo_nibble(p[5]))),
        );
        if let (Some((b_lo, b_hi)), Some((g_units, g_tenths)), Some(((a_tens, a_units), a_tenths))) =
            (bearing, gust, average)
        {
            let bearing = b_hi as f64 * 100.0 + b_lo as f64;
            let gust = g_units as f64 + g_tenths as f64 / 10.0;
            let average = a_tens as f64 * 10.0 + a_units as f64 + a_tenths as f64 / 10.0;
            sink.report_wind(gust, bearing, average, now);
        }

        let chill_status = hi_nibble(p[6]);
        if chill_status & CHILL_NO_DATA == 0 {
            if let Some(chill) = tally.check("wind chill", bcd_pair(p[7])) {
                let chill = chill as f64;
                let chill = if chill_status & CHILL_NEGATIVE != 0 {
                    -chill
                } else {
                    chill
                };
                sink.report_wind_chill(chill, now);
            }
        }

        tally.outcome()
    }

    fn rain(&mut self, p: &[u8], sink: &dyn IngestionSink, now: DateTime<Utc>) -> DispatchOutcome {
        let mut tally = FieldTally::new();
        self.battery(p[1], SensorSlot::RainGauge, sink);

        let rate = tally.check(
            "rain rate",
            bcd_pair(p[2]).zip(bcd_digit(lo_nibble(p[3]))),
        );
        let total = tally.check(
            "rain total",
            bcd_pair(p[4])
                .zip(bcd_pair(p[5]))
                .zip(bcd_digit(hi_nibble(p[3]))),
        );
        if let (Some((r_lo, r_hundreds)), Some(((t_lo, t_hi), t_tenths))) = (rate, total) {
            let rate = r_hundreds as f64 * 100.0 + r_lo as f64;
            let total = t_hi as f64 * 100.0 + t_lo as f64 + t_tenths as f64 / 10.0;
            sink.report_rain(rate, total, now);
        }

        tally.outcome()
    }

    /// Temperature (and humidity when `with_humidity`) at `p[2..]`.
    fn climate(
        &mut self,
        p: &[u8],
        slot: SensorSlot,
        with_humidity: bool,
        tally: &mut FieldTally,
        sink: &dyn IngestionSink,
        now: DateTime<Utc>,
    ) {
        self.channels.note_seen(slot);
        self.battery(p[1], slot, sink);
        if let Some(t) = tally.check("temperature", bcd_signed_tenths(p[2], p[3])) {
            sink.report_temperature(slot, t, now);
        }
        if with_humidity {
            if let Some(h) = tally.check("humidity", bcd_pair(p[4])) {
                sink.report_humidity(slot, h as f64);
            }
        }
    }

    fn channel_slot(&self, p: &[u8]) -> Option<SensorSlot> {
        let channel = channel_from_bits(lo_nibble(p[1]));
        if channel.is_none() {
            debug!(status = p[1], "extra sensor without a channel");
        }
        channel.map(|ch| self.channels.resolve(ch))
    }

    fn indoor(
        &mut self,
        p: &[u8],
        extended: bool,
        sink: &dyn IngestionSink,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        let mut tally = FieldTally::new();
        self.climate(p, SensorSlot::Indoor, true, &mut tally, sink, now);

        let (absolute, forecast, offset) = if extended {
            let absolute = tally.check(
                "barometer",
                bcd_pair(p[6]).zip(bcd_digit(lo_nibble(p[7]))),
            );
            let offset = tally.check(
                "sea-level offset",
                bcd_pair(p[9])
                    .zip(bcd_pair(p[10]))
                    .zip(bcd_digit(hi_nibble(p[8]))),
            );
            (
                absolute.map(|(lo, hundreds)| hundreds as f64 * 100.0 + lo as f64 + BARO_OFFSET_EXTENDED),
                hi_nibble(p[7]),
                offset.map(|((lo, hi), tenths)| hi as f64 * 100.0 + lo as f64 + tenths as f64 / 10.0),
            )
        } else {
            let absolute = tally.check("barometer", bcd_pair(p[6]));
            let offset = tally.check("sea-level offset", bcd_pair(p[8]).zip(bcd_pair(p[9])));
            (
                absolute.map(|raw| raw as f64 + BARO_OFFSET),
                lo_nibble(p[7]),
                offset.map(|(lo, hi)| hi as f64 * 10.0 + lo as f64 / 10.0),
            )
        };

        if let (Some(absolute), Some(offset)) = (absolute, offset) {
            sink.report_pressure(absolute + offset, now);
        }
        sink.report_forecast_code(forecast);

        tally.outcome()
    }
}

impl Default for Wmr928Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_PRIMARY_CHANNEL)
    }
}

impl PacketDispatcher for Wmr928Dispatcher {
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
            PacketKind::Wind => self.wind(p, sink, now),
            PacketKind::Rain => self.rain(p, sink, now),
            PacketKind::ChannelClimate | PacketKind::ChannelTemperature => {
                let Some(slot) = self.channel_slot(p) else {
                    return DispatchOutcome::Decoded { skipped_fields: 1 };
                };
                let mut tally = FieldTally::new();
                let with_humidity = kind == PacketKind::ChannelClimate;
                self.climate(p, slot, with_humidity, &mut tally, sink, now);
                tally.outcome()
            }
            PacketKind::OutdoorClimate => {
                let mut tally = FieldTally::new();
                self.climate(p, SensorSlot::Outdoor, true, &mut tally, sink, now);
                tally.outcome()
            }
            PacketKind::IndoorClimate => self.indoor(p, false, sink, now),
            PacketKind::ExtendedIndoorClimate => self.indoor(p, true, sink, now),
            PacketKind::Clock => DispatchOutcome::NoOp,
            PacketKind::Pressure | PacketKind::Uv | PacketKind::Auxiliary => {
                DispatchOutcome::Unhandled
            }
        }
    }
}

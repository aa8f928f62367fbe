//! Packet dispatch: the seam between framing and the per-station decoders.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use wxlink_core::{IngestionSink, SensorSlot};

use crate::profile::ProtocolProfile;
use crate::sync::RawFrame;

/// Result of handing one validated frame to a dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame was decoded; `skipped_fields` counts fields rejected as
    /// malformed (bad BCD digits, out-of-range values).
    Decoded { skipped_fields: usize },
    /// A known packet type that carries nothing to report.
    NoOp,
    /// The type code has no handler.
    Unhandled,
}

/// Decodes validated frames of one protocol and reports the readings.
///
/// Dispatchers hold per-link state (channel assignment, sensors seen) and
/// are driven by one reader task, so they take `&mut self`.
pub trait PacketDispatcher: Send {
    /// Framing profile of the protocol this dispatcher decodes.
    fn profile(&self) -> &'static ProtocolProfile;

    /// Decode `frame` and report its readings to `sink`, stamped `now`.
    fn dispatch(
        &mut self,
        frame: &RawFrame,
        sink: &dyn IngestionSink,
        now: DateTime<Utc>,
    ) -> DispatchOutcome;
}

/// Tally of fields a handler rejected while decoding one frame.
///
/// Handlers pass every fallible field through [`check`](FieldTally::check)
/// so a glitched field is logged and counted while the rest of the frame
/// is still reported.
#[derive(Debug, Default)]
pub struct FieldTally {
    skipped: usize,
}

impl FieldTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass `value` through, counting and logging it when it is `None`.
    pub fn check<T>(&mut self, field: &'static str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.skipped += 1;
            debug!(field, "malformed field skipped");
        }
        value
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Finish the frame.
    pub fn outcome(self) -> DispatchOutcome {
        DispatchOutcome::Decoded {
            skipped_fields: self.skipped,
        }
    }
}

/// Channel-to-slot assignment for channel-addressed sensors.
///
/// Channel 0 is the console's own indoor sensor, the configured primary
/// channel is the outdoor sensor, and every other channel is an extra
/// sensor.
#[derive(Debug, Clone)]
pub struct ChannelMap {
    primary: u8,
    seen: BTreeSet<SensorSlot>,
}

impl ChannelMap {
    pub fn new(primary: u8) -> Self {
        Self {
            primary,
            seen: BTreeSet::new(),
        }
    }

    /// The channel treated as outdoor.
    pub fn primary(&self) -> u8 {
        self.primary
    }

    /// Slot for a channel number.
    pub fn resolve(&self, channel: u8) -> SensorSlot {
        if channel == 0 {
            SensorSlot::Indoor
        } else if channel == self.primary {
            SensorSlot::Outdoor
        } else {
            SensorSlot::Extra(channel)
        }
    }

    /// Record that a sensor reported. Logs the first sighting of each slot.
    pub fn note_seen(&mut self, slot: SensorSlot) {
        if self.seen.insert(slot) {
            info!(%slot, "new sensor detected");
        }
    }

    /// Slots that have reported since this map was created.
    pub fn seen(&self) -> impl Iterator<Item = SensorSlot> + '_ {
        self.seen.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_missing_fields() {
        let mut tally = FieldTally::new();
        assert_eq!(tally.check("a", Some(1)), Some(1));
        assert_eq!(tally.check::<u8>("b", None), None);
        assert_eq!(tally.check::<u8>("c", None), None);
        assert_eq!(tally.outcome(), DispatchOutcome::Decoded { skipped_fields: 2 });
    }

    #[test]
    fn resolve_primary_zero() {
        // Primary 0: indoor wins, there is no outdoor channel.
        let map = ChannelMap::new(0);
        assert_eq!(map.resolve(0), SensorSlot::Indoor);
        assert_eq!(map.resolve(1), SensorSlot::Extra(1));
        assert_eq!(map.resolve(3), SensorSlot::Extra(3));
    }

    #[test]
    fn resolve_primary_one() {
        let map = ChannelMap::new(1);
        assert_eq!(map.resolve(0), SensorSlot::Indoor);
        assert_eq!(map.resolve(1), SensorSlot::Outdoor);
        assert_eq!(map.resolve(2), SensorSlot::Extra(2));
    }

    #[test]
    fn note_seen_is_idempotent() {
        let mut map = ChannelMap::new(1);
        map.note_seen(SensorSlot::Outdoor);
        map.note_seen(SensorSlot::Extra(2));
        map.note_seen(SensorSlot::Outdoor);
        let seen: Vec<_> = map.seen().collect();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&SensorSlot::Outdoor));
    }
}

//! wxlink-codec: protocol-independent framing and field decoding.
//!
//! Station drivers describe their wire format as a static
//! [`ProtocolProfile`] and implement [`PacketDispatcher`] for the field
//! layouts. Everything in between is shared:
//!
//! - [`FrameSynchronizer`] -- finds frames in a byte stream of any chunking
//! - [`checksum`] -- additive checksum validation
//! - [`field`] -- BCD, signed-magnitude, integer, and flag decoders
//! - [`ChannelMap`] -- hardware channel to [`SensorSlot`](wxlink_core::SensorSlot)

pub mod checksum;
pub mod dispatch;
pub mod field;
pub mod profile;
pub mod sync;

pub use dispatch::{ChannelMap, DispatchOutcome, FieldTally, PacketDispatcher};
pub use profile::{ChecksumKind, PacketKind, PacketSpec, ProtocolProfile, SizeClass, SYNC_LEN};
pub use sync::{FrameSynchronizer, RawFrame, SyncState, SyncStats};

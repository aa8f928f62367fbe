//! Frame synchronizer.
//!
//! Finds frames in an unbounded byte stream. The stream may arrive in any
//! chunking (one byte per HID report, whole buffers from a serial read) and
//! carries line noise, so the synchronizer is a byte-at-a-time state
//! machine whose state survives across [`ingest`](FrameSynchronizer::ingest)
//! calls:
//!
//! ```text
//! SeekSync1 --marker[0]--> SeekSync2 --marker[1]--> [ReadPrefix] --> ReadType
//!     ^                                                                 |
//!     +---- emit RawFrame <---- Accumulate (exactly L bytes) <----------+
//! ```
//!
//! An unknown type code is a framing desync, not an error: the partial
//! frame is dropped and the scan restarts. Frames are only ever emitted
//! complete.

use tracing::debug;

use crate::field::hex_dump;
use crate::profile::{ProtocolProfile, SYNC_LEN};

/// One complete frame: sync marker, optional prefix, type code, payload and
/// checksum, exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
    frame_type: u8,
}

impl RawFrame {
    /// Wrap received bytes as a frame. `type_offset` is counted from the
    /// end of the sync marker.
    ///
    /// Returns `None` if the bytes are too short to contain a type code.
    pub fn new(bytes: Vec<u8>, type_offset: usize) -> Option<Self> {
        let frame_type = *bytes.get(SYNC_LEN + type_offset)?;
        Some(Self { bytes, frame_type })
    }

    /// All frame bytes including the sync marker.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Frame bytes after the sync marker.
    pub fn body(&self) -> &[u8] {
        &self.bytes[SYNC_LEN..]
    }

    /// The type code (command byte for gateway frames).
    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    /// Total frame length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always `false`: frames hold at least a sync marker and type code.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the frame and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Scanner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    SeekSync1,
    SeekSync2,
    ReadPrefix,
    ReadType,
    Accumulate { remaining: usize },
}

/// Counters for link-quality diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Frames emitted.
    pub frames: u64,
    /// Times the scanner abandoned a partial frame (unknown type, reset).
    pub resyncs: u64,
    /// Bytes dropped outside of emitted frames.
    pub discarded_bytes: u64,
}

/// Stateful stream-to-frame scanner for one [`ProtocolProfile`].
#[derive(Debug)]
pub struct FrameSynchronizer {
    profile: &'static ProtocolProfile,
    state: SyncState,
    buf: Vec<u8>,
    stats: SyncStats,
}

impl FrameSynchronizer {
    /// Create a synchronizer in [`SyncState::SeekSync1`].
    pub fn new(profile: &'static ProtocolProfile) -> Self {
        Self {
            profile,
            state: SyncState::SeekSync1,
            buf: Vec::with_capacity(32),
            stats: SyncStats::default(),
        }
    }

    /// The profile this synchronizer frames.
    pub fn profile(&self) -> &'static ProtocolProfile {
        self.profile
    }

    /// Current scanner state.
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Diagnostic counters.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Feed a chunk of any size and collect the frames it completes.
    pub fn ingest(&mut self, data: &[u8]) -> Vec<RawFrame> {
        data.iter().filter_map(|&b| self.push(b)).collect()
    }

    /// Discard any partial frame and restart the scan.
    ///
    /// Called when the transport fails or the stream ends; a partial frame
    /// is never emitted.
    pub fn reset(&mut self) {
        if self.state != SyncState::SeekSync1 {
            debug!(
                protocol = self.profile.name,
                partial = %hex_dump(&self.buf),
                "discarding partial frame"
            );
            self.stats.resyncs += 1;
            self.stats.discarded_bytes += self.buf.len() as u64;
        }
        self.buf.clear();
        self.state = SyncState::SeekSync1;
    }

    /// Advance the state machine by one byte.
    pub fn push(&mut self, byte: u8) -> Option<RawFrame> {
        let sync = self.profile.sync;
        match self.state {
            SyncState::SeekSync1 => {
                if byte == sync[0] {
                    self.buf.clear();
                    self.buf.push(byte);
                    self.state = SyncState::SeekSync2;
                } else {
                    self.stats.discarded_bytes += 1;
                }
                None
            }
            SyncState::SeekSync2 => {
                if byte == sync[1] {
                    self.buf.push(byte);
                    self.state = if self.profile.type_offset > 0 {
                        SyncState::ReadPrefix
                    } else {
                        SyncState::ReadType
                    };
                } else if byte == sync[0] {
                    // False start: this byte may be the real first marker.
                    self.stats.discarded_bytes += 1;
                    self.buf.clear();
                    self.buf.push(byte);
                } else {
                    self.stats.discarded_bytes += self.buf.len() as u64 + 1;
                    self.buf.clear();
                    self.state = SyncState::SeekSync1;
                }
                None
            }
            SyncState::ReadPrefix => {
                if self.is_marker_run(byte) {
                    self.stats.discarded_bytes += 1;
                    return None;
                }
                self.buf.push(byte);
                if self.buf.len() == SYNC_LEN + self.profile.type_offset {
                    self.state = SyncState::ReadType;
                }
                None
            }
            SyncState::ReadType => match self.profile.body_length(byte) {
                Some(body_len) => {
                    self.buf.push(byte);
                    let collected = self.buf.len() - SYNC_LEN;
                    match body_len.checked_sub(collected) {
                        Some(0) | None => self.emit(),
                        Some(remaining) => {
                            self.state = SyncState::Accumulate { remaining };
                            None
                        }
                    }
                }
                None if self.is_marker_run(byte) => {
                    self.stats.discarded_bytes += 1;
                    None
                }
                None => {
                    debug!(
                        protocol = self.profile.name,
                        frame_type = format_args!("0x{byte:02X}"),
                        "unknown packet type, resynchronizing"
                    );
                    self.stats.resyncs += 1;
                    self.stats.discarded_bytes += self.buf.len() as u64 + 1;
                    self.buf.clear();
                    self.state = SyncState::SeekSync1;
                    // The offending byte may itself open the next marker.
                    if byte == sync[0] {
                        self.stats.discarded_bytes -= 1;
                        self.buf.push(byte);
                        self.state = SyncState::SeekSync2;
                    }
                    None
                }
            },
            SyncState::Accumulate { remaining } => {
                self.buf.push(byte);
                if remaining <= 1 {
                    self.emit()
                } else {
                    self.state = SyncState::Accumulate {
                        remaining: remaining - 1,
                    };
                    None
                }
            }
        }
    }

    /// A repeated marker byte right after a complete marker keeps the
    /// marker match alive instead of being read as frame content. Only
    /// possible when both marker bytes are equal.
    fn is_marker_run(&self, byte: u8) -> bool {
        let sync = self.profile.sync;
        sync[0] == sync[1] && byte == sync[1] && self.buf.len() == SYNC_LEN
    }

    fn emit(&mut self) -> Option<RawFrame> {
        self.state = SyncState::SeekSync1;
        let bytes = std::mem::take(&mut self.buf);
        let frame = RawFrame::new(bytes, self.profile.type_offset);
        if frame.is_some() {
            self.stats.frames += 1;
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ChecksumKind, PacketKind, PacketSpec};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // Lengths count the sync marker, as the serial consoles publish them.
    static SERIAL_PACKETS: &[PacketSpec] = &[
        PacketSpec {
            code: 0x00,
            length: 11,
            kind: PacketKind::Wind,
        },
        PacketSpec {
            code: 0x0E,
            length: 5,
            kind: PacketKind::Clock,
        },
        PacketSpec {
            code: 0x07,
            length: 0,
            kind: PacketKind::Clock,
        },
    ];

    static SERIAL: ProtocolProfile = ProtocolProfile {
        name: "serial-test",
        sync: [0xFF, 0xFF],
        type_offset: 0,
        length_includes_sync: true,
        packets: SERIAL_PACKETS,
        checksum: ChecksumKind::Sum8 { include_sync: true },
    };

    // A flags byte precedes the type, lengths exclude the sync marker.
    static PREFIXED_PACKETS: &[PacketSpec] = &[PacketSpec {
        code: 0x47,
        length: 6,
        kind: PacketKind::Uv,
    }];

    static PREFIXED: ProtocolProfile = ProtocolProfile {
        name: "prefixed-test",
        sync: [0xFF, 0xFF],
        type_offset: 1,
        length_includes_sync: false,
        packets: PREFIXED_PACKETS,
        checksum: ChecksumKind::Sum16Le,
    };

    fn wind() -> Vec<u8> {
        vec![0xFF, 0xFF, 0x00, 0x10, 0x70, 0x32, 0x01, 0x20, 0x01, 0x05, 0xAA]
    }

    fn minute() -> Vec<u8> {
        vec![0xFF, 0xFF, 0x0E, 0x25, 0x31]
    }

    fn uv() -> Vec<u8> {
        vec![0xFF, 0xFF, 0x00, 0x47, 0x01, 0x05, 0x4D, 0x00]
    }

    fn sample_stream() -> Vec<u8> {
        let mut s = vec![0x12, 0x34, 0xFF, 0x56];
        s.extend(wind());
        s.extend([0xFF, 0xFF, 0x99, 0x01, 0x02]); // unknown type
        s.extend(minute());
        s.extend([0xFF]); // noise
        s.extend(wind());
        s.extend([0xFF, 0xFF, 0x00, 0x10]); // truncated tail
        s
    }

    fn prefixed_stream() -> Vec<u8> {
        let mut s = vec![0x12, 0xFF, 0x34];
        s.extend(uv());
        s.push(0xFF); // marker run
        s.extend(uv());
        s.extend([0xFF, 0xFF, 0x00]); // aborted before the type
        s.extend(uv());
        s.extend([0xFF, 0xFF, 0x00, 0x99, 0x01]); // unknown type
        s.extend(uv());
        s.extend([0xFF, 0xFF, 0x00, 0x47, 0x01]); // truncated tail
        s
    }

    /// Streams with the number of frames each yields.
    fn chunking_cases() -> [(&'static ProtocolProfile, Vec<u8>, usize); 2] {
        [(&SERIAL, sample_stream(), 3), (&PREFIXED, prefixed_stream(), 4)]
    }

    // ---------------------------------------------------------------
    // Basic framing
    // ---------------------------------------------------------------

    #[test]
    fn single_frame_whole_buffer() {
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let frames = sync.ingest(&wind());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes(), wind().as_slice());
        assert_eq!(frames[0].frame_type(), 0x00);
        assert_eq!(sync.state(), SyncState::SeekSync1);
    }

    #[test]
    fn frame_body_excludes_sync() {
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let frames = sync.ingest(&minute());
        assert_eq!(frames[0].body(), &[0x0E, 0x25, 0x31]);
    }

    #[test]
    fn garbage_before_sync_is_skipped() {
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let mut data = vec![0x01, 0x02, 0x03];
        data.extend(minute());
        let frames = sync.ingest(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(sync.stats().discarded_bytes, 3);
    }

    #[test]
    fn partial_frame_is_never_emitted() {
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let w = wind();
        assert!(sync.ingest(&w[..7]).is_empty());
        assert_eq!(sync.state(), SyncState::Accumulate { remaining: 4 });
        let frames = sync.ingest(&w[7..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 11);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let w = wind();
        assert!(sync.ingest(&w[..6]).is_empty());
        sync.reset();
        assert_eq!(sync.state(), SyncState::SeekSync1);
        // The rest of the old frame is noise now; nothing may be emitted.
        assert!(sync.ingest(&w[6..]).is_empty());
        assert_eq!(sync.stats().resyncs, 1);
        // And the next clean frame still decodes.
        assert_eq!(sync.ingest(&minute()).len(), 1);
    }

    // ---------------------------------------------------------------
    // Resynchronization
    // ---------------------------------------------------------------

    #[test]
    fn unknown_type_resyncs_and_next_frame_decodes() {
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let mut data = vec![0xFF, 0xFF, 0x42];
        data.extend(minute());
        let frames = sync.ingest(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), 0x0E);
        assert_eq!(sync.stats().resyncs, 1);
    }

    #[test]
    fn zero_length_type_is_invalid_framing() {
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let mut data = vec![0xFF, 0xFF, 0x07, 0x00, 0x00];
        data.extend(minute());
        let frames = sync.ingest(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), 0x0E);
    }

    #[test]
    fn false_start_rematches_marker() {
        // FF 12 FF FF ...: the first FF is a false start.
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let mut data = vec![0xFF, 0x12];
        data.extend(minute());
        assert_eq!(sync.ingest(&data).len(), 1);
    }

    #[test]
    fn marker_run_keeps_sync() {
        // FF FF FF 0E ...: a run of marker bytes still frames correctly.
        let mut sync = FrameSynchronizer::new(&SERIAL);
        let mut data = vec![0xFF];
        data.extend(minute());
        let frames = sync.ingest(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes(), minute().as_slice());
    }

    #[test]
    fn unknown_type_equal_to_marker_opens_next_frame() {
        // Prefixed protocol: FF FF 00 FF FF 00 47 ...: the second FF FF
        // lands on the flags/type positions of an aborted frame.
        let mut sync = FrameSynchronizer::new(&PREFIXED);
        let mut data = vec![0xFF, 0xFF, 0x00];
        data.extend(uv());
        let frames = sync.ingest(&data);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes(), uv().as_slice());
    }

    #[test]
    fn prefixed_frame_type_is_after_prefix() {
        let mut sync = FrameSynchronizer::new(&PREFIXED);
        let frames = sync.ingest(&uv());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), 0x47);
        assert_eq!(frames[0].body().len(), 6);
    }

    // ---------------------------------------------------------------
    // Chunking invariance
    // ---------------------------------------------------------------

    #[test]
    fn one_byte_chunks_match_whole_buffer() {
        for (profile, stream, count) in chunking_cases() {
            let mut whole = FrameSynchronizer::new(profile);
            let expected = whole.ingest(&stream);
            assert_eq!(expected.len(), count, "{}", profile.name);

            let mut bytewise = FrameSynchronizer::new(profile);
            let actual: Vec<RawFrame> =
                stream.iter().flat_map(|b| bytewise.ingest(&[*b])).collect();

            assert_eq!(actual, expected, "{}", profile.name);
            assert_eq!(bytewise.stats(), whole.stats(), "{}", profile.name);
        }
    }

    #[test]
    fn prefixed_stream_frames_every_packet() {
        let mut sync = FrameSynchronizer::new(&PREFIXED);
        let frames = sync.ingest(&prefixed_stream());
        assert_eq!(frames.len(), 4);
        for frame in &frames {
            assert_eq!(frame.bytes(), uv().as_slice());
        }
        assert_eq!(sync.stats().resyncs, 2);
        assert!(matches!(sync.state(), SyncState::Accumulate { .. }));
    }

    #[test]
    fn random_chunkings_match_whole_buffer() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for (profile, stream, _) in chunking_cases() {
            let mut whole = FrameSynchronizer::new(profile);
            let expected = whole.ingest(&stream);

            for _ in 0..200 {
                let mut sync = FrameSynchronizer::new(profile);
                let mut actual = Vec::new();
                let mut rest = stream.as_slice();
                while !rest.is_empty() {
                    let n = rng.gen_range(1..=rest.len().min(9));
                    actual.extend(sync.ingest(&rest[..n]));
                    rest = &rest[n..];
                }
                assert_eq!(actual, expected, "{}", profile.name);
                assert_eq!(sync.stats(), whole.stats(), "{}", profile.name);
            }
        }
    }

    #[test]
    fn random_noise_never_yields_short_frames() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut sync = FrameSynchronizer::new(&SERIAL);
        for _ in 0..50 {
            let chunk: Vec<u8> = (0..64)
                .map(|_| if rng.gen_bool(0.3) { 0xFF } else { rng.gen() })
                .collect();
            for frame in sync.ingest(&chunk) {
                let expected = SERIAL.declared_length(frame.frame_type()).unwrap();
                assert_eq!(frame.len(), expected);
            }
        }
    }
}

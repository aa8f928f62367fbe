//! Free-running reader task for streaming consoles.
//!
//! One task per station owns the frame synchronizer and the dispatcher,
//! reads from the [`Link`] with a short timeout, and pushes decoded
//! readings into the sink. It survives everything except an explicit stop:
//!
//! - a read timeout is routine (the console only talks when it has data)
//! - a transport failure discards the partial frame and reconnects
//! - a framing desync or checksum failure drops bytes and moves on
//!
//! Shutdown is cooperative through a [`CancellationToken`] checked around
//! every read and every reconnect wait.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wxlink_codec::checksum;
use wxlink_codec::field::hex_dump;
use wxlink_codec::{DispatchOutcome, FrameSynchronizer, PacketDispatcher, RawFrame, SyncStats};
use wxlink_core::error::Error;
use wxlink_core::IngestionSink;
use wxlink_transport::Link;

/// Default per-read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Reports the console needs to start and keep streaming.
#[derive(Debug, Clone)]
pub struct Wakeup {
    /// Sent after every successful (re)connect.
    pub init: Vec<u8>,
    /// Sent every `interval` while connected.
    pub heartbeat: Vec<u8>,
    pub interval: Duration,
}

/// Reader task configuration.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub read_timeout: Duration,
    pub wakeup: Option<Wakeup>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            wakeup: None,
        }
    }
}

/// Link-quality counters of a reader task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Frames that passed the checksum and were decoded.
    pub frames_decoded: u64,
    /// Valid frames of a type that carries nothing to report.
    pub frames_ignored: u64,
    /// Valid frames with no handler.
    pub frames_unhandled: u64,
    pub checksum_failures: u64,
    /// Individual fields rejected as malformed.
    pub fields_skipped: u64,
    /// Read or write failures that took the link down.
    pub transport_errors: u64,
    pub sync: SyncStats,
}

/// Handle to a running reader task.
pub struct ReaderHandle {
    cancel: CancellationToken,
    stats: watch::Receiver<ReaderStats>,
    task: JoinHandle<ReaderStats>,
}

impl ReaderHandle {
    /// Counters as of the last processed read.
    pub fn stats(&self) -> ReaderStats {
        *self.stats.borrow()
    }

    /// Watch counter updates.
    pub fn subscribe_stats(&self) -> watch::Receiver<ReaderStats> {
        self.stats.clone()
    }

    /// Token that stops the task when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the task and wait for it to close the link.
    pub async fn shutdown(self) -> ReaderStats {
        self.cancel.cancel();
        let last = *self.stats.borrow();
        self.task.await.unwrap_or(last)
    }
}

/// Spawn the reader task for one station.
///
/// The task connects the link itself; `link` may be disconnected when this
/// is called.
pub fn spawn_reader(
    link: Arc<Link>,
    dispatcher: Box<dyn PacketDispatcher>,
    sink: Arc<dyn IngestionSink>,
    config: ReaderConfig,
    cancel: CancellationToken,
) -> ReaderHandle {
    let (stats_tx, stats_rx) = watch::channel(ReaderStats::default());
    let task = tokio::spawn(read_loop(
        link,
        dispatcher,
        sink,
        config,
        cancel.clone(),
        stats_tx,
    ));
    ReaderHandle {
        cancel,
        stats: stats_rx,
        task,
    }
}

/// Validate, log and dispatch one frame.
fn handle_frame(
    frame: &RawFrame,
    dispatcher: &mut dyn PacketDispatcher,
    sink: &dyn IngestionSink,
    stats: &mut ReaderStats,
) {
    let profile = dispatcher.profile();
    if !checksum::validate(frame, profile.checksum) {
        debug!(
            protocol = profile.name,
            frame = %hex_dump(frame.bytes()),
            "checksum mismatch, frame dropped"
        );
        stats.checksum_failures += 1;
        return;
    }

    debug!(protocol = profile.name, frame = %hex_dump(frame.bytes()), "frame");

    match dispatcher.dispatch(frame, sink, Utc::now()) {
        DispatchOutcome::Decoded { skipped_fields } => {
            stats.frames_decoded += 1;
            stats.fields_skipped += skipped_fields as u64;
        }
        DispatchOutcome::NoOp => stats.frames_ignored += 1,
        DispatchOutcome::Unhandled => {
            debug!(
                protocol = profile.name,
                frame_type = frame.frame_type(),
                "no handler for frame type"
            );
            stats.frames_unhandled += 1;
        }
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn read_loop(
    link: Arc<Link>,
    mut dispatcher: Box<dyn PacketDispatcher>,
    sink: Arc<dyn IngestionSink>,
    config: ReaderConfig,
    cancel: CancellationToken,
    stats_tx: watch::Sender<ReaderStats>,
) -> ReaderStats {
    let profile = dispatcher.profile();
    let mut sync = FrameSynchronizer::new(profile);
    let mut stats = ReaderStats::default();
    let mut buf = [0u8; 256];
    let mut next_heartbeat: Option<Instant> = None;

    info!(protocol = profile.name, endpoint = %link.endpoint(), "reader started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        if !link.is_connected() {
            match link.connect(&cancel).await {
                Ok(()) => {
                    sync.reset();
                    if let Some(wakeup) = &config.wakeup {
                        if let Err(e) = link.send(&wakeup.init).await {
                            warn!(error = %e, "failed to send init report");
                            stats.transport_errors += 1;
                            continue;
                        }
                        next_heartbeat = Some(Instant::now() + wakeup.interval);
                    }
                }
                Err(Error::Cancelled) => break,
                Err(Error::ReconnectInProgress) => {
                    if !pause(&cancel, config.read_timeout).await {
                        break;
                    }
                }
                Err(e) => {
                    // The sequence logged every attempt; rest before the next.
                    let policy = link.policy();
                    debug!(error = %e, "connect sequence failed");
                    if !pause(&cancel, policy.delay(policy.max_attempts)).await {
                        break;
                    }
                }
            }
            continue;
        }

        if let (Some(wakeup), Some(due)) = (&config.wakeup, next_heartbeat) {
            if Instant::now() >= due {
                if let Err(e) = link.send(&wakeup.heartbeat).await {
                    warn!(error = %e, "failed to send heartbeat");
                    stats.transport_errors += 1;
                    sync.reset();
                    continue;
                }
                next_heartbeat = Some(Instant::now() + wakeup.interval);
            }
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = link.receive(&mut buf, config.read_timeout) => r,
        };

        match result {
            Ok(n) => {
                for frame in sync.ingest(&buf[..n]) {
                    handle_frame(&frame, dispatcher.as_mut(), sink.as_ref(), &mut stats);
                }
            }
            Err(Error::Timeout) => {}
            Err(e) => {
                info!(error = %e, "read failed, discarding partial frame");
                stats.transport_errors += 1;
                sync.reset();
                if link.is_connected() {
                    // Not a link failure but not data either; do not spin.
                    if !pause(&cancel, config.read_timeout).await {
                        break;
                    }
                }
            }
        }

        stats.sync = sync.stats();
        stats_tx.send_replace(stats);
    }

    link.disconnect().await;
    stats.sync = sync.stats();
    stats_tx.send_replace(stats);
    info!(protocol = profile.name, ?stats, "reader stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxlink_codec::checksum::sum8;
    use wxlink_core::{DecodedReading, SensorSlot};
    use wxlink_test_harness::{MockConnector, MockTransport, ReadingLog};
    use wxlink_transport::ReconnectPolicy;

    use crate::wmr100::{self, Wmr100Dispatcher};
    use crate::wmr928::Wmr928Dispatcher;

    fn wmr928_frame(body: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xFF];
        bytes.extend_from_slice(body);
        let cs = sum8(&bytes);
        bytes.push(cs);
        bytes
    }

    fn wind_frame() -> Vec<u8> {
        wmr928_frame(&[0x00, 0x00, 0x70, 0x22, 0x05, 0x31, 0x00, 0x05])
    }

    fn outdoor_frame() -> Vec<u8> {
        wmr928_frame(&[0x03, 0x00, 0x34, 0x02, 0x55, 0x12])
    }

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(5),
        }
    }

    fn fast_config() -> ReaderConfig {
        ReaderConfig {
            read_timeout: Duration::from_millis(10),
            wakeup: None,
        }
    }

    /// Wait until `cond` holds on the log or fail after two seconds.
    async fn wait_for(log: &ReadingLog, cond: impl Fn(&[DecodedReading]) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond(&log.readings()) {
            assert!(Instant::now() < deadline, "timed out; got {:?}", log.readings());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn spawn_wmr928(connector: MockConnector, log: Arc<ReadingLog>) -> (Arc<Link>, ReaderHandle) {
        let link = Arc::new(Link::new(Box::new(connector), fast_policy()));
        let handle = spawn_reader(
            link.clone(),
            Box::new(Wmr928Dispatcher::default()),
            log,
            fast_config(),
            CancellationToken::new(),
        );
        (link, handle)
    }

    #[tokio::test]
    async fn decodes_frames_split_across_reads() {
        let mut mock = MockTransport::streaming();
        let wind = wind_frame();
        mock.push_read(&wind[..3]);
        mock.push_read(&wind[3..]);
        let connector = MockConnector::new();
        connector.push_transport(mock);
        let log = Arc::new(ReadingLog::new());

        let (_link, handle) = spawn_wmr928(connector, log.clone());
        wait_for(&log, |r| r.iter().any(|r| matches!(r, DecodedReading::Wind { .. }))).await;

        let stats = handle.shutdown().await;
        assert_eq!(stats.frames_decoded, 1);
        assert_eq!(stats.checksum_failures, 0);
    }

    #[tokio::test]
    async fn corrupt_checksum_yields_no_readings_and_next_frame_decodes() {
        let mut bad = wind_frame();
        let last = bad.len() - 1;
        bad[last] ^= 0x01;

        let mut mock = MockTransport::streaming();
        mock.push_read(&bad);
        mock.push_read(&outdoor_frame());
        let connector = MockConnector::new();
        connector.push_transport(mock);
        let log = Arc::new(ReadingLog::new());

        let (_link, handle) = spawn_wmr928(connector, log.clone());
        wait_for(&log, |r| !r.is_empty()).await;

        let readings = log.readings();
        assert!(!readings.iter().any(|r| matches!(r, DecodedReading::Wind { .. })));
        assert!(!readings
            .iter()
            .any(|r| matches!(r, DecodedReading::BatteryLow { slot: SensorSlot::Anemometer, .. })));
        assert_eq!(log.temperature(SensorSlot::Outdoor), Some(23.4));

        let stats = handle.shutdown().await;
        assert_eq!(stats.checksum_failures, 1);
        assert_eq!(stats.frames_decoded, 1);
    }

    #[tokio::test]
    async fn transport_failure_discards_partial_frame_and_reconnects() {
        let wind = wind_frame();
        let mut first = MockTransport::streaming();
        first.push_read(&wind[..6]);
        first.push_read_error(Error::ConnectionLost);

        // The tail of the interrupted frame arrives on the new connection
        // and must not be stitched onto the old prefix.
        let mut second = MockTransport::streaming();
        second.push_read(&wind[6..]);
        second.push_read(&outdoor_frame());

        let connector = MockConnector::new();
        connector.push_transport(first);
        connector.push_transport(second);
        let attempts = connector.attempts_handle();
        let log = Arc::new(ReadingLog::new());

        let (_link, handle) = spawn_wmr928(connector, log.clone());
        wait_for(&log, |r| {
            r.iter()
                .any(|r| matches!(r, DecodedReading::Temperature { .. }))
        })
        .await;

        assert!(!log
            .readings()
            .iter()
            .any(|r| matches!(r, DecodedReading::Wind { .. })));
        assert_eq!(attempts.get(), 2);

        let stats = handle.shutdown().await;
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.sync.resyncs, 1);
    }

    #[tokio::test]
    async fn unknown_type_resyncs_without_losing_next_frame() {
        let mut stream = vec![0xFF, 0xFF, 0x3C, 0x01, 0x02];
        stream.extend(outdoor_frame());
        let mut mock = MockTransport::streaming();
        mock.push_read(&stream);
        let connector = MockConnector::new();
        connector.push_transport(mock);
        let log = Arc::new(ReadingLog::new());

        let (_link, handle) = spawn_wmr928(connector, log.clone());
        wait_for(&log, |r| !r.is_empty()).await;
        assert_eq!(log.temperature(SensorSlot::Outdoor), Some(23.4));

        let stats = handle.shutdown().await;
        assert_eq!(stats.sync.resyncs, 1);
    }

    #[tokio::test]
    async fn wakeup_reports_are_sent() {
        let mock = MockTransport::streaming();
        let sent = mock.sent_log();
        let connector = MockConnector::new();
        connector.push_transport(mock);
        let link = Arc::new(Link::new(Box::new(connector), fast_policy()));
        let log = Arc::new(ReadingLog::new());

        let handle = spawn_reader(
            link,
            Box::new(Wmr100Dispatcher::default()),
            log,
            ReaderConfig {
                read_timeout: Duration::from_millis(5),
                wakeup: Some(Wakeup {
                    init: wmr100::INIT_REPORT.to_vec(),
                    heartbeat: wmr100::HEARTBEAT.to_vec(),
                    interval: Duration::from_millis(20),
                }),
            },
            CancellationToken::new(),
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while sent.len() < 3 {
            assert!(Instant::now() < deadline, "only {} reports sent", sent.len());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        let all = sent.all();
        assert_eq!(all[0], wmr100::INIT_REPORT.to_vec());
        assert_eq!(all[1], wmr100::HEARTBEAT.to_vec());
        assert_eq!(all[2], wmr100::HEARTBEAT.to_vec());
    }

    #[tokio::test]
    async fn shutdown_during_reconnect_wait() {
        // Every attempt fails; the reader must still stop promptly.
        let connector = MockConnector::new();
        let link = Arc::new(Link::new(
            Box::new(connector),
            ReconnectPolicy {
                max_attempts: 3,
                base_delay: Duration::from_secs(30),
            },
        ));
        let handle = spawn_reader(
            link.clone(),
            Box::new(Wmr928Dispatcher::default()),
            Arc::new(ReadingLog::new()),
            fast_config(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let started = Instant::now();
        handle.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!link.is_connected());
    }
}

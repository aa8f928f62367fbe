//! Station link: a transport plus its reconnect state machine.
//!
//! A [`Link`] owns the current [`Transport`] of one station and the
//! [`Connector`] that can open a new one. All methods take `&self`, so a
//! link can be shared between a reader task and on-demand callers.
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected
//!      ^                        | attempt n failed: wait n * base_delay
//!      |                        v
//!      +------ all attempts failed / link failure on send/receive
//!
//! After the first successful connection the retry phase is reported as
//! Reconnecting instead of Connecting.
//! ```
//!
//! At most one connect sequence runs at a time. A caller that finds one in
//! progress gets [`Error::ReconnectInProgress`] immediately instead of
//! queueing behind it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wxlink_core::error::{Error, Result};
use wxlink_core::transport::{Connector, Transport};
use wxlink_core::ConnectionState;

use crate::hid::HidTransport;
use crate::serial::{SerialConfig, SerialTransport};
use crate::tcp::TcpTransport;

/// Bounded retry policy for the connect sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Connection attempts per sequence (at least one is always made).
    pub max_attempts: u32,
    /// Wait after the first failed attempt; grows linearly per attempt.
    pub base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }
}

// ---------------------------------------------------------------------------
// Connectors
// ---------------------------------------------------------------------------

/// Opens a [`SerialTransport`].
#[derive(Debug, Clone)]
pub struct SerialConnector {
    port: String,
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(port: impl Into<String>, config: SerialConfig) -> Self {
        Self {
            port: port.into(),
            config,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let transport = SerialTransport::open_with_config(&self.port, &self.config).await?;
        Ok(Box::new(transport))
    }

    fn endpoint(&self) -> &str {
        &self.port
    }
}

/// Opens a [`HidTransport`] on a hidraw device node.
#[derive(Debug, Clone)]
pub struct HidConnector {
    path: String,
}

impl HidConnector {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connector for HidConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(HidTransport::open(&self.path).await?))
    }

    fn endpoint(&self) -> &str {
        &self.path
    }
}

/// Opens a [`TcpTransport`] to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: crate::tcp::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        let transport = TcpTransport::connect_with_timeout(&self.addr, self.connect_timeout).await?;
        Ok(Box::new(transport))
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

/// Clears the in-progress flag when a connect sequence ends, however it
/// ends (including cancellation of the future).
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One station's transport and reconnect state.
pub struct Link {
    connector: Box<dyn Connector>,
    policy: ReconnectPolicy,
    transport: Mutex<Option<Box<dyn Transport>>>,
    state: watch::Sender<ConnectionState>,
    connecting: AtomicBool,
    was_connected: AtomicBool,
}

impl Link {
    /// Create a disconnected link. Nothing is opened until
    /// [`connect`](Link::connect).
    pub fn new(connector: Box<dyn Connector>, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            policy,
            transport: Mutex::new(None),
            state,
            connecting: AtomicBool::new(false),
            was_connected: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns `true` while a connect sequence is running.
    pub fn is_reconnecting(&self) -> bool {
        self.connecting.load(Ordering::Acquire)
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                debug!(endpoint = %self.endpoint(), from = %current, to = %next, "link state");
                *current = next;
                true
            }
        });
    }

    /// Run the bounded connect sequence.
    ///
    /// Makes up to `max_attempts` attempts, waiting `attempt * base_delay`
    /// between them. The waits end early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`Error::ReconnectInProgress`] if another sequence is running
    /// - [`Error::Cancelled`] if `cancel` fired
    /// - [`Error::ReconnectFailed`] once every attempt has failed; the
    ///   error of the last attempt is logged
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<()> {
        if self.connecting.swap(true, Ordering::AcqRel) {
            debug!(endpoint = %self.endpoint(), "connect already in progress");
            return Err(Error::ReconnectInProgress);
        }
        let _guard = ConnectGuard(&self.connecting);

        if let Some(mut old) = self.transport.lock().await.take() {
            let _ = old.close().await;
        }

        let retrying = self.was_connected.load(Ordering::Acquire);
        self.set_state(if retrying {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                return Err(Error::Cancelled);
            }

            match self.connector.connect().await {
                Ok(transport) => {
                    *self.transport.lock().await = Some(transport);
                    self.was_connected.store(true, Ordering::Release);
                    self.set_state(ConnectionState::Connected);
                    if retrying {
                        warn!(endpoint = %self.endpoint(), attempt, "reconnected");
                    } else {
                        info!(endpoint = %self.endpoint(), attempt, "connected");
                    }
                    return Ok(());
                }
                Err(Error::DeviceNotFound(device)) if attempt == 1 && !retrying => {
                    warn!(endpoint = %self.endpoint(), device = %device, "device not found");
                }
                Err(e) => {
                    warn!(
                        endpoint = %self.endpoint(),
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "connection attempt failed"
                    );
                }
            }

            if attempt < attempts {
                let delay = self.policy.delay(attempt);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.set_state(ConnectionState::Disconnected);
                        return Err(Error::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        warn!(endpoint = %self.endpoint(), attempts, "giving up on connection");
        Err(Error::ReconnectFailed { attempts })
    }

    /// Connect unless already connected.
    pub async fn ensure_connected(&self, cancel: &CancellationToken) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.connect(cancel).await
    }

    /// Close the transport without logging a fault.
    pub async fn disconnect(&self) {
        if let Some(mut transport) = self.transport.lock().await.take() {
            let _ = transport.close().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn drop_transport(&self, slot: &mut Option<Box<dyn Transport>>, cause: &Error) {
        if let Some(mut transport) = slot.take() {
            let _ = transport.close().await;
            warn!(endpoint = %self.endpoint(), error = %cause, "link lost");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Send bytes. A link failure closes the transport.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let mut slot = self.transport.lock().await;
        let transport = slot.as_mut().ok_or(Error::NotConnected)?;
        match transport.send(data).await {
            Err(e) if e.is_link_failure() => {
                self.drop_transport(&mut slot, &e).await;
                Err(e)
            }
            other => other,
        }
    }

    /// Receive bytes. A timeout leaves the link up; a link failure closes
    /// the transport.
    pub async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut slot = self.transport.lock().await;
        let transport = slot.as_mut().ok_or(Error::NotConnected)?;
        match transport.receive(buf, timeout).await {
            Err(e) if e.is_link_failure() => {
                self.drop_transport(&mut slot, &e).await;
                Err(e)
            }
            other => other,
        }
    }

    /// Send `request` and perform exactly one read into `buf`.
    ///
    /// The transport stays locked for the whole exchange, so at most one
    /// command is outstanding per link. A timeout closes the transport as
    /// well: the peer may still answer, and that reply must not be read as
    /// the answer to the next request.
    pub async fn exchange(&self, request: &[u8], buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut slot = self.transport.lock().await;
        let transport = slot.as_mut().ok_or(Error::NotConnected)?;
        let result = match transport.send(request).await {
            Ok(()) => transport.receive(buf, timeout).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.is_link_failure() => {
                self.drop_transport(&mut slot, &e).await;
                Err(e)
            }
            Err(Error::Timeout) => {
                if let Some(mut transport) = slot.take() {
                    let _ = transport.close().await;
                }
                self.set_state(ConnectionState::Disconnected);
                debug!(endpoint = %self.endpoint(), "reply overdue, transport closed");
                Err(Error::Timeout)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wxlink_test_harness::{MockConnector, MockTransport};

    fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn default_policy_is_five_attempts_linear() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn connect_succeeds_on_first_attempt() {
        let connector = MockConnector::new();
        connector.push_transport(MockTransport::new());
        let attempts = connector.attempts_handle();

        let link = Link::new(Box::new(connector), fast_policy(3));
        assert_eq!(link.state(), ConnectionState::Disconnected);

        link.connect(&CancellationToken::new()).await.unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(attempts.get(), 1);
    }

    #[tokio::test]
    async fn connect_retries_until_success() {
        let connector = MockConnector::new();
        connector.push_failure(Error::Transport("refused".into()));
        connector.push_failure(Error::Transport("refused".into()));
        connector.push_transport(MockTransport::new());
        let attempts = connector.attempts_handle();

        let link = Link::new(Box::new(connector), fast_policy(5));
        link.connect(&CancellationToken::new()).await.unwrap();
        assert!(link.is_connected());
        assert_eq!(attempts.get(), 3);
    }

    #[tokio::test]
    async fn connect_gives_up_after_max_attempts() {
        let connector = MockConnector::new();
        let attempts = connector.attempts_handle();
        let link = Link::new(Box::new(connector), fast_policy(3));

        let result = link.connect(&CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::ReconnectFailed { attempts: 3 })));
        assert_eq!(attempts.get(), 3);
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(!link.is_reconnecting());
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let connector = MockConnector::new();
        let link = Link::new(
            Box::new(connector),
            ReconnectPolicy {
                max_attempts: 5,
                base_delay: Duration::from_secs(60),
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = link.connect(&cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn concurrent_connect_reports_in_progress() {
        let connector = MockConnector::new();
        connector.push_failure(Error::Transport("refused".into()));
        connector.push_transport(MockTransport::new());
        let link = Arc::new(Link::new(
            Box::new(connector),
            ReconnectPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(200),
            },
        ));

        let first = {
            let link = link.clone();
            tokio::spawn(async move { link.connect(&CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(link.is_reconnecting());

        let second = link.connect(&CancellationToken::new()).await;
        assert!(matches!(second, Err(Error::ReconnectInProgress)));

        first.await.unwrap().unwrap();
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn link_failure_drops_transport_and_reconnect_reports_reconnecting() {
        let connector = MockConnector::new();
        let mut first = MockTransport::new();
        first.push_read_error(Error::ConnectionLost);
        connector.push_transport(first);
        connector.push_failure(Error::Transport("refused".into()));
        connector.push_transport(MockTransport::new());

        let link = Link::new(Box::new(connector), fast_policy(3));
        let mut states = link.subscribe_state();
        link.connect(&CancellationToken::new()).await.unwrap();

        let mut buf = [0u8; 16];
        let result = link.receive(&mut buf, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(Error::ConnectionLost)));
        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(matches!(
            link.receive(&mut buf, Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));

        states.borrow_and_update();
        let cancel = CancellationToken::new();
        let reconnect = link.connect(&cancel);
        tokio::pin!(reconnect);
        // The first state change after the drop is Reconnecting.
        tokio::select! {
            _ = &mut reconnect => panic!("reconnect finished before reporting state"),
            changed = states.changed() => {
                changed.unwrap();
                assert_eq!(*states.borrow(), ConnectionState::Reconnecting);
            }
        }
        reconnect.await.unwrap();
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn timeout_keeps_link_up() {
        let connector = MockConnector::new();
        connector.push_transport(MockTransport::new());
        let link = Link::new(Box::new(connector), fast_policy(1));
        link.connect(&CancellationToken::new()).await.unwrap();

        let mut buf = [0u8; 16];
        let result = link.receive(&mut buf, Duration::from_millis(5)).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn exchange_sends_then_reads_once() {
        let connector = MockConnector::new();
        let mut mock = MockTransport::new();
        mock.expect(&[0xFF, 0xFF, 0x50, 0x03, 0x53], &[0xFF, 0xFF, 0x50, 0x04, 0x41, 0x95]);
        connector.push_transport(mock);
        let link = Link::new(Box::new(connector), fast_policy(1));
        link.connect(&CancellationToken::new()).await.unwrap();

        let mut buf = [0u8; 64];
        let n = link
            .exchange(&[0xFF, 0xFF, 0x50, 0x03, 0x53], &mut buf, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(&buf[..n], &[0xFF, 0xFF, 0x50, 0x04, 0x41, 0x95]);
    }

    #[tokio::test]
    async fn exchange_timeout_closes_transport() {
        let connector = MockConnector::new();
        let mut quiet = MockTransport::new();
        quiet.expect(&[0xFF, 0xFF, 0x26, 0x03, 0x29], &[]);
        connector.push_transport(quiet);
        let mut fresh = MockTransport::new();
        fresh.expect(&[0xFF, 0xFF, 0x26, 0x03, 0x29], &[0xFF, 0xFF, 0x26, 0x03, 0x29]);
        connector.push_transport(fresh);
        let attempts = connector.attempts_handle();
        let link = Link::new(Box::new(connector), fast_policy(1));
        let cancel = CancellationToken::new();
        link.connect(&cancel).await.unwrap();

        let mut buf = [0u8; 16];
        let result = link
            .exchange(&[0xFF, 0xFF, 0x26, 0x03, 0x29], &mut buf, Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(!link.is_connected());
        assert_eq!(link.state(), ConnectionState::Disconnected);

        link.ensure_connected(&cancel).await.unwrap();
        let n = link
            .exchange(&[0xFF, 0xFF, 0x26, 0x03, 0x29], &mut buf, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(attempts.get(), 2);
    }

    #[tokio::test]
    async fn operations_before_connect_are_not_connected() {
        let link = Link::new(Box::new(MockConnector::new()), fast_policy(1));
        assert!(matches!(link.send(&[0x00]).await, Err(Error::NotConnected)));
    }
}

//! GatewayBuilder -- fluent builder for GW1000 gateways.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wxlink_core::BroadcastSink;
//! use wxlink_ecowitt::GatewayBuilder;
//!
//! # async fn example() -> wxlink_core::Result<()> {
//! let gateway = GatewayBuilder::new().address("192.168.1.50").build()?;
//! if let Some(version) = gateway.client().read_firmware_version().await {
//!     println!("firmware {version}");
//! }
//! let poller = gateway.spawn_poller(Arc::new(BroadcastSink::new(64)));
//! // ...
//! poller.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use wxlink_core::error::{Error, Result};
use wxlink_core::transport::Connector;
use wxlink_core::IngestionSink;
use wxlink_transport::tcp::DEFAULT_CONNECT_TIMEOUT;
use wxlink_transport::{Link, ReconnectPolicy, TcpConnector};

use crate::client::{GatewayClient, DEFAULT_COMMAND_TIMEOUT};
use crate::commands::DEFAULT_PORT;
use crate::poller::{spawn_poller, PollerHandle, DEFAULT_POLL_INTERVAL};

/// Fluent builder for [`Gateway`].
#[derive(Debug, Clone)]
pub struct GatewayBuilder {
    host: Option<String>,
    port: u16,
    command_timeout: Duration,
    connect_timeout: Duration,
    reconnect_policy: ReconnectPolicy,
    poll_interval: Duration,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        GatewayBuilder {
            host: None,
            port: DEFAULT_PORT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_policy: ReconnectPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Gateway host name or IP address.
    pub fn address(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// LAN API port (default: 45000).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Time to wait for each reply (default: 2.5s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// TCP connect timeout per attempt (default: 5s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Live-data poll period (default: 10s).
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build around a caller-provided connector (tests pass a
    /// `MockConnector`).
    pub fn build_with_connector(self, connector: Box<dyn Connector>) -> Gateway {
        let link = Arc::new(Link::new(connector, self.reconnect_policy));
        Gateway {
            client: Arc::new(GatewayClient::new(link, self.command_timeout)),
            poll_interval: self.poll_interval,
        }
    }

    /// Build a gateway reached over TCP.
    ///
    /// Requires [`address()`](Self::address). No connection is made until
    /// the first command.
    pub fn build(self) -> Result<Gateway> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidParameter("address is required for build()".into()))?;
        let connector =
            TcpConnector::new(format!("{host}:{}", self.port)).connect_timeout(self.connect_timeout);
        Ok(self.build_with_connector(Box::new(connector)))
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured GW1000 gateway.
#[derive(Debug)]
pub struct Gateway {
    client: Arc<GatewayClient>,
    poll_interval: Duration,
}

impl Gateway {
    pub fn client(&self) -> &Arc<GatewayClient> {
        &self.client
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start polling live data into `sink`.
    pub fn spawn_poller(&self, sink: Arc<dyn IngestionSink>) -> PollerHandle {
        self.spawn_poller_with_cancel(sink, CancellationToken::new())
    }

    pub fn spawn_poller_with_cancel(
        &self,
        sink: Arc<dyn IngestionSink>,
        cancel: CancellationToken,
    ) -> PollerHandle {
        spawn_poller(self.client.clone(), sink, self.poll_interval, cancel)
    }
}

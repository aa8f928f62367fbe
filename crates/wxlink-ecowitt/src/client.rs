//! Command/response client for the GW1000 LAN API.
//!
//! The gateway answers one request at a time on a TCP connection. Each
//! [`send_command`](GatewayClient::send_command) writes one request and
//! performs exactly one bounded read; the link stays locked for the whole
//! exchange, so at most one command is ever outstanding.
//!
//! Failures never escape as errors. A missing, mismatched or corrupt reply
//! yields `None` with a log line naming the cause. Each of those also
//! closes the connection, since the stream position of the next reply is
//! no longer known; the next call reconnects first.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use wxlink_codec::field::hex_dump;
use wxlink_core::error::Error;
use wxlink_core::IngestionSink;
use wxlink_transport::Link;

use crate::commands::{build_request, parse_response, Command, GatewayResponse};
use crate::livedata::{report_live_data, LiveDataWalk};

/// Default time to wait for a reply.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(2500);

/// Largest reply read in one go. Live data with every sensor family
/// populated stays well below this.
const RESPONSE_BUF_LEN: usize = 2048;

/// Client for one gateway.
pub struct GatewayClient {
    link: Arc<Link>,
    command_timeout: Duration,
    cancel: CancellationToken,
}

impl GatewayClient {
    pub fn new(link: Arc<Link>, command_timeout: Duration) -> Self {
        Self {
            link,
            command_timeout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Abort any reconnect wait and refuse further commands.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.link.disconnect().await;
    }

    /// Send `command` with `payload` and return the validated reply.
    ///
    /// Runs the bounded reconnect sequence first when the link is down.
    /// Returns `None` without waiting if another caller is already
    /// reconnecting.
    pub async fn send_command(&self, command: Command, payload: &[u8]) -> Option<GatewayResponse> {
        let code = command.code();
        let Some(request) = build_request(command, payload) else {
            warn!(command = ?command, bytes = payload.len(), "request payload too long");
            return None;
        };

        match self.link.ensure_connected(&self.cancel).await {
            Ok(()) => {}
            Err(Error::ReconnectInProgress) => {
                debug!(command = ?command, "reconnect in progress, command skipped");
                return None;
            }
            Err(Error::Cancelled) => return None,
            Err(e) => {
                warn!(endpoint = %self.link.endpoint(), error = %e, "gateway unreachable");
                return None;
            }
        }

        trace!(data = %hex_dump(&request), "gateway request");

        let mut buf = vec![0u8; RESPONSE_BUF_LEN];
        let n = match self
            .link
            .exchange(&request, &mut buf, self.command_timeout)
            .await
        {
            Ok(n) => n,
            Err(Error::Timeout) => {
                warn!(
                    command = ?command,
                    timeout_ms = self.command_timeout.as_millis() as u64,
                    "no response from gateway"
                );
                return None;
            }
            Err(e) => {
                warn!(command = ?command, error = %e, "gateway exchange failed");
                return None;
            }
        };

        let reply = &buf[..n];
        match parse_response(code, reply) {
            Ok(response) => {
                debug!(command = ?command, bytes = n, data = %hex_dump(reply), "gateway response");
                Some(response)
            }
            Err(fault) => {
                warn!(command = ?command, %fault, data = %hex_dump(reply), "invalid gateway response");
                self.link.disconnect().await;
                None
            }
        }
    }

    /// Firmware version string, e.g. `GW1000_V1.6.8`.
    pub async fn read_firmware_version(&self) -> Option<String> {
        let response = self.send_command(Command::ReadFirmwareVersion, &[]).await?;
        let payload = &response.payload[..];
        let (&len, text) = payload.split_first()?;
        let text = text.get(..len as usize).unwrap_or(text);
        let version = String::from_utf8_lossy(text).trim().to_string();
        info!(version = %version, "gateway firmware");
        Some(version)
    }

    /// Station MAC address.
    pub async fn read_mac(&self) -> Option<[u8; 6]> {
        let response = self.send_command(Command::ReadStationMac, &[]).await?;
        response.payload.get(..6)?.try_into().ok()
    }

    /// Request live data and report it to `sink`.
    pub async fn read_live_data(&self, sink: &dyn IngestionSink) -> Option<LiveDataWalk> {
        let response = self.send_command(Command::LiveData, &[]).await?;
        let walk = report_live_data(&response.payload, sink, Utc::now());
        if !walk.is_complete() {
            debug!(items = walk.items, "live data partially decoded");
        }
        Some(walk)
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("endpoint", &self.link.endpoint())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

/// Format a MAC address as `AA:BB:CC:DD:EE:FF`.
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

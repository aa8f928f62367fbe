//! GW1000 LAN discovery.
//!
//! A [`DISCOVERY_REQUEST`] broadcast to UDP port 46000 makes every gateway
//! on the segment answer with a `0x12` frame describing itself:
//!
//! ```text
//! FF FF 12  size(2)  mac(6)  ip(4)  port(2)  name_len  name..  checksum
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use wxlink_ecowitt::discovery;
//!
//! # async fn example() -> wxlink_core::Result<()> {
//! for gw in discovery::discover(Duration::from_secs(2)).await? {
//!     println!("{} at {}:{}", gw.name, gw.ip, gw.port);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tracing::{debug, trace};

use wxlink_codec::field::be_u16;
use wxlink_core::error::{Error, Result};

use crate::client::format_mac;
use crate::commands::{parse_response, Command, DISCOVERY_REQUEST};

/// UDP port gateways listen on for discovery requests.
pub const DISCOVERY_PORT: u16 = 46000;

/// A gateway that answered a discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGateway {
    pub mac: [u8; 6],
    pub ip: Ipv4Addr,
    /// TCP port of the LAN API.
    pub port: u16,
    /// Advertised name, e.g. `GW1000A-WIFI1234 V1.6.8`.
    pub name: String,
}

impl DiscoveredGateway {
    /// `ip:port` of the LAN API.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn mac_string(&self) -> String {
        format_mac(&self.mac)
    }
}

/// Broadcast a discovery request and collect replies for `timeout`.
///
/// Gateways are deduplicated by MAC.
pub async fn discover(timeout: Duration) -> Result<Vec<DiscoveredGateway>> {
    let target = SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT));
    discover_at(target, timeout).await
}

/// Send the discovery request to `target` and collect replies.
///
/// Tests point this at a loopback responder instead of the broadcast
/// address.
pub async fn discover_at(target: SocketAddr, timeout: Duration) -> Result<Vec<DiscoveredGateway>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(|e| Error::Transport(format!("failed to bind discovery socket: {e}")))?;
    socket.set_broadcast(true)?;
    socket.send_to(&DISCOVERY_REQUEST, target).await?;
    debug!(target = %target, "discovery request sent");

    let mut gateways: HashMap<[u8; 6], DiscoveredGateway> = HashMap::new();
    let mut buf = [0u8; 512];
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => match parse_announcement(&buf[..n]) {
                Some(gw) => {
                    debug!(mac = %gw.mac_string(), ip = %gw.ip, name = %gw.name, "gateway found");
                    gateways.entry(gw.mac).or_insert(gw);
                }
                None => trace!(from = %from, bytes = n, "ignoring datagram"),
            },
            Ok(Err(e)) => trace!(error = %e, "discovery recv error"),
            Err(_) => break,
        }
    }

    let mut found: Vec<DiscoveredGateway> = gateways.into_values().collect();
    found.sort_by(|a, b| a.ip.cmp(&b.ip));
    debug!(count = found.len(), "discovery complete");
    Ok(found)
}

/// Decode a discovery reply. Our own request echoed back, or any other
/// datagram, yields `None`.
pub fn parse_announcement(datagram: &[u8]) -> Option<DiscoveredGateway> {
    let response = parse_response(Command::Broadcast.code(), datagram).ok()?;
    let p = &response.payload[..];

    let mac: [u8; 6] = p.get(0..6)?.try_into().ok()?;
    let ip: [u8; 4] = p.get(6..10)?.try_into().ok()?;
    let port = be_u16(p, 10)?;
    let name_len = *p.get(12)? as usize;
    let name = p.get(13..13 + name_len)?;

    Some(DiscoveredGateway {
        mac,
        ip: Ipv4Addr::from(ip),
        port,
        name: String::from_utf8_lossy(name).trim().to_string(),
    })
}

//! Ecowitt GW1000 gateway support for wxlink.
//!
//! The GW1000 (and its GW1100/GW2000 successors) answers binary requests
//! on TCP port 45000 instead of streaming. This crate provides:
//!
//! - **Command table** ([`commands`]) -- request framing, response
//!   validation and the per-command size class
//! - **GatewayClient** ([`client`]) -- one-request-one-read exchanges over a
//!   reconnecting link
//! - **Live-data decoder** ([`livedata`]) -- walks the `0x27` item list into
//!   sink readings
//! - **Poller** ([`poller`]) -- periodic live-data task
//! - **Discovery** ([`discovery`]) -- UDP broadcast gateway search
//! - **GatewayBuilder** ([`builder`]) -- configuration
//!
//! # Example
//!
//! ```
//! use wxlink_ecowitt::commands::{build_request, parse_response, Command};
//!
//! let request = build_request(Command::ReadFirmwareVersion, &[]);
//! assert_eq!(request, Some(vec![0xFF, 0xFF, 0x50, 0x03, 0x53]));
//!
//! let reply = [0xFF, 0xFF, 0x50, 0x05, 0x01, 0x41, 0x97];
//! let response = parse_response(0x50, &reply).unwrap();
//! assert_eq!(&response.payload[..], &[0x01, 0x41]);
//! ```

pub mod builder;
pub mod client;
pub mod commands;
pub mod discovery;
pub mod livedata;
pub mod poller;

pub use builder::{Gateway, GatewayBuilder};
pub use client::GatewayClient;
pub use commands::{Command, GatewayResponse};
pub use discovery::{discover, DiscoveredGateway};
pub use livedata::LiveDataWalk;
pub use poller::{PollerHandle, PollerStats};

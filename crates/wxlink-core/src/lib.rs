//! wxlink-core: Core traits, types, and error definitions for wxlink.
//!
//! This crate defines the station-agnostic abstractions shared by every
//! wxlink crate. Downstream consumers (dashboards, uploaders, loggers)
//! depend on these types without pulling in any specific station driver.
//!
//! # Key types
//!
//! - [`Transport`] / [`Connector`] -- byte-level channel and its factory
//! - [`IngestionSink`] -- receiver of decoded readings
//! - [`DecodedReading`] / [`SensorSlot`] -- decoded values and their slots
//! - [`ConnectionState`] -- link lifecycle
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod reading;
pub mod sink;
pub mod state;
pub mod transport;

pub use error::{Error, Result};
pub use reading::{DecodedReading, SensorSlot};
pub use sink::{BroadcastSink, IngestionSink};
pub use state::ConnectionState;
pub use transport::{Connector, Transport};

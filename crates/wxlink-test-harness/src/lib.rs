//! wxlink-test-harness: mocks and recorders for testing wxlink drivers
//! without station hardware.
//!
//! - [`MockTransport`] / [`MockConnector`] -- scripted transports and the
//!   connector that hands them to a link
//! - [`MockTcpServer`] -- scripted localhost gateway
//! - [`ReadingLog`] -- an ingestion sink that records every reading

pub mod mock_tcp;
pub mod mock_transport;
pub mod reading_log;

pub use mock_tcp::{MockTcpServer, Reply};
pub use mock_transport::{AttemptCounter, MockConnector, MockTransport, SentLog};
pub use reading_log::ReadingLog;

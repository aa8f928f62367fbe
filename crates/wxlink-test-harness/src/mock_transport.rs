//! Mock transport and connector for deterministic driver tests.
//!
//! [`MockTransport`] supports two styles, which can be mixed:
//!
//! - request/response: [`expect`](MockTransport::expect) a request and the
//!   bytes the next `receive()` returns, for query-style gateways
//! - streamed reads: [`push_read`](MockTransport::push_read) chunks that
//!   `receive()` hands out in order, for free-running consoles
//!
//! # Example
//!
//! ```
//! use wxlink_test_harness::MockTransport;
//!
//! let mut mock = MockTransport::new();
//! mock.expect(&[0xFF, 0xFF, 0x50, 0x03, 0x53], &[0xFF, 0xFF, 0x50, 0x04, 0x41, 0x95]);
//!
//! let mut stream = MockTransport::streaming();
//! stream.push_read(&[0xFF, 0xFF, 0x0E, 0x25, 0x31]);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use wxlink_core::error::{Error, Result};
use wxlink_core::transport::{Connector, Transport};

/// Longest a mock `receive()` with nothing scripted waits before timing out.
const IDLE_WAIT: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
struct Expectation {
    request: Vec<u8>,
    response: Vec<u8>,
}

/// Shared record of every `send()` made through a mock, readable after
/// the mock has been moved into a link.
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl SentLog {
    /// Snapshot of all sends so far.
    pub fn all(&self) -> Vec<Vec<u8>> {
        self.0.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|log| log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, data: &[u8]) {
        if let Ok(mut log) = self.0.lock() {
            log.push(data.to_vec());
        }
    }
}

/// A scripted [`Transport`].
#[derive(Debug)]
pub struct MockTransport {
    expectations: VecDeque<Expectation>,
    reads: VecDeque<Result<Vec<u8>>>,
    pending_response: Option<Vec<u8>>,
    response_cursor: usize,
    /// Whether sends without a matching expectation are accepted.
    lenient: bool,
    connected: bool,
    sent: SentLog,
}

impl MockTransport {
    /// A strict mock: every `send()` must match the next expectation.
    pub fn new() -> Self {
        Self {
            expectations: VecDeque::new(),
            reads: VecDeque::new(),
            pending_response: None,
            response_cursor: 0,
            lenient: false,
            connected: true,
            sent: SentLog::default(),
        }
    }

    /// A lenient mock for streaming consoles: sends with no expectation
    /// queued are recorded and accepted.
    pub fn streaming() -> Self {
        Self {
            lenient: true,
            ..Self::new()
        }
    }

    /// When `send()` is called with `request`, the next `receive()` returns
    /// `response`.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) {
        self.expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue a chunk for a later `receive()`.
    pub fn push_read(&mut self, chunk: &[u8]) {
        self.reads.push_back(Ok(chunk.to_vec()));
    }

    /// Queue an error for a later `receive()`.
    pub fn push_read_error(&mut self, error: Error) {
        self.reads.push_back(Err(error));
    }

    /// Handle to the send log.
    pub fn sent_log(&self) -> SentLog {
        self.sent.clone()
    }

    /// All data sent so far.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.sent.all()
    }

    pub fn remaining_expectations(&self) -> usize {
        self.expectations.len()
    }

    pub fn remaining_reads(&self) -> usize {
        self.reads.len()
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.sent.push(data);

        match self.expectations.pop_front() {
            Some(expectation) if data == expectation.request.as_slice() => {
                self.pending_response = Some(expectation.response);
                self.response_cursor = 0;
                Ok(())
            }
            Some(expectation) => Err(Error::Protocol(format!(
                "unexpected send data: expected {:02X?}, got {:02X?}",
                expectation.request, data
            ))),
            None if self.lenient => Ok(()),
            None => Err(Error::Protocol("no more expectations in mock transport".into())),
        }
    }

    async fn receive(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        if let Some(response) = self.pending_response.take() {
            let remaining = &response[self.response_cursor..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.response_cursor += n;
            if self.response_cursor < response.len() {
                self.pending_response = Some(response);
            } else {
                self.response_cursor = 0;
            }
            if n > 0 {
                return Ok(n);
            }
        }

        match self.reads.pop_front() {
            Some(Ok(chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    self.reads.push_front(Ok(chunk[n..].to_vec()));
                }
                Ok(n)
            }
            Some(Err(e)) => Err(e),
            None => {
                // Yield like a quiet device would, so reader loops under
                // test do not spin.
                tokio::time::sleep(timeout.min(IDLE_WAIT)).await;
                Err(Error::Timeout)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.connected = false;
        self.pending_response = None;
        self.response_cursor = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Shared count of connection attempts made through a [`MockConnector`].
#[derive(Debug, Clone, Default)]
pub struct AttemptCounter(Arc<AtomicU32>);

impl AttemptCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A [`Connector`] that hands out scripted transports and failures in
/// order. Once the script is exhausted every attempt fails.
#[derive(Debug)]
pub struct MockConnector {
    script: Mutex<VecDeque<Result<MockTransport>>>,
    attempts: AttemptCounter,
    endpoint: String,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            attempts: AttemptCounter::default(),
            endpoint: "mock".to_string(),
        }
    }

    /// Queue a transport for the next successful attempt.
    pub fn push_transport(&self, transport: MockTransport) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(transport));
        }
    }

    /// Queue a failed attempt.
    pub fn push_failure(&self, error: Error) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// Handle to the attempt counter.
    pub fn attempts_handle(&self) -> AttemptCounter {
        self.attempts.clone()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>> {
        self.attempts.0.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(transport)) => Ok(Box::new(transport)),
            Some(Err(e)) => Err(e),
            None => Err(Error::Transport("mock connector script exhausted".into())),
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

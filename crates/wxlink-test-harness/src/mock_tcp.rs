//! Mock TCP gateway for network-level tests.
//!
//! [`MockTcpServer`] listens on an ephemeral localhost port, accepts one
//! connection and plays a script of [`Reply`]s, so gateway clients can be
//! tested through a real `TcpTransport`, including silent and dropped
//! connections.
//!
//! # Example
//!
//! ```
//! use wxlink_test_harness::{MockTcpServer, Reply};
//!
//! # async fn example() -> wxlink_core::Result<()> {
//! let mut server = MockTcpServer::bind().await?;
//! server.expect(&[0xFF, 0xFF, 0x50, 0x03, 0x53], Reply::Bytes(vec![0xFF, 0xFF, 0x50, 0x04, 0x41, 0x95]));
//! let addr = server.addr().to_string();
//! server.start();
//! // ... connect a TcpTransport to `addr` ...
//! server.wait().await.unwrap();
//! # Ok(())
//! # }
//! ```

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wxlink_core::error::{Error, Result};

/// What the server does after reading an expected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Write these bytes back.
    Bytes(Vec<u8>),
    /// Write nothing; the client should time out.
    Silence,
    /// Drop the connection.
    Close,
}

#[derive(Debug, Clone)]
struct Step {
    request: Vec<u8>,
    reply: Reply,
}

/// A scripted single-connection TCP server.
pub struct MockTcpServer {
    listener: Option<TcpListener>,
    addr: String,
    steps: Vec<Step>,
    handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Bind to an ephemeral localhost port.
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCP server: {e}")))?;
        let addr = listener.local_addr()?.to_string();
        Ok(Self {
            listener: Some(listener),
            addr,
            steps: Vec::new(),
            handle: None,
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Expect `request` next and answer with `reply`.
    pub fn expect(&mut self, request: &[u8], reply: Reply) {
        self.steps.push(Step {
            request: request.to_vec(),
            reply,
        });
    }

    /// Accept one connection and play the script in a background task.
    ///
    /// The listener is already bound, so clients may connect as soon as
    /// this returns.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let steps = std::mem::take(&mut self.steps);
        self.handle = Some(tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("accept failed: {e}"))?;
            play(&mut stream, &steps).await
        }));
    }

    /// Wait for the script to finish and report the first deviation.
    pub async fn wait(self) -> std::result::Result<(), String> {
        match self.handle {
            Some(handle) => handle.await.map_err(|e| format!("server task failed: {e}"))?,
            None => Ok(()),
        }
    }
}

async fn play(stream: &mut TcpStream, steps: &[Step]) -> std::result::Result<(), String> {
    for (i, step) in steps.iter().enumerate() {
        let mut buf = vec![0u8; step.request.len()];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| format!("step {i}: read failed: {e}"))?;
        if buf != step.request {
            return Err(format!(
                "step {i}: request mismatch: expected {:02X?}, got {buf:02X?}",
                step.request
            ));
        }
        match &step.reply {
            Reply::Bytes(bytes) => {
                stream
                    .write_all(bytes)
                    .await
                    .map_err(|e| format!("step {i}: write failed: {e}"))?;
                stream
                    .flush()
                    .await
                    .map_err(|e| format!("step {i}: flush failed: {e}"))?;
            }
            Reply::Silence => {}
            Reply::Close => return Ok(()),
        }
    }
    Ok(())
}

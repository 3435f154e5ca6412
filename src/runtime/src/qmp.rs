//! Control-plane client for the hypervisor management socket (QMP).
//!
//! Protocol, over a UNIX socket, one JSON object per line:
//!
//! ```text
//! server: {"QMP": {"version": ..., "capabilities": [...]}}
//! client: {"execute": "qmp_capabilities"}
//! server: {"return": {}}
//! client: {"execute": "system_reset"}
//! server: {"return": {}}
//! ```
//!
//! The server may interleave asynchronous `{"event": ...}` messages; they
//! are skipped while waiting for a reply. Connections are not reused: each
//! caller connects, negotiates, sends one command and drops the client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use qsession_core::error::{Result, SessionError};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

/// Bound on every connect / read exchange.
pub const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

/// A command object sent to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QmpCommand {
    pub execute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

impl QmpCommand {
    pub fn new(execute: impl Into<String>) -> Self {
        Self {
            execute: execute.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Capability negotiation, sent once after the greeting.
    pub fn capabilities() -> Self {
        Self::new("qmp_capabilities")
    }

    /// Hard guest reset.
    pub fn system_reset() -> Self {
        Self::new("system_reset")
    }
}

/// One connection to the management socket.
pub struct ControlPlaneClient {
    socket_path: PathBuf,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    negotiated: bool,
}

impl ControlPlaneClient {
    /// Connect to the management socket. Does not negotiate.
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let stream = tokio::time::timeout(EXCHANGE_TIMEOUT, UnixStream::connect(socket_path))
            .await
            .map_err(|_| unavailable(socket_path, "connect timed out"))?
            .map_err(|e| unavailable(socket_path, &format!("connect failed: {}", e)))?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            reader: BufReader::new(read_half),
            writer: write_half,
            negotiated: false,
        })
    }

    /// Read the greeting and negotiate capabilities.
    pub async fn handshake(&mut self) -> Result<()> {
        let greeting = self.read_message().await?;
        if greeting.get("QMP").is_none() {
            return Err(self.error(&format!("unexpected greeting: {}", greeting)));
        }
        tracing::trace!(greeting = %greeting, "Control plane greeting");

        self.exchange(&QmpCommand::capabilities()).await?;
        self.negotiated = true;
        Ok(())
    }

    /// Send one command and return its `return` payload.
    pub async fn send_command(&mut self, command: &QmpCommand) -> Result<Value> {
        if !self.negotiated {
            return Err(self.error("handshake not completed"));
        }
        self.exchange(command).await
    }

    async fn exchange(&mut self, command: &QmpCommand) -> Result<Value> {
        let mut line = serde_json::to_string(command)?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.error(&format!("write failed: {}", e)))?;

        loop {
            let message = self.read_message().await?;
            if let Some(ret) = message.get("return") {
                return Ok(ret.clone());
            }
            if let Some(err) = message.get("error") {
                let desc = err
                    .get("desc")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error");
                return Err(self.error(&format!("'{}' failed: {}", command.execute, desc)));
            }
            if let Some(event) = message.get("event") {
                tracing::debug!(event = %event, "Skipping control plane event");
                continue;
            }
            tracing::debug!(message = %message, "Ignoring unexpected control plane message");
        }
    }

    async fn read_message(&mut self) -> Result<Value> {
        let mut line = String::new();
        let n = tokio::time::timeout(EXCHANGE_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .map_err(|_| self.error("timed out waiting for reply"))?
            .map_err(|e| self.error(&format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(self.error("connection closed"));
        }
        serde_json::from_str(line.trim())
            .map_err(|e| self.error(&format!("malformed reply: {}", e)))
    }

    fn error(&self, message: &str) -> SessionError {
        unavailable(&self.socket_path, message)
    }
}

fn unavailable(socket_path: &Path, message: &str) -> SessionError {
    SessionError::ControlPlaneUnavailable(format!("{}: {}", socket_path.display(), message))
}

/// Connect, negotiate, run a single command and close.
pub async fn execute_once(socket_path: &Path, command: &QmpCommand) -> Result<Value> {
    let mut client = ControlPlaneClient::connect(socket_path).await?;
    client.handshake().await?;
    client.send_command(command).await
}

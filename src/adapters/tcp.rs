//! TCP transport for LAN-attached instruments.

use super::Transport;
use crate::error::{SmuError, SmuResult};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Line transport over a plain TCP socket.
///
/// Commands go out newline-terminated; replies are read up to the next
/// newline, bounded by the configured read timeout.
pub struct TcpTransport {
    addr: String,
    timeout: Duration,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpTransport {
    /// Create a transport for `host:port`. Not yet connected.
    pub fn new(addr: impl Into<String>) -> Self {
        TcpTransport {
            addr: addr.into(),
            timeout: DEFAULT_TIMEOUT,
            reader: None,
            writer: None,
        }
    }

    /// Set the read timeout used for connects and queries.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> SmuResult<()> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| SmuError::Timeout {
                command: format!("connect {}", self.addr),
                timeout: self.timeout,
            })??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        self.reader = Some(BufReader::new(read_half));
        self.writer = Some(write_half);

        debug!("TCP transport connected to {}", self.addr);
        Ok(())
    }

    async fn disconnect(&mut self) -> SmuResult<()> {
        if self.writer.is_some() {
            self.reader = None;
            self.writer = None;
            debug!("TCP transport to {} closed", self.addr);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    async fn write_line(&mut self, line: &str) -> SmuResult<()> {
        let writer = self.writer.as_mut().ok_or(SmuError::NotConnected)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        Ok(())
    }

    async fn query_line(&mut self, line: &str) -> SmuResult<String> {
        self.write_line(line).await?;

        let reader = self.reader.as_mut().ok_or(SmuError::NotConnected)?;
        let mut reply = String::new();
        let n = tokio::time::timeout(self.timeout, reader.read_line(&mut reply))
            .await
            .map_err(|_| SmuError::Timeout {
                command: line.to_string(),
                timeout: self.timeout,
            })??;
        if n == 0 {
            return Err(SmuError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by instrument",
            )));
        }
        Ok(reply.trim_end_matches(['\r', '\n']).to_string())
    }

    fn info(&self) -> String {
        format!("TcpTransport({})", self.addr)
    }
}

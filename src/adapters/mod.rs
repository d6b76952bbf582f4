//! Transport adapters for the line-oriented remote protocol.
//!
//! The instrument speaks newline-terminated ASCII over a point-to-point
//! connection. The [`Transport`] trait captures exactly what the driver
//! needs: a connect/disconnect lifecycle, a fire-and-forget line write,
//! and a strictly request/response query with a read timeout. Everything
//! above this trait is transport-agnostic.
//!
//! Three implementations are provided:
//! - [`TcpTransport`] for LAN-attached instruments,
//! - [`serial::SerialTransport`] for RS-232 front panels (behind the
//!   `instrument_serial` feature),
//! - [`MockTransport`] for tests, with an echo store, scripted replies,
//!   and full call logging.

mod mock;
#[cfg(feature = "instrument_serial")]
pub mod serial;
mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpTransport;

use crate::error::SmuResult;
use async_trait::async_trait;

/// A synchronous-in-spirit, request/response line transport.
///
/// Implementations own their connection state; operations on a closed
/// transport fail with [`SmuError::NotConnected`](crate::SmuError::NotConnected).
/// Read timeouts are the transport's responsibility and surface as
/// [`SmuError::Timeout`](crate::SmuError::Timeout); the layers above never
/// retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection.
    async fn connect(&mut self) -> SmuResult<()>;

    /// Close the connection. Closing an already-closed transport is a
    /// no-op.
    async fn disconnect(&mut self) -> SmuResult<()>;

    /// True while the connection is live.
    fn is_connected(&self) -> bool;

    /// Send one command line. No response is expected or read.
    async fn write_line(&mut self, line: &str) -> SmuResult<()>;

    /// Send one command line and read one reply line, trimmed of its
    /// terminator.
    async fn query_line(&mut self, line: &str) -> SmuResult<String>;

    /// Human-readable description of the endpoint, for logs.
    fn info(&self) -> String;
}

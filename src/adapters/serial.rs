//! Serial transport for RS-232 / USB-serial instrument front panels.
//!
//! Wraps the `serialport` crate and provides async I/O by running the
//! blocking serial operations on Tokio's blocking executor.

use super::Transport;
use crate::error::{SmuError, SmuResult};
use async_trait::async_trait;
use log::debug;
use serialport::SerialPort;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Line transport over a serial port.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3").
    port_name: String,

    /// Baud rate (e.g., 9600, 115200).
    baud_rate: u32,

    /// Overall read timeout per query.
    timeout: Duration,

    /// Terminator appended to outgoing commands.
    line_terminator: String,

    /// Character that ends an incoming reply.
    response_delimiter: char,

    /// The open port, shared with blocking I/O tasks.
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialTransport {
    /// Create a transport for the given port. Not yet connected.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        SerialTransport {
            port_name: port_name.into(),
            baud_rate,
            timeout: DEFAULT_TIMEOUT,
            line_terminator: "\n".to_string(),
            response_delimiter: '\n',
            port: None,
        }
    }

    /// Set the overall read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the terminator appended to outgoing commands.
    pub fn with_line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }

    /// Set the character that ends an incoming reply.
    pub fn with_response_delimiter(mut self, delimiter: char) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    fn shared_port(&self) -> SmuResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.as_ref().cloned().ok_or(SmuError::NotConnected)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> SmuResult<()> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            // Short internal timeout; the overall deadline is enforced in
            // the read loop.
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| SmuError::Instrument(format!(
                "failed to open serial port '{}' at {} baud: {}",
                self.port_name, self.baud_rate, e
            )))?;

        self.port = Some(Arc::new(Mutex::new(port)));
        debug!(
            "serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(())
    }

    async fn disconnect(&mut self) -> SmuResult<()> {
        if self.port.take().is_some() {
            debug!("serial port '{}' closed", self.port_name);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn write_line(&mut self, line: &str) -> SmuResult<()> {
        let port = self.shared_port()?;
        let command = format!("{}{}", line, self.line_terminator);

        tokio::task::spawn_blocking(move || {
            use std::io::Write;

            let mut guard = port.blocking_lock();
            guard.write_all(command.as_bytes())?;
            guard.flush()?;
            Ok(())
        })
        .await
        .map_err(|e| SmuError::Instrument(format!("serial I/O task panicked: {}", e)))?
    }

    async fn query_line(&mut self, line: &str) -> SmuResult<String> {
        let port = self.shared_port()?;
        let command = format!("{}{}", line, self.line_terminator);
        let sent = line.to_string();
        let delimiter = self.response_delimiter;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            use std::io::{Read, Write};

            let mut guard = port.blocking_lock();
            guard.write_all(command.as_bytes())?;
            guard.flush()?;

            // Read byte-wise until the delimiter or the overall deadline.
            let mut reply = String::new();
            let mut buffer = [0u8; 1];
            let start = Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(SmuError::Timeout {
                        command: sent,
                        timeout,
                    });
                }

                match guard.read(&mut buffer) {
                    Ok(1) => {
                        let ch = buffer[0] as char;
                        if ch == delimiter {
                            break;
                        }
                        reply.push(ch);
                    }
                    Ok(_) => {
                        return Err(SmuError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "unexpected EOF from serial port",
                        )));
                    }
                    // The port's own timeout is shorter than the overall
                    // deadline; keep reading.
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                    Err(e) => return Err(SmuError::Io(e)),
                }
            }

            Ok(reply.trim().to_string())
        })
        .await
        .map_err(|e| SmuError::Instrument(format!("serial I/O task panicked: {}", e)))?
    }

    fn info(&self) -> String {
        format!("SerialTransport({} @ {} baud)", self.port_name, self.baud_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_applies_settings() {
        let t = SerialTransport::new("/dev/ttyUSB0", 115200)
            .with_timeout(Duration::from_millis(500))
            .with_line_terminator("\r\n")
            .with_response_delimiter('\r');

        assert_eq!(t.timeout, Duration::from_millis(500));
        assert_eq!(t.line_terminator, "\r\n");
        assert_eq!(t.response_delimiter, '\r');
        assert!(!t.is_connected());
    }

    #[tokio::test]
    async fn write_without_connection_fails() {
        let mut t = SerialTransport::new("/dev/ttyUSB0", 9600);
        assert!(matches!(
            t.write_line("*trg").await,
            Err(SmuError::NotConnected)
        ));
    }

    #[test]
    fn info_names_the_port() {
        let t = SerialTransport::new("COM3", 9600);
        assert!(t.info().contains("COM3"));
        assert!(t.info().contains("9600"));
    }
}

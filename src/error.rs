//! Custom error types for the library.
//!
//! This module defines the primary error type, `SmuError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures that can occur
//! when talking to an instrument, from transport I/O problems to namespace
//! resolution errors.
//!
//! ## Error Hierarchy
//!
//! - **`NotConnected`**: a write or query was attempted with no live
//!   transport. Fatal to the attempted operation, never retried here.
//! - **`UnresolvedMember`**: a namespace path did not classify as a
//!   function, property, constant, or command group. Raised before any
//!   remote traffic occurs.
//! - **`ReadOnly`**: a write was attempted against a constant name. Also
//!   raised before any remote traffic.
//! - **`Timeout`** / **`Io`**: propagated from the transport unchanged.
//!   Retry policy belongs to the caller, not to this crate.
//! - **`UnexpectedResponse`**: the instrument replied with something that
//!   cannot be interpreted where a number is required (buffer lengths,
//!   status registers, the line frequency).
//!
//! Cancellation is deliberately *not* an error: a cancelled sweep returns
//! empty or partial data instead.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SmuResult<T> = std::result::Result<T, SmuError>;

/// Errors raised by the instrument driver.
#[derive(Error, Debug)]
pub enum SmuError {
    /// A write or query was attempted with no live transport.
    #[error("no instrument connected")]
    NotConnected,

    /// A namespace path failed to classify in all four name tables.
    #[error("'{path}' does not resolve to any known remote member")]
    UnresolvedMember {
        /// The full dotted path that failed to resolve.
        path: String,
    },

    /// A write was attempted against a read-only constant.
    #[error("'{path}' is read-only")]
    ReadOnly {
        /// The constant's full path.
        path: String,
    },

    /// A write was attempted against a function or command-group name.
    #[error("'{path}' is not a writable property")]
    NotWritable {
        /// The member's full path.
        path: String,
    },

    /// A call was attempted on a name that is not a remote function.
    #[error("'{path}' is not a remote function")]
    NotCallable {
        /// The member's full path.
        path: String,
    },

    /// Element access was attempted on a plain scalar property.
    #[error("'{path}' is not an element-addressable property")]
    NotIndexable {
        /// The member's full path.
        path: String,
    },

    /// A scalar read was attempted on a function or command-group name.
    #[error("'{path}' has no scalar value to read")]
    NotReadable {
        /// The member's full path.
        path: String,
    },

    /// Descent was attempted through a name that is not a command group.
    #[error("'{path}' is not a command group")]
    NotAGroup {
        /// The member's full path.
        path: String,
    },

    /// The transport gave up waiting for a reply.
    #[error("no reply to '{command}' within {timeout:?}")]
    Timeout {
        /// The command that went unanswered.
        command: String,
        /// The configured read timeout.
        timeout: Duration,
    },

    /// The bounded completion poll ran out of time.
    #[error("sweep did not complete within {max_wait:?}")]
    SweepTimeout {
        /// The configured maximum wait.
        max_wait: Duration,
    },

    /// The instrument replied with something unusable.
    #[error("unexpected reply to '{expr}': '{got}'")]
    UnexpectedResponse {
        /// The queried expression.
        expr: String,
        /// The raw reply.
        got: String,
    },

    /// A name appears in more than one classification set.
    #[error("classification tables overlap on '{name}'")]
    TableOverlap {
        /// The offending name.
        name: String,
    },

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Classification table extension file could not be parsed.
    #[error("table file error: {0}")]
    TableFile(#[from] toml::de::Error),

    /// Serial support was requested but compiled out.
    #[error("serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// Catch-all for instrument-side faults.
    #[error("instrument error: {0}")]
    Instrument(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_member_names_the_path() {
        let err = SmuError::UnresolvedMember {
            path: "smua.bogus".to_string(),
        };
        assert!(err.to_string().contains("smua.bogus"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: SmuError = io.into();
        assert!(matches!(err, SmuError::Io(_)));
    }

    #[test]
    fn timeout_message_includes_command() {
        let err = SmuError::Timeout {
            command: "print(smua.measure.v())".into(),
            timeout: Duration::from_secs(2),
        };
        assert!(err.to_string().contains("print(smua.measure.v())"));
    }
}

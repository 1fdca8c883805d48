//! Error types for link processing.
//!
//! All errors implement the `std::error::Error` trait and include structured context
//! for debugging and recovery guidance.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: socket failures, handshake rejections, and timeouts
//! - **Framing Errors**: a byte region that cannot be read as a frame
//! - **Validation Errors**: declared lengths or builder inputs outside protocol limits
//! - **Persistence Errors**: log book read and write failures
//! - **Config Errors**: unreadable or inconsistent configuration
//!
//! Framing problems found while scanning a live stream are not errors; the codec
//! reports them as [`DecodeWarning`](crate::wire::DecodeWarning)s and keeps going.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use sensorlink::LinkError;
//!
//! let error = LinkError::connection_failed("modem refused connection");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for link operations.
pub type Result<T, E = LinkError> = std::result::Result<T, E>;

/// Main error type for link operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("Transport failure: {reason}")]
    Connection {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Handshake rejected: {reason}")]
    Handshake { reason: String },

    #[error("{operation} timed out after {duration:?}")]
    Timeout { operation: String, duration: Duration },

    #[error("Framing error in {context}: {details}")]
    Framing { context: String, details: String },

    #[error("Invalid {field}: {details}")]
    Validation { field: String, details: String },

    #[error("Log book I/O failed: {path}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Channel '{channel}' closed")]
    ChannelClosed { channel: String },
}

impl LinkError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkError::Connection { .. } => true,
            LinkError::Handshake { .. } => true,
            LinkError::Timeout { .. } => true,
            LinkError::Persistence { .. } => true,
            LinkError::Framing { .. } => false,
            LinkError::Validation { .. } => false,
            LinkError::Config { .. } => false,
            LinkError::ChannelClosed { .. } => false,
        }
    }

    /// Returns true for errors raised by the socket or the handshake.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            LinkError::Connection { .. } | LinkError::Handshake { .. } | LinkError::Timeout { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LinkError::Connection { .. } => vec![
                "Check the modem address and port",
                "Verify the modem is powered and reachable",
                "Wait for the driver to reconnect",
            ],
            LinkError::Handshake { .. } => vec![
                "Verify the modem firmware accepts capability requests",
                "Check that no other client holds the modem session",
            ],
            LinkError::Timeout { .. } => vec![
                "Increase the configured timeout",
                "Check network latency to the modem",
            ],
            LinkError::Framing { .. } => vec![
                "Check that both ends use the same header layout",
                "Capture the raw stream for inspection",
            ],
            LinkError::Validation { .. } => vec![
                "Reduce the payload size below the frame limit",
                "Check the input values against protocol ranges",
            ],
            LinkError::Persistence { .. } => vec![
                "Check the log directory exists and is writable",
                "Ensure sufficient disk space",
            ],
            LinkError::Config { .. } => vec![
                "Check the configuration file syntax",
                "Compare the values against the documented defaults",
            ],
            LinkError::ChannelClosed { .. } => vec![
                "Restart the connection",
                "Check whether the owning task has exited",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        LinkError::Connection { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn connection_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        LinkError::Connection { reason: reason.into(), source: Some(source) }
    }

    pub fn handshake_rejected(reason: impl Into<String>) -> Self {
        LinkError::Handshake { reason: reason.into() }
    }

    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        LinkError::Timeout { operation: operation.into(), duration }
    }

    /// Helper constructor for framing errors.
    pub fn framing(context: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Framing { context: context.into(), details: details.into() }
    }

    /// Helper constructor for validation errors.
    pub fn validation(field: impl Into<String>, details: impl Into<String>) -> Self {
        LinkError::Validation { field: field.into(), details: details.into() }
    }

    /// Helper constructor for log book errors with path context.
    pub fn persistence(
        path: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        LinkError::Persistence { path: path.into(), source: source.into() }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        LinkError::Config { reason: reason.into() }
    }

    pub fn channel_closed(channel: impl Into<String>) -> Self {
        LinkError::ChannelClosed { channel: channel.into() }
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Connection { reason: err.kind().to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            field in "\\w+",
            details in ".*",
            duration_ms in 1u64..60000u64
          ) {
            let connection_error = LinkError::connection_failed(reason.clone());
            let validation_error = LinkError::validation(field.clone(), details.clone());
            let timeout_error = LinkError::timeout("handshake", Duration::from_millis(duration_ms));

            prop_assert!(connection_error.to_string().contains(&reason));
            let validation_msg = validation_error.to_string();
            prop_assert!(validation_msg.contains(&field));
            prop_assert!(validation_msg.contains(&details));
            prop_assert!(timeout_error.to_string().starts_with("handshake"));
          }

          #[test]
          fn io_errors_convert_to_retryable_transport_errors(reason in ".*") {
            let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, reason.clone());
            let converted: LinkError = io_err.into();
            prop_assert!(converted.is_transport());
            prop_assert!(converted.is_retryable());
            let source = std::error::Error::source(&converted).map(|s| s.to_string());
            prop_assert_eq!(source, Some(reason));
          }

          #[test]
          fn source_chain_preserves_base_message(
            base_message in ".*",
            layers in prop::collection::vec(".*", 1..4)
          ) {
            let mut current: Box<dyn std::error::Error + Send + Sync> =
              Box::new(std::io::Error::other(base_message.clone()));
            for (i, reason) in layers.iter().enumerate() {
              current = Box::new(LinkError::connection_failed_with_source(
                format!("layer {}: {}", i, reason),
                current,
              ));
            }

            let mut depth = 0;
            let mut found = false;
            let mut cursor: Option<&(dyn std::error::Error + 'static)> = Some(current.as_ref());
            while let Some(err) = cursor {
              if err.to_string().contains(&base_message) {
                found = true;
              }
              depth += 1;
              cursor = err.source();
            }

            prop_assert_eq!(depth, layers.len() + 1);
            prop_assert!(found);
          }
        }
    }

    #[test]
    fn retry_classification() {
        assert!(LinkError::connection_failed("reset").is_retryable());
        assert!(LinkError::handshake_rejected("bad ack").is_retryable());
        assert!(LinkError::persistence("/tmp/x.csv", std::io::Error::other("disk full")).is_retryable());
        assert!(!LinkError::validation("payload", "too long").is_retryable());
        assert!(!LinkError::config("zero interval").is_retryable());

        assert!(LinkError::timeout("connect", Duration::from_secs(1)).is_transport());
        assert!(!LinkError::framing("codec", "bad magic").is_transport());
    }

    #[test]
    fn recovery_suggestions_are_descriptive() {
        let errors = [
            LinkError::connection_failed("x"),
            LinkError::handshake_rejected("x"),
            LinkError::framing("x", "y"),
            LinkError::channel_closed("outbound"),
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<LinkError>();
    }
}

//! Error types for socketbus.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use socketbus::{Result, connect};
//!
//! fn example() -> Result<()> {
//!     let conn = connect("ws://127.0.0.1:9000")?;
//!     conn.emit("chat.message", &serde_json::json!({"text": "hi"}))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Address | [`Error::InvalidAddress`] |
//! | Framing | [`Error::InvalidTopic`], [`Error::MalformedFrame`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | External | [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Address Errors
    // ========================================================================
    /// Connection address is not a valid WebSocket URL.
    ///
    /// Returned by `connect` before any I/O happens.
    #[error("Invalid address {address:?}: {message}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Description of what is wrong with it.
        message: String,
    },

    // ========================================================================
    // Framing Errors
    // ========================================================================
    /// Topic contains a space.
    ///
    /// The wire format parses the topic as everything up to the first
    /// space, so a topic containing one would corrupt the frame.
    #[error("Invalid topic {topic:?}: topics must not contain spaces")]
    InvalidTopic {
        /// The rejected topic.
        topic: String,
    },

    /// Inbound frame does not match the `<topic> <json>` format.
    ///
    /// Returned by the frame decoder; the event loop drops such frames
    /// after logging them.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Description of the framing violation.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the WebSocket handshake cannot be completed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed.
    ///
    /// Returned when an operation reaches an event loop that has
    /// already terminated.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid address error.
    #[inline]
    pub fn invalid_address(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid topic error.
    #[inline]
    pub fn invalid_topic(topic: impl Into<String>) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
        }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this is a framing error.
    ///
    /// Framing errors concern individual envelopes, not the connection;
    /// the connection stays usable after one.
    #[inline]
    #[must_use]
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTopic { .. } | Self::MalformedFrame { .. } | Self::Json(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

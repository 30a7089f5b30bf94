//! socketbus - Topic-based publish/subscribe over one WebSocket connection.
//!
//! This library wraps a single WebSocket connection with topic-based
//! publish/subscribe semantics: outgoing messages are queued until the
//! connection is ready, and incoming messages are dispatched to
//! registered listeners by topic-prefix matching.
//!
//! # Architecture
//!
//! - [`connect`] validates the address and returns a [`Connection`]
//!   handle immediately; the WebSocket handshake proceeds on a spawned
//!   event-loop task
//! - `emit` before readiness buffers; the ready transition flushes the
//!   buffer in FIFO order, exactly once
//! - Inbound envelopes (`"<topic> <json>\n"` text frames) are routed to
//!   every listener whose registered prefix matches, at most once per
//!   listener per message
//! - The reserved `/refresh` control topic bypasses dispatch and invokes
//!   an installable reload hook instead
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::{Value, json};
//! use socketbus::{RegisterOptions, Result, connect};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let conn = connect("ws://127.0.0.1:9000")?;
//!
//!     // Listeners match by topic prefix.
//!     conn.register(
//!         "chat.",
//!         Arc::new(|topic: &str, body: &Value| println!("{topic}: {body}")),
//!         RegisterOptions::default(),
//!     );
//!
//!     // Queued until the handshake completes, then flushed in order.
//!     conn.emit("chat.message", &json!({"text": "hi"}))?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Envelope wire format and control topic |
//! | [`registry`] | Topic-listener registry and prefix matching |
//! | [`transport`] | Connection handle and event loop (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Envelope wire format and the reserved control topic.
pub mod protocol;

/// Topic-listener registry and prefix matching.
///
/// Pure routing logic, independent of socket I/O.
pub mod registry;

/// WebSocket transport layer.
///
/// Internal module handling the connection and its event loop.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{Envelope, REFRESH_TOPIC};

// Registry types
pub use registry::{Listener, RegisterOptions, Registry};

// Transport types
pub use transport::{Connection, ReloadHook};

// ============================================================================
// Construction
// ============================================================================

/// Opens a connection to a WebSocket address.
///
/// Convenience for [`Connection::connect`]: returns immediately with a
/// handle in not-ready state while the handshake proceeds in the
/// background.
///
/// # Errors
///
/// Returns [`Error::InvalidAddress`] if `address` is not a valid
/// `ws://` or `wss://` URL.
pub fn connect(address: &str) -> Result<Connection> {
    Connection::connect(address)
}

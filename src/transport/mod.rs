//! WebSocket transport layer.
//!
//! This module owns the connection to the remote peer and the event
//! loop that moves envelopes in both directions.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Caller (Rust)  │                              │  Remote peer    │
//! │                 │         WebSocket            │                 │
//! │  Connection     │◄────────────────────────────►│  Topic pub/sub  │
//! │  → event loop   │        ws://host:port        │  counterpart    │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::connect` - Validate the address, spawn the event loop
//! 2. Event loop performs the WebSocket handshake; emits are queued
//! 3. Handshake completes - ready, queued frames flushed in FIFO order
//! 4. Inbound frames dispatched to registered listeners by topic prefix
//! 5. `Connection::shutdown` - Close the socket, stop the event loop
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Connection handle and event loop |

// ============================================================================
// Submodules
// ============================================================================

/// Connection handle and event loop.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ReloadHook};

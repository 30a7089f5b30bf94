//! Wire protocol message types.
//!
//! Defines the envelope format exchanged over the WebSocket connection
//! and the reserved control topic.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Envelope type and frame codec |

// ============================================================================
// Submodules
// ============================================================================

/// Envelope type and frame codec.
pub mod envelope;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, REFRESH_TOPIC};

//! Envelope type and frame codec.
//!
//! Each WebSocket text frame carries exactly one envelope. The trailing
//! newline is cosmetic and tolerated but not required on inbound frames.
//!
//! # Format
//!
//! ```text
//! <topic> <json(body)>\n
//! ```
//!
//! The topic is everything up to the first space; the remainder is the
//! JSON-encoded body. Because the first space is the separator, topics
//! must not contain spaces (the JSON body may).

// ============================================================================
// Imports
// ============================================================================

use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Reserved control topic requesting a full reload of the hosting
/// application.
///
/// Envelopes with this topic bypass listener dispatch entirely; the
/// connection invokes its reload hook instead.
pub const REFRESH_TOPIC: &str = "/refresh";

// ============================================================================
// Envelope
// ============================================================================

/// A topic plus JSON body, the unit of exchange on the wire.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use socketbus::Envelope;
///
/// let envelope = Envelope::new("chat.message", json!({"text": "hi"}));
/// let frame = envelope.encode().unwrap();
/// assert_eq!(frame, "chat.message {\"text\":\"hi\"}\n");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Routing topic. Must not contain a space.
    pub topic: String,

    /// Opaque JSON body.
    pub body: Value,
}

impl Envelope {
    /// Creates a new envelope.
    #[inline]
    #[must_use]
    pub fn new(topic: impl Into<String>, body: Value) -> Self {
        Self {
            topic: topic.into(),
            body,
        }
    }

    /// Returns `true` if this envelope carries the reserved control topic.
    #[inline]
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        self.topic == REFRESH_TOPIC
    }

    /// Encodes the envelope into a wire frame.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidTopic`] if the topic contains a space
    /// - [`Error::Json`] if the body cannot be serialized
    pub fn encode(&self) -> Result<String> {
        if self.topic.contains(' ') {
            return Err(Error::invalid_topic(&self.topic));
        }

        let json = serde_json::to_string(&self.body)?;
        Ok(format!("{} {}\n", self.topic, json))
    }

    /// Decodes a wire frame into an envelope.
    ///
    /// The topic is parsed as the substring up to the first space; the
    /// rest of the frame is parsed as JSON. A trailing newline is
    /// stripped if present.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] if the frame has no space
    /// separator or the body is not valid JSON.
    pub fn decode(frame: &str) -> Result<Self> {
        let frame = frame.strip_suffix('\n').unwrap_or(frame);

        let separator = frame
            .find(' ')
            .ok_or_else(|| Error::malformed_frame("missing topic separator"))?;

        let (topic, rest) = frame.split_at(separator);
        let body = serde_json::from_str(&rest[1..])
            .map_err(|e| Error::malformed_frame(format!("body is not valid JSON: {e}")))?;

        Ok(Self {
            topic: topic.to_owned(),
            body,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

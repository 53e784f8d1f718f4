//! Wire-format message types.
//!
//! Every broadcast travels as a JSON envelope carrying the sender identity,
//! the raw text content, and an optional receipt timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Broadcast envelope, both the wire format and the payload on the shared
/// inbound queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Identity of the originating connection. Set by the server-side read
    /// path from the connection's own id, never taken from client data.
    pub sender: String,
    /// Raw text payload as the client sent it.
    pub content: String,
    /// Receipt timestamp; omitted from the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
            time: Some(Utc::now()),
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON wire form.
    pub fn from_json(payload: &str) -> Result<Envelope> {
        Ok(serde_json::from_str(payload)?)
    }
}

//! Decoded server-sent events.

use serde::de::DeserializeOwned;

/// Data payload that marks the natural end of a stream.
pub const DONE_MARKER: &str = "[DONE]";

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    /// Value of the `event:` field, if the record carried one.
    pub event: Option<String>,
    /// `data:` lines of the record joined with `\n`.
    pub data: String,
    pub id: Option<String>,
    /// Reconnection time in milliseconds.
    pub retry: Option<u64>,
}

impl StreamEvent {
    /// Creates an unnamed event carrying `data`.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Event name, defaulting to `message` as browsers do.
    #[must_use]
    pub fn name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data == DONE_MARKER
    }

    /// Decodes the data payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ErnieError::Serialization`] if the payload is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

use crate::sse::EventStream;
use erniebot_types::{ErnieError, ResponseHeaders, Result};
use serde_json::Value;

/// What a dispatched request produced.
#[derive(Debug)]
pub enum ApiResponse {
    /// A JSON body that passed the vendor error-envelope check.
    Json { body: Value, headers: ResponseHeaders },
    /// A non-JSON body.
    Text { body: String, headers: ResponseHeaders },
    /// A streaming response.
    Stream(EventStream),
}

impl ApiResponse {
    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Response headers, with lowercased names.
    #[must_use]
    pub fn headers(&self) -> &ResponseHeaders {
        match self {
            Self::Json { headers, .. } | Self::Text { headers, .. } => headers,
            Self::Stream(s) => s.headers(),
        }
    }

    /// The JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::Serialization`] for a text body that is not
    /// JSON, or [`ErnieError::InvalidArgument`] for a stream.
    pub fn into_json(self) -> Result<Value> {
        match self {
            Self::Json { body, .. } => Ok(body),
            Self::Text { body, .. } => Ok(serde_json::from_str(&body)?),
            Self::Stream(_) => Err(ErnieError::InvalidArgument(
                "expected a JSON response, got a stream".into(),
            )),
        }
    }

    /// The event stream.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::InvalidArgument`] if the response was not streamed.
    pub fn into_stream(self) -> Result<EventStream> {
        match self {
            Self::Stream(s) => Ok(s),
            _ => Err(ErnieError::InvalidArgument(
                "expected a stream, got a complete response".into(),
            )),
        }
    }
}

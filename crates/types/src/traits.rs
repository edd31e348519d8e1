//! Async traits shared across all erniebot crates.
//!
//! Every cross-crate abstraction is defined here so that higher layers depend
//! only on `erniebot-types`, not on each other.

use crate::{HttpRequest, HttpResponse, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use std::pin::Pin;

/// A pinned, sendable stream of response body chunks.
///
/// Dropping the stream releases the underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Sends one resolved request and returns as soon as the status line and
/// headers are available.
///
/// Implementations map DNS, connect and TLS failures to
/// [`crate::ErnieError::Connection`] and transport-level timeouts to
/// [`crate::ErnieError::ConnectionTimeout`]. Non-success statuses are *not*
/// errors at this layer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

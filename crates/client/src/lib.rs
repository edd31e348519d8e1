//! Request pipeline and streaming for the ERNIE Bot APIs.
//!
//! [`ErnieClient`] turns a [`erniebot_types::RequestDescriptor`] into a
//! network call through the active backend, enforcing timeout and
//! cancellation, and returns an [`ApiResponse`]. Streaming responses are
//! decoded lazily by [`EventStream`].

pub mod client;
pub mod http_util;
pub mod response;
pub mod sse;

pub use client::{DEFAULT_TIMEOUT, ErnieClient, default_user_agent};
pub use http_util::{RquestTransport, build_http_client};
pub use response::ApiResponse;
pub use sse::{Decoded, EventStream, SseDecoder};

//! Core types and traits for the erniebot workspace.
//!
//! This crate defines the shared abstractions used across all layers of the
//! client: the error taxonomy, the request descriptor, decoded stream events,
//! credentials, and the transport seam that every network call goes through.

pub mod credentials;
pub mod error;
pub mod event;
pub mod http;
pub mod request;
pub mod traits;

pub use credentials::{AccessKeyPair, Credentials};
pub use error::{ApiError, ErnieError, ResponseHeaders, Result, vendor_status};
pub use event::{DONE_MARKER, StreamEvent};
pub use http::{HttpRequest, HttpResponse, join_url};
pub use request::{Headers, Method, Query, RequestDescriptor};
pub use traits::{ByteStream, Transport};

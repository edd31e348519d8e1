//! Backend adapters and the backend registry.
//!
//! Each backend implements [`BackendAdapter`]: it maps logical paths and
//! models to vendor URLs and supplies per-request authentication. The
//! [`Backend`] enum is the closed set selected by [`BackendKind`].

pub mod adapter;
pub mod aistudio;
pub mod qianfan;
pub mod registry;
pub mod resources;

pub use adapter::{AuthContext, BackendAdapter};
pub use aistudio::TokenBackend;
pub use qianfan::SignedBackend;
pub use registry::{Backend, BackendKind};
pub use resources::{ResourceInfo, ResourceMap};

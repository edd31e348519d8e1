//! Configuration loading for the erniebot client.
//!
//! Uses figment to layer built-in defaults, an optional YAML file, and
//! `EB_*` environment variables.

pub mod schema;

pub use schema::{Config, ENV_PREFIX, QianfanConfig, SigningMode};

//! Logical path and model name to vendor resource URL mapping.

use erniebot_types::{ErnieError, Result};
use std::collections::HashMap;

/// Chat models shared by both vendors.
const CHAT_MODELS: &[(&str, &str)] = &[
    ("ernie-bot", "completions"),
    ("ernie-bot-turbo", "eb-instant"),
    ("ernie-bot-4", "completions_pro"),
];

const EMBEDDING_MODELS: &[(&str, &str)] = &[("ernie-text-embedding", "embedding-v1")];

/// One mapped logical path.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub resource_id: String,
    /// Logical model name to vendor module id.
    pub models: HashMap<String, String>,
}

/// Resource table of one backend.
#[derive(Debug, Clone, Default)]
pub struct ResourceMap {
    paths: HashMap<String, ResourceInfo>,
}

impl ResourceMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The chat and embedding resources served by both ERNIE Bot vendors.
    #[must_use]
    pub fn ernie() -> Self {
        Self::new()
            .with_resource("/chat/completions", "chat", CHAT_MODELS)
            .with_resource("/embeddings", "embeddings", EMBEDDING_MODELS)
    }

    #[must_use]
    pub fn with_resource(mut self, path: &str, resource_id: &str, models: &[(&str, &str)]) -> Self {
        self.paths.insert(
            path.to_string(),
            ResourceInfo {
                resource_id: resource_id.to_string(),
                models: models
                    .iter()
                    .map(|(m, id)| ((*m).to_string(), (*id).to_string()))
                    .collect(),
            },
        );
        self
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&ResourceInfo> {
        self.paths.get(path)
    }

    /// Resolves `(path, model)` to `{base}/{resource_id}/{module_id}`.
    ///
    /// Returns `Ok(None)` for an unmapped path. A missing model on a mapped
    /// path is looked up as the empty name and fails like any other unknown
    /// model.
    ///
    /// # Errors
    ///
    /// Returns [`ErnieError::InvalidArgument`] if the path is mapped but the
    /// model is not.
    pub fn resolve(&self, base: &str, path: &str, model: Option<&str>) -> Result<Option<String>> {
        let Some(info) = self.paths.get(path) else {
            return Ok(None);
        };
        let model = model.unwrap_or_default();
        let module = info
            .models
            .get(model)
            .ok_or_else(|| ErnieError::InvalidArgument(format!("{model} is not a supported model.")))?;
        Ok(Some(format!(
            "{}/{}/{module}",
            base.trim_end_matches('/'),
            info.resource_id
        )))
    }

    /// Model names accepted for `path`, sorted.
    #[must_use]
    pub fn models(&self, path: &str) -> Vec<&str> {
        let mut models: Vec<&str> = self
            .paths
            .get(path)
            .map(|info| info.models.keys().map(String::as_str).collect())
            .unwrap_or_default();
        models.sort_unstable();
        models
    }
}

//! Ordered provider registry.
//!
//! Holds the adapter chain, primary first. Built once at startup from the
//! environment; reordered at runtime by `set_model`. Reads take a cheap
//! snapshot so orchestration never holds the registry lock across I/O.

use super::gemini::Gemini;
use super::openai::OpenAI;
use super::{ProviderAdapter, RateClass};
use crate::config;
use crate::error::{Result, ServerError};
use schemars::JsonSchema;
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Wire-facing description of one registered provider.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub rate_class: RateClass,
    /// Whether this provider currently heads the chain.
    pub preferred: bool,
}

/// The ordered adapter chain.
pub struct ProviderRegistry {
    chain: RwLock<Vec<Arc<dyn ProviderAdapter>>>,
}

impl ProviderRegistry {
    /// Builds a registry from an explicit adapter list (tests inject fakes
    /// here). The first adapter is the primary.
    pub fn new(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Result<Self> {
        if adapters.is_empty() {
            return Err(ServerError::Config(
                "no providers configured; set GEMINI_API_KEY or OPENAI_API_KEY".into(),
            ));
        }
        Ok(Self {
            chain: RwLock::new(adapters),
        })
    }

    /// Builds the adapter chain from environment credentials. Gemini is
    /// the primary when configured; OpenAI is appended as fallback.
    pub fn from_env() -> Result<Self> {
        let mut adapters: Vec<Arc<dyn ProviderAdapter>> = Vec::new();

        if let Some(key) = config::env_var(config::GEMINI_API_KEY) {
            let model = config::env_var("GEMINI_MODEL")
                .unwrap_or_else(|| config::DEFAULT_GEMINI_MODEL.to_string());
            adapters.push(Arc::new(Gemini::new(key, model)));
        }
        if let Some(key) = config::env_var(config::OPENAI_API_KEY) {
            let model = config::env_var("OPENAI_MODEL")
                .unwrap_or_else(|| config::DEFAULT_OPENAI_MODEL.to_string());
            adapters.push(Arc::new(OpenAI::new(key, model)));
        }

        Self::new(adapters)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<dyn ProviderAdapter>>> {
        self.chain.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the chain in priority order.
    #[must_use]
    pub fn ordered(&self) -> Vec<Arc<dyn ProviderAdapter>> {
        self.read().clone()
    }

    /// Moves the named provider to the head of the chain. Idempotent;
    /// returns the new ordering.
    pub fn set_preferred(&self, name: &str) -> Result<Vec<String>> {
        let mut chain = self.chain.write().unwrap_or_else(|e| e.into_inner());
        let Some(pos) = chain.iter().position(|p| p.name() == name) else {
            let known: Vec<&str> = chain.iter().map(|p| p.name()).collect();
            return Err(ServerError::invalid(format!(
                "unknown provider '{name}' (configured: {})",
                known.join(", ")
            )));
        };
        let adapter = chain.remove(pos);
        chain.insert(0, adapter);
        Ok(chain.iter().map(|p| p.name().to_string()).collect())
    }

    /// Describes the chain for `get_model_info`.
    #[must_use]
    pub fn info(&self) -> Vec<ProviderInfo> {
        self.read()
            .iter()
            .enumerate()
            .map(|(i, p)| ProviderInfo {
                name: p.name().to_string(),
                model: p.model_name().to_string(),
                rate_class: p.rate_class(),
                preferred: i == 0,
            })
            .collect()
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

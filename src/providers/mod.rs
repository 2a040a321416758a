//! Provider adapters and orchestration.
//!
//! Each vendor is wrapped in a [`ProviderAdapter`] that turns a prompt
//! into one HTTP call and maps vendor-specific failures into the shared
//! [`ErrorKind`] taxonomy. The [`registry`] keeps adapters in priority
//! order; the [`orchestrator`] walks that order with circuit breakers,
//! classification-driven fallback, and bounded retries.

pub mod breaker;
pub mod gemini;
pub mod openai;
pub mod orchestrator;
pub mod registry;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Rate-limit profile a provider belongs to. Breakers for rate-limit
/// trips are keyed by (provider, rate class).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RateClass {
    Standard,
    Premium,
    Bulk,
}

/// Per-call generation options.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system: Option<String>,
}

/// Token accounting reported by the vendor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
    pub model_name: String,
}

/// Raw adapter-level failure, before classification.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP transport error: {0}")]
    Http(String),

    #[error("API error (status {status}): {message}")]
    Api {
        status: u16,
        message: String,
        /// Retry-After hint from the vendor, when present.
        retry_after: Option<Duration>,
    },

    #[error("request timed out")]
    Timeout,

    #[error("unparseable provider response: {0}")]
    Parse(String),

    #[error("authentication failed: {0}")]
    Auth(String),
}

/// How the orchestrator should react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Back off this provider for at least `retry_after`, use the next one.
    RateLimit { retry_after: Option<Duration> },
    /// Provider is down; counts toward opening its breaker.
    Unavailable,
    /// The request itself is bad. No other vendor would accept it either.
    InvalidRequest,
    /// Worth retrying on the same provider a bounded number of times.
    Transient,
    /// Unrecoverable (credentials, unsupported model). Surface immediately.
    Fatal,
}

/// One vendor behind a uniform generate/classify surface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Stable registry name, e.g. "gemini".
    fn name(&self) -> &str;

    /// Model id this adapter currently targets.
    fn model_name(&self) -> &str;

    fn rate_class(&self) -> RateClass;

    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, ProviderError>;

    /// Lightweight liveness signal for health checks. Default: configured
    /// adapters are assumed healthy; the breaker tracks observed failures.
    async fn is_healthy(&self) -> bool {
        true
    }

    /// Maps a raw failure to an orchestrator reaction. The default mapping
    /// covers standard HTTP semantics; adapters override for vendor quirks.
    fn classify(&self, error: &ProviderError) -> ErrorKind {
        classify_by_status(error)
    }
}

/// Standard HTTP status classification shared by the bundled adapters.
#[must_use]
pub fn classify_by_status(error: &ProviderError) -> ErrorKind {
    match error {
        ProviderError::Api {
            status,
            retry_after,
            ..
        } => match status {
            429 => ErrorKind::RateLimit {
                retry_after: *retry_after,
            },
            500 | 502 | 503 | 504 => ErrorKind::Unavailable,
            400 | 404 | 413 | 422 => ErrorKind::InvalidRequest,
            401 | 403 => ErrorKind::Fatal,
            _ => ErrorKind::Transient,
        },
        ProviderError::Http(_) | ProviderError::Timeout | ProviderError::Parse(_) => {
            ErrorKind::Transient
        }
        ProviderError::Auth(_) => ErrorKind::Fatal,
    }
}

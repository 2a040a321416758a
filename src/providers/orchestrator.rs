//! Provider orchestration: fallback, circuit breaking, bounded retries.
//!
//! A call walks the registry chain in priority order. Providers with an
//! open breaker are skipped without being contacted. Failures are
//! classified by the owning adapter and handled per class:
//!
//! - `invalid_request` / `fatal`: surfaced immediately, no fallback —
//!   these are not provider-swappable.
//! - `rate_limit`: the breaker trips for the vendor's Retry-After hint,
//!   then the next provider is tried.
//! - `unavailable`: counts toward the breaker threshold, then fall back.
//! - `transient`: bounded same-provider retries with jitter, then treated
//!   as unavailable.

use super::breaker::{BreakerSnapshot, CircuitBreaker};
use super::{ErrorKind, GenerateOptions, Generation, ProviderAdapter, RateClass};
use crate::config::Defaults;
use crate::error::{ProviderChainError, Result, ServerError};
use crate::providers::registry::ProviderRegistry;
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A successful call plus the telemetry of who served it.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub generation: Generation,
    /// Registry name of the provider that produced the text.
    pub provider: String,
}

/// Health view of one provider in the chain.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ProviderHealth {
    pub name: String,
    pub model: String,
    pub rate_class: RateClass,
    pub healthy: bool,
    pub breaker: BreakerSnapshot,
}

/// Walks the provider chain with breakers and classified fallback.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    defaults: Defaults,
}

impl Orchestrator {
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, defaults: Defaults) -> Self {
        Self {
            registry,
            breakers: Mutex::new(HashMap::new()),
            defaults,
        }
    }

    fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(breakers.entry(provider.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                self.defaults.breaker_failure_threshold,
                self.defaults.breaker_cooldown,
                self.defaults.breaker_cooldown_cap,
            ))
        }))
    }

    /// Executes one generation against the chain under `deadline`.
    pub async fn call(
        &self,
        prompt: &str,
        options: &GenerateOptions,
        deadline: Duration,
    ) -> Result<CallOutcome> {
        let started = Instant::now();
        let chain = self.registry.ordered();
        let mut failures: Vec<(String, String)> = Vec::new();
        let mut attempted_any = false;
        let mut min_open: Option<Duration> = None;
        let mut open_provider = String::new();

        for provider in &chain {
            let name = provider.name().to_string();
            let breaker = self.breaker_for(&name);

            if let Err(remaining) = breaker.check() {
                tracing::debug!(provider = %name, secs = remaining.as_secs(), "skipping provider, circuit open");
                if min_open.is_none_or(|m| remaining < m) {
                    min_open = Some(remaining);
                    open_provider = name.clone();
                }
                failures.push((
                    name,
                    format!("circuit open for {}s", remaining.as_secs().max(1)),
                ));
                continue;
            }
            attempted_any = true;

            match self
                .attempt_provider(provider.as_ref(), &breaker, prompt, options, started, deadline)
                .await?
            {
                AttemptOutcome::Success(generation) => {
                    return Ok(CallOutcome {
                        generation,
                        provider: provider.name().to_string(),
                    });
                }
                AttemptOutcome::FallThrough(reason) => {
                    failures.push((provider.name().to_string(), reason));
                }
            }
        }

        // Every provider was skipped because of an open breaker: the caller
        // should see the cool-down, not a generic exhaustion error.
        if !attempted_any {
            if let Some(remaining) = min_open {
                return Err(ProviderChainError::CircuitOpen {
                    provider: open_provider,
                    retry_after_secs: remaining.as_secs().max(1),
                }
                .into());
            }
        }

        Err(ProviderChainError::AllUnavailable { failures }.into())
    }

    /// Tries one provider, retrying transient failures in place.
    async fn attempt_provider(
        &self,
        provider: &dyn ProviderAdapter,
        breaker: &CircuitBreaker,
        prompt: &str,
        options: &GenerateOptions,
        started: Instant,
        deadline: Duration,
    ) -> Result<AttemptOutcome> {
        let mut transient_attempts = 0u32;

        loop {
            let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
                return Err(ServerError::BudgetExhausted {
                    what: format!("call deadline of {}s", deadline.as_secs()),
                });
            };

            let result = tokio::time::timeout(remaining, provider.generate(prompt, options)).await;

            let error = match result {
                Err(_) => {
                    // Deadline, not provider fault: do not tick the breaker.
                    return Err(ServerError::BudgetExhausted {
                        what: format!("call deadline of {}s", deadline.as_secs()),
                    });
                }
                Ok(Ok(generation)) => {
                    breaker.record_success();
                    return Ok(AttemptOutcome::Success(generation));
                }
                Ok(Err(e)) => e,
            };

            match provider.classify(&error) {
                ErrorKind::InvalidRequest => {
                    return Err(ProviderChainError::InvalidRequest {
                        provider: provider.name().to_string(),
                        message: error.to_string(),
                    }
                    .into());
                }
                ErrorKind::Fatal => {
                    return Err(ProviderChainError::Fatal {
                        provider: provider.name().to_string(),
                        message: error.to_string(),
                    }
                    .into());
                }
                ErrorKind::RateLimit { retry_after } => {
                    let cooldown = retry_after.unwrap_or(self.defaults.breaker_cooldown);
                    breaker.trip_for(cooldown, &error.to_string());
                    tracing::warn!(provider = provider.name(), secs = cooldown.as_secs(), "rate limited");
                    return Ok(AttemptOutcome::FallThrough(format!(
                        "rate limited: {error}"
                    )));
                }
                ErrorKind::Unavailable => {
                    breaker.record_failure(&error.to_string());
                    tracing::warn!(provider = provider.name(), error = %error, "provider unavailable");
                    return Ok(AttemptOutcome::FallThrough(error.to_string()));
                }
                ErrorKind::Transient => {
                    transient_attempts += 1;
                    if transient_attempts > self.defaults.transient_retries {
                        breaker.record_failure(&error.to_string());
                        return Ok(AttemptOutcome::FallThrough(format!(
                            "transient failures exhausted retries: {error}"
                        )));
                    }
                    let jitter = {
                        use rand::Rng;
                        let mut rng = rand::rng();
                        let cap = self.defaults.retry_jitter.as_millis().max(1) as u64;
                        Duration::from_millis(rng.random_range(0..cap))
                    };
                    tracing::debug!(
                        provider = provider.name(),
                        attempt = transient_attempts,
                        "transient failure, retrying with jitter"
                    );
                    tokio::time::sleep(jitter).await;
                }
            }
        }
    }

    /// Read-only per-provider health snapshot.
    pub async fn provider_health(&self) -> Vec<ProviderHealth> {
        let mut out = Vec::new();
        for provider in self.registry.ordered() {
            let breaker = self.breaker_for(provider.name());
            out.push(ProviderHealth {
                name: provider.name().to_string(),
                model: provider.model_name().to_string(),
                rate_class: provider.rate_class(),
                healthy: provider.is_healthy().await,
                breaker: breaker.snapshot(),
            });
        }
        out
    }

    /// The registry backing this orchestrator.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }
}

enum AttemptOutcome {
    Success(Generation),
    FallThrough(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderError, Usage};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted adapter: pops one canned result per call.
    struct Scripted {
        name: &'static str,
        script: Mutex<VecDeque<std::result::Result<String, ProviderError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(
            name: &'static str,
            script: Vec<std::result::Result<String, ProviderError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                script: Mutex::new(script.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderAdapter for Scripted {
        fn name(&self) -> &str {
            self.name
        }
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn rate_class(&self) -> RateClass {
            RateClass::Standard
        }
        async fn generate(
            &self,
            _prompt: &str,
            _options: &GenerateOptions,
        ) -> std::result::Result<Generation, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok("default".into()));
            next.map(|text| Generation {
                text,
                usage: Usage::default(),
                model_name: "scripted".into(),
            })
        }
    }

    fn unavailable() -> ProviderError {
        ProviderError::Api {
            status: 503,
            message: "down".into(),
            retry_after: None,
        }
    }

    fn defaults() -> Defaults {
        Defaults {
            breaker_cooldown: Duration::from_millis(50),
            breaker_cooldown_cap: Duration::from_millis(400),
            retry_jitter: Duration::from_millis(5),
            ..Defaults::default()
        }
    }

    fn orchestrator(adapters: Vec<Arc<dyn ProviderAdapter>>) -> Orchestrator {
        let registry = Arc::new(ProviderRegistry::new(adapters).unwrap());
        Orchestrator::new(registry, defaults())
    }

    const DEADLINE: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_primary_success_no_fallback() {
        let primary = Scripted::new("primary", vec![Ok("from primary".into())]);
        let secondary = Scripted::new("secondary", vec![]);
        let orch = orchestrator(vec![primary.clone(), secondary.clone()]);

        let out = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap();
        assert_eq!(out.generation.text, "from primary");
        assert_eq!(out.provider, "primary");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_falls_back_to_secondary() {
        let primary = Scripted::new("primary", vec![Err(unavailable())]);
        let secondary = Scripted::new("secondary", vec![Ok("rescued".into())]);
        let orch = orchestrator(vec![primary, secondary]);

        let out = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap();
        assert_eq!(out.provider, "secondary");
        assert_eq!(out.generation.text, "rescued");
    }

    #[tokio::test]
    async fn test_breaker_opens_after_threshold_and_fails_fast() {
        let primary = Scripted::new(
            "primary",
            vec![Err(unavailable()), Err(unavailable()), Err(unavailable())],
        );
        let orch = orchestrator(vec![primary.clone()]);

        for _ in 0..3 {
            let _ = orch.call("p", &GenerateOptions::default(), DEADLINE).await;
        }
        assert_eq!(primary.calls(), 3);

        // Breaker is now open: the provider is not contacted again.
        let err = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_OPEN");
        assert_eq!(primary.calls(), 3);
    }

    #[tokio::test]
    async fn test_breaker_half_open_recovers() {
        let primary = Scripted::new(
            "primary",
            vec![
                Err(unavailable()),
                Err(unavailable()),
                Err(unavailable()),
                Ok("recovered".into()),
            ],
        );
        let orch = orchestrator(vec![primary.clone()]);

        for _ in 0..3 {
            let _ = orch.call("p", &GenerateOptions::default(), DEADLINE).await;
        }

        tokio::time::sleep(Duration::from_millis(70)).await;
        let out = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap();
        assert_eq!(out.generation.text, "recovered");

        let health = orch.provider_health().await;
        assert_eq!(
            health[0].breaker.state,
            crate::providers::breaker::BreakerState::Closed
        );
    }

    #[tokio::test]
    async fn test_invalid_request_does_not_fall_back() {
        let primary = Scripted::new(
            "primary",
            vec![Err(ProviderError::Api {
                status: 400,
                message: "bad prompt".into(),
                retry_after: None,
            })],
        );
        let secondary = Scripted::new("secondary", vec![Ok("should not run".into())]);
        let orch = orchestrator(vec![primary, secondary.clone()]);

        let err = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_retries_then_succeeds() {
        let primary = Scripted::new(
            "primary",
            vec![
                Err(ProviderError::Http("reset".into())),
                Ok("second try".into()),
            ],
        );
        let orch = orchestrator(vec![primary.clone()]);

        let out = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap();
        assert_eq!(out.generation.text, "second try");
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_trips_breaker_and_falls_back() {
        let primary = Scripted::new(
            "primary",
            vec![
                Err(ProviderError::Api {
                    status: 429,
                    message: "limit".into(),
                    retry_after: Some(Duration::from_secs(60)),
                }),
                Ok("should not run".into()),
            ],
        );
        let secondary = Scripted::new("secondary", vec![Ok("spillover".into()), Ok("again".into())]);
        let orch = orchestrator(vec![primary.clone(), secondary]);

        let out = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap();
        assert_eq!(out.provider, "secondary");

        // Primary stays tripped for its Retry-After window.
        let out = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap();
        assert_eq!(out.provider, "secondary");
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_chain_exhaustion_lists_failures() {
        let primary = Scripted::new("primary", vec![Err(unavailable())]);
        let secondary = Scripted::new("secondary", vec![Err(unavailable())]);
        let orch = orchestrator(vec![primary, secondary]);

        let err = orch
            .call("p", &GenerateOptions::default(), DEADLINE)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALL_PROVIDERS_UNAVAILABLE");
        let data = err.data();
        assert_eq!(data["failures"].as_array().unwrap().len(), 2);
    }
}

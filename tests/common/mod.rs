//! Common test utilities for second-opinion integration tests.
//!
//! Provides `TestEnv` for setting up an isolated environment with a
//! temporary workspace, scripted fake providers, and the full service
//! graph wired together.

#![allow(dead_code)] // Test utilities may not all be used in every test file

use async_trait::async_trait;
use second_opinion::config::{Config, Defaults};
use second_opinion::providers::registry::ProviderRegistry;
use second_opinion::providers::{
    GenerateOptions, Generation, ProviderAdapter, ProviderError, RateClass, Usage,
};
use second_opinion::Services;
use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// A scripted provider: pops one canned response per call, then serves a
/// configurable default. Optionally sleeps per call to exercise budgets.
pub struct FakeProvider {
    name: &'static str,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    default_reply: String,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl FakeProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            script: Mutex::new(VecDeque::new()),
            default_reply: default_findings_reply(),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_script(self, script: Vec<Result<String, ProviderError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = reply.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }

    fn rate_class(&self) -> RateClass {
        RateClass::Standard
    }

    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(e),
            None => self.default_reply.clone(),
        };
        Ok(Generation {
            text,
            usage: Usage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model_name: "fake-model".into(),
        })
    }
}

/// Canned structured reply that parses into one high-severity finding.
pub fn default_findings_reply() -> String {
    r#"{"findings": [{"type": "bug", "severity": "high",
        "description": "stale cache entry served after invalidation",
        "confidence": 0.8}],
        "recommendations": ["add a version check to the cache key"]}"#
        .to_string()
}

/// A 503 every provider classifies as unavailable.
pub fn unavailable() -> ProviderError {
    ProviderError::Api {
        status: 503,
        message: "service unavailable".into(),
        retry_after: None,
    }
}

/// Test defaults: fast breaker windows, tight budgets.
pub fn test_defaults() -> Defaults {
    Defaults {
        call_timeout: Duration::from_secs(5),
        breaker_cooldown: Duration::from_millis(50),
        breaker_cooldown_cap: Duration::from_millis(400),
        retry_jitter: Duration::from_millis(5),
        reaper_period: Duration::from_millis(50),
        ..Defaults::default()
    }
}

/// A complete test environment with all services wired together.
pub struct TestEnv {
    pub dir: TempDir,
    pub services: Arc<Services>,
    pub primary: Arc<FakeProvider>,
}

impl TestEnv {
    /// One default provider that always answers with structured findings.
    pub fn new() -> Self {
        Self::with_primary(FakeProvider::new("primary"))
    }

    pub fn with_primary(primary: FakeProvider) -> Self {
        let primary = Arc::new(primary);
        let chain: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::clone(&primary) as _];
        Self::build(primary, chain, test_defaults())
    }

    /// Primary plus fallback chain.
    pub fn with_chain(primary: FakeProvider, rest: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self::with_chain_and_defaults(primary, rest, test_defaults())
    }

    pub fn with_chain_and_defaults(
        primary: FakeProvider,
        rest: Vec<Arc<dyn ProviderAdapter>>,
        defaults: Defaults,
    ) -> Self {
        let primary = Arc::new(primary);
        let mut chain: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::clone(&primary) as _];
        chain.extend(rest);
        Self::build(primary, chain, defaults)
    }

    pub fn with_defaults(primary: FakeProvider, defaults: Defaults) -> Self {
        let primary = Arc::new(primary);
        let chain: Vec<Arc<dyn ProviderAdapter>> = vec![Arc::clone(&primary) as _];
        Self::build(primary, chain, defaults)
    }

    fn build(
        primary: Arc<FakeProvider>,
        chain: Vec<Arc<dyn ProviderAdapter>>,
        defaults: Defaults,
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let config = Config {
            workspace_root: dir.path().to_path_buf(),
            extra_roots: Vec::new(),
            defaults,
        };
        let registry = Arc::new(ProviderRegistry::new(chain).expect("registry"));
        let services = Arc::new(Services::new(config, registry));
        Self {
            dir,
            services,
            primary,
        }
    }

    /// Writes a file into the workspace and returns its absolute path.
    pub fn write_file(&self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&path, content).expect("Failed to write test file");
        path.to_string_lossy().to_string()
    }

    /// A ready-made source file in scope.
    pub fn sample_file(&self) -> String {
        self.write_file(
            "src/cache.rs",
            "pub fn lookup(key: &str) -> Option<String> {\n    None\n}\n",
        )
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

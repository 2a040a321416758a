//! second-opinion: MCP server bridging a coding assistant to a deep reasoner.
//!
//! A lightweight coding assistant escalates questions it cannot crack to a
//! large-context reasoning model through a fixed catalog of MCP tools:
//! single-shot deep analyses, multi-turn conversational analyses, and
//! competitive hypothesis tournaments.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              MCP Server (rmcp)              │
//! │         JSON-RPC over stdin/stdout          │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │               Tool Router                    │
//! │  escalate, conversations, tournament, ...   │
//! └───────┬─────────────┬─────────────┬─────────┘
//!         │             │             │
//!    ┌────▼─────┐ ┌─────▼──────┐ ┌────▼─────┐
//!    │ Session  │ │ Tournament │ │ One-shot │
//!    │ Runtime  │ │ Scheduler  │ │ Analyses │
//!    └────┬─────┘ └─────┬──────┘ └────┬─────┘
//!         │             │             │
//!    ┌────▼─────────────▼─────────────▼────┐
//!    │        Provider Orchestrator         │
//!    │  fallback · circuit breaker · retry  │
//!    └────┬────────────────────────────┬────┘
//!         │                            │
//!    ┌────▼────┐                  ┌────▼────┐
//!    │ Gemini  │                  │ OpenAI  │
//!    └─────────┘                  └─────────┘
//! ```
//!
//! All long-lived collaborators are constructed once in [`Services::new`]
//! and passed explicitly; there are no module-global singletons.

pub mod analysis;
pub mod config;
pub mod conversation;
pub mod error;
pub mod health;
pub mod params;
pub mod parse;
pub mod prompts;
pub mod providers;
pub mod security;
pub mod server;
pub mod session;
pub mod tournament;
pub mod types;

pub use error::{Result, ServerError};

use crate::config::Config;
use crate::providers::orchestrator::Orchestrator;
use crate::providers::registry::ProviderRegistry;
use crate::security::FileReader;
use crate::session::{SessionLocks, SessionStore};
use std::sync::Arc;
use std::time::Instant;

/// Every long-lived collaborator, wired once at startup.
pub struct Services {
    pub config: Config,
    pub reader: FileReader,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<SessionStore>,
    pub locks: SessionLocks,
    pub started_at: Instant,
}

impl Services {
    /// Wires the full service graph from a config and a provider registry.
    #[must_use]
    pub fn new(config: Config, registry: Arc<ProviderRegistry>) -> Self {
        let reader = FileReader::new(
            config.workspace_root.clone(),
            config.allowed_roots(),
            config.defaults.max_file_bytes,
        );
        let orchestrator = Arc::new(Orchestrator::new(registry, config.defaults.clone()));
        let store = Arc::new(SessionStore::new(&config.defaults));
        Self {
            config,
            reader,
            orchestrator,
            store,
            locks: SessionLocks::new(),
            started_at: Instant::now(),
        }
    }

    /// Starts the idle-session reaper for this service graph.
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        session::spawn_reaper(
            Arc::clone(&self.store),
            self.locks.clone(),
            self.config.defaults.session_idle_ttl,
            self.config.defaults.reaper_period,
        )
    }
}

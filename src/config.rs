//! Server configuration.
//!
//! Everything tunable lives here: provider credentials and model ids from
//! the environment, extra allow-listed file roots, and the budget/timeout
//! defaults the runtimes consume. Nothing is persisted.

use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the primary provider key.
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
/// Environment variable holding the fallback provider key.
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Colon-separated extra allow-listed roots for the file reader.
pub const ALLOWED_ROOTS_VAR: &str = "SECOND_OPINION_ALLOWED_ROOTS";

/// Default model ids, overridable via `<PROVIDER>_MODEL`.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4.1";

/// Budget and timeout defaults. Conservative; all caller-overridable where
/// the wire schema allows it.
#[derive(Debug, Clone)]
pub struct Defaults {
    /// Per-tool-call wall clock (single-shot tools and conversation turns).
    pub call_timeout: Duration,
    /// Tournament wall clock.
    pub tournament_wall_clock: Duration,
    /// Tournament provider-call count.
    pub tournament_provider_calls: u32,
    /// Per-session provider-call count for conversations.
    pub session_provider_calls: u32,
    /// Per-session wall-clock budget for conversations.
    pub session_wall_clock: Duration,
    /// Idle TTL before the reaper destroys an untouched session.
    pub session_idle_ttl: Duration,
    /// How often the reaper scans the store.
    pub reaper_period: Duration,
    /// Transcript caps; exceeding either refuses further continues.
    pub max_transcript_turns: usize,
    pub max_transcript_bytes: usize,
    /// Consecutive `unavailable` failures that open a breaker.
    pub breaker_failure_threshold: u32,
    /// Initial breaker cool-down; doubles per reopen up to the cap.
    pub breaker_cooldown: Duration,
    pub breaker_cooldown_cap: Duration,
    /// Same-provider retries for transient errors.
    pub transient_retries: u32,
    /// Upper bound on retry jitter.
    pub retry_jitter: Duration,
    /// Per-file read cap for the secure reader.
    pub max_file_bytes: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(60),
            tournament_wall_clock: Duration::from_secs(300),
            tournament_provider_calls: 25,
            session_provider_calls: 50,
            session_wall_clock: Duration::from_secs(1800),
            session_idle_ttl: Duration::from_secs(30 * 60),
            reaper_period: Duration::from_secs(60),
            max_transcript_turns: 200,
            max_transcript_bytes: 2 * 1024 * 1024,
            breaker_failure_threshold: 3,
            breaker_cooldown: Duration::from_secs(30),
            breaker_cooldown_cap: Duration::from_secs(600),
            transient_retries: 2,
            retry_jitter: Duration::from_millis(250),
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace root; project-relative paths resolve under it.
    pub workspace_root: PathBuf,
    /// Extra allow-listed roots beyond workspace + home.
    pub extra_roots: Vec<PathBuf>,
    pub defaults: Defaults,
}

impl Config {
    /// Builds a config from the workspace root plus the environment.
    #[must_use]
    pub fn from_env(workspace_root: PathBuf) -> Self {
        let extra_roots = std::env::var(ALLOWED_ROOTS_VAR)
            .ok()
            .map(|v| {
                v.split(':')
                    .filter(|s| !s.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            workspace_root,
            extra_roots,
            defaults: Defaults::default(),
        }
    }

    /// All allow-listed roots: workspace, home directory, extras.
    #[must_use]
    pub fn allowed_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.workspace_root.clone()];
        if let Some(home) = dirs::home_dir() {
            roots.push(home);
        }
        roots.extend(self.extra_roots.iter().cloned());
        roots
    }
}

/// Reads an environment variable, treating empty values as unset.
#[must_use]
pub fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

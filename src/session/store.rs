//! In-memory session store with idle reaping.
//!
//! Sessions live only in this map; process exit discards everything.
//! Mutation happens in short critical sections under one map-level mutex;
//! the per-session FIFO lock ([`super::lock`]) serializes the *logical*
//! operations around provider calls.

use crate::config::Defaults;
use crate::error::{Result, ServerError};
use crate::session::lock::SessionLocks;
use crate::types::{AnalysisContext, AnalysisType, Budget, SessionStatus, Turn};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// A server-side conversational analysis record.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub created_at: SystemTime,
    pub last_activity_at: SystemTime,
    pub analysis_type: AnalysisType,
    pub context: AnalysisContext,
    pub turns: Vec<Turn>,
    /// Opaque provider-side token, carried for adapters that want one.
    pub provider_state: Option<String>,
    pub budget: Budget,
}

impl Session {
    fn transcript_bytes(&self) -> usize {
        self.turns.iter().map(Turn::byte_size).sum()
    }
}

/// Read-only view returned by `get_conversation_status`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StatusView {
    pub session_id: String,
    pub status: SessionStatus,
    pub turn_count: usize,
    /// Unix seconds of the last activity.
    pub last_activity: u64,
    pub budget_remaining: Budget,
}

/// The process-wide session map.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    max_turns: usize,
    max_bytes: usize,
}

impl SessionStore {
    #[must_use]
    pub fn new(defaults: &Defaults) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_turns: defaults.max_transcript_turns,
            max_bytes: defaults.max_transcript_bytes,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mints a new active session and returns its id.
    pub fn create(
        &self,
        analysis_type: AnalysisType,
        context: AnalysisContext,
        budget: Budget,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let now = SystemTime::now();
        let session = Session {
            id: id.clone(),
            status: SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
            analysis_type,
            context,
            turns: Vec::new(),
            provider_state: None,
            budget,
        };
        self.lock().insert(id.clone(), session);
        tracing::info!(session_id = %id, "session created");
        id
    }

    /// Runs `f` against the named session under the map lock.
    pub fn with_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<T>,
    ) -> Result<T> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| ServerError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        f(session)
    }

    /// Clones the session for read-heavy work (prompt rendering).
    pub fn snapshot(&self, session_id: &str) -> Result<Session> {
        self.lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ServerError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// Appends a turn, enforcing the transcript caps and bumping activity.
    pub fn append_turn(&self, session_id: &str, turn: Turn) -> Result<usize> {
        let max_turns = self.max_turns;
        let max_bytes = self.max_bytes;
        self.with_session(session_id, |session| {
            let bytes = session.transcript_bytes() + turn.byte_size();
            if session.turns.len() >= max_turns || bytes > max_bytes {
                return Err(ServerError::SessionFull {
                    session_id: session.id.clone(),
                    turns: session.turns.len(),
                    bytes,
                });
            }
            session.turns.push(turn);
            session.last_activity_at = SystemTime::now();
            Ok(session.turns.len())
        })
    }

    /// Accounts for one completed provider call: spends the call budget,
    /// charges elapsed wall clock, and records which provider served it.
    pub fn record_provider_call(
        &self,
        session_id: &str,
        provider: &str,
        elapsed_secs: u64,
    ) -> Result<()> {
        self.with_session(session_id, |session| {
            if session.budget.provider_calls == 0 {
                return Err(ServerError::BudgetExhausted {
                    what: "session provider-call budget".into(),
                });
            }
            session.budget.provider_calls -= 1;
            session.budget.wall_clock_secs =
                session.budget.wall_clock_secs.saturating_sub(elapsed_secs);
            session.provider_state = Some(provider.to_string());
            Ok(())
        })
    }

    pub fn set_status(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        self.with_session(session_id, |session| {
            session.status = status;
            session.last_activity_at = SystemTime::now();
            Ok(())
        })
    }

    /// Status view, or `SessionNotFound`.
    pub fn status_view(&self, session_id: &str) -> Result<StatusView> {
        let sessions = self.lock();
        let session = sessions
            .get(session_id)
            .ok_or_else(|| ServerError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        Ok(StatusView {
            session_id: session.id.clone(),
            status: session.status,
            turn_count: session.turns.len(),
            last_activity: session
                .last_activity_at
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            budget_remaining: session.budget,
        })
    }

    /// Removes the session outright (finalize, abandonment).
    pub fn remove(&self, session_id: &str) -> Option<Session> {
        let removed = self.lock().remove(session_id);
        if removed.is_some() {
            tracing::info!(session_id, "session destroyed");
        }
        removed
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Destroys sessions idle past `ttl` whose lock is free. Returns the
    /// reaped ids. In-flight work is never cancelled: a held lock means
    /// the session is alive no matter its timestamp.
    pub fn reap_idle(&self, ttl: Duration, locks: &SessionLocks) -> Vec<String> {
        let now = SystemTime::now();
        let mut sessions = self.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(id, s)| {
                now.duration_since(s.last_activity_at)
                    .map(|idle| idle > ttl)
                    .unwrap_or(false)
                    && !locks.is_locked(id)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(mut s) = sessions.remove(id) {
                s.status = SessionStatus::Abandoned;
                tracing::info!(session_id = %id, "idle session reaped");
            }
        }
        expired
    }
}

/// Spawns the background reaper loop for a store/locks pair.
pub fn spawn_reaper(
    store: Arc<SessionStore>,
    locks: SessionLocks,
    ttl: Duration,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = store.reap_idle(ttl, &locks);
            if !reaped.is_empty() {
                tracing::debug!(count = reaped.len(), "reaper pass complete");
            }
        }
    })
}

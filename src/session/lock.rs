//! Per-session FIFO mutex.
//!
//! Policy decision: overlapping operations on one session are *queued*,
//! not refused. Waiters are served strictly in the order their `acquire`
//! entered the critical section, so concurrent `continue_conversation`
//! calls are observed in arrival order.
//!
//! The only shared mutable state touched outside a holder's critical
//! section is the lock map itself, and every touch of the map happens
//! under one short global mutex — there is no check-then-set race. The
//! wait itself happens outside that mutex on a per-waiter oneshot
//! channel. Guards release on drop, so a panicking holder cannot leak
//! the lock.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

struct Waiter {
    token: u64,
    tx: oneshot::Sender<()>,
}

#[derive(Default)]
struct LockState {
    holder: Option<u64>,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct LockMap {
    locks: HashMap<String, LockState>,
}

/// The process-wide session lock table.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<LockMap>>,
    next_token: Arc<AtomicU64>,
}

impl SessionLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquires the lock for `session_id`, waiting FIFO behind any holder.
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        let waiting = {
            let mut map = self.lock_map();
            let state = map.locks.entry(session_id.to_string()).or_default();
            if state.holder.is_none() {
                state.holder = Some(token);
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(Waiter { token, tx });
                Some(rx)
            }
        };

        if let Some(rx) = waiting {
            // Woken by release() after being promoted to holder. An Err here
            // can only mean the process is tearing the lock table down, in
            // which case release below is a no-op anyway.
            let _ = rx.await;
        }

        SessionGuard {
            locks: self.clone(),
            session_id: session_id.to_string(),
            token,
        }
    }

    /// Whether any operation currently holds the session's lock.
    #[must_use]
    pub fn is_locked(&self, session_id: &str) -> bool {
        self.lock_map()
            .locks
            .get(session_id)
            .is_some_and(|s| s.holder.is_some())
    }

    /// Waiters currently queued behind the holder.
    #[must_use]
    pub fn queue_depth(&self, session_id: &str) -> usize {
        self.lock_map()
            .locks
            .get(session_id)
            .map_or(0, |s| s.waiters.len())
    }

    fn release(&self, session_id: &str, token: u64) {
        let mut map = self.lock_map();
        let Some(state) = map.locks.get_mut(session_id) else {
            return;
        };
        if state.holder != Some(token) {
            // Double release or foreign token; a bug, not a user error.
            tracing::error!(session_id, "invalid lock release ignored");
            return;
        }

        // Promote the next live waiter; skip waiters whose acquire future
        // was dropped while queued.
        while let Some(next) = state.waiters.pop_front() {
            state.holder = Some(next.token);
            if next.tx.send(()).is_ok() {
                return;
            }
        }

        map.locks.remove(session_id);
    }
}

/// RAII lock hold; releasing happens on drop, panic included.
pub struct SessionGuard {
    locks: SessionLocks,
    session_id: String,
    token: u64,
}

impl SessionGuard {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.locks.release(&self.session_id, self.token);
    }
}

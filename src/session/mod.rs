//! Session store and per-session FIFO locking.

pub mod lock;
pub mod store;

pub use lock::{SessionGuard, SessionLocks};
pub use store::{spawn_reaper, Session, SessionStore, StatusView};

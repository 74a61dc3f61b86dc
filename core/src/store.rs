//! In-memory credential registry.
//!
//! One map holds both pending OAuth `state` entries and live sessions, keyed
//! by their opaque tokens. The handle is cheap to clone; every operation takes
//! the lock exactly once, so insert, lookup, delete and sweep are serialised
//! across tasks. Nothing is persisted: a restart forces re-authorization.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use crate::auth;
use crate::session::{PendingAuthorization, Session};

#[derive(Debug, Clone)]
pub enum Entry {
    Pending(PendingAuthorization),
    Session(Arc<Session>),
}

impl Entry {
    fn created_at(&self) -> DateTime<Utc> {
        match self {
            Entry::Pending(pending) => pending.created_at,
            Entry::Session(session) => session.created_at,
        }
    }
}

/// Token did not resolve to a live session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid token")]
pub struct UnauthorizedSessionError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions_removed: usize,
    pub pending_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.sessions_removed + self.pending_removed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub sessions: usize,
    pub pending_authorizations: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mint a fresh `state` value and record it as pending.
    pub fn begin_authorization(&self, now: DateTime<Utc>) -> String {
        let state = auth::generate_state_token();
        self.put_pending(PendingAuthorization {
            state: state.clone(),
            created_at: now,
        });
        state
    }

    pub fn put_pending(&self, pending: PendingAuthorization) {
        self.lock()
            .insert(pending.state.clone(), Entry::Pending(pending));
    }

    /// Remove and return the pending entry for `state`. A second call with the
    /// same value returns `None`. Session entries are never touched.
    pub fn take_pending(&self, state: &str) -> Option<PendingAuthorization> {
        let mut entries = self.lock();
        match entries.get(state) {
            Some(Entry::Pending(_)) => match entries.remove(state) {
                Some(Entry::Pending(pending)) => Some(pending),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn insert_session(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        self.lock().insert(
            session.session_token.clone(),
            Entry::Session(Arc::clone(&session)),
        );
        session
    }

    pub fn get(&self, token: &str) -> Option<Entry> {
        self.lock().get(token).cloned()
    }

    pub fn session(&self, token: &str) -> Option<Arc<Session>> {
        match self.lock().get(token) {
            Some(Entry::Session(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Resolve a client-presented token into its session.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Arc<Session>, UnauthorizedSessionError> {
        token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .and_then(|token| self.session(token))
            .ok_or(UnauthorizedSessionError)
    }

    /// Delete a session. Pending entries are not revocable through this path.
    pub fn revoke(&self, token: &str) -> bool {
        let mut entries = self.lock();
        if matches!(entries.get(token), Some(Entry::Session(_))) {
            entries.remove(token);
            return true;
        }
        false
    }

    /// Drop sessions created more than `session_max_age` before `now`, and
    /// pending authorizations older than `pending_max_age`.
    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        session_max_age: Duration,
        pending_max_age: Duration,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        self.lock().retain(|_, entry| {
            let max_age = match entry {
                Entry::Pending(_) => pending_max_age,
                Entry::Session(_) => session_max_age,
            };
            if now - entry.created_at() <= max_age {
                return true;
            }
            match entry {
                Entry::Pending(_) => report.pending_removed += 1,
                Entry::Session(_) => report.sessions_removed += 1,
            }
            false
        });
        report
    }

    pub fn stats(&self) -> StoreStats {
        let entries = self.lock();
        let sessions = entries
            .values()
            .filter(|entry| matches!(entry, Entry::Session(_)))
            .count();
        StoreStats {
            sessions,
            pending_authorizations: entries.len() - sessions,
        }
    }
}

//! Lock-protected map of sessions keyed by info hash.
//!
//! Every accessor takes the lock for the duration of a synchronous closure
//! or clone; nothing holds it across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{Session, SessionState};
use crate::engine::EngineTorrent;
use crate::priority::SessionPlacement;
use crate::torrent::InfoHash;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<InfoHash, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session unless one already exists for the hash.
    ///
    /// Returns `false` and leaves the existing session untouched on
    /// collision.
    pub fn insert(&self, session: Session) -> bool {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.info_hash) {
            return false;
        }
        sessions.insert(session.info_hash, session);
        true
    }

    pub fn contains(&self, info_hash: &InfoHash) -> bool {
        self.sessions.read().contains_key(info_hash)
    }

    pub fn get(&self, info_hash: &InfoHash) -> Option<Session> {
        self.sessions.read().get(info_hash).cloned()
    }

    pub fn is_active(&self, info_hash: &InfoHash) -> bool {
        self.sessions
            .read()
            .get(info_hash)
            .is_some_and(Session::is_active)
    }

    /// Runs `f` on an active session while holding the read lock.
    pub fn with_active<R>(&self, info_hash: &InfoHash, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.sessions
            .read()
            .get(info_hash)
            .filter(|session| session.is_active())
            .map(f)
    }

    /// Mutates a session in place.
    pub fn update<R>(&self, info_hash: &InfoHash, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.write().get_mut(info_hash).map(f)
    }

    /// Moves an active session to `Closing` and returns a copy.
    ///
    /// Returns `None` if the session is missing or already closing, so
    /// only one cascade ever runs per session.
    pub fn begin_close(&self, info_hash: &InfoHash) -> Option<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(info_hash)?;
        if !session.is_active() {
            return None;
        }
        session.state = SessionState::Closing;
        Some(session.clone())
    }

    /// Erases a session, returning it marked `Closed`.
    pub fn remove(&self, info_hash: &InfoHash) -> Option<Session> {
        let mut session = self.sessions.write().remove(info_hash)?;
        session.state = SessionState::Closed;
        Some(session)
    }

    /// Every session, oldest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().values().cloned().collect();
        sessions.sort_by_key(|session| session.created_at);
        sessions
    }

    pub fn active(&self) -> Vec<Session> {
        let mut sessions = self.list();
        sessions.retain(Session::is_active);
        sessions
    }

    /// Placement and engine handle of every active session.
    pub fn schedulable(&self) -> Vec<(SessionPlacement, Arc<dyn EngineTorrent>)> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.is_active())
            .map(|session| (session.placement(), Arc::clone(&session.torrent)))
            .collect()
    }

    pub fn info_hashes(&self) -> Vec<InfoHash> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

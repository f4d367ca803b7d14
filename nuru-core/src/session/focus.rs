//! The "now playing" pointer.

use parking_lot::Mutex;

use super::SessionRegistry;
use crate::NuruError;
use crate::torrent::InfoHash;

/// Owns the process-wide focus. At most one session is focused.
#[derive(Debug, Default)]
pub struct FocusController {
    current: Mutex<Option<InfoHash>>,
}

impl FocusController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<InfoHash> {
        *self.current.lock()
    }

    pub fn is_focused(&self, info_hash: &InfoHash) -> bool {
        self.current.lock().as_ref() == Some(info_hash)
    }

    /// Focuses an active session and returns the previous focus.
    ///
    /// The check and the write happen under the registry's read lock, so a
    /// session cannot be erased in between.
    ///
    /// # Errors
    ///
    /// - `NuruError::SessionNotFound` - No such session, or it is closing
    pub fn set_focus(
        &self,
        registry: &SessionRegistry,
        info_hash: InfoHash,
    ) -> Result<Option<InfoHash>, NuruError> {
        registry
            .with_active(&info_hash, |_| self.current.lock().replace(info_hash))
            .ok_or_else(|| NuruError::session_not_found(info_hash))
    }

    /// Clears focus unconditionally, returning what was focused.
    pub fn clear_focus(&self) -> Option<InfoHash> {
        self.current.lock().take()
    }

    /// Clears focus only if `info_hash` holds it.
    pub fn clear_if_focused(&self, info_hash: &InfoHash) -> bool {
        let mut current = self.current.lock();
        if current.as_ref() == Some(info_hash) {
            *current = None;
            true
        } else {
            false
        }
    }
}

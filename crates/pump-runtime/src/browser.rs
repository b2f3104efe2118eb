//! Non-locking session enumeration.
//!
//! The browser inspects the sessions known to an entity without competing
//! with the session pump for session locks: the handles it returns can fetch
//! metadata lazily but structurally cannot accept or receive, so browsing
//! never affects delivery state.

use crate::client::{EntityClient, SessionState};
use crate::error::PumpError;
use crate::message::{SessionId, Timestamp};
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "browser_tests.rs"]
mod tests;

/// Fixed page size for session enumeration
pub const SESSION_PAGE_SIZE: u32 = 100;

/// Paginated, non-locking enumerator over all sessions known to an entity
pub struct SessionBrowser {
    entity: Arc<dyn EntityClient>,
}

impl SessionBrowser {
    /// Create browser over the given entity
    pub fn new(entity: Arc<dyn EntityClient>) -> Self {
        Self { entity }
    }

    /// Enumerate all sessions, accumulating pages until an empty page is
    /// returned.
    ///
    /// `last_updated` filters out sessions idle since before the given
    /// instant; `None` means all sessions regardless of last activity.
    /// Continuation state is the returned skip cursor plus the last session
    /// id of each page.
    pub async fn get_message_sessions(
        &self,
        last_updated: Option<Timestamp>,
    ) -> Result<Vec<BrowsableSession>, PumpError> {
        let last_updated = last_updated.unwrap_or_else(Timestamp::far_future);
        let mut sessions = Vec::new();
        let mut skip = 0;
        let mut continuation: Option<SessionId> = None;

        loop {
            let page = self
                .entity
                .list_sessions(
                    &last_updated,
                    skip,
                    SESSION_PAGE_SIZE,
                    continuation.as_ref(),
                )
                .await?;

            if page.session_ids.is_empty() {
                break;
            }

            debug!(count = page.session_ids.len(), skip, "session page received");
            skip = page.skip;
            continuation = page.session_ids.last().cloned();
            sessions.extend(
                page.session_ids
                    .into_iter()
                    .map(|id| BrowsableSession::new(id, self.entity.clone())),
            );
        }

        Ok(sessions)
    }
}

/// Lightweight, non-lock-holding handle to a browsed session.
///
/// Fetches session metadata on demand; deliberately exposes no accept or
/// receive surface, since browsing must not take session locks.
pub struct BrowsableSession {
    session_id: SessionId,
    entity: Arc<dyn EntityClient>,
}

impl BrowsableSession {
    fn new(session_id: SessionId, entity: Arc<dyn EntityClient>) -> Self {
        Self { session_id, entity }
    }

    /// Get session ID
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Lazily fetch current session metadata
    pub async fn state(&self) -> Result<SessionState, PumpError> {
        self.entity.session_state(&self.session_id).await
    }
}

impl std::fmt::Debug for BrowsableSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowsableSession")
            .field("session_id", &self.session_id)
            .finish()
    }
}

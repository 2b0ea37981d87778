//! Advertising and discovery sessions. At most one of each at a time.

use std::time::Instant;

use tracing::debug;
use uuid::Uuid;

use crate::endpoint::Strategy;
use crate::error::NearbyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Advertising,
    Discovery,
}

/// An active (or starting) session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: Uuid,
    pub role: Role,
    pub strategy: Strategy,
    pub nickname: String,
    pub started_at: Instant,
}

/// Owns the two session slots. `begin` and `end` are the only mutators.
#[derive(Debug, Default)]
pub struct SessionManager {
    advertising: Option<SessionHandle>,
    discovery: Option<SessionHandle>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot for `role`. Fails if it is taken; the existing
    /// session is left untouched.
    pub fn begin(
        &mut self,
        role: Role,
        strategy: Strategy,
        nickname: &str,
    ) -> Result<SessionHandle, NearbyError> {
        let slot = self.slot_mut(role);
        if slot.is_some() {
            return Err(match role {
                Role::Advertising => NearbyError::AlreadyAdvertising,
                Role::Discovery => NearbyError::AlreadyDiscovering,
            });
        }
        let handle = SessionHandle {
            id: Uuid::new_v4(),
            role,
            strategy,
            nickname: nickname.to_string(),
            started_at: Instant::now(),
        };
        *slot = Some(handle.clone());
        debug!(?role, ?strategy, id = %handle.id, "session started");
        Ok(handle)
    }

    /// Release the slot for `role`, returning the handle if one was active.
    pub fn end(&mut self, role: Role) -> Option<SessionHandle> {
        let ended = self.slot_mut(role).take();
        if let Some(h) = &ended {
            debug!(?role, id = %h.id, "session ended");
        }
        ended
    }

    /// Release only if the slot still holds session `id` (rollback of a failed start).
    pub fn abort(&mut self, role: Role, id: Uuid) -> bool {
        let slot = self.slot_mut(role);
        if slot.as_ref().is_some_and(|h| h.id == id) {
            *slot = None;
            return true;
        }
        false
    }

    pub fn handle(&self, role: Role) -> Option<&SessionHandle> {
        match role {
            Role::Advertising => self.advertising.as_ref(),
            Role::Discovery => self.discovery.as_ref(),
        }
    }

    pub fn is_active(&self, role: Role) -> bool {
        self.handle(role).is_some()
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<SessionHandle> {
        match role {
            Role::Advertising => &mut self.advertising,
            Role::Discovery => &mut self.discovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_advertising_fails_and_keeps_first() {
        let mut sessions = SessionManager::new();
        let first = sessions
            .begin(Role::Advertising, Strategy::Star, "A")
            .unwrap();
        let err = sessions
            .begin(Role::Advertising, Strategy::Cluster, "B")
            .unwrap_err();
        assert!(matches!(err, NearbyError::AlreadyAdvertising));
        assert_eq!(sessions.handle(Role::Advertising), Some(&first));
    }

    #[test]
    fn roles_are_independent() {
        let mut sessions = SessionManager::new();
        sessions
            .begin(Role::Advertising, Strategy::Star, "A")
            .unwrap();
        sessions.begin(Role::Discovery, Strategy::Star, "A").unwrap();
        assert!(matches!(
            sessions.begin(Role::Discovery, Strategy::Star, "A"),
            Err(NearbyError::AlreadyDiscovering)
        ));
        assert!(sessions.end(Role::Discovery).is_some());
        assert!(sessions.is_active(Role::Advertising));
        assert!(!sessions.is_active(Role::Discovery));
        assert!(sessions.end(Role::Discovery).is_none());
    }

    #[test]
    fn abort_only_releases_matching_session() {
        let mut sessions = SessionManager::new();
        let h = sessions
            .begin(Role::Advertising, Strategy::Star, "A")
            .unwrap();
        assert!(!sessions.abort(Role::Advertising, Uuid::new_v4()));
        assert!(sessions.is_active(Role::Advertising));
        assert!(sessions.abort(Role::Advertising, h.id));
        assert!(!sessions.is_active(Role::Advertising));
    }
}

use async_trait::async_trait;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{SessionStore, UserDirectory};
use crate::errors::{StoreError, StoreResult};
use crate::session::{Session, SessionId, UserId, UserRef};

/// Session store kept entirely in process memory
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<BTreeMap<SessionId, Session>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw record lookup, soft-deleted sessions included
    #[cfg(test)]
    pub(crate) async fn stored(&self, id: SessionId) -> Option<Session> {
        self.sessions.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn max_session_id(&self) -> StoreResult<Option<SessionId>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.keys().next_back().copied())
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.entry(session.id) {
            Entry::Occupied(_) => Err(StoreError::DuplicateSession {
                session_id: session.id,
            }),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(())
            }
        }
    }

    async fn save_session(&self, session: &Session) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id).filter(|s| s.is_live()).cloned())
    }

    async fn list_sessions(&self, game_type: Option<&str>) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.is_live())
            .filter(|s| game_type.map_or(true, |name| s.game_type.name == name))
            .cloned()
            .collect())
    }

    async fn list_sessions_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| s.is_live() && s.has_participant(user_id))
            .cloned()
            .collect())
    }
}

/// User directory kept in process memory
#[derive(Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, UserRef>>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_users(users: impl IntoIterator<Item = UserRef>) -> Self {
        let directory = Self::new();
        {
            let mut guard = directory.users.write().await;
            for user in users {
                guard.insert(user.id, user);
            }
        }
        directory
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<UserRef>> {
        let users = self.users.read().await;
        Ok(users.get(id).cloned())
    }

    async fn save_balance(&self, id: &UserId, amount: i64) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(id) {
            Some(user) => {
                user.balance = amount;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_user(&self, user: &UserRef) -> StoreResult<()> {
        let mut users = self.users.write().await;
        users.insert(user.id, user.clone());
        Ok(())
    }
}

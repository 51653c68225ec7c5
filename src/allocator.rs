use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::session::SessionId;
use crate::store::SessionStore;

/// Value the counter falls back to when the store cannot be read at start-up.
/// The first id issued after a fallback is 1.
pub const FALLBACK_LAST_ID: SessionId = 0;

/// Issues unique, strictly increasing session ids for this process
#[derive(Debug)]
pub struct SessionIdAllocator {
    last_id: AtomicU64,
}

impl SessionIdAllocator {
    /// Start counting after `last_id`
    pub fn starting_after(last_id: SessionId) -> Self {
        Self {
            last_id: AtomicU64::new(last_id),
        }
    }

    /// Seed the counter from the highest stored id.
    ///
    /// A failing or slow store does not block start-up: the counter falls back
    /// to [`FALLBACK_LAST_ID`]. Ids issued after a fallback may clash with
    /// stored sessions; callers move the counter on with [`Self::advance_past`].
    pub async fn from_store(store: &dyn SessionStore, timeout: Duration) -> Self {
        let last_id = match tokio::time::timeout(timeout, store.max_session_id()).await {
            Ok(Ok(max)) => max.unwrap_or(0),
            Ok(Err(e)) => {
                log::error!(
                    "Failed to read last session id, defaulting to {}: {}",
                    FALLBACK_LAST_ID,
                    e
                );
                FALLBACK_LAST_ID
            }
            Err(_) => {
                log::error!(
                    "Timed out after {:?} reading last session id, defaulting to {}",
                    timeout,
                    FALLBACK_LAST_ID
                );
                FALLBACK_LAST_ID
            }
        };

        log::info!("Session ids will continue after {}", last_id);
        Self::starting_after(last_id)
    }

    pub fn next_id(&self) -> SessionId {
        self.last_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Make sure the next id is greater than `id`
    pub fn advance_past(&self, id: SessionId) {
        self.last_id.fetch_max(id, Ordering::AcqRel);
    }

    /// Most recently issued id (or the seed if none were issued yet)
    pub fn last_id(&self) -> SessionId {
        self.last_id.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{StoreError, StoreResult};
    use crate::session::{GameType, Session, UserId, UserRef};
    use crate::store::MemorySessionStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Arc;
    use uuid::Uuid;

    struct BrokenStore;

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn max_session_id(&self) -> StoreResult<Option<SessionId>> {
            Err(StoreError::database("connection refused"))
        }
        async fn insert_session(&self, _session: &Session) -> StoreResult<()> {
            Err(StoreError::database("connection refused"))
        }
        async fn save_session(&self, _session: &Session) -> StoreResult<()> {
            Err(StoreError::database("connection refused"))
        }
        async fn find_session(&self, _id: SessionId) -> StoreResult<Option<Session>> {
            Ok(None)
        }
        async fn list_sessions(&self, _game_type: Option<&str>) -> StoreResult<Vec<Session>> {
            Ok(Vec::new())
        }
        async fn list_sessions_for_user(&self, _user_id: &UserId) -> StoreResult<Vec<Session>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_empty_store_starts_at_one() {
        let store = MemorySessionStore::new();
        let allocator = SessionIdAllocator::from_store(&store, Duration::from_secs(1)).await;

        assert_eq!(allocator.next_id(), 1);
        assert_eq!(allocator.next_id(), 2);
        assert_eq!(allocator.last_id(), 2);
    }

    #[tokio::test]
    async fn test_resumes_after_stored_max() {
        let store = MemorySessionStore::new();
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);
        store
            .save_session(&Session::new(41, GameType::new("CoinFlip", 2, 2), alice))
            .await
            .unwrap();

        let allocator = SessionIdAllocator::from_store(&store, Duration::from_secs(1)).await;
        assert_eq!(allocator.next_id(), 42);
    }

    #[tokio::test]
    async fn test_failing_store_falls_back() {
        let allocator = SessionIdAllocator::from_store(&BrokenStore, Duration::from_secs(1)).await;
        assert_eq!(allocator.next_id(), 1);
    }

    #[test]
    fn test_advance_past_never_moves_backwards() {
        let allocator = SessionIdAllocator::starting_after(0);
        assert_eq!(allocator.next_id(), 1);

        allocator.advance_past(7);
        assert_eq!(allocator.next_id(), 8);

        allocator.advance_past(3);
        assert_eq!(allocator.next_id(), 9);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let allocator = Arc::new(SessionIdAllocator::starting_after(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || (0..250).map(|_| allocator.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {id} issued twice");
            }
        }
        assert_eq!(seen.len(), 2_000);
        assert_eq!(allocator.last_id(), 2_000);
    }
}

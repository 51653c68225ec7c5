//! Persistence seams used by the coordinator.
//!
//! `SessionStore` exclusively owns session records. `UserDirectory` stands in
//! for the user service; the coordinator only reads from it.

pub mod memory;
pub mod sqlite;

pub use memory::{MemorySessionStore, MemoryUserDirectory};
pub use sqlite::SqliteStorage;

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::session::{Session, SessionId, UserId, UserRef};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Highest id ever stored, soft-deleted sessions included
    async fn max_session_id(&self) -> StoreResult<Option<SessionId>>;

    /// Store a brand new session. Fails with `StoreError::DuplicateSession`
    /// if any record, soft-deleted or not, already holds the id.
    async fn insert_session(&self, session: &Session) -> StoreResult<()>;

    /// Overwrite an existing session record
    async fn save_session(&self, session: &Session) -> StoreResult<()>;

    /// Look up a live (not soft-deleted) session
    async fn find_session(&self, id: SessionId) -> StoreResult<Option<Session>>;

    /// Live sessions ordered by id, optionally restricted to one game type
    async fn list_sessions(&self, game_type: Option<&str>) -> StoreResult<Vec<Session>>;

    /// Live sessions the user participates in, ordered by id
    async fn list_sessions_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Session>>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<UserRef>>;

    /// Overwrite a balance. Returns `false` when the user is unknown.
    async fn save_balance(&self, id: &UserId, amount: i64) -> StoreResult<bool>;

    async fn upsert_user(&self, user: &UserRef) -> StoreResult<()>;
}

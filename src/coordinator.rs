use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::allocator::SessionIdAllocator;
use crate::broadcaster::Broadcaster;
use crate::catalog::GameCatalog;
use crate::errors::{SessionError, SessionResult, StoreError, StoreResult};
use crate::events::GameEvent;
use crate::resolver::ResolverRegistry;
use crate::session::{GameType, Session, SessionId, SessionStatus, UserId, UserRef};
use crate::store::{SessionStore, UserDirectory};

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SLOW_STORE_WARNING: Duration = Duration::from_millis(500);

/// Attempts at finding a free id before `create_session` gives up
const MAX_ID_CLASH_RETRIES: usize = 3;

/// How strictly `join_session` validates a join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Append unconditionally; capacity is only checked when starting
    #[default]
    Lenient,
    /// Reject duplicate players, full sessions and sessions past the lobby
    Strict,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub join_policy: JoinPolicy,
    /// Upper bound on every store call
    pub store_timeout: Duration,
    /// Store calls slower than this are logged as warnings
    pub slow_store_warning: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            join_policy: JoinPolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            slow_store_warning: DEFAULT_SLOW_STORE_WARNING,
        }
    }
}

/// Everything the coordinator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub users: Arc<dyn UserDirectory>,
    pub catalog: Arc<dyn GameCatalog>,
    pub resolvers: ResolverRegistry,
    pub broadcaster: Arc<dyn Broadcaster>,
}

/// Orchestrates the session lifecycle: create, join, start, end.
///
/// Mutations on one session id are serialised through a per-session lock;
/// reads go straight to the store and may observe a session mid-transition.
pub struct SessionCoordinator {
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserDirectory>,
    catalog: Arc<dyn GameCatalog>,
    resolvers: ResolverRegistry,
    broadcaster: Arc<dyn Broadcaster>,
    allocator: SessionIdAllocator,
    // Only sessions with an operation in flight keep a live lock
    session_locks: std::sync::Mutex<HashMap<SessionId, Weak<Mutex<()>>>>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    /// Build a coordinator whose allocator is seeded from the store
    pub async fn new(collaborators: Collaborators, config: CoordinatorConfig) -> Self {
        let allocator =
            SessionIdAllocator::from_store(collaborators.store.as_ref(), config.store_timeout).await;
        Self::with_allocator(collaborators, allocator, config)
    }

    pub fn with_allocator(
        collaborators: Collaborators,
        allocator: SessionIdAllocator,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store: collaborators.store,
            users: collaborators.users,
            catalog: collaborators.catalog,
            resolvers: collaborators.resolvers,
            broadcaster: collaborators.broadcaster,
            allocator,
            session_locks: std::sync::Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Open a new session with `creator` as its only participant
    pub async fn create_session(
        &self,
        game_type_name: &str,
        creator: &UserId,
    ) -> SessionResult<Session> {
        let game_type = self.catalog.find_game_type(game_type_name).ok_or_else(|| {
            SessionError::GameTypeNotFound {
                name: game_type_name.to_string(),
            }
        })?;
        let creator = self.load_user(creator).await?;
        let session = self.insert_new_session(game_type, creator).await?;

        log::info!(
            "Created {} session {} for {}",
            session.game_type.name,
            session.id,
            session.participants[0].display_name
        );
        self.emit(GameEvent::GameCreated {
            session: session.clone(),
        });

        Ok(session)
    }

    /// Store a fresh session under the next free id. A taken id means the
    /// allocator is behind the store, so it is moved past the stored max.
    async fn insert_new_session(
        &self,
        game_type: GameType,
        creator: UserRef,
    ) -> SessionResult<Session> {
        for _ in 0..MAX_ID_CLASH_RETRIES {
            let session = Session::new(self.allocator.next_id(), game_type.clone(), creator.clone());
            let inserted = self
                .timed_store_call("insert_session", self.store.insert_session(&session))
                .await?;

            match inserted {
                Ok(()) => return Ok(session),
                Err(StoreError::DuplicateSession { session_id }) => {
                    log::warn!("Session id {} is already taken, skipping ahead", session_id);
                    if let Ok(Some(max)) = self
                        .store_call("max_session_id", self.store.max_session_id())
                        .await
                    {
                        self.allocator.advance_past(max);
                    }
                }
                Err(e) => {
                    log::error!("Store call insert_session failed: {}", e);
                    return Err(e.into());
                }
            }
        }

        Err(SessionError::storage_unavailable(format!(
            "no free session id after {} attempts",
            MAX_ID_CLASH_RETRIES
        )))
    }

    /// Append `user` to the session's participants
    pub async fn join_session(&self, session_id: SessionId, user: &UserId) -> SessionResult<Session> {
        let user = self.load_user(user).await?;

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id).await?;
        if self.config.join_policy == JoinPolicy::Strict {
            Self::check_strict_join(&session, &user)?;
        }

        session.participants.push(user.clone());
        self.store_call("save_session", self.store.save_session(&session))
            .await?;

        log::info!(
            "{} joined session {} ({}/{} players)",
            user.display_name,
            session_id,
            session.player_count(),
            session.game_type.max_players
        );
        self.emit(GameEvent::PlayerJoined {
            session_id,
            player: user,
            players: session.player_count(),
        });

        Ok(session)
    }

    fn check_strict_join(session: &Session, user: &UserRef) -> SessionResult<()> {
        if session.status != SessionStatus::Waiting {
            return Err(SessionError::invalid_state(format!(
                "session {} is {}, not accepting players",
                session.id, session.status
            )));
        }
        if session.has_participant(&user.id) {
            return Err(SessionError::invalid_state(format!(
                "{} already joined session {}",
                user.display_name, session.id
            )));
        }
        if session.is_full() {
            return Err(SessionError::invalid_state(format!(
                "session {} is full ({} players)",
                session.id, session.game_type.max_players
            )));
        }
        Ok(())
    }

    /// Resolve the game and mark the session started.
    ///
    /// The outcome is computed before anything is written, so a failing
    /// resolver or store leaves the stored session `waiting`. Events go out
    /// only after the write succeeded.
    pub async fn start_session(&self, session_id: SessionId) -> SessionResult<Session> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let session = self.load_session(session_id).await?;
        if session.status != SessionStatus::Waiting {
            return Err(SessionError::invalid_state(format!(
                "session {} is already {}",
                session_id, session.status
            )));
        }

        let count = session.player_count();
        if !session.game_type.accepts(count) {
            return Err(SessionError::invalid_state(format!(
                "{} needs {} to {} players, session {} has {}",
                session.game_type.name,
                session.game_type.min_players,
                session.game_type.max_players,
                session_id,
                count
            )));
        }

        let outcome = self
            .resolvers
            .resolve(&session.game_type.name, &session.participants)?;

        let mut started = session;
        started.status = SessionStatus::Started;
        started.outcome = Some(outcome.clone());
        self.store_call("save_session", self.store.save_session(&started))
            .await?;

        log::info!(
            "Session {} started, {} wins",
            session_id,
            outcome.winner().display_name
        );
        self.emit(GameEvent::GameStarted {
            session_id,
            players: started.participants.clone(),
        });
        self.emit(GameEvent::GameResult {
            session_id,
            outcome,
        });

        Ok(started)
    }

    /// Close a started session. Ended sessions are soft-deleted.
    pub async fn end_session(&self, session_id: SessionId) -> SessionResult<Session> {
        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load_session(session_id).await?;
        if session.status != SessionStatus::Started {
            return Err(SessionError::invalid_state(format!(
                "session {} is {}, only started sessions can end",
                session_id, session.status
            )));
        }

        session.status = SessionStatus::Ended;
        session.deleted_at = Some(Utc::now());
        self.store_call("save_session", self.store.save_session(&session))
            .await?;

        log::info!("Session {} ended", session_id);
        self.emit(GameEvent::GameEnded { session_id });

        Ok(session)
    }

    /// Live session by id
    pub async fn get_session(&self, session_id: SessionId) -> SessionResult<Session> {
        self.load_session(session_id).await
    }

    /// Participant count, or `None` when the session does not exist
    pub async fn list_players(&self, session_id: SessionId) -> SessionResult<Option<usize>> {
        let session = self
            .store_call("find_session", self.store.find_session(session_id))
            .await?;
        Ok(session.map(|s| s.player_count()))
    }

    pub async fn list_sessions(&self, game_type: Option<&str>) -> SessionResult<Vec<Session>> {
        self.store_call("list_sessions", self.store.list_sessions(game_type))
            .await
    }

    pub async fn list_sessions_for_user(&self, user: &UserId) -> SessionResult<Vec<Session>> {
        self.store_call(
            "list_sessions_for_user",
            self.store.list_sessions_for_user(user),
        )
        .await
    }

    pub fn list_game_types(&self) -> Vec<GameType> {
        self.catalog.game_types()
    }

    pub async fn find_user(&self, user: &UserId) -> SessionResult<Option<UserRef>> {
        self.store_call("find_user", self.users.find_user(user)).await
    }

    async fn load_user(&self, user: &UserId) -> SessionResult<UserRef> {
        self.find_user(user)
            .await?
            .ok_or(SessionError::UserNotFound { user_id: *user })
    }

    async fn load_session(&self, session_id: SessionId) -> SessionResult<Session> {
        self.store_call("find_session", self.store.find_session(session_id))
            .await?
            .ok_or(SessionError::SessionNotFound { session_id })
    }

    /// Lock serialising mutations of one session. The map holds weak
    /// handles, so a lock disappears once its last holder is gone.
    fn session_lock(&self, session_id: SessionId) -> Arc<Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = locks.get(&session_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        locks.insert(session_id, Arc::downgrade(&lock));
        lock
    }

    fn emit(&self, event: GameEvent) {
        self.broadcaster.broadcast(event.name(), event.payload());
    }

    /// Run a store call under the configured timeout
    async fn store_call<T, F>(&self, operation: &str, call: F) -> SessionResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match self.timed_store_call(operation, call).await? {
            Ok(value) => Ok(value),
            Err(e) => {
                log::error!("Store call {} failed: {}", operation, e);
                Err(e.into())
            }
        }
    }

    /// Like `store_call`, but hands the store's own error back to the caller
    async fn timed_store_call<T, F>(
        &self,
        operation: &str,
        call: F,
    ) -> SessionResult<StoreResult<T>>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.config.store_timeout, call).await;

        let elapsed = started.elapsed();
        if elapsed > self.config.slow_store_warning {
            log::warn!("Store call {} ran in {}ms", operation, elapsed.as_millis());
        }

        result.map_err(|_| {
            log::error!(
                "Store call {} timed out after {:?}",
                operation,
                self.config.store_timeout
            );
            SessionError::storage_unavailable(format!(
                "{} timed out after {:?}",
                operation, self.config.store_timeout
            ))
        })
    }
}

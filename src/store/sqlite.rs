use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Params, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::{SessionStore, UserDirectory};
use crate::errors::{StoreError, StoreResult};
use crate::session::{GameType, Outcome, Session, SessionId, SessionStatus, UserId, UserRef};

const SESSION_COLUMNS: &str =
    "id, game_name, min_players, max_players, status, outcome, created_at, deleted_at";

/// SQLite-backed session store and user directory.
///
/// Queries run on tokio's blocking pool, so a caller waiting on the store
/// can give up without the query holding a runtime worker.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub async fn open(db_path: &Path) -> StoreResult<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::database(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let storage = Self::with_connection(Connection::open(db_path)?).await?;
        log::info!("Opened session database at {}", db_path.display());
        Ok(storage)
    }

    pub async fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?).await
    }

    async fn with_connection(conn: Connection) -> StoreResult<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.run(init_schema).await?;
        Ok(storage)
    }

    /// Run `op` against the connection on the blocking pool
    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::database("connection lock poisoned"))?;
            op(&mut guard)
        })
        .await
        .map_err(|e| StoreError::database(format!("storage task failed: {e}")))?
    }
}

fn init_schema(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            balance INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            game_name TEXT NOT NULL,
            min_players INTEGER NOT NULL,
            max_players INTEGER NOT NULL,
            status TEXT NOT NULL,
            outcome TEXT,
            created_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE IF NOT EXISTS session_participants (
            session_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            user_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            balance INTEGER NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id),
            PRIMARY KEY (session_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON session_participants(user_id);",
    )?;

    Ok(())
}

struct SessionRow {
    id: i64,
    game_name: String,
    min_players: i64,
    max_players: i64,
    status: String,
    outcome: Option<String>,
    created_at: i64,
    deleted_at: Option<i64>,
}

fn read_session_row(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        game_name: row.get(1)?,
        min_players: row.get(2)?,
        max_players: row.get(3)?,
        status: row.get(4)?,
        outcome: row.get(5)?,
        created_at: row.get(6)?,
        deleted_at: row.get(7)?,
    })
}

fn timestamp(millis: i64, column: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::corrupt(format!("{column} out of range: {millis}")))
}

fn bound(value: i64, column: &str) -> StoreResult<u32> {
    u32::try_from(value).map_err(|_| StoreError::corrupt(format!("{column} out of range: {value}")))
}

impl SessionRow {
    fn into_session(self, participants: Vec<UserRef>) -> StoreResult<Session> {
        let status = self
            .status
            .parse::<SessionStatus>()
            .map_err(StoreError::corrupt)?;

        let outcome = self
            .outcome
            .map(|json| serde_json::from_str::<Outcome>(&json))
            .transpose()
            .map_err(|e| StoreError::corrupt(format!("outcome of session {}: {}", self.id, e)))?;

        Ok(Session {
            id: self.id as SessionId,
            game_type: GameType {
                name: self.game_name,
                min_players: bound(self.min_players, "min_players")?,
                max_players: bound(self.max_players, "max_players")?,
            },
            participants,
            status,
            outcome,
            created_at: timestamp(self.created_at, "created_at")?,
            deleted_at: self
                .deleted_at
                .map(|millis| timestamp(millis, "deleted_at"))
                .transpose()?,
        })
    }
}

fn load_participants(conn: &Connection, session_id: i64) -> StoreResult<Vec<UserRef>> {
    let mut stmt = conn.prepare(
        "SELECT p.user_id,
                COALESCE(u.display_name, p.display_name),
                COALESCE(u.balance, p.balance)
         FROM session_participants p
         LEFT JOIN users u ON u.id = p.user_id
         WHERE p.session_id = ?1
         ORDER BY p.position",
    )?;

    let rows = stmt.query_map(params![session_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut participants = Vec::new();
    for row in rows {
        let (user_id, display_name, balance) = row?;
        let id = Uuid::parse_str(&user_id)
            .map_err(|e| StoreError::corrupt(format!("participant id '{user_id}': {e}")))?;
        participants.push(UserRef::new(id, display_name, balance));
    }

    Ok(participants)
}

fn query_sessions<P: Params>(conn: &Connection, sql: &str, params: P) -> StoreResult<Vec<Session>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, read_session_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|row| {
            let participants = load_participants(conn, row.id)?;
            row.into_session(participants)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    /// Fail if the id is taken
    Insert,
    Replace,
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

fn write_session(conn: &mut Connection, session: &Session, mode: WriteMode) -> StoreResult<()> {
    let outcome = session
        .outcome
        .as_ref()
        .map(|o| serde_json::to_string(o))
        .transpose()
        .map_err(|e| StoreError::corrupt(format!("outcome of session {}: {}", session.id, e)))?;

    let tx = conn.transaction()?;
    let id = session.id as i64;
    let verb = match mode {
        WriteMode::Insert => "INSERT",
        WriteMode::Replace => "INSERT OR REPLACE",
    };

    let written = tx.execute(
        &format!(
            "{verb} INTO sessions ({SESSION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
        ),
        params![
            id,
            session.game_type.name,
            session.game_type.min_players,
            session.game_type.max_players,
            session.status.to_string(),
            outcome,
            session.created_at.timestamp_millis(),
            session.deleted_at.map(|t| t.timestamp_millis()),
        ],
    );
    match written {
        Err(e) if mode == WriteMode::Insert && is_constraint_violation(&e) => {
            return Err(StoreError::DuplicateSession {
                session_id: session.id,
            });
        }
        written => {
            written?;
        }
    }

    tx.execute(
        "DELETE FROM session_participants WHERE session_id = ?1",
        params![id],
    )?;

    for (position, participant) in session.participants.iter().enumerate() {
        tx.execute(
            "INSERT INTO session_participants
             (session_id, position, user_id, display_name, balance)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                position as i64,
                participant.id.to_string(),
                participant.display_name,
                participant.balance,
            ],
        )?;
    }

    tx.commit()?;
    log::debug!(
        "Saved session {} ({}, {} participants)",
        session.id,
        session.status,
        session.participants.len()
    );
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn max_session_id(&self) -> StoreResult<Option<SessionId>> {
        self.run(|conn| {
            let max: Option<i64> =
                conn.query_row("SELECT MAX(id) FROM sessions", [], |row| row.get(0))?;
            Ok(max.map(|id| id as SessionId))
        })
        .await
    }

    async fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let session = session.clone();
        self.run(move |conn| write_session(conn, &session, WriteMode::Insert))
            .await
    }

    async fn save_session(&self, session: &Session) -> StoreResult<()> {
        let session = session.clone();
        self.run(move |conn| write_session(conn, &session, WriteMode::Replace))
            .await
    }

    async fn find_session(&self, id: SessionId) -> StoreResult<Option<Session>> {
        self.run(move |conn| {
            let sql =
                format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1 AND deleted_at IS NULL");
            let mut sessions = query_sessions(conn, &sql, params![id as i64])?;
            Ok(sessions.pop())
        })
        .await
    }

    async fn list_sessions(&self, game_type: Option<&str>) -> StoreResult<Vec<Session>> {
        let game_type = game_type.map(str::to_string);
        self.run(move |conn| match game_type {
            Some(name) => {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE deleted_at IS NULL AND game_name = ?1 ORDER BY id"
                );
                query_sessions(conn, &sql, params![name])
            }
            None => {
                let sql = format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions WHERE deleted_at IS NULL ORDER BY id"
                );
                query_sessions(conn, &sql, [])
            }
        })
        .await
    }

    async fn list_sessions_for_user(&self, user_id: &UserId) -> StoreResult<Vec<Session>> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE deleted_at IS NULL
                   AND id IN (SELECT session_id FROM session_participants WHERE user_id = ?1)
                 ORDER BY id"
            );
            query_sessions(conn, &sql, params![user_id])
        })
        .await
    }
}

#[async_trait]
impl UserDirectory for SqliteStorage {
    async fn find_user(&self, id: &UserId) -> StoreResult<Option<UserRef>> {
        let id = *id;
        self.run(move |conn| {
            let user = conn
                .query_row(
                    "SELECT display_name, balance FROM users WHERE id = ?1",
                    params![id.to_string()],
                    |row| Ok(UserRef::new(id, row.get::<_, String>(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(user)
        })
        .await
    }

    async fn save_balance(&self, id: &UserId, amount: i64) -> StoreResult<bool> {
        let id = id.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET balance = ?1 WHERE id = ?2",
                params![amount, id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn upsert_user(&self, user: &UserRef) -> StoreResult<()> {
        let user = user.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, balance, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    balance = excluded.balance",
                params![
                    user.id.to_string(),
                    user.display_name,
                    user.balance,
                    Utc::now().timestamp_millis(),
                ],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn coin_flip() -> GameType {
        GameType::new("CoinFlip", 2, 2)
    }

    #[tokio::test]
    async fn test_session_survives_reopen() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("data").join("casino.db");
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);
        let bob = UserRef::new(Uuid::new_v4(), "bob", 5_000);

        {
            let storage = SqliteStorage::open(&db_path).await.unwrap();
            let mut session = Session::new(4, coin_flip(), alice.clone());
            session.participants.push(bob.clone());
            session.status = SessionStatus::Started;
            session.outcome = Some(Outcome::Duel {
                winner: bob.clone(),
                loser: alice.clone(),
            });
            storage.save_session(&session).await.unwrap();
        }

        let storage = SqliteStorage::open(&db_path).await.unwrap();
        let loaded = storage.find_session(4).await.unwrap().unwrap();

        assert_eq!(loaded.game_type, coin_flip());
        assert_eq!(loaded.participants, vec![alice.clone(), bob.clone()]);
        assert_eq!(loaded.status, SessionStatus::Started);
        assert_eq!(loaded.outcome.unwrap().winner(), &bob);
        assert_eq!(storage.max_session_id().await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_duplicate_participants_keep_join_order() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);
        let bob = UserRef::new(Uuid::new_v4(), "bob", 10_000);

        let mut session = Session::new(1, coin_flip(), alice.clone());
        session.participants.push(bob.clone());
        session.participants.push(alice.clone());
        storage.save_session(&session).await.unwrap();

        let loaded = storage.find_session(1).await.unwrap().unwrap();
        let names: Vec<&str> = loaded
            .participants
            .iter()
            .map(|p| p.display_name.as_str())
            .collect();
        assert_eq!(names, vec!["alice", "bob", "alice"]);
    }

    #[tokio::test]
    async fn test_soft_delete_hides_session() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);

        let mut session = Session::new(9, coin_flip(), alice.clone());
        storage.save_session(&session).await.unwrap();
        assert_eq!(storage.list_sessions_for_user(&alice.id).await.unwrap().len(), 1);

        session.status = SessionStatus::Ended;
        session.deleted_at = Some(Utc::now());
        storage.save_session(&session).await.unwrap();

        assert!(storage.find_session(9).await.unwrap().is_none());
        assert!(storage.list_sessions(None).await.unwrap().is_empty());
        assert!(storage.list_sessions_for_user(&alice.id).await.unwrap().is_empty());
        assert_eq!(storage.max_session_id().await.unwrap(), Some(9));
    }

    #[tokio::test]
    async fn test_list_sessions_by_game_type() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);

        storage
            .save_session(&Session::new(1, coin_flip(), alice.clone()))
            .await
            .unwrap();
        storage
            .save_session(&Session::new(2, GameType::new("Dice", 1, 6), alice.clone()))
            .await
            .unwrap();

        let dice = storage.list_sessions(Some("Dice")).await.unwrap();
        assert_eq!(dice.len(), 1);
        assert_eq!(dice[0].id, 2);
        assert_eq!(storage.list_sessions(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_users_round_trip_and_balance() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);

        assert!(storage.find_user(&alice.id).await.unwrap().is_none());
        storage.upsert_user(&alice).await.unwrap();
        assert!(storage.save_balance(&alice.id, 7_550).await.unwrap());
        assert!(!storage.save_balance(&Uuid::new_v4(), 1).await.unwrap());

        let stored = storage.find_user(&alice.id).await.unwrap().unwrap();
        assert_eq!(stored.display_name, "alice");
        assert_eq!(stored.balance, 7_550);
    }

    #[tokio::test]
    async fn test_insert_keeps_ended_record_on_id_clash() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);
        let bob = UserRef::new(Uuid::new_v4(), "bob", 10_000);

        let mut ended = Session::new(2, coin_flip(), alice.clone());
        ended.participants.push(bob.clone());
        ended.status = SessionStatus::Ended;
        ended.deleted_at = Some(Utc::now());
        storage.insert_session(&ended).await.unwrap();

        let err = storage
            .insert_session(&Session::new(2, coin_flip(), bob.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSession { session_id: 2 }));

        let conn = storage.conn.lock().unwrap();
        let (status, deleted): (String, Option<i64>) = conn
            .query_row(
                "SELECT status, deleted_at FROM sessions WHERE id = 2",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "ended");
        assert!(deleted.is_some());
        assert_eq!(load_participants(&conn, 2).unwrap(), vec![alice, bob]);
    }

    #[tokio::test]
    async fn test_busy_connection_lets_the_caller_time_out() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let conn = Arc::clone(&storage.conn);
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();

        // Another writer holds the connection for a while
        let holder = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(500));
        });
        locked_rx.recv().unwrap();

        let started = Instant::now();
        let result = tokio::time::timeout(Duration::from_millis(50), storage.find_session(1)).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_millis(400));

        holder.join().unwrap();
        assert!(storage.find_session(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_database_has_no_max_id() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert_eq!(storage.max_session_id().await.unwrap(), None);
    }
}

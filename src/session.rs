use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Numeric session identifier, unique and increasing for a process lifetime
pub type SessionId = u64;

/// Opaque user identifier handed to us by the user directory
pub type UserId = Uuid;

/// Immutable catalog entry describing a kind of game
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameType {
    pub name: String,
    pub min_players: u32,
    pub max_players: u32,
}

impl GameType {
    pub fn new(name: impl Into<String>, min_players: u32, max_players: u32) -> Self {
        Self {
            name: name.into(),
            min_players,
            max_players,
        }
    }

    /// Whether `count` participants is enough, and not too many, to start
    pub fn accepts(&self, count: usize) -> bool {
        let count = count as u64;
        count >= u64::from(self.min_players) && count <= u64::from(self.max_players)
    }
}

/// The parts of a user the coordinator reads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
    /// Balance in cents
    pub balance: i64,
}

impl UserRef {
    pub fn new(id: UserId, display_name: impl Into<String>, balance: i64) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            balance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    Started,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Started => write!(f, "started"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(SessionStatus::Waiting),
            "started" => Ok(SessionStatus::Started),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

/// Result produced by an outcome resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outcome {
    /// One winner, one loser
    Duel { winner: UserRef, loser: UserRef },
}

impl Outcome {
    pub fn winner(&self) -> &UserRef {
        match self {
            Outcome::Duel { winner, .. } => winner,
        }
    }
}

/// One game instance, from lobby to result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub game_type: GameType,
    /// Ordered by join time
    pub participants: Vec<UserRef>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId, game_type: GameType, creator: UserRef) -> Self {
        Self {
            id,
            game_type,
            participants: vec![creator],
            status: SessionStatus::Waiting,
            outcome: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    pub fn player_count(&self) -> usize {
        self.participants.len()
    }

    pub fn has_participant(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| &p.id == user_id)
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() as u64 >= u64::from(self.game_type.max_players)
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

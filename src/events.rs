use serde_json::{json, Value};

use crate::session::{Outcome, Session, SessionId, UserRef};

/// State changes the coordinator announces to connected clients
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// A new session is waiting for players
    GameCreated { session: Session },

    PlayerJoined {
        session_id: SessionId,
        player: UserRef,
        players: usize,
    },

    GameStarted {
        session_id: SessionId,
        players: Vec<UserRef>,
    },

    /// Resolver result; the payload is the outcome itself
    GameResult {
        session_id: SessionId,
        outcome: Outcome,
    },

    GameEnded { session_id: SessionId },
}

impl GameEvent {
    /// Event name clients subscribe to
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::GameCreated { .. } => "gameCreated",
            GameEvent::PlayerJoined { .. } => "playerJoined",
            GameEvent::GameStarted { .. } => "gameStarted",
            GameEvent::GameResult { .. } => "end",
            GameEvent::GameEnded { .. } => "gameEnded",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            GameEvent::GameCreated { session } => json!({ "session": session }),
            GameEvent::PlayerJoined {
                session_id,
                player,
                players,
            } => json!({
                "gameid": session_id,
                "player": player,
                "players": players,
            }),
            GameEvent::GameStarted {
                session_id,
                players,
            } => json!({ "gameid": session_id, "players": players }),
            GameEvent::GameResult { outcome, .. } => json!(outcome),
            GameEvent::GameEnded { session_id } => json!({ "gameid": session_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_result_event_is_named_end_and_carries_only_the_outcome() {
        let alice = UserRef::new(Uuid::new_v4(), "alice", 10_000);
        let bob = UserRef::new(Uuid::new_v4(), "bob", 10_000);
        let event = GameEvent::GameResult {
            session_id: 5,
            outcome: Outcome::Duel {
                winner: alice.clone(),
                loser: bob.clone(),
            },
        };

        assert_eq!(event.name(), "end");
        let payload = event.payload();
        let keys: Vec<&String> = payload.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(payload["winner"]["id"], alice.id.to_string());
        assert_eq!(payload["loser"]["id"], bob.id.to_string());
    }

    #[test]
    fn test_join_payload_reports_count() {
        let bob = UserRef::new(Uuid::new_v4(), "bob", 10_000);
        let event = GameEvent::PlayerJoined {
            session_id: 2,
            player: bob,
            players: 2,
        };

        assert_eq!(event.name(), "playerJoined");
        assert_eq!(event.payload()["players"], 2);
        assert_eq!(event.payload()["gameid"], 2);
    }
}

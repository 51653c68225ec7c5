use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::catalog::COIN_FLIP;
use crate::errors::{SessionError, SessionResult};
use crate::session::{Outcome, UserRef};

/// Turns a participant list into a result
pub trait OutcomeResolver: Send + Sync {
    fn resolve(&self, participants: &[UserRef]) -> SessionResult<Outcome>;
}

/// Fair coin between exactly two players
pub struct CoinFlip {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl CoinFlip {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic flips, for simulations and tests
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(XorShiftRng::seed_from_u64(seed))
    }

    pub fn with_rng(rng: impl RngCore + Send + 'static) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    fn flip(&self) -> bool {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.gen_bool(0.5)
    }
}

impl Default for CoinFlip {
    fn default() -> Self {
        Self::new()
    }
}

impl OutcomeResolver for CoinFlip {
    fn resolve(&self, participants: &[UserRef]) -> SessionResult<Outcome> {
        let [first, second] = participants else {
            return Err(SessionError::invalid_state(format!(
                "coin flip needs exactly 2 players, got {}",
                participants.len()
            )));
        };

        let (winner, loser) = if self.flip() {
            (first, second)
        } else {
            (second, first)
        };

        Ok(Outcome::Duel {
            winner: winner.clone(),
            loser: loser.clone(),
        })
    }
}

/// Maps game-type names to their resolver
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn OutcomeResolver>>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in game, seeded when `seed` is given
    pub fn with_defaults(seed: Option<u64>) -> Self {
        let coin_flip = match seed {
            Some(seed) => CoinFlip::seeded(seed),
            None => CoinFlip::new(),
        };

        let mut registry = Self::new();
        registry.register(COIN_FLIP, Arc::new(coin_flip));
        registry
    }

    /// Register (or replace) the resolver for a game type
    pub fn register(&mut self, game_type: impl Into<String>, resolver: Arc<dyn OutcomeResolver>) {
        self.resolvers.insert(game_type.into(), resolver);
    }

    pub fn supports(&self, game_type: &str) -> bool {
        self.resolvers.contains_key(game_type)
    }

    pub fn resolve(&self, game_type: &str, participants: &[UserRef]) -> SessionResult<Outcome> {
        let resolver = self
            .resolvers
            .get(game_type)
            .ok_or_else(|| SessionError::unsupported_game_type(game_type))?;
        resolver.resolve(participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use uuid::Uuid;

    fn players(names: &[&str]) -> Vec<UserRef> {
        names
            .iter()
            .map(|name| UserRef::new(Uuid::new_v4(), *name, 10_000))
            .collect()
    }

    #[test]
    fn test_coin_flip_picks_from_participants() {
        let resolver = CoinFlip::seeded(7);
        let pair = players(&["alice", "bob"]);

        for _ in 0..50 {
            let Outcome::Duel { winner, loser } = resolver.resolve(&pair).unwrap();
            assert_ne!(winner, loser);
            assert!(pair.contains(&winner));
            assert!(pair.contains(&loser));
        }
    }

    #[test]
    fn test_coin_flip_is_roughly_fair() {
        let resolver = CoinFlip::seeded(2024);
        let pair = players(&["alice", "bob"]);
        let trials = 10_000;

        let alice_wins = (0..trials)
            .filter(|_| resolver.resolve(&pair).unwrap().winner() == &pair[0])
            .count();

        let ratio = alice_wins as f64 / trials as f64;
        assert!((0.47..=0.53).contains(&ratio), "alice won {ratio:.3} of flips");
    }

    #[test]
    fn test_coin_flip_rejects_wrong_player_count() {
        let resolver = CoinFlip::seeded(1);

        for count in [0, 1, 3] {
            let names: Vec<&str> = ["a", "b", "c"].into_iter().take(count).collect();
            let err = resolver.resolve(&players(&names)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidState);
        }
    }

    #[test]
    fn test_same_seed_same_results() {
        let pair = players(&["alice", "bob"]);
        let first = CoinFlip::seeded(99);
        let second = CoinFlip::seeded(99);

        for _ in 0..20 {
            assert_eq!(first.resolve(&pair).unwrap(), second.resolve(&pair).unwrap());
        }
    }

    #[test]
    fn test_registry_dispatch() {
        let registry = ResolverRegistry::with_defaults(Some(3));
        let pair = players(&["alice", "bob"]);

        assert!(registry.supports(COIN_FLIP));
        assert!(registry.resolve(COIN_FLIP, &pair).is_ok());

        let err = registry.resolve("Roulette", &pair).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedGameType);
    }

    #[test]
    fn test_registry_accepts_new_games() {
        struct FirstPlayerWins;

        impl OutcomeResolver for FirstPlayerWins {
            fn resolve(&self, participants: &[UserRef]) -> SessionResult<Outcome> {
                Ok(Outcome::Duel {
                    winner: participants[0].clone(),
                    loser: participants[participants.len() - 1].clone(),
                })
            }
        }

        let mut registry = ResolverRegistry::new();
        registry.register("HighCard", Arc::new(FirstPlayerWins));
        let trio = players(&["alice", "bob", "carol"]);

        let outcome = registry.resolve("HighCard", &trio).unwrap();
        assert_eq!(outcome.winner(), &trio[0]);
    }
}

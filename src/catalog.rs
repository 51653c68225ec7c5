use std::collections::HashMap;

use crate::errors::CatalogError;
use crate::session::GameType;

/// Name of the built-in two-player game
pub const COIN_FLIP: &str = "CoinFlip";

/// Read-only lookup of game types by name
pub trait GameCatalog: Send + Sync {
    fn find_game_type(&self, name: &str) -> Option<GameType>;

    /// All entries, sorted by name
    fn game_types(&self) -> Vec<GameType>;
}

/// Catalog fixed at start-up
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, GameType>,
}

impl StaticCatalog {
    pub fn new(game_types: impl IntoIterator<Item = GameType>) -> Result<Self, CatalogError> {
        let mut entries = HashMap::new();
        for game_type in game_types {
            if game_type.max_players < 1 || game_type.min_players > game_type.max_players {
                return Err(CatalogError::InvalidBounds {
                    name: game_type.name,
                    min_players: game_type.min_players,
                    max_players: game_type.max_players,
                });
            }
            if entries.contains_key(&game_type.name) {
                return Err(CatalogError::DuplicateGameType {
                    name: game_type.name,
                });
            }
            entries.insert(game_type.name.clone(), game_type);
        }
        Ok(Self { entries })
    }

    /// The catalog the server ships with: a single two-player coin flip
    pub fn with_defaults() -> Self {
        let mut entries = HashMap::new();
        entries.insert(COIN_FLIP.to_string(), GameType::new(COIN_FLIP, 2, 2));
        Self { entries }
    }
}

impl GameCatalog for StaticCatalog {
    fn find_game_type(&self, name: &str) -> Option<GameType> {
        self.entries.get(name).cloned()
    }

    fn game_types(&self) -> Vec<GameType> {
        let mut types: Vec<GameType> = self.entries.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        types
    }
}

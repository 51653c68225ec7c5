use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::broadcaster::DEFAULT_CAPACITY;
use crate::coordinator::{CoordinatorConfig, JoinPolicy, DEFAULT_SLOW_STORE_WARNING};

/// Server settings, from the command line or `CASINO_*` environment variables
#[derive(Debug, Clone, Parser)]
#[command(name = "casino", version, about = "Game-session server for coin-flip lobbies")]
pub struct ServerConfig {
    /// Address the HTTP and WebSocket listener binds to
    #[arg(long, env = "CASINO_BIND", default_value = "0.0.0.0:3001")]
    pub bind: SocketAddr,

    /// SQLite database file; sessions are kept in memory when omitted
    #[arg(long, env = "CASINO_DATABASE")]
    pub database: Option<PathBuf>,

    /// `strict` rejects duplicate joins and joins to full sessions
    #[arg(long, env = "CASINO_JOIN_POLICY", value_enum, default_value_t = JoinPolicy::Lenient)]
    pub join_policy: JoinPolicy,

    /// Timeout applied to every storage call, in milliseconds
    #[arg(long, env = "CASINO_STORE_TIMEOUT_MS", default_value_t = 5_000)]
    pub store_timeout_ms: u64,

    /// Events buffered per client before a slow client starts skipping
    #[arg(long, env = "CASINO_BROADCAST_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub broadcast_capacity: usize,

    /// Seed for the game resolvers (reproducible results)
    #[arg(long, env = "CASINO_SEED")]
    pub seed: Option<u64>,

    /// Register the demo users alice and bob at start-up
    #[arg(long, env = "CASINO_DEMO_USERS")]
    pub demo_users: bool,
}

impl ServerConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            join_policy: self.join_policy,
            store_timeout: self.store_timeout(),
            slow_store_warning: DEFAULT_SLOW_STORE_WARNING,
        }
    }

    /// In-memory, seeded configuration bound to an ephemeral port
    pub fn for_tests() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            database: None,
            join_policy: JoinPolicy::Lenient,
            store_timeout_ms: 1_000,
            broadcast_capacity: 64,
            seed: Some(42),
            demo_users: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["casino"]).unwrap();

        assert_eq!(config.bind.port(), 3001);
        assert!(config.database.is_none());
        assert_eq!(config.join_policy, JoinPolicy::Lenient);
        assert_eq!(config.coordinator_config().store_timeout, Duration::from_secs(5));
        assert!(!config.demo_users);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = ServerConfig::try_parse_from([
            "casino",
            "--bind",
            "127.0.0.1:8080",
            "--database",
            "/tmp/casino.db",
            "--join-policy",
            "strict",
            "--store-timeout-ms",
            "250",
            "--seed",
            "7",
        ])
        .unwrap();

        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.database, Some(PathBuf::from("/tmp/casino.db")));
        assert_eq!(config.join_policy, JoinPolicy::Strict);
        assert_eq!(config.store_timeout(), Duration::from_millis(250));
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_rejects_unknown_join_policy() {
        assert!(ServerConfig::try_parse_from(["casino", "--join-policy", "loose"]).is_err());
    }
}

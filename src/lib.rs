// Casino Server Library - Core Module Organization
//
// This file serves as the central organization point for the game-session
// server, exporting all the necessary modules and types.

// Data model and errors
pub mod errors;
pub mod events;
pub mod session;

// Session coordination
pub mod allocator;
pub mod broadcaster;
pub mod catalog;
pub mod coordinator;
pub mod resolver;
pub mod store;

// Server implementation
pub mod api;
pub mod config;
pub mod server;
pub mod websocket_service;

// Re-export common types for convenient access
pub use crate::allocator::SessionIdAllocator;
pub use crate::broadcaster::{BroadcastEvent, Broadcaster, ChannelBroadcaster};
pub use crate::catalog::{GameCatalog, StaticCatalog, COIN_FLIP};
pub use crate::config::ServerConfig;
pub use crate::coordinator::{Collaborators, CoordinatorConfig, JoinPolicy, SessionCoordinator};
pub use crate::errors::{ErrorKind, SessionError, SessionResult, StoreError, StoreResult};
pub use crate::events::GameEvent;
pub use crate::resolver::{CoinFlip, OutcomeResolver, ResolverRegistry};
pub use crate::server::{AppState, ServerError};
pub use crate::session::{GameType, Outcome, Session, SessionId, SessionStatus, UserId, UserRef};
pub use crate::store::{MemorySessionStore, MemoryUserDirectory, SessionStore, SqliteStorage, UserDirectory};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::api;
use crate::broadcaster::ChannelBroadcaster;
use crate::catalog::StaticCatalog;
use crate::config::ServerConfig;
use crate::coordinator::{Collaborators, SessionCoordinator};
use crate::errors::StoreError;
use crate::resolver::ResolverRegistry;
use crate::session::UserRef;
use crate::store::{MemorySessionStore, MemoryUserDirectory, SessionStore, SqliteStorage, UserDirectory};
use crate::websocket_service::WebSocketService;

/// Fixed ids for the demo users, so a local client can act as them
pub const DEMO_ALICE: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0a11);
pub const DEMO_BOB: Uuid = Uuid::from_u128(0x0000_0000_0000_4000_8000_0000_0000_0b0b);

/// Starting balance of a demo user, in cents
const DEMO_BALANCE: i64 = 10_000;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    Bind(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub websocket: WebSocketService,
}

impl AppState {
    /// Wire the coordinator and its collaborators from configuration
    pub async fn build(config: &ServerConfig) -> Result<Self, ServerError> {
        let (store, users): (Arc<dyn SessionStore>, Arc<dyn UserDirectory>) =
            match &config.database {
                Some(path) => {
                    let storage = Arc::new(SqliteStorage::open(path).await?);
                    let store: Arc<dyn SessionStore> = storage.clone();
                    let users: Arc<dyn UserDirectory> = storage;
                    (store, users)
                }
                None => {
                    log::warn!("No database configured, sessions will not survive a restart");
                    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
                    let users: Arc<dyn UserDirectory> = Arc::new(MemoryUserDirectory::new());
                    (store, users)
                }
            };

        if config.demo_users {
            for user in demo_users() {
                users.upsert_user(&user).await?;
                log::info!("Registered demo user {} ({})", user.display_name, user.id);
            }
        }

        let broadcaster = Arc::new(ChannelBroadcaster::new(config.broadcast_capacity));
        let coordinator = SessionCoordinator::new(
            Collaborators {
                store,
                users,
                catalog: Arc::new(StaticCatalog::with_defaults()),
                resolvers: ResolverRegistry::with_defaults(config.seed),
                broadcaster: broadcaster.clone(),
            },
            config.coordinator_config(),
        )
        .await;

        Ok(Self {
            coordinator: Arc::new(coordinator),
            websocket: WebSocketService::new(broadcaster),
        })
    }
}

pub fn demo_users() -> Vec<UserRef> {
    vec![
        UserRef::new(DEMO_ALICE, "alice", DEMO_BALANCE),
        UserRef::new(DEMO_BOB, "bob", DEMO_BALANCE),
    ]
}

/// Bind the listener and serve until the process is stopped
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let state = AppState::build(&config).await?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    log::info!("Casino server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

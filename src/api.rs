use axum::extract::{FromRequestParts, Path, Query, State, WebSocketUpgrade};
use axum::http::request::Parts;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::errors::{ErrorKind, SessionError};
use crate::server::AppState;
use crate::session::{GameType, Session, SessionId, UserId};

/// Header carrying the authenticated caller's user id
pub const USER_HEADER: &str = "x-user-id";

// Request / response bodies

#[derive(Debug, Deserialize)]
pub struct NewGameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct GameIdRequest {
    pub gameid: SessionId,
}

#[derive(Debug, Deserialize)]
pub struct SessionFilter {
    pub game: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PlayersResponse {
    pub players: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

/// Coordinator failure rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::UnsupportedGameType => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        } else {
            log::debug!("Request rejected: {}", self.0);
        }

        let body = ErrorBody {
            kind,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The authenticated caller, resolved from the `x-user-id` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub UserId);

impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| SessionError::unauthenticated(format!("missing {USER_HEADER} header")))?;

        let user_id = header
            .to_str()
            .ok()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
            .ok_or_else(|| SessionError::unauthenticated(format!("malformed {USER_HEADER} header")))?;

        match state.coordinator.find_user(&user_id).await? {
            Some(_) => Ok(Caller(user_id)),
            None => Err(SessionError::Forbidden {
                details: format!("unknown user {user_id}"),
            }
            .into()),
        }
    }
}

// Handlers

async fn health() -> &'static str {
    "Hello from the casino backend!"
}

pub async fn new_game(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(body): Json<NewGameRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.coordinator.create_session(&body.name, &user).await?;
    Ok(Json(session))
}

pub async fn join_game(
    State(state): State<AppState>,
    Caller(user): Caller,
    Json(body): Json<GameIdRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.coordinator.join_session(body.gameid, &user).await?;
    Ok(Json(session))
}

pub async fn start_game(
    State(state): State<AppState>,
    _caller: Caller,
    Json(body): Json<GameIdRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.coordinator.start_session(body.gameid).await?;
    Ok(Json(session))
}

pub async fn end_game(
    State(state): State<AppState>,
    _caller: Caller,
    Json(body): Json<GameIdRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.coordinator.end_session(body.gameid).await?;
    Ok(Json(session))
}

pub async fn list_players(
    State(state): State<AppState>,
    _caller: Caller,
    Json(body): Json<GameIdRequest>,
) -> Result<Json<PlayersResponse>, ApiError> {
    let players = state.coordinator.list_players(body.gameid).await?;
    Ok(Json(PlayersResponse { players }))
}

pub async fn list_game_types(State(state): State<AppState>) -> Json<Vec<GameType>> {
    Json(state.coordinator.list_game_types())
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let sessions = state.coordinator.list_sessions(filter.game.as_deref()).await?;
    Ok(Json(sessions))
}

pub async fn get_game(
    State(state): State<AppState>,
    Path(gameid): Path<SessionId>,
) -> Result<Json<Session>, ApiError> {
    let session = state.coordinator.get_session(gameid).await?;
    Ok(Json(session))
}

pub async fn current_games(
    State(state): State<AppState>,
    Caller(user): Caller,
) -> Result<Json<Vec<Session>>, ApiError> {
    let sessions = state.coordinator.list_sessions_for_user(&user).await?;
    Ok(Json(sessions))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let service = state.websocket.clone();
    ws.on_upgrade(move |socket| async move { service.handle_connection(socket).await })
}

/// Build the HTTP + WebSocket router
pub fn router(state: AppState) -> Router {
    // Browser front end is served from another origin
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/games", get(list_game_types))
        .route("/games/new", post(new_game))
        .route("/games/join", post(join_game))
        .route("/games/start", post(start_game))
        .route("/games/end", post(end_game))
        .route("/games/players", post(list_players))
        .route("/games/sessions", get(list_sessions))
        .route("/games/current", get(current_games))
        .route("/games/{gameid}", get(get_game))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(cors)
}

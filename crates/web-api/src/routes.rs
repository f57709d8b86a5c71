use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::warn;

use application::ApplicationError;
use domain::{Channel, ChannelName, ChatEvent};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

#[derive(Debug, Deserialize)]
struct CreateChannelPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/channels", post(create_channel))
        .route("/channels/{channel}/history", get(get_history))
        .route("/ws/{channel}", get(websocket_upgrade))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

fn parse_channel(raw: String) -> Result<ChannelName, ApiError> {
    ChannelName::parse(raw).map_err(|err| ApiError::from(ApplicationError::from(err)))
}

async fn create_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateChannelPayload>,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    let claims = state.jwt_service.extract_claims(&headers, None)?;
    let identity = state.resolve_identity(&claims).await?;
    let name = parse_channel(payload.name)?;

    let channel = state.relay.registry.create_channel(&name, &identity).await?;
    if let Err(err) = state.relay.consumers.ensure_channel(&name).await {
        warn!(channel = %name, error = %err, "启动频道消费任务失败");
    }

    Ok((StatusCode::CREATED, Json(channel)))
}

async fn get_history(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<Vec<ChatEvent>>, ApiError> {
    let channel = parse_channel(channel)?;
    if state
        .relay
        .channels
        .find_by_name(&channel)
        .await
        .map_err(ApplicationError::from)?
        .is_none()
    {
        return Err(ApplicationError::ChannelNotFound(channel.to_string()).into());
    }

    let events = state.relay.history.history(&channel).await?;
    Ok(Json(events))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let channel = parse_channel(channel)?;
    let claims = state
        .jwt_service
        .extract_claims(&headers, query.token.as_deref())?;
    let identity = state.resolve_identity(&claims).await?;

    Ok(ws.on_upgrade(move |socket| {
        WebSocketConnection::new(socket, state, identity, channel).run()
    }))
}

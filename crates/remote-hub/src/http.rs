use std::sync::Arc;

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use remote_proto::protocol::{
    DeviceSummary, RenameRequest, RenameResponse, DEVICES_PATH, RENAME_PATH, WS_PATH,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::core::HubHandle;
use crate::identity::{session_token, IdentityProvider, SessionIdentity};
use crate::socket::{handle_socket, reject_socket};

const MAX_DEVICE_NAME: usize = 50;

#[derive(Clone)]
pub struct HttpState {
    pub hub: HubHandle,
    pub identity: Arc<dyn IdentityProvider>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No session")]
    Unauthorized,
    #[error("Device name must be 1-50 characters")]
    InvalidName,
    #[error("hub unavailable: {0}")]
    Hub(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Hub(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidName => StatusCode::BAD_REQUEST,
            ApiError::Hub(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route(WS_PATH, get(ws_upgrade))
        .route(DEVICES_PATH, get(list_devices))
        .route(RENAME_PATH, post(rename_device))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("Hub listening on http://{}", addr);

        if let Err(e) = serve(listener, state).await {
            error!("HTTP server error: {}", e);
        }
    })
}

/// Serve the hub on an already bound listener.
pub async fn serve(listener: TcpListener, state: HttpState) -> std::io::Result<()> {
    axum::serve(listener, router(state)).await
}

fn caller(state: &HttpState, headers: &HeaderMap) -> Result<(String, SessionIdentity), ApiError> {
    let token = session_token(headers, None).ok_or(ApiError::Unauthorized)?;
    let identity = state
        .identity
        .resolve(&token)
        .ok_or(ApiError::Unauthorized)?;
    Ok((token, identity))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<HttpState>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Response {
    let identity = match session_token(&headers, query.token.as_deref()) {
        None => Err("No session"),
        Some(token) => state.identity.resolve(&token).ok_or("Invalid session"),
    };
    let hub = state.hub.clone();

    ws.on_upgrade(move |socket| async move {
        match identity {
            Ok(identity) => handle_socket(socket, identity, hub).await,
            Err(reason) => reject_socket(socket, reason).await,
        }
    })
}

async fn list_devices(
    State(state): State<HttpState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DeviceSummary>>, ApiError> {
    let (_, identity) = caller(&state, &headers)?;
    let devices = state.hub.list_devices(identity).await?;
    Ok(Json(devices))
}

async fn rename_device(
    State(state): State<HttpState>,
    headers: HeaderMap,
    Json(body): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, ApiError> {
    let (token, identity) = caller(&state, &headers)?;
    let name = body.device_name.trim().to_string();
    if name.is_empty() || name.chars().count() > MAX_DEVICE_NAME {
        return Err(ApiError::InvalidName);
    }

    state.identity.rename(&token, &name);
    if !state.hub.rename(identity, name.clone()).await? {
        // Name is stored for the next connect even when offline.
        info!("renamed offline device to {:?}", name);
    }
    Ok(Json(RenameResponse {
        ok: true,
        device_name: name,
    }))
}

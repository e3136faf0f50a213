pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, Request, State, WebSocketUpgrade},
    http::HeaderMap,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{Span, debug, debug_span, warn};

use murmur_api::auth::{self, AppState, AppStateInner};
use murmur_api::error::ApiError;
use murmur_api::mailer::Mailer;
use murmur_api::middleware::{bearer_token, require_auth};
use murmur_api::token;
use murmur_db::Database;
use murmur_gateway::Gateway;
use murmur_gateway::connection;
use murmur_types::ChatError;

use crate::config::Config;

#[derive(Clone)]
pub struct ServerState {
    pub auth: AppState,
    pub gateway: Gateway,
    pub ws_require_auth: bool,
}

impl ServerState {
    /// Wire the auth state and start the gateway hub. Must be called inside a
    /// Tokio runtime.
    pub fn new(db: Arc<Database>, config: &Config, mailer: Arc<dyn Mailer>) -> Self {
        let auth: AppState = Arc::new(AppStateInner {
            db: db.clone(),
            jwt_secret: config.jwt_secret.clone(),
            mailer,
        });

        Self {
            auth,
            gateway: Gateway::start(db, config.gateway.clone()),
            ws_require_auth: config.ws_require_auth,
        }
    }
}

pub fn app(state: ServerState) -> Router {
    let public_routes = Router::new()
        .route("/", get(auth::hello))
        .route("/v1/auth/users/create", post(auth::register))
        .route("/v1/auth/users/verify-email", post(auth::verify_email))
        .route("/v1/auth/users/send-email", post(auth::send_email))
        .route("/v1/auth/users/login", post(auth::login))
        .with_state(state.auth.clone());

    let protected_routes = Router::new()
        .route("/v1/auth/users/me", get(auth::me))
        .layer(middleware::from_fn_with_state(state.auth.clone(), require_auth))
        .with_state(state.auth.clone());

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
}

/// Request span carrying only the path. The query string can hold a bearer
/// token (`/ws?token=`) and must never reach the logs.
fn request_span(req: &Request) -> Span {
    debug_span!("request", method = %req.method(), path = %req.uri().path())
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// Upgrade to the gateway. A token, from `?token=` or a bearer header, binds
/// the socket to its user; a bad token is refused before the upgrade.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .or_else(|| bearer_token(&headers));

    let user_id = match token {
        Some(token) => match token::verify(&state.auth.jwt_secret, token) {
            Ok(claims) => Some(claims.sub),
            Err(e) => {
                debug!("Rejected gateway upgrade: {}", e);
                return ApiError(e).into_response();
            }
        },
        None if state.ws_require_auth => {
            return ApiError(ChatError::Unauthorized("missing bearer token".into())).into_response();
        }
        None => None,
    };

    let gateway = state.gateway.clone();
    ws.on_failed_upgrade(|e| warn!("WebSocket upgrade failed: {}", e))
        .on_upgrade(move |socket| connection::handle_connection(socket, gateway, user_id))
}

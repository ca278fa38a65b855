use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::ErrorResponse;
use crate::services::auth_service::{get_auth_token, user_id_from_token};
use crate::state::AppState;
use crate::ws::session::{run_reader, run_writer};
use crate::ws::CloseReason;

/// How long the surviving loop gets to finish once its peer loop ended
const LINGER: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

/// WebSocket upgrade endpoint
pub async fn websocket_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match identify(&state.config, &params, &headers) {
        Ok(user_id) => user_id,
        Err(rejection) => return rejection.into_response(),
    };

    info!(user_id = %user_id, "New WebSocket connection attempt");
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

/// Work out who is connecting. With a JWT secret configured only a valid
/// token counts; otherwise the `user_id` query parameter is trusted.
fn identify(
    config: &Config,
    params: &ConnectParams,
    headers: &HeaderMap,
) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    if let Some(secret) = &config.auth_jwt_secret {
        let token = match params.token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => token.to_string(),
            None => get_auth_token(headers).map_err(|e| ErrorResponse::with_status(StatusCode::BAD_REQUEST, e))?,
        };
        return user_id_from_token(&token, secret).map_err(|e| {
            warn!("Rejecting WebSocket connection: {}", e);
            ErrorResponse::with_status(StatusCode::UNAUTHORIZED, e)
        });
    }

    match params.user_id.as_deref().map(str::trim) {
        Some(user_id) if !user_id.is_empty() => Ok(user_id.to_string()),
        _ => Err(ErrorResponse::with_status(StatusCode::BAD_REQUEST, "Missing user_id")),
    }
}

enum Finished {
    Reader,
    Writer,
}

fn log_join(task: &str, res: Result<(), JoinError>) {
    if let Err(e) = res {
        error!("WebSocket {} task failed: {}", task, e);
    }
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, user_id: String, state: AppState) {
    let (session, outbound) = state.registry.open(&user_id, state.config.send_queue_capacity);
    info!(
        user_id = %user_id,
        connection_id = %session.connection_id(),
        "WebSocket connection established"
    );

    let (sink, stream) = socket.split();
    let mut write_task = tokio::spawn(run_writer(session.clone(), sink, outbound));
    let mut read_task = tokio::spawn(run_reader(session.clone(), stream, state.router.clone()));

    // Either loop ending means the connection is done
    let finished = tokio::select! {
        res = &mut read_task => { log_join("read", res); Finished::Reader }
        res = &mut write_task => { log_join("write", res); Finished::Writer }
    };

    // No-op unless the loop died without tearing down
    session.close(CloseReason::Aborted);

    let mut other = match finished {
        Finished::Reader => write_task,
        Finished::Writer => read_task,
    };
    match tokio::time::timeout(LINGER, &mut other).await {
        Ok(res) => log_join("peer", res),
        Err(_) => other.abort(),
    }

    info!(user_id = %user_id, connection_id = %session.connection_id(), "WebSocket connection terminated");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn params(user_id: Option<&str>, token: Option<&str>) -> ConnectParams {
        ConnectParams {
            user_id: user_id.map(str::to_string),
            token: token.map(str::to_string),
        }
    }

    #[test]
    fn query_user_id_is_used_without_a_secret() {
        let config = Config::default();
        let headers = HeaderMap::new();
        assert_eq!(identify(&config, &params(Some(" alice "), None), &headers).unwrap(), "alice");

        let (status, _) = identify(&config, &params(None, None), &headers).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = identify(&config, &params(Some(""), None), &headers).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn secret_requires_a_token() {
        let config = Config {
            auth_jwt_secret: Some("secret".to_string()),
            ..Config::default()
        };

        // The query user id is not trusted once tokens are required
        let (status, _) = identify(&config, &params(Some("alice"), None), &HeaderMap::new()).unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer not-a-jwt"));
        let (status, _) = identify(&config, &params(None, None), &headers).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

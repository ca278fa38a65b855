use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use tracing::{debug, error};

use crate::models::ErrorResponse;
use crate::services::auth_service::{get_auth_token, user_id_from_token};
use crate::state::AppState;

/// Authenticated caller, available to handlers behind [`auth_middleware`]
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Guards operational endpoints. Without a configured JWT secret every
/// request passes, matching how the websocket endpoint trusts `user_id`.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let Some(secret) = &state.config.auth_jwt_secret else {
        return Ok(next.run(req).await);
    };

    // 1. Get the auth token from the request
    let token = get_auth_token(req.headers()).map_err(|e| ErrorResponse::with_status(StatusCode::UNAUTHORIZED, e))?;

    // 2. Validate it and extract the caller
    let user_id = user_id_from_token(&token, secret).map_err(|e| {
        error!("{}", e);
        ErrorResponse::with_status(StatusCode::UNAUTHORIZED, e)
    })?;
    debug!("Token validated for {}", user_id);

    req.extensions_mut().insert(AuthUser(user_id));
    Ok(next.run(req).await)
}

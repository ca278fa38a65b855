use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready to accept connections", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Connected users, open sessions and process statistics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Current diagnostics", body = DiagnosticsResponse),
        (status = 401, description = "Missing or invalid token", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Open a chat connection
#[utoipa::path(
    get,
    path = "/ws",
    params(
        ("user_id" = Option<String>, Query, description = "Identity of the connecting user when no JWT secret is configured"),
        ("token" = Option<String>, Query, description = "JWT carrying the identity in its sub claim")
    ),
    responses(
        (status = 101, description = "Switching to the websocket protocol"),
        (status = 400, description = "No identity supplied", body = ErrorResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn websocket_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        websocket_doc,
    ),
    components(
        schemas(HealthResponse, DiagnosticsResponse, ErrorResponse, Message, Conversation, MessageStatus, ChatKind)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;

use crate::{models::DiagnosticsResponse, routes::auth_middleware::AuthUser, state::AppState};
use axum::{extract::{Extension, State}, http::StatusCode, Json};
use std::sync::{Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Connection and process statistics
pub async fn diagnostics(
    State(state): State<AppState>,
    caller: Option<Extension<AuthUser>>,
) -> (StatusCode, Json<DiagnosticsResponse>) {
    let requested_by = caller.map(|Extension(AuthUser(user_id))| user_id);
    let n_users = state.registry.user_count() as u32;
    let n_sessions = state.registry.connection_count() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        requested_by = requested_by.as_deref().unwrap_or("anonymous"),
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Users: {}, Sessions: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_users,
        n_sessions
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_users,
            n_sessions,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
            requested_by,
        }),
    )
}

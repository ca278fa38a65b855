use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Response for diagnostics information
#[derive(Serialize, Deserialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub n_users: u32,
    pub n_sessions: u32,
    pub cpu_usage: f32,
    pub memory_alloc: u64,
    pub memory_total: u64,
    pub memory_free: u64,
    /// Authenticated caller, when tokens are required
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
}

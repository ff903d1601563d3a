use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};

use crate::daemon::{AppState, DaemonPhase};
use crate::model::DEFAULT_PROJECT;
use crate::store::traits::Store;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: DaemonPhase,
    pub server_name: String,
    pub timestamp: String,
}

pub async fn health_check<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: daemon.readiness.phase(),
        server_name: daemon.server_name.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `?project=` query parameter shared by project-scoped endpoints
#[derive(Debug, Default, Deserialize)]
pub struct ProjectParam {
    pub project: Option<String>,
}

impl ProjectParam {
    /// Requested project, `default` when absent or empty
    pub fn name(&self) -> String {
        self.project
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROJECT)
            .to_string()
    }
}

use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::api::response::SyncResponse;
use crate::daemon::AppState;
use crate::error::{Error, Result};
use crate::model::{OperationInfo, OperationRecord};
use crate::store::traits::Store;

#[derive(Debug, Default, Deserialize)]
pub struct OperationListQuery {
    pub project: Option<String>,
    #[serde(rename = "all-projects", default)]
    pub all_projects: bool,
}

/// Local operations grouped by lowercase status, plus in-flight operations
/// announced by other cluster members
#[derive(Debug, Serialize)]
pub struct OperationList {
    #[serde(flatten)]
    pub by_status: BTreeMap<String, Vec<OperationInfo>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remote: Vec<OperationRecord>,
}

pub async fn list_operations<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Query(query): Query<OperationListQuery>,
) -> Result<SyncResponse<OperationList>> {
    let project = if query.all_projects {
        None
    } else {
        Some(
            query
                .project
                .as_deref()
                .filter(|p| !p.is_empty())
                .unwrap_or(crate::model::DEFAULT_PROJECT),
        )
    };

    let mut by_status: BTreeMap<String, Vec<OperationInfo>> = BTreeMap::new();
    for op in daemon.operations.list(project) {
        let info = op.info();
        by_status
            .entry(info.status.to_lowercase())
            .or_default()
            .push(info);
    }

    let remote = daemon
        .operations
        .cluster_operations(project)
        .await?
        .into_iter()
        .filter(|record| record.location != daemon.server_name)
        .collect();

    Ok(SyncResponse::new(OperationList { by_status, remote }))
}

pub async fn get_operation<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<SyncResponse<OperationInfo>> {
    let op = daemon
        .operations
        .get(&id)
        .ok_or_else(|| Error::not_found(format!("Operation {:?} not found", id)))?;
    Ok(SyncResponse::new(op.info()))
}

#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    /// Seconds to wait; absent or negative waits until the operation ends
    pub timeout: Option<i64>,
}

pub async fn wait_operation<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Path(id): Path<String>,
    Query(query): Query<WaitQuery>,
) -> Result<SyncResponse<OperationInfo>> {
    let op = daemon
        .operations
        .get(&id)
        .ok_or_else(|| Error::not_found(format!("Operation {:?} not found", id)))?;

    let timeout = query
        .timeout
        .filter(|secs| *secs >= 0)
        .map(|secs| Duration::from_secs(secs as u64));
    if !op.wait(timeout).await {
        log::debug!("Wait on operation {} timed out", id);
    }

    Ok(SyncResponse::new(op.info()))
}

pub async fn cancel_operation<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<SyncResponse<OperationInfo>> {
    let op = daemon.operations.cancel(&id).await?;
    Ok(SyncResponse::new(op.info()))
}

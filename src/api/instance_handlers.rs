use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use std::sync::Arc;

use crate::api::handlers::ProjectParam;
use crate::api::response::{OperationResponse, SyncResponse};
use crate::daemon::AppState;
use crate::error::{Error, Result};
use crate::logic::etag::{etag_check, etag_hash};
use crate::logic::jobs::{RestoreJob, UpdateJob};
use crate::logic::mutation::load_instance;
use crate::logic::operations::NewOperation;
use crate::logic::policy::InstanceUpdatePolicy;
use crate::model::{
    architecture_id_or_unknown, is_snapshot, ApiUrl, Instance, InstanceArgs, InstancePut,
    InstanceType, InstanceView, OperationClass, OperationResources, OperationType, API_VERSION,
};
use crate::store::cluster::run_in_transaction;
use crate::store::traits::Store;

pub async fn get_instance<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Path(name): Path<String>,
    Query(params): Query<ProjectParam>,
) -> Result<SyncResponse<InstanceView>> {
    let instance = load_instance(&*daemon.store, &params.name(), &name).await?;
    let etag = etag_hash(&instance)?;
    Ok(SyncResponse::new(InstanceView::from(&instance)).with_etag(etag))
}

pub async fn put_instance<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Path(name): Path<String>,
    Query(params): Query<ProjectParam>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<OperationResponse> {
    instance_put(&daemon, None, &name, &params.name(), &headers, &body).await
}

pub async fn put_container<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Path(name): Path<String>,
    Query(params): Query<ProjectParam>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<OperationResponse> {
    let expected = Some(InstanceType::Container);
    instance_put(&daemon, expected, &name, &params.name(), &headers, &body).await
}

pub async fn put_virtual_machine<S: Store + 'static>(
    State(daemon): State<AppState<S>>,
    Path(name): Path<String>,
    Query(params): Query<ProjectParam>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<OperationResponse> {
    let expected = Some(InstanceType::VirtualMachine);
    instance_put(&daemon, expected, &name, &params.name(), &headers, &body).await
}

/// Resource map of an operation touching `instance`
fn instance_resources(instance: &Instance) -> OperationResources {
    let url = ApiUrl::new()
        .path([API_VERSION, "instances", instance.name.as_str()])
        .project(&instance.project)
        .to_string();

    let mut resources = OperationResources::new();
    resources.insert("instances".to_string(), vec![url.clone()]);
    for kind in instance.instance_type.extra_resource_kinds() {
        resources.insert(kind.to_string(), vec![url.clone()]);
    }
    resources
}

/// Accepts an update or snapshot restore of an instance and hands it to the
/// operation tracker. Returns as soon as the operation is running.
async fn instance_put<S: Store + 'static>(
    daemon: &AppState<S>,
    expected_type: Option<InstanceType>,
    name: &str,
    project: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<OperationResponse> {
    daemon.readiness.wait_ready().await;

    if is_snapshot(name) {
        return Err(Error::bad_request("Invalid instance name"));
    }

    let instance = load_instance(&*daemon.store, project, name).await?;
    if expected_type.is_some_and(|t| t != instance.instance_type) {
        return Err(Error::not_found(format!(
            "Instance {:?} not found in project {:?}",
            name, project
        )));
    }

    // Stale clients are turned away before the body is even looked at
    etag_check(headers, &instance)?;

    let request: InstancePut = serde_json::from_slice(body)
        .map_err(|e| Error::bad_request(format!("Invalid request body: {}", e)))?;

    let resources = instance_resources(&instance);

    let new_operation = match request.restore_target() {
        None => {
            let profiles = run_in_transaction(
                &*daemon.store,
                InstanceUpdatePolicy {
                    project,
                    instance: &instance,
                    request: &request,
                },
            )
            .await?;

            let args = InstanceArgs {
                architecture: architecture_id_or_unknown(request.architecture.as_deref()),
                config: request.config,
                description: request.description,
                devices: request.devices,
                ephemeral: request.ephemeral,
                profiles: profiles.into_iter().map(|p| p.name).collect(),
                project: project.to_string(),
            };

            NewOperation {
                project: project.to_string(),
                class: OperationClass::Task,
                operation_type: OperationType::InstanceUpdate,
                resources,
                metadata: None,
                job: Box::new(UpdateJob {
                    store: Arc::clone(&daemon.store),
                    instance,
                    args,
                }),
                cancel_hook: None,
            }
        }
        Some(snapshot) => NewOperation {
            project: project.to_string(),
            class: OperationClass::Task,
            operation_type: OperationType::SnapshotRestore,
            resources,
            metadata: None,
            job: Box::new(RestoreJob {
                store: Arc::clone(&daemon.store),
                instance,
                snapshot: snapshot.to_string(),
                stateful: request.stateful,
            }),
            cancel_hook: None,
        },
    };

    let op = daemon.operations.create(new_operation).await?;
    daemon.operations.start(&op)?;

    Ok(OperationResponse::new(&op))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_map_by_instance_type() {
        let web = Instance::new("default", "web", InstanceType::Container, 2);
        let resources = instance_resources(&web);
        assert_eq!(resources.len(), 2);
        assert_eq!(resources["instances"], vec!["/1.0/instances/web".to_string()]);
        assert_eq!(resources["containers"], resources["instances"]);

        let vm = Instance::new("team", "vm1", InstanceType::VirtualMachine, 2);
        let resources = instance_resources(&vm);
        assert_eq!(resources.len(), 1);
        assert_eq!(
            resources["instances"],
            vec!["/1.0/instances/vm1?project=team".to_string()]
        );
    }
}

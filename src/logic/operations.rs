use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::model::{
    generate_id, Id, OperationClass, OperationInfo, OperationRecord, OperationResources,
    OperationStatus, OperationType,
};
use crate::store::traits::OperationStore;

/// Deferred work carried by an operation. Holds exactly the inputs it needs.
#[async_trait::async_trait]
pub trait OperationJob: Send + Sync {
    async fn run(&self, op: &Operation) -> Result<()>;
}

/// Aborts an operation that hasn't started yet
#[async_trait::async_trait]
pub trait CancelHook: Send + Sync {
    async fn cancel(&self, op: &Operation) -> Result<()>;
}

#[derive(Debug)]
struct OperationState {
    status: OperationStatus,
    updated_at: DateTime<Utc>,
    metadata: Option<Value>,
    err: Option<String>,
}

/// A tracked unit of asynchronous work
pub struct Operation {
    id: Id,
    project: String,
    class: OperationClass,
    operation_type: OperationType,
    resources: OperationResources,
    location: String,
    created_at: DateTime<Utc>,
    state: RwLock<OperationState>,
    job: Mutex<Option<Box<dyn OperationJob>>>,
    cancel_hook: Option<Box<dyn CancelHook>>,
    status_tx: watch::Sender<OperationStatus>,
}

impl Operation {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    pub fn resources(&self) -> &OperationResources {
        &self.resources
    }

    pub fn status(&self) -> OperationStatus {
        self.state.read().status
    }

    /// Error text of a failed operation
    pub fn err(&self) -> Option<String> {
        self.state.read().err.clone()
    }

    pub fn update_metadata(&self, metadata: Value) {
        let mut state = self.state.write();
        state.metadata = Some(metadata);
        state.updated_at = Utc::now();
    }

    pub fn info(&self) -> OperationInfo {
        let state = self.state.read();
        OperationInfo {
            id: self.id.clone(),
            class: self.class,
            description: self.operation_type.description().to_string(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: state.updated_at.to_rfc3339(),
            status: state.status.to_string(),
            status_code: state.status.code(),
            resources: self.resources.clone(),
            metadata: state.metadata.clone(),
            may_cancel: self.cancel_hook.is_some() && state.status == OperationStatus::Pending,
            err: state.err.clone().unwrap_or_default(),
            location: self.location.clone(),
        }
    }

    /// Waits until the operation reaches a final status. Returns false if
    /// `timeout` elapsed first.
    pub async fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut rx = self.status_tx.subscribe();
        let finished = async move {
            loop {
                let done = rx.borrow_and_update().is_final();
                if done {
                    return true;
                }
                if rx.changed().await.is_err() {
                    return false;
                }
            }
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, finished).await.unwrap_or(false),
            None => finished.await,
        }
    }

    fn set_status(&self, status: OperationStatus, err: Option<String>) {
        {
            let mut state = self.state.write();
            state.status = status;
            state.updated_at = Utc::now();
            if err.is_some() {
                state.err = err;
            }
        }
        self.status_tx.send_replace(status);
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("project", &self.project)
            .field("type", &self.operation_type)
            .field("status", &self.status())
            .finish()
    }
}

/// Arguments of `OperationTracker::create`
pub struct NewOperation {
    pub project: String,
    pub class: OperationClass,
    pub operation_type: OperationType,
    pub resources: OperationResources,
    pub metadata: Option<Value>,
    pub job: Box<dyn OperationJob>,
    pub cancel_hook: Option<Box<dyn CancelHook>>,
}

/// Registry and scheduler of the operations owned by this member.
///
/// In-flight operations are announced in the cluster store so other members
/// can discover work on a resource. Finished operations stay queryable
/// locally for the retention period.
#[derive(Clone)]
pub struct OperationTracker {
    store: Arc<dyn OperationStore>,
    location: String,
    retention: Duration,
    operations: Arc<RwLock<HashMap<Id, Arc<Operation>>>>,
}

impl OperationTracker {
    pub fn new(store: Arc<dyn OperationStore>, location: &str, retention: Duration) -> Self {
        Self {
            store,
            location: location.to_string(),
            retention,
            operations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a Pending operation. Nothing runs until `start`.
    pub async fn create(&self, new: NewOperation) -> Result<Arc<Operation>> {
        let id = generate_id();
        let now = Utc::now();
        let (status_tx, _) = watch::channel(OperationStatus::Pending);

        let op = Arc::new(Operation {
            id: id.clone(),
            project: new.project,
            class: new.class,
            operation_type: new.operation_type,
            resources: new.resources,
            location: self.location.clone(),
            created_at: now,
            state: RwLock::new(OperationState {
                status: OperationStatus::Pending,
                updated_at: now,
                metadata: new.metadata,
                err: None,
            }),
            job: Mutex::new(Some(new.job)),
            cancel_hook: new.cancel_hook,
            status_tx,
        });

        let record = OperationRecord {
            id: id.clone(),
            project: op.project.clone(),
            location: op.location.clone(),
            operation_type: op.operation_type,
            resources: op.resources.clone(),
        };
        PendingRegistration::spawn(Arc::clone(&self.store), record)
            .wait()
            .await
            .map_err(|e| Error::internal(format!("Failed to register operation: {}", e)))?;

        self.operations.write().insert(id.clone(), Arc::clone(&op));
        log::info!(
            "New {:?} operation {} in project {:?}",
            op.operation_type,
            id,
            op.project
        );

        Ok(op)
    }

    /// Moves the operation to Running and runs its job on a detached task
    pub fn start(&self, op: &Arc<Operation>) -> Result<()> {
        let job = {
            let mut state = op.state.write();
            if state.status != OperationStatus::Pending {
                return Err(Error::bad_request(format!(
                    "Operation {} is {} and can't be started",
                    op.id, state.status
                )));
            }
            let job = op
                .job
                .lock()
                .take()
                .ok_or_else(|| Error::internal(format!("Operation {} has no job", op.id)))?;
            state.status = OperationStatus::Running;
            state.updated_at = Utc::now();
            job
        };
        op.status_tx.send_replace(OperationStatus::Running);
        log::info!("Started operation {}", op.id);

        let op = Arc::clone(op);
        let tracker = self.clone();
        tokio::spawn(async move {
            let runner = {
                let op = Arc::clone(&op);
                tokio::spawn(async move { job.run(&op).await })
            };

            let outcome = match runner.await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(join_err) => Err(format!("Operation job aborted: {}", join_err)),
            };

            match outcome {
                Ok(()) => {
                    log::info!("Operation {} succeeded", op.id);
                    tracker.finish(&op, OperationStatus::Success, None).await;
                }
                Err(message) => {
                    log::warn!("Operation {} failed: {}", op.id, message);
                    tracker.finish(&op, OperationStatus::Failure, Some(message)).await;
                }
            }
        });

        Ok(())
    }

    /// Removes cluster records left behind by an earlier run of this member
    pub async fn purge_stale(&self) -> Result<u64> {
        let removed = self.store.clear_operations(&self.location).await?;
        if removed > 0 {
            log::warn!(
                "Removed {} stale operation records of member {:?}",
                removed,
                self.location
            );
        }
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Operation>> {
        self.operations.read().get(id).cloned()
    }

    /// Local operations, optionally restricted to one project, oldest first
    pub fn list(&self, project: Option<&str>) -> Vec<Arc<Operation>> {
        let mut ops: Vec<_> = self
            .operations
            .read()
            .values()
            .filter(|op| project.map_or(true, |p| op.project == p))
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.created_at);
        ops
    }

    /// In-flight operations announced by every member
    pub async fn cluster_operations(&self, project: Option<&str>) -> Result<Vec<OperationRecord>> {
        self.store.list_operations(project).await
    }

    /// Cancels a Pending operation through its cancel hook
    pub async fn cancel(&self, id: &str) -> Result<Arc<Operation>> {
        let op = self
            .get(id)
            .ok_or_else(|| Error::not_found(format!("Operation {:?} not found", id)))?;

        let Some(hook) = op.cancel_hook.as_ref() else {
            return Err(Error::forbidden(format!("Operation {} can't be cancelled", op.id)));
        };

        {
            let mut state = op.state.write();
            if state.status != OperationStatus::Pending {
                return Err(Error::bad_request(format!(
                    "Only pending operations can be cancelled, {} is {}",
                    op.id, state.status
                )));
            }
            state.status = OperationStatus::Cancelled;
            state.updated_at = Utc::now();
            op.job.lock().take();
        }

        let hook_result = hook.cancel(&op).await;
        let err = hook_result.as_ref().err().map(|e| e.to_string());
        if let Some(message) = &err {
            log::warn!("Cancel hook of operation {} failed: {}", op.id, message);
        }

        log::info!("Cancelled operation {}", op.id);
        self.finish(&op, OperationStatus::Cancelled, err).await;
        hook_result.map(|_| op)
    }

    async fn finish(&self, op: &Arc<Operation>, status: OperationStatus, err: Option<String>) {
        if let Err(e) = self.store.remove_operation(&op.id).await {
            log::warn!("Failed to remove operation {} from the cluster: {}", op.id, e);
        }
        op.set_status(status, err);

        let operations = Arc::clone(&self.operations);
        let retention = self.retention;
        let id = op.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            operations.write().remove(&id);
            log::debug!("Dropped finished operation {}", id);
        });
    }
}

/// Cluster registration running on its own task.
///
/// If the caller stops waiting, the record is removed once the insert lands,
/// so no cluster row outlives an operation that was never created locally.
struct PendingRegistration {
    store: Arc<dyn OperationStore>,
    id: Id,
    handle: Option<JoinHandle<Result<()>>>,
}

impl PendingRegistration {
    fn spawn(store: Arc<dyn OperationStore>, record: OperationRecord) -> Self {
        let id = record.id.clone();
        let handle = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.register_operation(record).await }
        });
        Self {
            store,
            id,
            handle: Some(handle),
        }
    }

    async fn wait(mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let outcome = handle.await;
        self.handle = None;
        outcome.map_err(|e| Error::internal(format!("registration task aborted: {}", e)))?
    }
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = Arc::clone(&self.store);
        let id = std::mem::take(&mut self.id);
        runtime.spawn(async move {
            if let Ok(Ok(())) = handle.await {
                match store.remove_operation(&id).await {
                    Ok(_) => log::debug!("Removed record of abandoned operation {}", id),
                    Err(e) => log::warn!("Failed to remove abandoned operation {}: {}", id, e),
                }
            }
        });
    }
}

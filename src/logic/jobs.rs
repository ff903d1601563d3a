use serde_json::json;
use std::sync::Arc;

use crate::error::Result;
use crate::logic::mutation;
use crate::logic::operations::{Operation, OperationJob};
use crate::model::{Instance, InstanceArgs};
use crate::store::traits::InstanceStore;

/// Applies a user-requested update to the instance loaded at request time
pub struct UpdateJob<S: ?Sized> {
    pub store: Arc<S>,
    pub instance: Instance,
    pub args: InstanceArgs,
}

#[async_trait::async_trait]
impl<S> OperationJob for UpdateJob<S>
where
    S: InstanceStore + ?Sized + 'static,
{
    async fn run(&self, _op: &Operation) -> Result<()> {
        mutation::update(self.store.as_ref(), &self.instance, self.args.clone(), true).await?;
        Ok(())
    }
}

/// Restores the instance loaded at request time from one of its snapshots
pub struct RestoreJob<S: ?Sized> {
    pub store: Arc<S>,
    pub instance: Instance,
    pub snapshot: String,
    pub stateful: bool,
}

#[async_trait::async_trait]
impl<S> OperationJob for RestoreJob<S>
where
    S: InstanceStore + ?Sized + 'static,
{
    async fn run(&self, op: &Operation) -> Result<()> {
        let restored =
            mutation::snapshot_restore(self.store.as_ref(), &self.instance, &self.snapshot, self.stateful)
                .await?;

        op.update_metadata(json!({
            "snapshot": mutation::normalize_snapshot_name(&self.instance.name, &self.snapshot),
            "stateful": self.stateful,
            "generation": restored.generation(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::operations::{NewOperation, OperationTracker};
    use crate::model::{InstanceType, OperationClass, OperationResources, OperationStatus, OperationType};
    use crate::store::MemoryStore;
    use std::time::Duration;

    async fn run_job(store: &MemoryStore, job: Box<dyn OperationJob>) -> Arc<Operation> {
        let tracker = OperationTracker::new(Arc::new(store.clone()), "member1", Duration::from_secs(60));
        let op = tracker
            .create(NewOperation {
                project: "default".to_string(),
                class: OperationClass::Task,
                operation_type: OperationType::SnapshotRestore,
                resources: OperationResources::new(),
                metadata: None,
                job,
                cancel_hook: None,
            })
            .await
            .unwrap();
        tracker.start(&op).unwrap();
        assert!(op.wait(Some(Duration::from_secs(5))).await);
        op
    }

    #[tokio::test]
    async fn test_restore_job_reports_generation() {
        let store = MemoryStore::new();
        let web = Instance::new("default", "web", InstanceType::Container, 2);
        store.upsert_instance(web.clone()).await.unwrap();
        store.upsert_instance(web.snapshot("snap1", false)).await.unwrap();

        let op = run_job(
            &store,
            Box::new(RestoreJob {
                store: Arc::new(store.clone()),
                instance: web,
                snapshot: "snap1".to_string(),
                stateful: false,
            }),
        )
        .await;

        assert_eq!(op.status(), OperationStatus::Success);
        let metadata = op.info().metadata.unwrap();
        assert_eq!(metadata["snapshot"], "web/snap1");
        assert!(metadata["generation"].is_string());
    }

    #[tokio::test]
    async fn test_update_job_failure_lands_on_operation() {
        let store = MemoryStore::new();
        let web = Instance::new("default", "web", InstanceType::Container, 2);
        let mut args = InstanceArgs {
            architecture: 0,
            config: Default::default(),
            description: String::new(),
            devices: Default::default(),
            ephemeral: false,
            profiles: vec![],
            project: "default".to_string(),
        };
        args.config.insert("bogus".to_string(), "1".to_string());

        let op = run_job(
            &store,
            Box::new(UpdateJob { store: Arc::new(store.clone()), instance: web, args }),
        )
        .await;

        assert_eq!(op.status(), OperationStatus::Failure);
        assert_eq!(op.err().as_deref(), Some("Unknown configuration key: bogus"));
    }
}

use crate::error::Result;
use crate::model::{Id, Instance, OperationRecord, Profile, ProfileRecord, Project};

#[async_trait::async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, name: &str) -> Result<Option<Project>>;
    async fn upsert_project(&self, project: Project) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self, project: &str, name: &str) -> Result<Option<Profile>>;
    async fn upsert_profile(&self, profile: Profile) -> Result<()>;
}

/// Instance rows, snapshots included (their names carry the snapshot delimiter)
#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get_instance(&self, project: &str, name: &str) -> Result<Option<Instance>>;
    /// List live instances and snapshots of a project
    async fn list_instances(&self, project: &str) -> Result<Vec<Instance>>;
    async fn upsert_instance(&self, instance: Instance) -> Result<()>;
    /// Overwrite the row with the same id. Returns false if that row no longer exists.
    async fn update_instance(&self, instance: &Instance) -> Result<bool>;
    async fn delete_instance(&self, project: &str, name: &str) -> Result<bool>;
}

/// Cluster-visible registry of in-flight operations
#[async_trait::async_trait]
pub trait OperationStore: Send + Sync {
    async fn register_operation(&self, record: OperationRecord) -> Result<()>;
    async fn remove_operation(&self, id: &Id) -> Result<bool>;
    async fn list_operations(&self, project: Option<&str>) -> Result<Vec<OperationRecord>>;
    /// Drop every record owned by a member. Returns how many were removed.
    async fn clear_operations(&self, location: &str) -> Result<u64>;
}

/// A transactional session on the cluster database.
///
/// Dropping a transaction without calling `commit` discards it.
#[async_trait::async_trait]
pub trait ClusterTx: Send {
    async fn get_project(&mut self, name: &str) -> Result<Option<Project>>;
    async fn get_profile(&mut self, project: &str, name: &str) -> Result<Option<ProfileRecord>>;
    /// Load config and devices of a profile row
    async fn profile_to_api(&mut self, record: &ProfileRecord) -> Result<Profile>;
    async fn list_instances(&mut self, project: &str) -> Result<Vec<Instance>>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn ClusterTx>>;
}

pub trait Store:
    ProjectStore + ProfileStore + InstanceStore + OperationStore + ClusterStore + Send + Sync
{
}

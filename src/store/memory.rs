use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::{Id, Instance, OperationRecord, Profile, ProfileRecord, Project};
use crate::store::traits::{
    ClusterStore, ClusterTx, InstanceStore, OperationStore, ProfileStore, ProjectStore, Store,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    projects: BTreeMap<String, Project>,
    // (project, name) -> (row id, profile)
    profiles: BTreeMap<(String, String), (i64, Profile)>,
    instances: BTreeMap<Id, Instance>,
    operations: BTreeMap<Id, OperationRecord>,
    next_profile_id: i64,
}

/// In-process store for single-member deployments and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ProjectStore for MemoryStore {
    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        Ok(self.state.read().projects.get(name).cloned())
    }

    async fn upsert_project(&self, project: Project) -> Result<()> {
        self.state
            .write()
            .projects
            .insert(project.name.clone(), project);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProfileStore for MemoryStore {
    async fn get_profile(&self, project: &str, name: &str) -> Result<Option<Profile>> {
        let state = self.state.read();
        Ok(state
            .profiles
            .get(&(project.to_string(), name.to_string()))
            .map(|(_, profile)| profile.clone()))
    }

    async fn upsert_profile(&self, profile: Profile) -> Result<()> {
        let mut state = self.state.write();
        if !state.projects.contains_key(&profile.project) {
            return Err(Error::not_found(format!("Project {:?} not found", profile.project)));
        }

        let key = (profile.project.clone(), profile.name.clone());
        let id = match state.profiles.get(&key) {
            Some((id, _)) => *id,
            None => {
                state.next_profile_id += 1;
                state.next_profile_id
            }
        };
        state.profiles.insert(key, (id, profile));
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstanceStore for MemoryStore {
    async fn get_instance(&self, project: &str, name: &str) -> Result<Option<Instance>> {
        let state = self.state.read();
        Ok(state
            .instances
            .values()
            .find(|i| i.project == project && i.name == name)
            .cloned())
    }

    async fn list_instances(&self, project: &str) -> Result<Vec<Instance>> {
        let state = self.state.read();
        Ok(state
            .instances
            .values()
            .filter(|i| i.project == project)
            .cloned()
            .collect())
    }

    async fn upsert_instance(&self, instance: Instance) -> Result<()> {
        let mut state = self.state.write();
        let clash = state.instances.values().any(|i| {
            i.project == instance.project && i.name == instance.name && i.id != instance.id
        });
        if clash {
            return Err(Error::Conflict(format!(
                "Instance {:?} already exists in project {:?}",
                instance.name, instance.project
            )));
        }
        state.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn update_instance(&self, instance: &Instance) -> Result<bool> {
        let mut state = self.state.write();
        match state.instances.get_mut(&instance.id) {
            Some(row) => {
                *row = instance.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_instance(&self, project: &str, name: &str) -> Result<bool> {
        let mut state = self.state.write();
        let id = state
            .instances
            .values()
            .find(|i| i.project == project && i.name == name)
            .map(|i| i.id.clone());
        Ok(match id {
            Some(id) => state.instances.remove(&id).is_some(),
            None => false,
        })
    }
}

#[async_trait::async_trait]
impl OperationStore for MemoryStore {
    async fn register_operation(&self, record: OperationRecord) -> Result<()> {
        self.state
            .write()
            .operations
            .insert(record.id.clone(), record);
        Ok(())
    }

    async fn remove_operation(&self, id: &Id) -> Result<bool> {
        Ok(self.state.write().operations.remove(id).is_some())
    }

    async fn list_operations(&self, project: Option<&str>) -> Result<Vec<OperationRecord>> {
        let state = self.state.read();
        Ok(state
            .operations
            .values()
            .filter(|op| project.map_or(true, |p| op.project == p))
            .cloned()
            .collect())
    }

    async fn clear_operations(&self, location: &str) -> Result<u64> {
        let mut state = self.state.write();
        let before = state.operations.len();
        state.operations.retain(|_, op| op.location != location);
        Ok((before - state.operations.len()) as u64)
    }
}

/// Transaction over a consistent copy of the store taken at `begin`
struct MemoryTx {
    snapshot: MemoryState,
    finished: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::internal("Transaction already finished"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterTx for MemoryTx {
    async fn get_project(&mut self, name: &str) -> Result<Option<Project>> {
        self.ensure_open()?;
        Ok(self.snapshot.projects.get(name).cloned())
    }

    async fn get_profile(&mut self, project: &str, name: &str) -> Result<Option<ProfileRecord>> {
        self.ensure_open()?;
        Ok(self
            .snapshot
            .profiles
            .get(&(project.to_string(), name.to_string()))
            .map(|(id, profile)| ProfileRecord {
                id: *id,
                project: profile.project.clone(),
                name: profile.name.clone(),
                description: profile.description.clone(),
            }))
    }

    async fn profile_to_api(&mut self, record: &ProfileRecord) -> Result<Profile> {
        self.ensure_open()?;
        self.snapshot
            .profiles
            .values()
            .find(|(id, _)| *id == record.id)
            .map(|(_, profile)| profile.clone())
            .ok_or_else(|| Error::not_found(format!("Profile {:?} not found", record.name)))
    }

    async fn list_instances(&mut self, project: &str) -> Result<Vec<Instance>> {
        self.ensure_open()?;
        Ok(self
            .snapshot
            .instances
            .values()
            .filter(|i| i.project == project)
            .cloned()
            .collect())
    }

    async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("Discarding unfinished in-memory transaction");
        }
    }
}

#[async_trait::async_trait]
impl ClusterStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn ClusterTx>> {
        let snapshot = self.state.read().clone();
        Ok(Box::new(MemoryTx {
            snapshot,
            finished: false,
        }))
    }
}

impl Store for MemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceType;

    #[tokio::test]
    async fn test_update_of_deleted_instance_reports_missing_row() {
        let store = MemoryStore::new();
        let web = Instance::new("default", "web", InstanceType::Container, 2);
        store.upsert_instance(web.clone()).await.unwrap();

        assert!(store.update_instance(&web).await.unwrap());
        assert!(store.delete_instance("default", "web").await.unwrap());
        assert!(!store.update_instance(&web).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_instance_name_conflicts() {
        let store = MemoryStore::new();
        store
            .upsert_instance(Instance::new("default", "web", InstanceType::Container, 2))
            .await
            .unwrap();

        let err = store
            .upsert_instance(Instance::new("default", "web", InstanceType::VirtualMachine, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_transaction_reads_snapshot_taken_at_begin() {
        let store = MemoryStore::new();
        store.upsert_project(Project::new("default")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        store.upsert_project(Project::new("late")).await.unwrap();

        assert!(tx.get_project("default").await.unwrap().is_some());
        assert!(tx.get_project("late").await.unwrap().is_none());
        tx.commit().await.unwrap();
        assert!(tx.get_project("default").await.is_err());
    }

    #[tokio::test]
    async fn test_profile_ids_are_stable_across_upserts() {
        let store = MemoryStore::new();
        store.upsert_project(Project::new("default")).await.unwrap();
        store.upsert_profile(Profile::new("default", "default")).await.unwrap();
        store
            .upsert_profile(Profile::new("default", "default").with_config("limits.cpu", "2"))
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let record = tx.get_profile("default", "default").await.unwrap().unwrap();
        assert_eq!(record.id, 1);
        let profile = tx.profile_to_api(&record).await.unwrap();
        assert_eq!(profile.config.get("limits.cpu").map(String::as_str), Some("2"));
    }
}

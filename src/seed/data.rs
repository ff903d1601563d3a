use crate::model::{Device, Instance, InstanceType, Profile, Project, DEFAULT_PROJECT, GENERATION_KEY};
use crate::store::traits::Store;
use anyhow::Result;

fn device(entries: &[(&str, &str)]) -> Device {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Default profile every fresh daemon ships with: a root disk and one NIC
pub fn default_profile() -> Profile {
    let mut profile = Profile::new(DEFAULT_PROJECT, "default");
    profile.description = "Default profile".to_string();
    profile.devices.insert(
        "root".to_string(),
        device(&[("type", "disk"), ("path", "/"), ("pool", "default")]),
    );
    profile.devices.insert(
        "eth0".to_string(),
        device(&[("type", "nic"), ("name", "eth0"), ("network", "incusbr0")]),
    );
    profile
}

/// Creates the default project and profile if they are missing
pub async fn load_seed_data<S: Store>(store: &S) -> Result<()> {
    if store.get_project(DEFAULT_PROJECT).await?.is_none() {
        let mut project = Project::new(DEFAULT_PROJECT);
        project.description = "Default project".to_string();
        store.upsert_project(project).await?;
    }

    if store.get_profile(DEFAULT_PROJECT, "default").await?.is_none() {
        store.upsert_profile(default_profile()).await?;
    }

    Ok(())
}

/// Adds a demo container "web" with one snapshot "snap0"
pub async fn load_demo_instances<S: Store>(store: &S) -> Result<()> {
    if store.get_instance(DEFAULT_PROJECT, "web").await?.is_some() {
        return Ok(());
    }

    let mut web = Instance::new(DEFAULT_PROJECT, "web", InstanceType::Container, 2);
    web.profiles = vec!["default".to_string()];
    web.config.insert("limits.cpu".to_string(), "1".to_string());
    web.config
        .insert(GENERATION_KEY.to_string(), uuid::Uuid::new_v4().to_string());

    let snapshot = web.snapshot("snap0", false);
    store.upsert_instance(web).await?;
    store.upsert_instance(snapshot).await?;

    log::info!("Loaded demo instance \"web\"");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InstanceStore, MemoryStore, ProfileStore};

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = MemoryStore::new();
        load_seed_data(&store).await.unwrap();
        load_seed_data(&store).await.unwrap();
        load_demo_instances(&store).await.unwrap();
        load_demo_instances(&store).await.unwrap();

        let profile = store.get_profile(DEFAULT_PROJECT, "default").await.unwrap().unwrap();
        assert_eq!(profile.devices["root"]["type"], "disk");
        assert_eq!(store.list_instances(DEFAULT_PROJECT).await.unwrap().len(), 2);
    }
}

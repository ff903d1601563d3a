use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    parent_and_snapshot_name, Config, Devices, Instance, InstanceArgs, InstanceType, ARCH_UNKNOWN,
    GENERATION_KEY, SNAPSHOT_DELIMITER,
};
use crate::store::traits::InstanceStore;

/// Config namespaces an instance may carry
const CONFIG_NAMESPACES: &[&str] = &[
    "agent.",
    "boot.",
    "cloud-init.",
    "cluster.",
    "environment.",
    "image.",
    "limits.",
    "linux.",
    "migration.",
    "nvidia.",
    "raw.",
    "security.",
    "snapshots.",
    "user.",
    "volatile.",
];

pub async fn load_instance<S>(store: &S, project: &str, name: &str) -> Result<Instance>
where
    S: InstanceStore + ?Sized,
{
    store.get_instance(project, name).await?.ok_or_else(|| {
        Error::not_found(format!("Instance {:?} not found in project {:?}", name, project))
    })
}

pub fn validate_config(instance_type: InstanceType, config: &Config) -> Result<()> {
    for key in config.keys() {
        if key.is_empty() {
            return Err(Error::bad_request("Empty configuration key"));
        }

        if !CONFIG_NAMESPACES.iter().any(|ns| key.starts_with(ns)) {
            return Err(Error::bad_request(format!("Unknown configuration key: {}", key)));
        }

        if instance_type
            .forbidden_config_prefixes()
            .iter()
            .any(|prefix| key.starts_with(prefix))
        {
            return Err(Error::bad_request(format!(
                "Configuration key {:?} isn't supported for {} instances",
                key, instance_type
            )));
        }
    }
    Ok(())
}

pub fn validate_devices(devices: &Devices) -> Result<()> {
    for (name, device) in devices {
        let has_type = device.get("type").is_some_and(|t| !t.is_empty());
        if !has_type {
            return Err(Error::bad_request(format!("Missing device type for device {:?}", name)));
        }
    }
    Ok(())
}

/// Replaces the mutable state of `instance` with `args`.
///
/// An architecture of 0 keeps the current one. User-requested updates are
/// validated and keep existing `volatile.*` keys the request leaves out.
/// The row is addressed by the id loaded at request time; if it was deleted
/// since, the update fails with `NotFound`.
pub async fn update<S>(
    store: &S,
    instance: &Instance,
    args: InstanceArgs,
    user_requested: bool,
) -> Result<Instance>
where
    S: InstanceStore + ?Sized,
{
    let mut config = args.config;

    if user_requested {
        validate_config(instance.instance_type, &config)?;
        validate_devices(&args.devices)?;

        for (key, value) in instance.config.iter().filter(|(k, _)| k.starts_with("volatile.")) {
            config.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    let mut updated = instance.clone();
    if args.architecture != ARCH_UNKNOWN {
        updated.architecture = args.architecture;
    }
    updated.config = config;
    updated.description = args.description;
    updated.devices = args.devices;
    updated.ephemeral = args.ephemeral;
    updated.profiles = args.profiles;
    updated.last_updated_at = Utc::now();

    if !store.update_instance(&updated).await? {
        return Err(Error::not_found(format!(
            "Instance {:?} not found in project {:?}",
            instance.name, instance.project
        )));
    }

    log::info!("Updated instance {:?} in project {:?}", updated.name, updated.project);
    Ok(updated)
}

/// "snap1" becomes "web/snap1"; names already carrying the delimiter are kept
pub fn normalize_snapshot_name(instance_name: &str, snapshot: &str) -> String {
    if snapshot.contains(SNAPSHOT_DELIMITER) {
        snapshot.to_string()
    } else {
        format!("{}{}{}", instance_name, SNAPSHOT_DELIMITER, snapshot)
    }
}

/// Writes a fresh generation marker into the restore source. The restored
/// instance inherits it, so it never shares a generation with an earlier
/// restore of the same snapshot.
pub fn stamp_generation(source: &mut Instance) -> String {
    let generation = Uuid::new_v4().to_string();
    source
        .config
        .insert(GENERATION_KEY.to_string(), generation.clone());
    generation
}

/// Restores `instance` from one of its snapshots, looked up by name
pub async fn snapshot_restore<S>(
    store: &S,
    instance: &Instance,
    snapshot: &str,
    stateful: bool,
) -> Result<Instance>
where
    S: InstanceStore + ?Sized,
{
    let name = normalize_snapshot_name(&instance.name, snapshot);

    let mut source = match store.get_instance(&instance.project, &name).await {
        Ok(Some(source)) => source,
        Ok(None) => return Err(Error::SnapshotMissing(name)),
        Err(err) if err.is_not_found() => return Err(Error::SnapshotMissing(name)),
        Err(err) => return Err(err),
    };

    stamp_generation(&mut source);
    restore(store, instance, &source, stateful).await
}

/// Instance-level restore: takes over the snapshot's state as a
/// non-user-requested update.
pub async fn restore<S>(
    store: &S,
    instance: &Instance,
    source: &Instance,
    stateful: bool,
) -> Result<Instance>
where
    S: InstanceStore + ?Sized,
{
    let (parent, snapshot) = parent_and_snapshot_name(&source.name);
    if snapshot.is_empty() || parent != instance.name || source.project != instance.project {
        return Err(Error::bad_request(format!(
            "{:?} is not a snapshot of instance {:?}",
            source.name, instance.name
        )));
    }

    if stateful {
        if !source.stateful {
            return Err(Error::bad_request(
                "Stateful snapshot restore requested but snapshot is stateless",
            ));
        }
        if let Some(key) = instance.instance_type.stateful_restore_requirement() {
            if source.config.get(key).map(String::as_str) != Some("true") {
                return Err(Error::bad_request(format!(
                    "Stateful restore of a {} requires {:?} on the snapshot",
                    instance.instance_type, key
                )));
            }
        }
    }

    let args = InstanceArgs {
        architecture: source.architecture,
        config: source.config.clone(),
        description: source.description.clone(),
        devices: source.devices.clone(),
        ephemeral: source.ephemeral,
        profiles: source.profiles.clone(),
        project: instance.project.clone(),
    };

    let restored = update(store, instance, args, false).await?;
    log::info!(
        "Restored instance {:?} from {:?} (stateful: {})",
        instance.name,
        source.name,
        stateful
    );
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn args_from(instance: &Instance) -> InstanceArgs {
        InstanceArgs {
            architecture: instance.architecture,
            config: instance.config.clone(),
            description: instance.description.clone(),
            devices: instance.devices.clone(),
            ephemeral: instance.ephemeral,
            profiles: instance.profiles.clone(),
            project: instance.project.clone(),
        }
    }

    async fn seeded() -> (MemoryStore, Instance) {
        let store = MemoryStore::new();
        let mut web = Instance::new("default", "web", InstanceType::Container, 2);
        web.config.insert("limits.cpu".to_string(), "1".to_string());
        web.config.insert(GENERATION_KEY.to_string(), "gen-0".to_string());
        web.profiles = vec!["default".to_string()];
        store.upsert_instance(web.clone()).await.unwrap();

        let snap = web.snapshot("snap1", false);
        store.upsert_instance(snap).await.unwrap();
        (store, web)
    }

    #[test]
    fn test_normalize_snapshot_name() {
        assert_eq!(normalize_snapshot_name("web", "snap1"), "web/snap1");
        assert_eq!(normalize_snapshot_name("web", "web/snap1"), "web/snap1");
        assert_eq!(normalize_snapshot_name("web", "db/snap1"), "db/snap1");
    }

    #[test]
    fn test_stamp_generation_is_fresh_every_time() {
        let mut source = Instance::new("default", "web/snap1", InstanceType::Container, 2);
        source.config.insert(GENERATION_KEY.to_string(), "gen-0".to_string());

        let first = stamp_generation(&mut source);
        assert_ne!(first, "gen-0");
        assert_eq!(source.generation(), Some(first.as_str()));

        let second = stamp_generation(&mut source);
        assert_ne!(first, second);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::new();
        config.insert("limits.cpu".to_string(), "2".to_string());
        config.insert("user.owner".to_string(), "ops".to_string());
        assert!(validate_config(InstanceType::Container, &config).is_ok());

        config.insert("bogus".to_string(), "1".to_string());
        assert_eq!(
            validate_config(InstanceType::Container, &config).unwrap_err().to_string(),
            "Unknown configuration key: bogus"
        );

        let mut config = Config::new();
        config.insert("security.privileged".to_string(), "true".to_string());
        assert!(validate_config(InstanceType::Container, &config).is_ok());
        assert!(validate_config(InstanceType::VirtualMachine, &config).is_err());

        let mut config = Config::new();
        config.insert("raw.qemu".to_string(), "-S".to_string());
        assert!(validate_config(InstanceType::Container, &config).is_err());
        assert!(validate_config(InstanceType::VirtualMachine, &config).is_ok());
    }

    #[test]
    fn test_devices_need_a_type() {
        let mut devices = Devices::new();
        devices.insert(
            "root".to_string(),
            [("type".to_string(), "disk".to_string()), ("path".to_string(), "/".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(validate_devices(&devices).is_ok());

        devices.insert("eth0".to_string(), [("nictype".to_string(), "bridged".to_string())].into_iter().collect());
        assert!(validate_devices(&devices).is_err());
    }

    #[tokio::test]
    async fn test_update_replaces_state_and_keeps_volatile_keys() {
        let (store, web) = seeded().await;

        let mut args = args_from(&web);
        args.config = [("limits.cpu".to_string(), "2".to_string())].into_iter().collect();
        args.description = "frontend".to_string();
        args.profiles = vec![];

        let updated = update(&store, &web, args, true).await.unwrap();
        assert_eq!(updated.config.get("limits.cpu").map(String::as_str), Some("2"));
        assert_eq!(updated.generation(), Some("gen-0"));
        assert_eq!(updated.description, "frontend");
        assert!(updated.profiles.is_empty());

        let stored = load_instance(&store, "default", "web").await.unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn test_unknown_architecture_keeps_current() {
        let (store, web) = seeded().await;

        let mut args = args_from(&web);
        args.architecture = ARCH_UNKNOWN;
        let updated = update(&store, &web, args, true).await.unwrap();
        assert_eq!(updated.architecture, 2);

        let mut args = args_from(&web);
        args.architecture = 4;
        let updated = update(&store, &web, args, true).await.unwrap();
        assert_eq!(updated.architecture, 4);
    }

    #[tokio::test]
    async fn test_update_of_deleted_instance_fails() {
        let (store, web) = seeded().await;
        store.delete_instance("default", "web").await.unwrap();

        let err = update(&store, &web, args_from(&web), true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_restore_takes_snapshot_state_with_fresh_generation() {
        let (store, web) = seeded().await;

        let mut args = args_from(&web);
        args.config.insert("limits.cpu".to_string(), "4".to_string());
        let live = update(&store, &web, args, true).await.unwrap();

        let restored = snapshot_restore(&store, &live, "snap1", false).await.unwrap();
        assert_eq!(restored.config.get("limits.cpu").map(String::as_str), Some("1"));
        let generation = restored.generation().unwrap().to_string();
        assert_ne!(generation, "gen-0");

        let snap = load_instance(&store, "default", "web/snap1").await.unwrap();
        assert_eq!(snap.generation(), Some("gen-0"));

        let again = snapshot_restore(&store, &restored, "web/snap1", false).await.unwrap();
        assert_ne!(again.generation().unwrap(), generation);
    }

    #[tokio::test]
    async fn test_restore_of_missing_snapshot() {
        let (store, web) = seeded().await;

        let err = snapshot_restore(&store, &web, "missing", false).await.unwrap_err();
        assert!(matches!(err, Error::SnapshotMissing(_)));
        assert_eq!(err.to_string(), "Snapshot web/missing does not exist");
    }

    #[tokio::test]
    async fn test_restore_rejects_foreign_and_stateless_sources() {
        let (store, web) = seeded().await;
        let db = Instance::new("default", "db", InstanceType::Container, 2);
        store.upsert_instance(db.snapshot("snap1", false)).await.unwrap();

        let err = snapshot_restore(&store, &web, "db/snap1", false).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));

        let err = snapshot_restore(&store, &web, "snap1", true).await.unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_stateful_vm_restore_requires_migration_stateful() {
        let store = MemoryStore::new();
        let vm = Instance::new("default", "vm1", InstanceType::VirtualMachine, 2);
        store.upsert_instance(vm.clone()).await.unwrap();
        store.upsert_instance(vm.snapshot("plain", true)).await.unwrap();

        let mut with_state = vm.clone();
        with_state.config.insert("migration.stateful".to_string(), "true".to_string());
        store.upsert_instance(with_state.snapshot("live", true)).await.unwrap();

        assert!(snapshot_restore(&store, &vm, "plain", true).await.is_err());
        let restored = snapshot_restore(&store, &vm, "live", true).await.unwrap();
        assert_eq!(
            restored.config.get("migration.stateful").map(String::as_str),
            Some("true")
        );
    }
}

use crate::model::{generate_id, is_snapshot, Id, SNAPSHOT_DELIMITER};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-instance generation marker, refreshed on every snapshot restore
pub const GENERATION_KEY: &str = "volatile.uuid.generation";

pub type Config = BTreeMap<String, String>;

/// A single device: free-form key/value options, must carry a "type"
pub type Device = BTreeMap<String, String>;

pub type Devices = BTreeMap<String, Device>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceType {
    Container,
    VirtualMachine,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Container => "container",
            InstanceType::VirtualMachine => "virtual-machine",
        }
    }

    /// Resource kinds, besides "instances", under which operations on this
    /// type are published. Containers keep their legacy "containers" kind.
    pub fn extra_resource_kinds(&self) -> &'static [&'static str] {
        match self {
            InstanceType::Container => &["containers"],
            InstanceType::VirtualMachine => &[],
        }
    }

    /// Config key prefixes that make no sense for this instance type
    pub fn forbidden_config_prefixes(&self) -> &'static [&'static str] {
        match self {
            InstanceType::Container => &["raw.qemu"],
            InstanceType::VirtualMachine => &["raw.lxc", "security.privileged", "security.nesting"],
        }
    }

    /// Config key the snapshot must have enabled for a stateful restore, if any
    pub fn stateful_restore_requirement(&self) -> Option<&'static str> {
        match self {
            InstanceType::Container => None,
            InstanceType::VirtualMachine => Some("migration.stateful"),
        }
    }

    /// Project key holding the per-type instance count limit
    pub fn count_limit_key(&self) -> &'static str {
        match self {
            InstanceType::Container => "limits.containers",
            InstanceType::VirtualMachine => "limits.virtual-machines",
        }
    }

    /// Project restriction gating raw.* keys for this type
    pub fn lowlevel_restriction_key(&self) -> &'static str {
        match self {
            InstanceType::Container => "restricted.containers.lowlevel",
            InstanceType::VirtualMachine => "restricted.virtual-machines.lowlevel",
        }
    }
}

impl std::fmt::Display for InstanceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Id,
    pub project: String,
    pub name: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub architecture: i32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub devices: Devices,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Snapshots only: whether runtime state was captured alongside disk state
    #[serde(default)]
    pub stateful: bool,
    /// Cluster member hosting the instance
    #[serde(default)]
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(project: &str, name: &str, instance_type: InstanceType, architecture: i32) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(),
            project: project.to_string(),
            name: name.to_string(),
            instance_type,
            architecture,
            description: String::new(),
            config: Config::new(),
            devices: Devices::new(),
            ephemeral: false,
            profiles: vec![],
            stateful: false,
            location: String::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Captures the current state as a snapshot named `<name>/<snapshot_name>`
    pub fn snapshot(&self, snapshot_name: &str, stateful: bool) -> Instance {
        let now = Utc::now();
        Instance {
            id: generate_id(),
            name: format!("{}{}{}", self.name, SNAPSHOT_DELIMITER, snapshot_name),
            stateful,
            created_at: now,
            last_updated_at: now,
            ..self.clone()
        }
    }

    pub fn is_snapshot(&self) -> bool {
        is_snapshot(&self.name)
    }

    pub fn generation(&self) -> Option<&str> {
        self.config.get(GENERATION_KEY).map(|s| s.as_str())
    }
}

/// Body of `PUT /1.0/instances/{name}`.
///
/// A non-empty `restore` switches the request from a plain update to a
/// snapshot restore; every other field is then ignored except `stateful`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstancePut {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub devices: Devices,
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore: Option<String>,
    #[serde(default)]
    pub stateful: bool,
}

impl InstancePut {
    pub fn restore_target(&self) -> Option<&str> {
        self.restore.as_deref().filter(|name| !name.is_empty())
    }
}

/// Fully resolved desired state handed to the mutation engine
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceArgs {
    /// 0 leaves the current architecture in place
    pub architecture: i32,
    pub config: Config,
    pub description: String,
    pub devices: Devices,
    pub ephemeral: bool,
    /// Profile names, already resolved against the project
    pub profiles: Vec<String>,
    pub project: String,
}

/// API view of an instance
#[derive(Debug, Clone, Serialize)]
pub struct InstanceView {
    pub name: String,
    pub project: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub architecture: String,
    pub description: String,
    pub config: Config,
    pub devices: Devices,
    pub ephemeral: bool,
    pub profiles: Vec<String>,
    pub stateful: bool,
    pub location: String,
    pub created_at: String,
    pub last_used_at: String,
}

impl From<&Instance> for InstanceView {
    fn from(instance: &Instance) -> Self {
        Self {
            name: instance.name.clone(),
            project: instance.project.clone(),
            instance_type: instance.instance_type,
            architecture: crate::model::architecture_name(instance.architecture)
                .unwrap_or_default()
                .to_string(),
            description: instance.description.clone(),
            config: instance.config.clone(),
            devices: instance.devices.clone(),
            ephemeral: instance.ephemeral,
            profiles: instance.profiles.clone(),
            stateful: instance.stateful,
            location: instance.location.clone(),
            created_at: instance.created_at.to_rfc3339(),
            last_used_at: instance.last_updated_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restore_mode_selection() {
        let put: InstancePut = serde_json::from_str(r#"{"restore":"snap1","stateful":true}"#).unwrap();
        assert_eq!(put.restore_target(), Some("snap1"));
        assert!(put.stateful);

        let put: InstancePut = serde_json::from_str(r#"{"restore":""}"#).unwrap();
        assert_eq!(put.restore_target(), None);

        let put: InstancePut =
            serde_json::from_str(r#"{"config":{"limits.cpu":"2"},"profiles":["default"]}"#).unwrap();
        assert_eq!(put.restore_target(), None);
        assert_eq!(put.config.get("limits.cpu").map(String::as_str), Some("2"));
        assert_eq!(put.profiles, vec!["default".to_string()]);
        assert!(!put.ephemeral);
    }

    #[test]
    fn test_instance_type_capabilities() {
        assert_eq!(InstanceType::Container.extra_resource_kinds(), &["containers"]);
        assert!(InstanceType::VirtualMachine.extra_resource_kinds().is_empty());
        assert_eq!(
            InstanceType::VirtualMachine.stateful_restore_requirement(),
            Some("migration.stateful")
        );
        assert_eq!(InstanceType::Container.stateful_restore_requirement(), None);

        let json = serde_json::to_string(&InstanceType::VirtualMachine).unwrap();
        assert_eq!(json, "\"virtual-machine\"");
    }

    #[test]
    fn test_snapshot_naming() {
        let mut web = Instance::new("default", "web", InstanceType::Container, 2);
        web.config.insert("limits.cpu".to_string(), "1".to_string());

        let snap = web.snapshot("snap1", false);
        assert_eq!(snap.name, "web/snap1");
        assert!(snap.is_snapshot());
        assert!(!web.is_snapshot());
        assert_ne!(snap.id, web.id);
        assert_eq!(snap.config, web.config);
    }
}

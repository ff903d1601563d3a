use crate::model::{Config, Devices};
use serde::{Deserialize, Serialize};

/// Profile row as stored in the cluster database. Config and devices live in
/// their own tables and are only loaded when converting to the API form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: i64,
    pub project: String,
    pub name: String,
    pub description: String,
}

/// API-facing profile, used for quota computation and expanded config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: Config,
    #[serde(default)]
    pub devices: Devices,
}

impl Profile {
    pub fn new(project: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            description: String::new(),
            config: Config::new(),
            devices: Devices::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.config.insert(key.to_string(), value.to_string());
        self
    }
}

/// Applies profiles in order, then the local config on top
pub fn expand_config(profiles: &[Profile], local: &Config) -> Config {
    let mut expanded = Config::new();
    for profile in profiles {
        expanded.extend(profile.config.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    expanded.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_config_precedence() {
        let base = Profile::new("default", "default").with_config("limits.cpu", "1");
        let big = Profile::new("default", "big")
            .with_config("limits.cpu", "4")
            .with_config("limits.memory", "4GiB");
        let mut local = Config::new();
        local.insert("limits.memory".to_string(), "1GiB".to_string());

        let expanded = expand_config(&[base, big], &local);
        assert_eq!(expanded.get("limits.cpu").map(String::as_str), Some("4"));
        assert_eq!(expanded.get("limits.memory").map(String::as_str), Some("1GiB"));
    }
}

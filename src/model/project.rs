use crate::model::Config;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config: Config,
}

impl Project {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            config: Config::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.config.insert(key.to_string(), value.to_string());
        self
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(|v| v.as_str()).filter(|v| !v.is_empty())
    }

    /// Projects have their own profiles unless `features.profiles` is turned off
    pub fn has_profiles(&self) -> bool {
        self.config_value("features.profiles") != Some("false")
    }

    pub fn is_restricted(&self) -> bool {
        self.config_value("restricted") == Some("true")
    }

    pub fn has_limits(&self) -> bool {
        self.config
            .iter()
            .any(|(k, v)| k.starts_with("limits.") && !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_flags() {
        let project = Project::new("default");
        assert!(project.has_profiles());
        assert!(!project.is_restricted());
        assert!(!project.has_limits());

        let project = Project::new("team")
            .with_config("features.profiles", "false")
            .with_config("restricted", "true")
            .with_config("limits.cpu", "8");
        assert!(!project.has_profiles());
        assert!(project.is_restricted());
        assert!(project.has_limits());
        assert_eq!(project.config_value("limits.cpu"), Some("8"));
        assert_eq!(project.config_value("limits.memory"), None);
    }
}

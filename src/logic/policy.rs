use itertools::Itertools;
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::{
    expand_config, parse_byte_size, parse_cpu_count, Config, Instance, InstancePut, InstanceType,
    Profile, Project,
};
use crate::store::cluster::{profiles_if_enabled, TxWork};
use crate::store::traits::ClusterTx;

/// Project limits that are summed over every instance of the project
const AGGREGATE_LIMITS: &[&str] = &["limits.cpu", "limits.memory", "limits.processes"];

/// Validates a plain update of `instance` inside a cluster transaction.
///
/// Resolves the requested profiles in the order given and checks the
/// proposed state against the project's restrictions and limits. Yields the
/// resolved profiles for the caller.
pub struct InstanceUpdatePolicy<'a> {
    pub project: &'a str,
    pub instance: &'a Instance,
    pub request: &'a InstancePut,
}

#[async_trait::async_trait]
impl<'a> TxWork for InstanceUpdatePolicy<'a> {
    type Output = Vec<Profile>;

    async fn run(self, tx: &mut dyn ClusterTx) -> Result<Vec<Profile>> {
        if let Some(name) = self.request.profiles.iter().duplicates().next() {
            return Err(Error::bad_request(format!("Duplicate profile found in request: {}", name)));
        }

        let records = profiles_if_enabled(tx, self.project, &self.request.profiles).await?;

        let mut profiles = Vec::with_capacity(records.len());
        for record in &records {
            profiles.push(tx.profile_to_api(record).await?);
        }

        allow_instance_update(tx, self.project, self.instance, self.request, &profiles).await?;

        Ok(profiles)
    }
}

/// Checks the proposed state of an instance against its project's
/// restrictions and limits. `profiles` are the resolved requested profiles.
pub async fn allow_instance_update(
    tx: &mut dyn ClusterTx,
    project_name: &str,
    instance: &Instance,
    request: &InstancePut,
    profiles: &[Profile],
) -> Result<()> {
    let project = tx
        .get_project(project_name)
        .await?
        .ok_or_else(|| Error::not_found(format!("Project {:?} not found", project_name)))?;

    if !project.is_restricted() && !project.has_limits() {
        return Ok(());
    }

    let proposed = expand_config(profiles, &request.config);

    if project.is_restricted() {
        check_volatile_keys(&instance.config, &request.config)?;
        check_restrictions(&project, instance.instance_type, &proposed)?;
    }

    if project.has_limits() {
        let instances: Vec<Instance> = tx
            .list_instances(&project.name)
            .await?
            .into_iter()
            .filter(|i| !i.is_snapshot())
            .collect();

        check_count_limits(&project, &instances)?;

        let mut expanded = vec![(instance.name.clone(), proposed)];
        let mut cache: HashMap<String, Profile> = HashMap::new();
        for other in instances.iter().filter(|i| i.id != instance.id) {
            let other_profiles = cached_profiles(tx, &project.name, &other.profiles, &mut cache).await?;
            expanded.push((other.name.clone(), expand_config(&other_profiles, &other.config)));
        }

        check_aggregate_limits(&project, &expanded)?;
    }

    Ok(())
}

async fn cached_profiles(
    tx: &mut dyn ClusterTx,
    project: &str,
    names: &[String],
    cache: &mut HashMap<String, Profile>,
) -> Result<Vec<Profile>> {
    let mut profiles = Vec::with_capacity(names.len());
    for name in names {
        if let Some(profile) = cache.get(name) {
            profiles.push(profile.clone());
            continue;
        }

        let records = profiles_if_enabled(tx, project, std::slice::from_ref(name)).await?;
        for record in &records {
            let profile = tx.profile_to_api(record).await?;
            cache.insert(name.clone(), profile.clone());
            profiles.push(profile);
        }
    }
    Ok(profiles)
}

/// Restricted projects may not set or alter volatile keys. Keys left out of
/// the request are carried over by the update, so only explicit values count.
fn check_volatile_keys(current: &Config, requested: &Config) -> Result<()> {
    for (key, value) in requested.iter().filter(|(k, _)| k.starts_with("volatile.")) {
        if current.get(key) != Some(value) {
            log::debug!("Rejecting change of volatile key {:?}", key);
            return Err(Error::forbidden(format!(
                "Changing volatile key {:?} is forbidden in restricted projects",
                key
            )));
        }
    }
    Ok(())
}

fn check_restrictions(project: &Project, instance_type: InstanceType, config: &Config) -> Result<()> {
    let allowed = |key: &str| project.config_value(key) == Some("allow");
    let enabled = |key: &str| config.get(key).map(String::as_str) == Some("true");

    if instance_type == InstanceType::Container {
        if enabled("security.privileged") && !allowed("restricted.containers.privilege") {
            return Err(Error::forbidden("Privileged containers are forbidden"));
        }
        if enabled("security.nesting") && !allowed("restricted.containers.nesting") {
            return Err(Error::forbidden("Container nesting is forbidden"));
        }
    }

    if !allowed(instance_type.lowlevel_restriction_key()) {
        if let Some(key) = config.keys().find(|k| k.starts_with("raw.")) {
            return Err(Error::forbidden(format!(
                "Use of low-level configuration key {:?} is forbidden",
                key
            )));
        }
    }

    Ok(())
}

fn check_count_limits(project: &Project, instances: &[Instance]) -> Result<()> {
    let checks = [
        ("limits.instances", None),
        (InstanceType::Container.count_limit_key(), Some(InstanceType::Container)),
        (InstanceType::VirtualMachine.count_limit_key(), Some(InstanceType::VirtualMachine)),
    ];

    for (key, instance_type) in checks {
        let Some(raw) = project.config_value(key) else {
            continue;
        };
        let limit: usize = raw
            .parse()
            .map_err(|_| Error::bad_request(format!("Invalid value {:?} for {:?}", raw, key)))?;

        let count = instances
            .iter()
            .filter(|i| instance_type.map_or(true, |t| i.instance_type == t))
            .count();
        if count > limit {
            log::debug!("Project {:?} has {} instances against {}={}", project.name, count, key, limit);
            return Err(Error::forbidden(format!(
                "Reached maximum number of instances for {:?} in project {:?}",
                key, project.name
            )));
        }
    }

    Ok(())
}

fn parse_limit(key: &str, value: &str) -> Result<u64> {
    match key {
        "limits.cpu" => parse_cpu_count(value),
        "limits.memory" => parse_byte_size(value),
        _ => value
            .trim()
            .parse()
            .map_err(|_| Error::bad_request(format!("Invalid value {:?} for {:?}", value, key))),
    }
}

/// `expanded` pairs instance names with their expanded config, the instance
/// being updated first with its proposed config.
fn check_aggregate_limits(project: &Project, expanded: &[(String, Config)]) -> Result<()> {
    for key in AGGREGATE_LIMITS {
        let Some(raw_limit) = project.config_value(key) else {
            continue;
        };
        let limit = parse_limit(key, raw_limit)?;

        let mut total: u64 = 0;
        for (name, config) in expanded {
            let value = config
                .get(*key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::forbidden(format!(
                        "Instance {:?} in project {:?} has no {:?} config, either directly or via a profile",
                        name, project.name, key
                    ))
                })?;
            total = total.saturating_add(parse_limit(key, value)?);
        }

        if total > limit {
            log::debug!("Project {:?} would use {} against {}={}", project.name, total, key, limit);
            return Err(Error::forbidden(format!(
                "Reached maximum aggregate value {:?} for {:?} in project {:?}",
                raw_limit, key, project.name
            )));
        }
    }

    Ok(())
}

use crate::error::{Error, Result};
use crate::model::{ProfileRecord, DEFAULT_PROJECT};
use crate::store::traits::{ClusterStore, ClusterTx};

/// A unit of work executed inside a cluster transaction
#[async_trait::async_trait]
pub trait TxWork: Send {
    type Output: Send;

    async fn run(self, tx: &mut dyn ClusterTx) -> Result<Self::Output>;
}

/// Runs `work` in a fresh cluster transaction.
///
/// The transaction is committed only if `work` succeeds. On failure it is
/// rolled back and the error from `work` is returned as is. The caller's
/// future owns the transaction, so dropping it (client went away) before the
/// commit discards every read and write made so far.
pub async fn run_in_transaction<S, W>(store: &S, work: W) -> Result<W::Output>
where
    S: ClusterStore + ?Sized,
    W: TxWork,
{
    let mut tx = store.begin().await?;

    match work.run(tx.as_mut()).await {
        Ok(output) => {
            tx.commit().await?;
            Ok(output)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                log::warn!("Failed to roll back cluster transaction: {}", rollback_err);
            }
            Err(err)
        }
    }
}

/// Resolves profile names in the order given.
///
/// Projects without their own profiles (`features.profiles=false`) resolve
/// names in the default project.
pub async fn profiles_if_enabled(
    tx: &mut dyn ClusterTx,
    project: &str,
    names: &[String],
) -> Result<Vec<ProfileRecord>> {
    let project_row = tx
        .get_project(project)
        .await?
        .ok_or_else(|| Error::not_found(format!("Project {:?} not found", project)))?;

    let effective_project = if project_row.has_profiles() {
        project
    } else {
        DEFAULT_PROJECT
    };

    let mut profiles = Vec::with_capacity(names.len());
    for name in names {
        let record = tx
            .get_profile(effective_project, name)
            .await?
            .ok_or_else(|| Error::bad_request(format!("Requested profile {:?} doesn't exist", name)))?;
        profiles.push(record);
    }

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Profile, Project};
    use crate::store::{MemoryStore, ProfileStore, ProjectStore};

    struct ResolveProfiles {
        project: String,
        names: Vec<String>,
    }

    #[async_trait::async_trait]
    impl TxWork for ResolveProfiles {
        type Output = Vec<String>;

        async fn run(self, tx: &mut dyn ClusterTx) -> Result<Vec<String>> {
            let records = profiles_if_enabled(tx, &self.project, &self.names).await?;
            Ok(records.into_iter().map(|r| r.project + "/" + &r.name).collect())
        }
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.upsert_project(Project::new("default")).await.unwrap();
        store
            .upsert_project(Project::new("shared").with_config("features.profiles", "false"))
            .await
            .unwrap();
        store.upsert_project(Project::new("own")).await.unwrap();
        for name in ["default", "gpu", "big"] {
            store.upsert_profile(Profile::new("default", name)).await.unwrap();
        }
        store.upsert_profile(Profile::new("own", "default")).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_profiles_resolved_in_caller_order() {
        let store = seeded_store().await;
        let names = vec!["gpu".to_string(), "default".to_string(), "big".to_string()];

        let resolved = run_in_transaction(
            &store,
            ResolveProfiles { project: "default".to_string(), names },
        )
        .await
        .unwrap();

        assert_eq!(resolved, vec!["default/gpu", "default/default", "default/big"]);
    }

    #[tokio::test]
    async fn test_profiles_fall_back_to_default_project() {
        let store = seeded_store().await;

        let resolved = run_in_transaction(
            &store,
            ResolveProfiles { project: "shared".to_string(), names: vec!["gpu".to_string()] },
        )
        .await
        .unwrap();
        assert_eq!(resolved, vec!["default/gpu"]);

        // A project with its own profiles doesn't see the default project's
        let err = run_in_transaction(
            &store,
            ResolveProfiles { project: "own".to_string(), names: vec!["gpu".to_string()] },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Requested profile \"gpu\" doesn't exist");
    }

    #[tokio::test]
    async fn test_work_error_is_returned_unchanged() {
        let store = seeded_store().await;

        let err = run_in_transaction(
            &store,
            ResolveProfiles { project: "nope".to_string(), names: vec![] },
        )
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Project \"nope\" not found");
    }
}

use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool, Postgres, Row, Transaction};

use crate::error::{Error, Result};
use crate::model::{
    Config, Device, Devices, Id, Instance, InstanceType, OperationRecord, OperationResources,
    OperationType, Profile, ProfileRecord, Project,
};
use crate::store::traits::{
    ClusterStore, ClusterTx, InstanceStore, OperationStore, ProfileStore, ProjectStore, Store,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        name TEXT PRIMARY KEY,
        description TEXT NOT NULL DEFAULT '',
        config JSONB NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles (
        id BIGSERIAL PRIMARY KEY,
        project TEXT NOT NULL REFERENCES projects(name) ON DELETE CASCADE,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        UNIQUE (project, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles_config (
        profile_id BIGINT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        UNIQUE (profile_id, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS profiles_devices (
        profile_id BIGINT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        config JSONB NOT NULL DEFAULT '{}',
        UNIQUE (profile_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS instances (
        id TEXT PRIMARY KEY,
        project TEXT NOT NULL REFERENCES projects(name),
        name TEXT NOT NULL,
        type TEXT NOT NULL,
        architecture INTEGER NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        config JSONB NOT NULL DEFAULT '{}',
        devices JSONB NOT NULL DEFAULT '{}',
        ephemeral BOOLEAN NOT NULL DEFAULT FALSE,
        profiles JSONB NOT NULL DEFAULT '[]',
        stateful BOOLEAN NOT NULL DEFAULT FALSE,
        location TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL,
        last_updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (project, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS operations (
        id TEXT PRIMARY KEY,
        project TEXT NOT NULL,
        location TEXT NOT NULL,
        type INTEGER NOT NULL,
        resources JSONB NOT NULL DEFAULT '{}'
    )
    "#,
];

const INSTANCE_COLUMNS: &str = "id, project, name, type, architecture, description, config, devices, \
     ephemeral, profiles, stateful, location, created_at, last_updated_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create the schema if it isn't there yet
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        log::info!("Database schema is up to date");
        Ok(())
    }
}

fn parse_instance_type(value: &str) -> Result<InstanceType> {
    match value {
        "container" => Ok(InstanceType::Container),
        "virtual-machine" => Ok(InstanceType::VirtualMachine),
        other => Err(Error::internal(format!("Unknown instance type {:?} in database", other))),
    }
}

fn instance_from_row(row: &sqlx::postgres::PgRow) -> Result<Instance> {
    let instance_type: String = row.try_get("type")?;
    Ok(Instance {
        id: row.try_get("id")?,
        project: row.try_get("project")?,
        name: row.try_get("name")?,
        instance_type: parse_instance_type(&instance_type)?,
        architecture: row.try_get("architecture")?,
        description: row.try_get("description")?,
        config: serde_json::from_value(row.try_get("config")?)?,
        devices: serde_json::from_value(row.try_get("devices")?)?,
        ephemeral: row.try_get("ephemeral")?,
        profiles: serde_json::from_value(row.try_get("profiles")?)?,
        stateful: row.try_get("stateful")?,
        location: row.try_get("location")?,
        created_at: row.try_get("created_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

fn project_from_row(row: &sqlx::postgres::PgRow) -> Result<Project> {
    Ok(Project {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        config: serde_json::from_value(row.try_get("config")?)?,
    })
}

async fn fetch_project(conn: &mut PgConnection, name: &str) -> Result<Option<Project>> {
    let row = sqlx::query("SELECT name, description, config FROM projects WHERE name = $1")
        .bind(name)
        .fetch_optional(conn)
        .await?;

    row.as_ref().map(project_from_row).transpose()
}

async fn fetch_profile_record(
    conn: &mut PgConnection,
    project: &str,
    name: &str,
) -> Result<Option<ProfileRecord>> {
    let row = sqlx::query(
        "SELECT id, project, name, description FROM profiles WHERE project = $1 AND name = $2",
    )
    .bind(project)
    .bind(name)
    .fetch_optional(conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(ProfileRecord {
        id: row.try_get("id")?,
        project: row.try_get("project")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    }))
}

async fn fetch_profile_details(conn: &mut PgConnection, record: &ProfileRecord) -> Result<Profile> {
    let config_rows = sqlx::query("SELECT key, value FROM profiles_config WHERE profile_id = $1")
        .bind(record.id)
        .fetch_all(&mut *conn)
        .await?;

    let mut config = Config::new();
    for row in config_rows {
        config.insert(row.try_get("key")?, row.try_get("value")?);
    }

    let device_rows = sqlx::query("SELECT name, config FROM profiles_devices WHERE profile_id = $1")
        .bind(record.id)
        .fetch_all(&mut *conn)
        .await?;

    let mut devices = Devices::new();
    for row in device_rows {
        let device: Device = serde_json::from_value(row.try_get("config")?)?;
        devices.insert(row.try_get("name")?, device);
    }

    Ok(Profile {
        name: record.name.clone(),
        project: record.project.clone(),
        description: record.description.clone(),
        config,
        devices,
    })
}

async fn fetch_instances(conn: &mut PgConnection, project: &str) -> Result<Vec<Instance>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM instances WHERE project = $1 ORDER BY name",
        INSTANCE_COLUMNS
    ))
    .bind(project)
    .fetch_all(conn)
    .await?;

    rows.iter().map(instance_from_row).collect()
}

#[async_trait::async_trait]
impl ProjectStore for PostgresStore {
    async fn get_project(&self, name: &str) -> Result<Option<Project>> {
        let mut conn = self.pool.acquire().await?;
        fetch_project(&mut *conn, name).await
    }

    async fn upsert_project(&self, project: Project) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO projects (name, description, config)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                description = EXCLUDED.description,
                config = EXCLUDED.config
            "#,
        )
        .bind(&project.name)
        .bind(&project.description)
        .bind(serde_json::to_value(&project.config)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ProfileStore for PostgresStore {
    async fn get_profile(&self, project: &str, name: &str) -> Result<Option<Profile>> {
        let mut conn = self.pool.acquire().await?;
        match fetch_profile_record(&mut *conn, project, name).await? {
            Some(record) => Ok(Some(fetch_profile_details(&mut *conn, &record).await?)),
            None => Ok(None),
        }
    }

    async fn upsert_profile(&self, profile: Profile) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO profiles (project, name, description)
            VALUES ($1, $2, $3)
            ON CONFLICT (project, name) DO UPDATE SET description = EXCLUDED.description
            RETURNING id
            "#,
        )
        .bind(&profile.project)
        .bind(&profile.name)
        .bind(&profile.description)
        .fetch_one(&mut *tx)
        .await?;
        let id: i64 = row.try_get("id")?;

        sqlx::query("DELETE FROM profiles_config WHERE profile_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for (key, value) in &profile.config {
            sqlx::query("INSERT INTO profiles_config (profile_id, key, value) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM profiles_devices WHERE profile_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for (name, device) in &profile.devices {
            sqlx::query("INSERT INTO profiles_devices (profile_id, name, config) VALUES ($1, $2, $3)")
                .bind(id)
                .bind(name)
                .bind(serde_json::to_value(device)?)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstanceStore for PostgresStore {
    async fn get_instance(&self, project: &str, name: &str) -> Result<Option<Instance>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM instances WHERE project = $1 AND name = $2",
            INSTANCE_COLUMNS
        ))
        .bind(project)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(instance_from_row).transpose()
    }

    async fn list_instances(&self, project: &str) -> Result<Vec<Instance>> {
        let mut conn = self.pool.acquire().await?;
        fetch_instances(&mut *conn, project).await
    }

    async fn upsert_instance(&self, instance: Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, project, name, type, architecture, description, config, devices,
                                   ephemeral, profiles, stateful, location, created_at, last_updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                architecture = EXCLUDED.architecture,
                description = EXCLUDED.description,
                config = EXCLUDED.config,
                devices = EXCLUDED.devices,
                ephemeral = EXCLUDED.ephemeral,
                profiles = EXCLUDED.profiles,
                stateful = EXCLUDED.stateful,
                location = EXCLUDED.location,
                last_updated_at = EXCLUDED.last_updated_at
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.project)
        .bind(&instance.name)
        .bind(instance.instance_type.as_str())
        .bind(instance.architecture)
        .bind(&instance.description)
        .bind(serde_json::to_value(&instance.config)?)
        .bind(serde_json::to_value(&instance.devices)?)
        .bind(instance.ephemeral)
        .bind(serde_json::to_value(&instance.profiles)?)
        .bind(instance.stateful)
        .bind(&instance.location)
        .bind(instance.created_at)
        .bind(instance.last_updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => Error::Conflict(format!(
                "Instance {:?} already exists in project {:?}",
                instance.name, instance.project
            )),
            other => Error::Database(other),
        })?;

        Ok(())
    }

    async fn update_instance(&self, instance: &Instance) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE instances SET
                architecture = $2,
                description = $3,
                config = $4,
                devices = $5,
                ephemeral = $6,
                profiles = $7,
                stateful = $8,
                last_updated_at = $9
            WHERE id = $1
            "#,
        )
        .bind(&instance.id)
        .bind(instance.architecture)
        .bind(&instance.description)
        .bind(serde_json::to_value(&instance.config)?)
        .bind(serde_json::to_value(&instance.devices)?)
        .bind(instance.ephemeral)
        .bind(serde_json::to_value(&instance.profiles)?)
        .bind(instance.stateful)
        .bind(instance.last_updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_instance(&self, project: &str, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM instances WHERE project = $1 AND name = $2")
            .bind(project)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl OperationStore for PostgresStore {
    async fn register_operation(&self, record: OperationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO operations (id, project, location, type, resources) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&record.id)
        .bind(&record.project)
        .bind(&record.location)
        .bind(record.operation_type.code())
        .bind(serde_json::to_value(&record.resources)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_operation(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM operations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_operations(&self, project: Option<&str>) -> Result<Vec<OperationRecord>> {
        let rows = sqlx::query(
            "SELECT id, project, location, type, resources FROM operations \
             WHERE $1::TEXT IS NULL OR project = $1 ORDER BY id",
        )
        .bind(project)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let code: i32 = row.try_get("type")?;
            let operation_type = OperationType::from_code(code)
                .ok_or_else(|| Error::internal(format!("Unknown operation type {} in database", code)))?;
            let resources: OperationResources = serde_json::from_value(row.try_get("resources")?)?;
            records.push(OperationRecord {
                id: row.try_get("id")?,
                project: row.try_get("project")?,
                location: row.try_get("location")?,
                operation_type,
                resources,
            });
        }

        Ok(records)
    }

    async fn clear_operations(&self, location: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM operations WHERE location = $1")
            .bind(location)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Cluster transaction backed by a Postgres transaction.
/// sqlx rolls the transaction back if it is dropped before `commit`.
pub struct PgClusterTx {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgClusterTx {
    fn conn(&mut self) -> Result<&mut PgConnection> {
        match self.tx.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(Error::internal("Transaction already finished")),
        }
    }
}

#[async_trait::async_trait]
impl ClusterTx for PgClusterTx {
    async fn get_project(&mut self, name: &str) -> Result<Option<Project>> {
        fetch_project(self.conn()?, name).await
    }

    async fn get_profile(&mut self, project: &str, name: &str) -> Result<Option<ProfileRecord>> {
        fetch_profile_record(self.conn()?, project, name).await
    }

    async fn profile_to_api(&mut self, record: &ProfileRecord) -> Result<Profile> {
        fetch_profile_details(self.conn()?, record).await
    }

    async fn list_instances(&mut self, project: &str) -> Result<Vec<Instance>> {
        fetch_instances(self.conn()?, project).await
    }

    async fn commit(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(Error::internal("Transaction already finished")),
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.tx.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Err(Error::internal("Transaction already finished")),
        }
    }
}

#[async_trait::async_trait]
impl ClusterStore for PostgresStore {
    async fn begin(&self) -> Result<Box<dyn ClusterTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgClusterTx { tx: Some(tx) }))
    }
}

impl Store for PostgresStore {}

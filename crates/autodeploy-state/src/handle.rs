//! SurrealDB Handle - Connection and Operations
//!
//! Manages the connection and provides methods for:
//! - deployment record insert / update / get / list
//! - endpoint ledger append / last / history
//!
//! Supports in-memory, URL, cloud (WebSocket) and local file connections.

use crate::error::StateError;
use crate::migrations;
use crate::records::{
    DeploymentId, DeploymentRecord, DeploymentState, EndpointRecord, VersionLabel,
};
use crate::storage_traits::{check_update, StorageResult};
use crate::Result;
use crate::StorageError;
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

/// Default namespace for autodeploy tables
pub const DEFAULT_NAMESPACE: &str = "autodeploy";
/// Default database name
pub const DEFAULT_DATABASE: &str = "main";
/// Local persistence directory used when no connection is configured
pub const DEFAULT_LOCAL_PATH: &str = ".autodeploy/db";

/// Configuration for SurrealDB Cloud connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "autodeploy")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create a new cloud configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "autodeploy")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// SurrealDB connection handle
#[derive(Clone)]
pub struct SurrealHandle {
    db: Surreal<Any>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbDeployment {
    deployment_id: String,
    version: String,
    state: DeploymentState,
    created_at: SurrealDatetime,
    body: DeploymentRecord,
}

impl DbDeployment {
    fn from_record(record: &DeploymentRecord) -> Self {
        Self {
            deployment_id: record.deployment_id.0.clone(),
            version: record.version.as_str().to_string(),
            state: record.state,
            created_at: SurrealDatetime::from(record.created_at),
            body: record.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DbEndpointUpdate {
    applied_at: SurrealDatetime,
    body: EndpointRecord,
}

impl SurrealHandle {
    /// Connect to SurrealDB in-memory and set up schema
    #[instrument(skip_all)]
    pub async fn setup_db() -> Result<Self> {
        info!("Connecting to SurrealDB (in-memory)");
        Self::connect_url("mem://").await
    }

    /// Connect to an arbitrary SurrealDB URL (`mem://`, `surrealkv://path`,
    /// `ws://host:port`) using the default namespace and database.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect_url(url: &str) -> Result<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealDB connected and schema initialized");
        Ok(SurrealHandle { db })
    }

    /// Connect to SurrealDB Cloud
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn setup_cloud(config: CloudConfig) -> Result<Self> {
        info!("Connecting to SurrealDB Cloud (root={})", config.is_root);

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| {
                StateError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StateError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        migrations::init_schema(&db).await?;
        info!("SurrealDB Cloud connected and schema initialized");
        Ok(SurrealHandle { db })
    }

    /// Connect using environment variables
    ///
    /// If SURREALDB_ENDPOINT is set, connects to cloud.
    /// If SURREALDB_URL is set, connects to that URL.
    /// Otherwise persists locally under `.autodeploy/db`.
    #[instrument(skip_all)]
    pub async fn setup_from_env() -> Result<Self> {
        if let Ok(config) = CloudConfig::from_env() {
            info!("Cloud config found, connecting to SurrealDB Cloud");
            return Self::setup_cloud(config).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            info!("SURREALDB_URL found, connecting to {}", url);
            return Self::connect_url(&url).await;
        }

        std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                DEFAULT_LOCAL_PATH, e
            ))
        })?;
        let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
        info!("No database configured, using local persistence: {}", url);
        Self::connect_url(&url).await
    }

    // ========== Deployment Records ==========

    async fn fetch_deployment(&self, deployment_id: &str) -> StorageResult<Option<DbDeployment>> {
        let id_owned = deployment_id.to_string();
        let mut result = self
            .db
            .query("SELECT * FROM deployments WHERE deployment_id = $id")
            .bind(("id", id_owned))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbDeployment> = result
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().next())
    }

    /// Insert a new deployment record.
    #[instrument(skip(self, record), fields(deployment_id = %record.deployment_id, version = %record.version))]
    pub async fn deployment_insert(&self, record: &DeploymentRecord) -> StorageResult<()> {
        if self
            .fetch_deployment(&record.deployment_id.0)
            .await?
            .is_some()
        {
            return Err(StorageError::DuplicateDeployment {
                deployment_id: record.deployment_id.0.clone(),
            });
        }

        let created: Option<DbDeployment> = self
            .db
            .create("deployments")
            .content(DbDeployment::from_record(record))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        created
            .map(|_| ())
            .ok_or_else(|| StorageError::Backend("failed to create deployment record".to_string()))
    }

    /// Replace a deployment record, enforcing forward-only state.
    #[instrument(skip(self, record), fields(deployment_id = %record.deployment_id, state = %record.state))]
    pub async fn deployment_update(&self, record: &DeploymentRecord) -> StorageResult<()> {
        let existing = self
            .fetch_deployment(&record.deployment_id.0)
            .await?
            .ok_or_else(|| StorageError::DeploymentNotFound {
                deployment_id: record.deployment_id.0.clone(),
            })?;
        check_update(&existing.body, record)?;

        debug!(from = %existing.state, to = %record.state, "updating deployment");
        self.db
            .query("UPDATE deployments CONTENT $row WHERE deployment_id = $id")
            .bind(("row", DbDeployment::from_record(record)))
            .bind(("id", record.deployment_id.0.clone()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Fetch a deployment record by id.
    #[instrument(skip(self), fields(deployment_id = %deployment_id))]
    pub async fn deployment_get(
        &self,
        deployment_id: &DeploymentId,
    ) -> StorageResult<DeploymentRecord> {
        self.fetch_deployment(&deployment_id.0)
            .await?
            .map(|row| row.body)
            .ok_or_else(|| StorageError::DeploymentNotFound {
                deployment_id: deployment_id.0.clone(),
            })
    }

    /// List deployment records, newest first.
    #[instrument(skip(self))]
    pub async fn deployment_list(&self, limit: usize) -> StorageResult<Vec<DeploymentRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM deployments ORDER BY created_at DESC LIMIT $limit")
            .bind(("limit", limit as i64))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbDeployment> = result
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(|row| row.body).collect())
    }

    /// All deployment records for a version label, oldest first.
    #[instrument(skip(self), fields(version = %version))]
    pub async fn deployment_find_by_version(
        &self,
        version: &VersionLabel,
    ) -> StorageResult<Vec<DeploymentRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM deployments WHERE version = $version ORDER BY created_at ASC")
            .bind(("version", version.as_str().to_string()))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbDeployment> = result
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(|row| row.body).collect())
    }

    // ========== Endpoint Ledger ==========

    /// Append an applied endpoint reference.
    #[instrument(skip(self, record), fields(digest = %record.endpoint.digest))]
    pub async fn endpoint_record(&self, record: &EndpointRecord) -> StorageResult<()> {
        let row = DbEndpointUpdate {
            applied_at: SurrealDatetime::from(record.applied_at),
            body: record.clone(),
        };
        let created: Option<DbEndpointUpdate> = self
            .db
            .create("endpoint_updates")
            .content(row)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        created
            .map(|_| ())
            .ok_or_else(|| StorageError::Backend("failed to record endpoint update".to_string()))
    }

    /// Endpoint updates, newest first.
    #[instrument(skip(self))]
    pub async fn endpoint_history(&self, limit: usize) -> StorageResult<Vec<EndpointRecord>> {
        let mut result = self
            .db
            .query("SELECT * FROM endpoint_updates ORDER BY applied_at DESC LIMIT $limit")
            .bind(("limit", limit as i64))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<DbEndpointUpdate> = result
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(rows.into_iter().map(|row| row.body).collect())
    }
}

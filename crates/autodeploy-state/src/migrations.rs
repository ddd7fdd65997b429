//! SurrealDB schema migrations and initialization
//!
//! Sets up the `deployments` and `endpoint_updates` tables with their
//! indexes. Safe to call on every connection (all statements are
//! idempotent `DEFINE`s).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all autodeploy tables in SurrealDB
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing autodeploy SurrealDB schema");

    init_deployments_table(db).await?;
    init_endpoint_updates_table(db).await?;

    info!("autodeploy schema initialization complete");
    Ok(())
}

/// Initialize `deployments` table
///
/// Schema:
/// ```text
/// TABLE deployments {
///   deployment_id:  STRING (unique)
///   version:        STRING (indexed)
///   state:          STRING
///   created_at:     DATETIME (indexed)
///   body:           OBJECT (full DeploymentRecord)
/// }
/// ```
///
/// State transitions are forward-only; that rule is enforced in
/// application code before every `UPDATE`.
async fn init_deployments_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing deployments table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS deployments SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_deployment_id ON TABLE deployments COLUMNS deployment_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_deployment_version ON TABLE deployments COLUMNS version;
        DEFINE INDEX IF NOT EXISTS idx_deployment_created_at ON TABLE deployments COLUMNS created_at;
    "#;

    db.query(sql).await?.check()?;
    info!("deployments table initialized");
    Ok(())
}

/// Initialize `endpoint_updates` table
///
/// Append-only: updates and deletes are not permitted.
async fn init_endpoint_updates_table(db: &Surreal<Any>) -> Result<()> {
    debug!("Initializing endpoint_updates table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS endpoint_updates SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_endpoint_applied_at ON TABLE endpoint_updates COLUMNS applied_at;
    "#;

    db.query(sql).await?.check()?;
    info!("endpoint_updates table initialized");
    Ok(())
}

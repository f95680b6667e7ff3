//! Discrete database steps used by the orchestrators.
//!
//! Every step is individually failable and maps collaborator errors onto the
//! typed taxonomy. Nothing here retries.

use anyhow::Context;
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::database::DatabaseAdmin;
use crate::errors::{OpsError, OpsResult, describe};

pub struct Executor {
    admin: Arc<dyn DatabaseAdmin>,
    encoding: String,
}

impl Executor {
    pub fn new(admin: Arc<dyn DatabaseAdmin>, encoding: &str) -> Self {
        Self {
            admin,
            encoding: encoding.to_string(),
        }
    }

    pub async fn list_databases(&self) -> OpsResult<Vec<String>> {
        self.admin
            .list_databases()
            .await
            .map_err(|e| OpsError::CatalogUnavailable(format!("cannot list databases: {}", describe(&e))))
    }

    pub async fn database_exists(&self, name: &str) -> OpsResult<bool> {
        self.admin.database_exists(name).await.map_err(|e| {
            OpsError::CatalogUnavailable(format!(
                "cannot check whether database '{}' exists: {}",
                name,
                describe(&e)
            ))
        })
    }

    /// Dumps `name` to `destination`, creating parent directories first.
    pub async fn dump_database(&self, name: &str, destination: &Path) -> OpsResult<()> {
        let dump = async {
            if let Some(parent) = destination.parent() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create dump directory {}", parent.display())
                })?;
            }
            self.admin.dump_to_file(name, destination).await
        };

        dump.await.map_err(|e| OpsError::DumpFailed {
            database: name.to_string(),
            reason: describe(&e),
        })?;
        info!("Database dumped: {} -> {}", name, destination.display());
        Ok(())
    }

    /// Best effort: a database with no sessions commonly reports an error
    /// here, so failures are logged and swallowed.
    pub async fn terminate_connections(&self, name: &str) {
        if let Err(e) = self.admin.terminate_sessions(name).await {
            warn!("Terminating connections to '{}' reported: {}", name, describe(&e));
        }
    }

    /// Drops `name` if present, then creates it fresh with the fixed encoding.
    /// A create that finds the database still present is a `CreateFailed`.
    pub async fn drop_and_create(&self, name: &str) -> OpsResult<()> {
        info!("Dropping database: {}", name);
        if let Err(e) = self.admin.drop_database_if_exists(name).await {
            warn!("Dropping '{}' reported: {}", name, describe(&e));
        }
        self.create_database(name).await
    }

    pub async fn create_database(&self, name: &str) -> OpsResult<()> {
        info!("Creating database: {} (encoding {})", name, self.encoding);
        self.admin
            .create_database(name, &self.encoding)
            .await
            .map_err(|e| OpsError::CreateFailed {
                database: name.to_string(),
                reason: describe(&e),
            })
    }

    /// Loads a SQL file. On failure the database is left partially loaded.
    pub async fn load_sql_file(&self, name: &str, sql_file: &Path) -> OpsResult<()> {
        info!("Loading SQL: {} into {}", sql_file.display(), name);
        self.admin
            .load_file(name, sql_file)
            .await
            .map_err(|e| OpsError::RestoreFailed {
                database: name.to_string(),
                reason: describe(&e),
            })
    }

    pub async fn stream_clone(&self, source: &str, target: &str) -> OpsResult<()> {
        info!("Copying data from {} to {}", source, target);
        self.admin
            .pipe_clone(source, target)
            .await
            .map_err(|e| OpsError::CloneFailed {
                from: source.to_string(),
                to: target.to_string(),
                reason: describe(&e),
            })
    }

    pub async fn drop_database(&self, name: &str) -> anyhow::Result<()> {
        info!("Dropping database: {}", name);
        self.admin.drop_database_if_exists(name).await
    }

    pub async fn list_tables(&self, name: &str) -> anyhow::Result<Vec<String>> {
        self.admin.list_tables(name).await
    }
}

// pgvault/src/database/mod.rs
pub mod executor;
pub mod provision;
pub mod toolchain;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Administrative access to the PostgreSQL server.
///
/// Each call is a single blocking tool or catalog invocation; retries and
/// error classification belong to the caller.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// All non-template databases except the `postgres` maintenance database.
    async fn list_databases(&self) -> Result<Vec<String>>;

    async fn database_exists(&self, name: &str) -> Result<bool>;

    /// Writes a plain SQL dump of `name` to `destination`.
    async fn dump_to_file(&self, name: &str, destination: &Path) -> Result<()>;

    /// Executes a SQL file against `name`, stopping at the first error.
    async fn load_file(&self, name: &str, sql_file: &Path) -> Result<()>;

    /// Ends every session on `name` except the caller's own.
    async fn terminate_sessions(&self, name: &str) -> Result<()>;

    async fn create_database(&self, name: &str, encoding: &str) -> Result<()>;

    /// Drops `name`; a missing database is not an error.
    async fn drop_database_if_exists(&self, name: &str) -> Result<()>;

    /// Streams a dump of `source` straight into `target` without a temp file.
    async fn pipe_clone(&self, source: &str, target: &str) -> Result<()>;

    /// Tables in the public schema of `name`.
    async fn list_tables(&self, name: &str) -> Result<Vec<String>>;
}

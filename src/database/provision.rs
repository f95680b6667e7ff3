//! Creating and deleting application databases on the shared server.

use anyhow::Result;
use log::info;
use std::fmt;

use crate::config::PostgresConfig;
use crate::database::executor::Executor;
use crate::errors::OpsError;
use crate::utils::validate_database_name;

const MASKED_PASSWORD: &str = "****";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    Created,
    AlreadyExisted,
}

/// How an application should connect to a database. The password is masked.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub database: String,
    pub url: String,
    pub env_lines: Vec<String>,
}

impl ConnectionInfo {
    pub fn for_database(postgres: &PostgresConfig, database: &str) -> Result<Self> {
        let masked = PostgresConfig {
            password: if postgres.password.is_empty() {
                String::new()
            } else {
                MASKED_PASSWORD.to_string()
            },
            ..postgres.clone()
        };
        Ok(ConnectionInfo {
            database: database.to_string(),
            url: masked.url_for(database)?,
            env_lines: vec![
                format!("PGHOST={}", postgres.host),
                format!("PGPORT={}", postgres.port),
                format!("PGDATABASE={}", database),
                format!("PGUSER={}", postgres.user),
                format!("PGPASSWORD={}", masked.password),
            ],
        })
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "DATABASE CONNECTION INFO")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "📦 Database: {}", self.database)?;
        writeln!(f, "🔗 Connection String:\n   {}", self.url)?;
        writeln!(f, "🔧 Environment Variables (.env):")?;
        for line in &self.env_lines {
            writeln!(f, "   {}", line)?;
        }
        write!(f, "{}", "=".repeat(60))
    }
}

/// Creates `name` with the fixed encoding unless it already exists.
pub async fn create_database(
    executor: &Executor,
    postgres: &PostgresConfig,
    name: &str,
) -> Result<(Provisioned, ConnectionInfo)> {
    validate_database_name(name)?;
    let info = ConnectionInfo::for_database(postgres, name)?;

    if executor.database_exists(name).await? {
        info!("Database '{}' already exists", name);
        return Ok((Provisioned::AlreadyExisted, info));
    }

    executor.create_database(name).await?;
    info!("✓ Database '{}' created successfully", name);
    Ok((Provisioned::Created, info))
}

/// Terminates sessions on `name` and drops it. Refuses without `confirm`.
pub async fn drop_database(executor: &Executor, name: &str, confirm: bool) -> Result<()> {
    validate_database_name(name)?;
    if !confirm {
        return Err(OpsError::PreconditionViolated(format!(
            "refusing to delete database '{}' without confirmation (--confirm)",
            name
        ))
        .into());
    }
    if !executor.database_exists(name).await? {
        return Err(OpsError::PreconditionViolated(format!("database '{}' does not exist", name)).into());
    }

    executor.terminate_connections(name).await;
    executor.drop_database(name).await?;
    info!("✓ Database '{}' deleted", name);
    Ok(())
}

// pgvault/src/database/toolchain.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Connection, PgConnection};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::config::PostgresConfig;
use crate::database::DatabaseAdmin;
use crate::utils::{find_executable, run_tool};

/// Production [`DatabaseAdmin`]: catalog and DDL statements through `sqlx`
/// on the `postgres` maintenance database, dumps and loads through the
/// PostgreSQL client tools.
pub struct PgToolchain {
    config: PostgresConfig,
    admin_pool: PgPool,
}

/// Double-quotes an identifier for DDL that cannot take bind parameters.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl PgToolchain {
    pub fn new(config: &PostgresConfig) -> Result<Self> {
        let admin_url = config.url_for("postgres")?;
        let admin_pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_lazy(&admin_url)
            .with_context(|| {
                format!(
                    "Invalid admin connection settings for {}:{}",
                    config.host, config.port
                )
            })?;
        Ok(Self {
            config: config.clone(),
            admin_pool,
        })
    }

    /// Client tool invocation with server, user and password already set.
    fn pg_command(&self, tool: &str) -> Result<Command> {
        let mut command = Command::new(find_executable(tool)?);
        command.args(self.connection_args());
        if !self.config.password.is_empty() {
            command.env("PGPASSWORD", &self.config.password);
        }
        Ok(command)
    }

    fn connection_args(&self) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.config.host.clone(),
            "-p".to_string(),
            self.config.port.to_string(),
            "-U".to_string(),
            self.config.user.clone(),
        ]
    }
}

#[async_trait]
impl DatabaseAdmin for PgToolchain {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT datname FROM pg_database WHERE datistemplate = false AND datname <> 'postgres' ORDER BY datname",
        )
        .fetch_all(&self.admin_pool)
        .await
        .with_context(|| {
            format!(
                "Failed to fetch database list from {}:{}",
                self.config.host, self.config.port
            )
        })?;
        debug!("Found databases: {:?}", names);
        Ok(names)
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&self.admin_pool)
            .await
            .with_context(|| format!("Failed to check existence of database '{}'", name))
    }

    async fn dump_to_file(&self, name: &str, destination: &Path) -> Result<()> {
        let mut command = self.pg_command("pg_dump")?;
        command.arg("-d").arg(name).arg("-f").arg(destination);
        run_tool(command, &format!("pg_dump of {}", name)).await?;
        Ok(())
    }

    async fn load_file(&self, name: &str, sql_file: &Path) -> Result<()> {
        if !sql_file.exists() {
            return Err(anyhow::anyhow!("SQL file not found: {}", sql_file.display()));
        }
        let mut command = self.pg_command("psql")?;
        command
            .arg("-X") // Do not read psqlrc
            .arg("-q")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-d")
            .arg(name)
            .arg("-f")
            .arg(sql_file);
        run_tool(command, &format!("psql load into {}", name)).await?;
        Ok(())
    }

    async fn terminate_sessions(&self, name: &str) -> Result<()> {
        sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(name)
        .execute(&self.admin_pool)
        .await
        .with_context(|| {
            format!(
                "Failed to terminate connections to database '{}'. This might require superuser privileges.",
                name
            )
        })?;
        Ok(())
    }

    async fn create_database(&self, name: &str, encoding: &str) -> Result<()> {
        let create_sql = format!(
            "CREATE DATABASE {} ENCODING {} TEMPLATE template1",
            quote_ident(name),
            quote_literal(encoding)
        );
        sqlx::query(&create_sql)
            .execute(&self.admin_pool)
            .await
            .with_context(|| format!("Failed to create database '{}'", name))?;
        Ok(())
    }

    async fn drop_database_if_exists(&self, name: &str) -> Result<()> {
        sqlx::query(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
            .execute(&self.admin_pool)
            .await
            .with_context(|| format!("Failed to drop database '{}'", name))?;
        Ok(())
    }

    async fn pipe_clone(&self, source: &str, target: &str) -> Result<()> {
        let mut dump = self.pg_command("pg_dump")?;
        dump.arg("-d")
            .arg(source)
            .arg("--no-owner")
            .arg("--no-acl")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut load = self.pg_command("psql")?;
        load.arg("-X")
            .arg("-q")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-d")
            .arg(target)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut dump_child = dump
            .spawn()
            .with_context(|| format!("Failed to start pg_dump for {}", source))?;
        let mut load_child = load
            .spawn()
            .with_context(|| format!("Failed to start psql for {}", target))?;

        let mut dump_out = dump_child
            .stdout
            .take()
            .context("pg_dump stdout was not captured")?;
        let mut load_in = load_child
            .stdin
            .take()
            .context("psql stdin was not captured")?;

        // Both pipe ends are dropped when the copy stops, so an early psql
        // exit turns into EPIPE for pg_dump instead of a blocked write.
        let pump = async move {
            let copied = tokio::io::copy(&mut dump_out, &mut load_in).await;
            drop(load_in);
            drop(dump_out);
            copied
        };

        let (pumped, load_output, dump_output) = tokio::join!(
            pump,
            load_child.wait_with_output(),
            dump_child.wait_with_output()
        );

        let load_output = load_output.context("Failed to wait for psql")?;
        if !load_output.status.success() {
            return Err(anyhow::anyhow!(
                "psql into {} failed with status: {}\nStderr: {}",
                target,
                load_output.status,
                String::from_utf8_lossy(&load_output.stderr).trim()
            ));
        }
        let dump_output = dump_output.context("Failed to wait for pg_dump")?;
        if !dump_output.status.success() {
            return Err(anyhow::anyhow!(
                "pg_dump of {} failed with status: {}\nStderr: {}",
                source,
                dump_output.status,
                String::from_utf8_lossy(&dump_output.stderr).trim()
            ));
        }
        let bytes = pumped.context("Failed to stream pg_dump output into psql")?;
        info!("Streamed {} bytes from {} into {}", bytes, source, target);
        Ok(())
    }

    async fn list_tables(&self, name: &str) -> Result<Vec<String>> {
        let url = self.config.url_for(name)?;
        let mut conn = PgConnection::connect(&url)
            .await
            .with_context(|| format!("Failed to connect to database '{}'", name))?;
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT tablename FROM pg_catalog.pg_tables WHERE schemaname = 'public' ORDER BY tablename",
        )
        .fetch_all(&mut conn)
        .await
        .with_context(|| format!("Failed to list tables in '{}'", name))?;
        conn.close().await.ok();
        Ok(tables)
    }
}

// pgvault/src/config/mod.rs
use anyhow::{Context, Result};
use log::warn;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::errors::OpsError;

pub const RECORDS_ROOT: &str = "records";
pub const MANUAL_BACKUPS_ROOT: &str = "manual_backups";
pub const DATABASE_ENCODING: &str = "UTF8";

const DEFAULT_RCLONE_REMOTE: &str = "grdive:";
const DEFAULT_RETENTION_DAYS: u32 = 15;
/// A century; larger horizons fall outside the calendar range of dated folders.
const MAX_RETENTION_DAYS: u32 = 36_500;
const DEFAULT_BACKUP_CONTAINER: &str = "shared-pgbackup";
const DEFAULT_SAFETY_FALLBACK_DIR: &str = "./safety_backups";

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonPostgresConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub postgres: Option<JsonPostgresConfig>,
    pub rclone_remote: Option<String>,
    pub retention_days: Option<u32>,
    pub manual_retention_days: Option<u32>,
    pub temp_dump_root: Option<PathBuf>,
    pub safety_fallback_dir: Option<PathBuf>,
    pub backup_container: Option<String>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl PostgresConfig {
    /// Connection URL for one database on the configured server.
    pub fn url_for(&self, database: &str) -> Result<String> {
        let mut url = Url::parse("postgres://localhost").context("Invalid base PostgreSQL URL")?;
        url.set_host(Some(&self.host))
            .with_context(|| format!("Invalid POSTGRES_HOST: {}", self.host))?;
        url.set_port(Some(self.port))
            .map_err(|_| anyhow::anyhow!("Cannot set port {} on PostgreSQL URL", self.port))?;
        url.set_username(&self.user)
            .map_err(|_| anyhow::anyhow!("Cannot set user {} on PostgreSQL URL", self.user))?;
        if !self.password.is_empty() {
            url.set_password(Some(&self.password))
                .map_err(|_| anyhow::anyhow!("Cannot set password on PostgreSQL URL"))?;
        }
        url.set_path(database);
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpacesConfig {
    pub endpoint_url: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteBackend {
    Rclone { remote: String },
    S3(SpacesConfig),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub postgres: PostgresConfig,
    pub remote: RemoteBackend,
    pub records_root: String,
    pub manual_root: String,
    pub retention_days: u32,
    pub manual_retention_days: u32,
    pub temp_dump_root: Option<PathBuf>,
    pub safety_fallback_dir: PathBuf,
    pub backup_container: String,
    pub database_encoding: String,
}

impl AppConfig {
    /// Loads `.env`, the optional JSON file at `config_path`, then the process
    /// environment, in increasing order of precedence.
    pub fn load(config_path: &Path) -> Result<Self> {
        dotenv::dotenv().ok();

        let raw = if config_path.exists() {
            let config_content = fs::read_to_string(config_path).with_context(|| {
                format!("Failed to read config file at {}", config_path.display())
            })?;
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            RawJsonConfig::default()
        };

        Self::from_sources(raw, |key| env::var(key).ok())
    }

    pub fn from_sources<F>(raw: RawJsonConfig, env_lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env_lookup(key).filter(|v| !v.trim().is_empty());
        let json_pg = raw.postgres.clone().unwrap_or_default();

        let port = match lookup("POSTGRES_PORT") {
            Some(value) => parse_number::<u16>("POSTGRES_PORT", &value)?,
            None => json_pg.port.unwrap_or(5432),
        };

        let postgres = PostgresConfig {
            host: lookup("POSTGRES_HOST")
                .or(json_pg.host)
                .unwrap_or_else(|| "localhost".to_string()),
            port,
            user: lookup("POSTGRES_USER")
                .or(json_pg.user)
                .unwrap_or_else(|| "postgres".to_string()),
            password: lookup("POSTGRES_PASSWORD")
                .or(json_pg.password)
                .unwrap_or_default(),
        };

        let retention_days = match lookup("BACKUP_RETENTION_DAYS") {
            Some(value) => parse_number::<u32>("BACKUP_RETENTION_DAYS", &value)?,
            None => raw.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
        };
        let retention_days = bounded_retention("BACKUP_RETENTION_DAYS", retention_days)?;
        let manual_retention_days = match lookup("MANUAL_BACKUP_RETENTION_DAYS") {
            Some(value) => parse_number::<u32>("MANUAL_BACKUP_RETENTION_DAYS", &value)?,
            None => raw.manual_retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
        };
        let manual_retention_days =
            bounded_retention("MANUAL_BACKUP_RETENTION_DAYS", manual_retention_days)?;

        let remote = match raw.s3_storage.as_ref().and_then(spaces_from_raw) {
            Some(spaces) => RemoteBackend::S3(spaces),
            None => RemoteBackend::Rclone {
                remote: lookup("RCLONE_REMOTE")
                    .or(raw.rclone_remote.clone())
                    .unwrap_or_else(|| DEFAULT_RCLONE_REMOTE.to_string()),
            },
        };

        Ok(AppConfig {
            postgres,
            remote,
            records_root: RECORDS_ROOT.to_string(),
            manual_root: MANUAL_BACKUPS_ROOT.to_string(),
            retention_days,
            manual_retention_days,
            temp_dump_root: lookup("TEMP_DUMP_ROOT")
                .map(PathBuf::from)
                .or(raw.temp_dump_root),
            safety_fallback_dir: lookup("SAFETY_FALLBACK_DIR")
                .map(PathBuf::from)
                .or(raw.safety_fallback_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SAFETY_FALLBACK_DIR)),
            backup_container: lookup("BACKUP_CONTAINER_NAME")
                .or(raw.backup_container)
                .unwrap_or_else(|| DEFAULT_BACKUP_CONTAINER.to_string()),
            database_encoding: DATABASE_ENCODING.to_string(),
        })
    }

    /// Human readable root of the remote store, for log lines.
    pub fn remote_label(&self) -> String {
        match &self.remote {
            RemoteBackend::Rclone { remote } => remote.clone(),
            RemoteBackend::S3(spaces) => match &spaces.folder_prefix {
                Some(prefix) => format!("s3://{}/{}/", spaces.bucket_name, prefix.trim_matches('/')),
                None => format!("s3://{}/", spaces.bucket_name),
            },
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, OpsError> {
    value.trim().parse::<T>().map_err(|_| {
        OpsError::Config(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

fn bounded_retention(key: &str, days: u32) -> Result<u32, OpsError> {
    if days > MAX_RETENTION_DAYS {
        return Err(OpsError::Config(format!(
            "{} must be at most {} days, got {}",
            key, MAX_RETENTION_DAYS, days
        )));
    }
    Ok(days)
}

fn spaces_from_raw(s3_raw: &JsonS3StorageConfig) -> Option<SpacesConfig> {
    if let (Some(bucket), Some(region), Some(key_id), Some(secret), Some(endpoint)) = (
        s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
        s3_raw.region.as_ref().filter(|s| !s.is_empty()),
        s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
        s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
        s3_raw.endpoint_url.as_ref().filter(|s| !s.is_empty()),
    ) {
        Some(SpacesConfig {
            bucket_name: bucket.clone(),
            region: region.clone(),
            access_key_id: key_id.clone(),
            secret_access_key: secret.clone(),
            endpoint_url: endpoint.clone(),
            folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
        })
    } else {
        if s3_raw.bucket_name.is_some()
            || s3_raw.region.is_some()
            || s3_raw.access_key_id.is_some()
            || s3_raw.secret_access_key.is_some()
            || s3_raw.endpoint_url.is_some()
        {
            // partially filled block
            warn!("S3 configuration is present in config.json but some required fields (bucket_name, region, access_key_id, secret_access_key, endpoint_url) are missing or empty. Falling back to rclone.");
        }
        None
    }
}

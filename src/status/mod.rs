// pgvault/src/status/mod.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::process::Command;

use crate::config::AppConfig;
use crate::database::DatabaseAdmin;
use crate::database::executor::Executor;
use crate::errors::describe;
use crate::report::Warning;
use crate::storage::RemoteStore;
use crate::storage::index::RemoteBackupIndex;
use crate::utils::clock::Clock;
use crate::utils::{find_executable, run_tool};

const RECENT_FOLDERS: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContainerState {
    pub status: String,
    pub health: String,
    pub started_at: Option<String>,
}

/// Reads the runtime state of the container that runs scheduled backups.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    async fn inspect_state(&self, container: &str) -> Result<ContainerState>;
}

#[derive(Debug, Default)]
pub struct DockerInspector;

#[derive(Deserialize)]
struct RawHealth {
    #[serde(rename = "Status")]
    status: Option<String>,
}

#[derive(Deserialize)]
struct RawState {
    #[serde(rename = "Status")]
    status: Option<String>,
    #[serde(rename = "Health")]
    health: Option<RawHealth>,
    #[serde(rename = "StartedAt")]
    started_at: Option<String>,
}

/// Parses `docker inspect --format '{{json .State}}'` output.
fn parse_state(stdout: &str) -> Result<ContainerState> {
    let line = stdout
        .lines()
        .find(|line| !line.trim().is_empty())
        .context("docker inspect printed nothing")?;
    let raw: RawState =
        serde_json::from_str(line.trim()).context("Could not parse docker inspect output")?;
    Ok(ContainerState {
        status: raw.status.unwrap_or_else(|| "unknown".to_string()),
        health: raw
            .health
            .and_then(|h| h.status)
            .unwrap_or_else(|| "unknown".to_string()),
        started_at: raw.started_at.filter(|s| !s.is_empty()),
    })
}

#[async_trait]
impl ContainerInspector for DockerInspector {
    async fn inspect_state(&self, container: &str) -> Result<ContainerState> {
        let mut command = Command::new(find_executable("docker")?);
        command
            .arg("inspect")
            .arg(container)
            .arg("--format")
            .arg("{{json .State}}");
        let output = run_tool(command, &format!("docker inspect {}", container)).await?;
        parse_state(&String::from_utf8_lossy(&output.stdout))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupSummary {
    pub date: String,
    pub raw: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CronHealth {
    pub container: String,
    pub status: String,
    pub freshness: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub latest_backup: Option<String>,
    pub latest_count: usize,
    pub backups: Vec<BackupSummary>,
    pub cron: CronHealth,
    pub databases: Vec<String>,
    pub warnings: Vec<Warning>,
}

/// How old the newest dated backup is, in words.
pub fn freshness(today: NaiveDate, latest: Option<NaiveDate>) -> String {
    match latest.map(|date| (today - date).num_days()) {
        None => "No dated backups found in cloud storage.".to_string(),
        Some(0) => "Latest backup was taken today.".to_string(),
        Some(1) => "Latest backup was taken yesterday.".to_string(),
        Some(days) => format!("Latest backup was taken {} days ago.", days),
    }
}

pub struct StatusQuery {
    index: RemoteBackupIndex,
    executor: Executor,
    inspector: Arc<dyn ContainerInspector>,
    clock: Arc<dyn Clock>,
    records_root: String,
    container: String,
}

impl StatusQuery {
    pub fn new(
        config: &AppConfig,
        admin: Arc<dyn DatabaseAdmin>,
        store: Arc<dyn RemoteStore>,
        inspector: Arc<dyn ContainerInspector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            index: RemoteBackupIndex::new(store),
            executor: Executor::new(admin, &config.database_encoding),
            inspector,
            clock,
            records_root: config.records_root.clone(),
            container: config.backup_container.clone(),
        }
    }

    /// Never fails: every problem ends up in `warnings` or in the
    /// container status text.
    pub async fn collect_status(&self) -> StatusReport {
        let mut warnings = Vec::new();

        let mut backups = Vec::new();
        let mut latest_date = None;
        match self.index.newest_first(&self.records_root).await {
            Ok(folders) => {
                latest_date = folders.first().map(|f| f.date.date());
                for folder in folders.into_iter().take(RECENT_FOLDERS) {
                    let files = match self.index.files_in(&self.records_root, &folder).await {
                        Ok(files) => files.into_iter().filter(|f| f.ends_with(".sql")).collect(),
                        Err(e) => {
                            warnings.push(Warning::from_error("Recent backup folder unreadable", &e));
                            Vec::new()
                        }
                    };
                    backups.push(BackupSummary {
                        date: folder.date.to_string(),
                        raw: folder.raw,
                        files,
                    });
                }
            }
            Err(e) => warnings.push(Warning::from_error("Backup index unreadable", &e)),
        }

        let status = match self.inspector.inspect_state(&self.container).await {
            Ok(state) => {
                let mut message = format!("Container {} (health: {})", state.status, state.health);
                if let Some(started) = &state.started_at {
                    message.push_str(&format!(" • started: {}", started));
                }
                message
            }
            Err(e) => {
                let message = format!("Could not read container state: {}", describe(&e));
                warnings.push(Warning::notice(message.clone()));
                message
            }
        };

        let databases = match self.executor.list_databases().await {
            Ok(databases) => databases,
            Err(e) => {
                warnings.push(Warning::from_error("Database list unavailable", &e));
                Vec::new()
            }
        };

        StatusReport {
            latest_backup: backups.first().map(|b| b.date.clone()),
            latest_count: backups.first().map_or(0, |b| b.files.len()),
            cron: CronHealth {
                container: self.container.clone(),
                status,
                freshness: freshness(self.clock.today(), latest_date),
            },
            backups,
            databases,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::testing::{FakeDatabase, FakeRemote, FixedClock, test_config};

    struct CannedInspector(Option<ContainerState>);

    #[async_trait]
    impl ContainerInspector for CannedInspector {
        async fn inspect_state(&self, container: &str) -> Result<ContainerState> {
            self.0
                .clone()
                .with_context(|| format!("Error: No such object: {}", container))
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    fn query(
        remote: &Arc<FakeRemote>,
        db: &Arc<FakeDatabase>,
        state: Option<ContainerState>,
    ) -> anyhow::Result<StatusQuery> {
        let scratch = tempfile::tempdir()?;
        Ok(StatusQuery::new(
            &test_config(scratch.path()),
            db.clone(),
            remote.clone(),
            Arc::new(CannedInspector(state)),
            Arc::new(FixedClock::on(day(20), 12, 0)),
        ))
    }

    #[test]
    fn test_freshness_wording() {
        assert_eq!(freshness(day(20), Some(day(20))), "Latest backup was taken today.");
        assert_eq!(freshness(day(20), Some(day(19))), "Latest backup was taken yesterday.");
        assert_eq!(freshness(day(20), Some(day(16))), "Latest backup was taken 4 days ago.");
        assert_eq!(freshness(day(20), None), "No dated backups found in cloud storage.");
    }

    #[test]
    fn test_parse_docker_state() -> anyhow::Result<()> {
        let stdout = r#"{"Status":"running","Running":true,"StartedAt":"2025-10-01T03:00:00Z","Health":{"Status":"healthy","FailingStreak":0}}"#;
        let state = parse_state(stdout)?;
        assert_eq!(
            state,
            ContainerState {
                status: "running".into(),
                health: "healthy".into(),
                started_at: Some("2025-10-01T03:00:00Z".into()),
            }
        );

        let no_healthcheck = parse_state("{\"Status\":\"exited\",\"StartedAt\":\"\"}\n")?;
        assert_eq!(no_healthcheck.health, "unknown");
        assert_eq!(no_healthcheck.started_at, None);
        assert!(parse_state("not json").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_status_lists_seven_newest_folders() -> anyhow::Result<()> {
        let remote = Arc::new(FakeRemote::new());
        for d in 10..=19 {
            remote.put(&format!("records/2025/10/{}/app.sql", d), "x");
        }
        remote.put("records/2025/10/19/SHA256SUMS", "x");
        let db = Arc::new(FakeDatabase::new().with_database("app", &[]));
        let running = ContainerState {
            status: "running".into(),
            health: "healthy".into(),
            started_at: None,
        };

        let report = query(&remote, &db, Some(running))?.collect_status().await;

        assert_eq!(report.backups.len(), 7);
        assert_eq!(report.backups[0].date, "2025-10-19");
        assert_eq!(report.backups[6].date, "2025-10-13");
        assert_eq!(report.latest_backup.as_deref(), Some("2025-10-19"));
        assert_eq!(report.latest_count, 1);
        assert_eq!(report.cron.freshness, "Latest backup was taken yesterday.");
        assert_eq!(report.cron.status, "Container running (health: healthy)");
        assert_eq!(report.databases, vec!["app"]);
        assert!(report.warnings.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_status_survives_every_failure() -> anyhow::Result<()> {
        let remote = Arc::new(FakeRemote::new());
        remote.fail_listing("records");
        let db = Arc::new(FakeDatabase::new());
        db.fail_listing();

        let report = query(&remote, &db, None)?.collect_status().await;

        assert!(report.backups.is_empty());
        assert_eq!(report.cron.freshness, "No dated backups found in cloud storage.");
        assert!(report.cron.status.contains("No such object: shared-pgbackup"));
        let kinds: Vec<_> = report.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(ErrorKind::ListingUnavailable),
                None,
                Some(ErrorKind::CatalogUnavailable),
            ]
        );
        Ok(())
    }
}

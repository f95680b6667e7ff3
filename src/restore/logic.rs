// pgvault/src/restore/logic.rs
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::database::DatabaseAdmin;
use crate::database::executor::Executor;
use crate::errors::{ErrorKind, OpsError, describe};
use crate::report::{OperationKind, OperationResult, RunLog, Warning};
use crate::restore::verification::verify_tables;
use crate::storage::index::{BackupFolder, RemoteBackupIndex};
use crate::storage::retention::RetentionPruner;
use crate::storage::{RemoteStore, join_remote};
use crate::utils::clock::Clock;
use crate::utils::dates::BackupDate;
use crate::utils::{staging_dir, validate_database_name};

/// Restore progresses strictly in this order. Everything from `Terminate`
/// on mutates the target database and is never rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestoreStage {
    ResolveSource,
    Download,
    SafetyBackup,
    Terminate,
    Recreate,
    Load,
    Verify,
    Prune,
}

impl RestoreStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RestoreStage::ResolveSource => "RESOLVE_SOURCE",
            RestoreStage::Download => "DOWNLOAD",
            RestoreStage::SafetyBackup => "SAFETY_BACKUP",
            RestoreStage::Terminate => "TERMINATE",
            RestoreStage::Recreate => "RECREATE",
            RestoreStage::Load => "LOAD",
            RestoreStage::Verify => "VERIFY",
            RestoreStage::Prune => "PRUNE",
        }
    }
}

impl fmt::Display for RestoreStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct RestoreOrchestrator {
    pub(super) executor: Executor,
    pub(super) store: Arc<dyn RemoteStore>,
    index: RemoteBackupIndex,
    pruner: RetentionPruner,
    pub(super) clock: Arc<dyn Clock>,
    records_root: String,
    pub(super) manual_root: String,
    manual_retention_days: u32,
    pub(super) temp_root: Option<PathBuf>,
    pub(super) safety_fallback_dir: PathBuf,
}

impl RestoreOrchestrator {
    pub fn new(
        config: &AppConfig,
        admin: Arc<dyn DatabaseAdmin>,
        store: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor: Executor::new(admin, &config.database_encoding),
            index: RemoteBackupIndex::new(store.clone()),
            pruner: RetentionPruner::new(store.clone(), clock.clone()),
            store,
            clock,
            records_root: config.records_root.clone(),
            manual_root: config.manual_root.clone(),
            manual_retention_days: config.manual_retention_days,
            temp_root: config.temp_dump_root.clone(),
            safety_fallback_dir: config.safety_fallback_dir.clone(),
        }
    }

    /// Replaces `database` with its dump from `date` (or the newest backup
    /// that contains it). Unless `skip_safety` is set, the current contents
    /// are dumped to the manual-backup root before anything is dropped.
    pub async fn run_restore(
        &self,
        database: &str,
        date: Option<&str>,
        skip_safety: bool,
    ) -> OperationResult {
        let mut result = OperationResult::begin(OperationKind::Restore, self.clock.now());
        let mut log = RunLog::new();
        let mut stage = RestoreStage::ResolveSource;

        let staging = match staging_dir(self.temp_root.as_deref(), "pg_restore_") {
            Ok(staging) => staging,
            Err(e) => {
                let err = OpsError::from(e);
                log.error(format!("Cannot create local staging area: {}", err));
                result.fail_at(stage.as_str(), &err);
                return result.finish(log, self.clock.now());
            }
        };

        let outcome = self
            .restore_into(
                database,
                date,
                skip_safety,
                staging.path(),
                &mut stage,
                &mut result,
                &mut log,
            )
            .await;

        if let Err(e) = outcome {
            log.error(format!("Restore stopped at {}: {}", stage, e));
            if stage >= RestoreStage::Recreate {
                log.error(format!(
                    "Database '{}' may be empty or partially loaded; restore it again from the safety backup if needed",
                    database
                ));
            }
            result.fail_at(stage.as_str(), &e);
        } else {
            result.stage = Some(stage.as_str().to_string());
        }

        let staging_path = staging.path().display().to_string();
        match staging.close() {
            Ok(()) => log.info("CLEANUP", format!("Removed {}", staging_path)),
            Err(e) => log.warn(format!("Failed to remove staging {}: {}", staging_path, e)),
        }
        result.finish(log, self.clock.now())
    }

    #[allow(clippy::too_many_arguments)]
    async fn restore_into(
        &self,
        database: &str,
        date: Option<&str>,
        skip_safety: bool,
        staging: &Path,
        stage: &mut RestoreStage,
        result: &mut OperationResult,
        log: &mut RunLog,
    ) -> Result<(), OpsError> {
        validate_database_name(database)?;
        let remote_file = self.resolve_source(database, date, result, log).await?;

        *stage = RestoreStage::Download;
        log.info("DOWNLOAD", format!("Fetching {}", self.store.describe(&remote_file)));
        let local_file = self
            .store
            .download(&remote_file, staging)
            .await
            .map_err(|e| {
                OpsError::TransferFailed(format!("download of {} failed: {}", remote_file, describe(&e)))
            })?;
        if !local_file.is_file() {
            return Err(OpsError::BackupNotFound(format!(
                "{} was not present after download",
                remote_file
            )));
        }
        result.cloud_path = Some(remote_file);

        if skip_safety {
            log.info("SAFETY", "Safety backup skipped by operator");
        } else {
            *stage = RestoreStage::SafetyBackup;
            result.safety_backup = self.take_safety_backup(database, result, log).await?;
        }

        *stage = RestoreStage::Terminate;
        log.info("RESTORE", format!("Terminating connections to {}", database));
        self.executor.terminate_connections(database).await;

        *stage = RestoreStage::Recreate;
        log.info("RESTORE", format!("Dropping and recreating {}", database));
        self.executor.drop_and_create(database).await?;

        *stage = RestoreStage::Load;
        log.info("RESTORE", format!("Loading SQL: {} (this may take a while...)", local_file.display()));
        self.executor.load_sql_file(database, &local_file).await?;
        log.info("RESTORE", "Restore completed successfully");
        result.databases.push(database.to_string());

        *stage = RestoreStage::Verify;
        verify_tables(&self.executor, database, result, log).await;

        *stage = RestoreStage::Prune;
        log.info(
            "PRUNE",
            format!(
                "Removing {} backups older than {} days",
                self.manual_root, self.manual_retention_days
            ),
        );
        match self.pruner.prune(&self.manual_root, self.manual_retention_days).await {
            Ok(report) => {
                for (path, reason) in report.failed {
                    result.warn(
                        log,
                        Warning::new(
                            ErrorKind::TransferFailed,
                            format!("Failed to delete {}: {}", path, reason),
                        ),
                    );
                }
            }
            Err(e) => result.warn(log, Warning::from_error("Cleanup skipped", &e)),
        }
        Ok(())
    }

    /// Remote path of the dump to restore.
    async fn resolve_source(
        &self,
        database: &str,
        date: Option<&str>,
        result: &mut OperationResult,
        log: &mut RunLog,
    ) -> Result<String, OpsError> {
        let file_name = format!("{}.sql", database);

        if let Some(input) = date {
            let date = BackupDate::parse(input)?;
            let folder = self
                .index
                .find(&self.records_root, date)
                .await?
                .ok_or_else(|| OpsError::BackupNotFound(format!("no backup folder for {}", date)))?;
            if !self.index.files_in(&self.records_root, &folder).await?.contains(&file_name) {
                return Err(OpsError::BackupNotFound(format!(
                    "no {} in backup folder {}",
                    file_name, folder.raw
                )));
            }
            log.info("RESOLVE", format!("Using backup folder {}", folder.raw));
            return Ok(self.remote_file(&folder, &file_name));
        }

        let folders = self.index.newest_first(&self.records_root).await?;
        log.info("RESOLVE", format!("Searching {} backup folders for {}", folders.len(), file_name));
        for folder in &folders {
            match self.index.files_in(&self.records_root, folder).await {
                Ok(files) if files.contains(&file_name) => {
                    log.info("RESOLVE", format!("Latest backup of {} is in {}", database, folder.raw));
                    return Ok(self.remote_file(folder, &file_name));
                }
                Ok(_) => {}
                Err(e) => result.warn(
                    log,
                    Warning::from_error(&format!("Could not check {}", folder.raw), &e),
                ),
            }
        }
        Err(OpsError::BackupNotFound(format!(
            "no backup of '{}' in {} folder(s) under {}",
            database,
            folders.len(),
            self.records_root
        )))
    }

    fn remote_file(&self, folder: &BackupFolder, file_name: &str) -> String {
        join_remote(&join_remote(&self.records_root, &folder.raw), file_name)
    }
}

// pgvault/src/backup/logic.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use crate::backup::checksum::{CHECKSUM_FILE, write_checksums};
use crate::config::AppConfig;
use crate::database::DatabaseAdmin;
use crate::database::executor::Executor;
use crate::errors::{ErrorKind, OpsError, describe};
use crate::report::{OperationKind, OperationResult, OperationStatus, RunLog, Warning};
use crate::storage::index::{BackupFolder, RemoteBackupIndex};
use crate::storage::retention::RetentionPruner;
use crate::storage::{RemoteStore, join_remote};
use crate::utils::clock::Clock;
use crate::utils::staging_dir;

const ARCHIVE_DIR: &str = "olds";

/// Drives scheduled and manual backups against the remote store.
pub struct BackupOrchestrator {
    pub(super) executor: Executor,
    pub(super) store: Arc<dyn RemoteStore>,
    pub(super) index: RemoteBackupIndex,
    pub(super) pruner: RetentionPruner,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) records_root: String,
    pub(super) manual_root: String,
    pub(super) retention_days: u32,
    pub(super) temp_root: Option<PathBuf>,
}

impl BackupOrchestrator {
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
            retention_days: config.retention_days,
            temp_root: config.temp_dump_root.clone(),
        }
    }

    pub(super) fn open_staging(&self, prefix: &str) -> Result<TempDir, OpsError> {
        Ok(staging_dir(self.temp_root.as_deref(), prefix)?)
    }

    /// Dumps every database, archives any same-day upload, uploads the new
    /// set under today's folder and prunes expired folders.
    ///
    /// Individual dump failures are collected and the batch continues. The
    /// local staging directory is gone when this returns.
    pub async fn run_full_backup(&self) -> OperationResult {
        let mut result = OperationResult::begin(OperationKind::Backup, self.clock.now());
        let mut log = RunLog::new();

        let staging = match self.open_staging("pg_backup_") {
            Ok(staging) => staging,
            Err(e) => {
                log.error(format!("Cannot create local staging area: {}", e));
                result.fail(&e);
                return result.finish(log, self.clock.now());
            }
        };
        log.info("START", format!("Staging dumps in {}", staging.path().display()));

        self.backup_into(staging.path(), &mut result, &mut log).await;

        let staging_path = staging.path().display().to_string();
        match staging.close() {
            Ok(()) => log.info("CLEANUP", format!("Removed {}", staging_path)),
            Err(e) => log.warn(format!("Failed to remove staging {}: {}", staging_path, e)),
        }

        if result.status != OperationStatus::Failed {
            result.status = if result.errors.is_empty() {
                OperationStatus::Success
            } else {
                OperationStatus::Partial
            };
        }
        log.info(
            "DONE",
            format!(
                "Backup finished: {} database(s) dumped, {} error(s)",
                result.databases.len(),
                result.errors.len()
            ),
        );
        result.finish(log, self.clock.now())
    }

    async fn backup_into(&self, staging: &Path, result: &mut OperationResult, log: &mut RunLog) {
        let databases = match self.executor.list_databases().await {
            Ok(databases) => databases,
            Err(e) => {
                log.error(e.to_string());
                result.fail(&e);
                return;
            }
        };
        if databases.is_empty() {
            log.info("DUMP", "No databases found; nothing to back up");
            self.prune(&self.records_root, self.retention_days, result, log).await;
            return;
        }
        log.info("DUMP", format!("Databases to back up: {}", databases.join(", ")));

        for database in &databases {
            let destination = staging.join(format!("{}.sql", database));
            match self.executor.dump_database(database, &destination).await {
                Ok(()) => {
                    log.info("DUMP", format!("Database dumped: {}", database));
                    result.databases.push(database.clone());
                }
                Err(e) => {
                    log.error(e.to_string());
                    result.errors.push(e.to_string());
                }
            }
        }

        if result.databases.is_empty() {
            log.error("No database could be dumped; nothing to upload");
            result.status = OperationStatus::Failed;
            result.error_kind = Some(ErrorKind::DumpFailed);
            return;
        }

        let checksum_dir = staging.to_path_buf();
        match tokio::task::spawn_blocking(move || write_checksums(&checksum_dir)).await {
            Ok(Ok(Some(_))) => log.info("CHECKSUM", format!("Checksums generated: {}", CHECKSUM_FILE)),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => result.warn(
                log,
                Warning::new(ErrorKind::Io, format!("Checksum generation failed: {}", describe(&e))),
            ),
            Err(e) => result.warn(
                log,
                Warning::new(ErrorKind::Io, format!("Checksum generation failed: {}", e)),
            ),
        }

        let today = BackupFolder::canonical(self.clock.today().into());
        let remote_path = join_remote(&self.records_root, &today.raw);
        result.cloud_path = Some(remote_path.clone());

        self.archive_existing(&today, &remote_path, result, log).await;

        log.info("UPLOAD", format!("Uploading to {}", self.store.describe(&remote_path)));
        match self.store.upload(staging, &remote_path).await {
            Ok(()) => {
                log.info("UPLOAD", format!("Backup uploaded to {}", remote_path));
                result.cloud_uploaded = Some(true);
            }
            Err(e) => {
                let err = OpsError::TransferFailed(format!(
                    "upload to {} failed: {}",
                    remote_path,
                    describe(&e)
                ));
                log.error(err.to_string());
                result.errors.push(err.to_string());
                result.cloud_uploaded = Some(false);
            }
        }

        self.prune(&self.records_root, self.retention_days, result, log).await;
    }

    /// Moves a same-day upload into `olds/<HH_MM>` so it is not overwritten.
    async fn archive_existing(
        &self,
        today: &BackupFolder,
        remote_path: &str,
        result: &mut OperationResult,
        log: &mut RunLog,
    ) {
        let existing = match self.index.files_in(&self.records_root, today).await {
            Ok(files) => files,
            Err(e) => {
                result.warn(log, Warning::from_error("Could not check for an existing backup", &e));
                return;
            }
        };
        if !existing.iter().any(|name| name.ends_with(".sql")) {
            return;
        }

        let archive_path = join_remote(
            remote_path,
            &format!("{}/{}", ARCHIVE_DIR, self.clock.now().format("%H_%M")),
        );
        log.info("ARCHIVE", format!("Existing backup found, moving to: {}", archive_path));
        match self.store.move_dir(remote_path, &archive_path, ARCHIVE_DIR).await {
            Ok(()) => log.info("ARCHIVE", format!("Previous backup archived to: {}", archive_path)),
            Err(e) => result.warn(
                log,
                Warning::new(
                    ErrorKind::TransferFailed,
                    format!("Archiving previous backup failed: {}", describe(&e)),
                ),
            ),
        }
    }

    async fn prune(
        &self,
        root: &str,
        retention_days: u32,
        result: &mut OperationResult,
        log: &mut RunLog,
    ) {
        log.info("PRUNE", format!("Removing {} backups older than {} days", root, retention_days));
        match self.pruner.prune(root, retention_days).await {
            Ok(report) => {
                for path in &report.deleted {
                    log.info("PRUNE", format!("Deleted {}", path));
                }
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
    }
}

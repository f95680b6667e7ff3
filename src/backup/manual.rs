// pgvault/src/backup/manual.rs
use crate::backup::logic::BackupOrchestrator;
use crate::errors::{OpsError, describe};
use crate::report::{OperationKind, OperationResult, RunLog};
use crate::storage::index::BackupFolder;
use crate::storage::join_remote;
use crate::utils::validate_database_name;

impl BackupOrchestrator {
    /// On-demand dump of one database into `manual_backups/<y>/<m>/<d>/<db>.sql`.
    pub async fn run_manual_backup(&self, database: &str) -> OperationResult {
        let mut result = OperationResult::begin(OperationKind::ManualBackup, self.clock.now());
        let mut log = RunLog::new();

        if let Err(e) = self.manual_backup(database, &mut result, &mut log).await {
            log.error(e.to_string());
            result.fail(&e);
        }
        result.finish(log, self.clock.now())
    }

    async fn manual_backup(
        &self,
        database: &str,
        result: &mut OperationResult,
        log: &mut RunLog,
    ) -> Result<(), OpsError> {
        validate_database_name(database)?;
        if !self.executor.database_exists(database).await? {
            return Err(OpsError::PreconditionViolated(format!(
                "database '{}' does not exist",
                database
            )));
        }

        let staging = self.open_staging("pg_manual_backup_")?;
        let dump_path = staging.path().join(format!("{}.sql", database));
        log.info("DUMP", format!("Dumping {}", database));
        self.executor.dump_database(database, &dump_path).await?;

        let folder = BackupFolder::canonical(self.clock.today().into());
        let remote_dir = join_remote(&self.manual_root, &folder.raw);
        result.cloud_path = Some(join_remote(&remote_dir, &format!("{}.sql", database)));

        log.info("UPLOAD", format!("Uploading to {}", self.store.describe(&remote_dir)));
        if let Err(e) = self.store.upload(&dump_path, &remote_dir).await {
            result.cloud_uploaded = Some(false);
            return Err(OpsError::TransferFailed(format!(
                "upload to {} failed: {}",
                remote_dir,
                describe(&e)
            )));
        }
        result.cloud_uploaded = Some(true);
        result.databases.push(database.to_string());
        log.info("UPLOAD", format!("Manual backup uploaded: {}", remote_dir));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::backup::logic::BackupOrchestrator;
    use crate::errors::ErrorKind;
    use crate::report::OperationStatus;
    use crate::testing::{FakeDatabase, FakeRemote, FixedClock, test_config};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn orchestrator(
        db: &Arc<FakeDatabase>,
        remote: &Arc<FakeRemote>,
        scratch: &std::path::Path,
    ) -> BackupOrchestrator {
        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2025, 10, 7).unwrap(), 8, 15));
        BackupOrchestrator::new(&test_config(scratch), db.clone(), remote.clone(), clock)
    }

    #[tokio::test]
    async fn test_manual_backup_lands_under_manual_root() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let db = Arc::new(FakeDatabase::new().with_database("shop", &["orders"]));
        let remote = Arc::new(FakeRemote::new());

        let result = orchestrator(&db, &remote, scratch.path()).run_manual_backup("shop").await;

        assert_eq!(result.status, OperationStatus::Success);
        assert_eq!(result.cloud_path.as_deref(), Some("manual_backups/2025/10/7/shop.sql"));
        assert_eq!(
            remote.read("manual_backups/2025/10/7/shop.sql").as_deref(),
            Some("CREATE TABLE orders;\n")
        );
        assert!(!db.dump_paths()[0].exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_database_is_precondition_failure() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let db = Arc::new(FakeDatabase::new());
        let remote = Arc::new(FakeRemote::new());

        let result = orchestrator(&db, &remote, scratch.path()).run_manual_backup("ghost").await;

        assert_eq!(result.status, OperationStatus::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::PreconditionViolated));
        assert!(remote.calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_upload_failure_fails_manual_backup() -> anyhow::Result<()> {
        let scratch = tempfile::tempdir()?;
        let db = Arc::new(FakeDatabase::new().with_database("shop", &[]));
        let remote = Arc::new(FakeRemote::new());
        remote.fail_uploads();

        let result = orchestrator(&db, &remote, scratch.path()).run_manual_backup("shop").await;

        assert_eq!(result.status, OperationStatus::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::TransferFailed));
        assert_eq!(result.cloud_uploaded, Some(false));
        Ok(())
    }
}

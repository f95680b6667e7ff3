// pgvault/src/restore/safety.rs
use anyhow::Context;
use std::path::{Path, PathBuf};

use crate::errors::{ErrorKind, OpsError, describe};
use crate::report::{OperationResult, RunLog, Warning};
use crate::restore::logic::RestoreOrchestrator;
use crate::storage::index::BackupFolder;
use crate::storage::join_remote;
use crate::utils::staging_dir;

impl RestoreOrchestrator {
    /// Dumps the current contents of `database` to
    /// `manual_backups/<y>/<m>/<d>/<db>_before_restore_<HH-MM-SS>.sql`.
    ///
    /// Returns where the safety copy ended up: the remote path, or a local
    /// fallback path when the upload failed. A dump failure is an error and
    /// stops the restore before anything destructive happens.
    pub(super) async fn take_safety_backup(
        &self,
        database: &str,
        result: &mut OperationResult,
        log: &mut RunLog,
    ) -> Result<Option<String>, OpsError> {
        if !self.executor.database_exists(database).await? {
            log.info(
                "SAFETY",
                format!("Database '{}' does not exist yet, skipping safety backup", database),
            );
            return Ok(None);
        }

        let now = self.clock.now();
        let file_name = format!("{}_before_restore_{}.sql", database, now.format("%H-%M-%S"));
        let staging = staging_dir(self.temp_root.as_deref(), "pg_safety_backup_")?;
        let dump_path = staging.path().join(&file_name);

        log.info("SAFETY", format!("Creating backup before restore: {}", file_name));
        self.executor.dump_database(database, &dump_path).await?;

        let folder = BackupFolder::canonical(now.date().into());
        let remote_dir = join_remote(&self.manual_root, &folder.raw);
        match self.store.upload(&dump_path, &remote_dir).await {
            Ok(()) => {
                let remote_path = join_remote(&remote_dir, &file_name);
                log.info("SAFETY", format!("Safety backup uploaded: {}", remote_path));
                Ok(Some(remote_path))
            }
            Err(upload_err) => {
                match keep_locally(&dump_path, &self.safety_fallback_dir, &file_name) {
                    Ok(kept) => {
                        result.warn(
                            log,
                            Warning::new(
                                ErrorKind::TransferFailed,
                                format!(
                                    "Safety backup upload failed ({}); kept locally at {}",
                                    describe(&upload_err),
                                    kept.display()
                                ),
                            ),
                        );
                        Ok(Some(kept.display().to_string()))
                    }
                    Err(keep_err) => {
                        result.warn(
                            log,
                            Warning::new(
                                ErrorKind::Io,
                                format!(
                                    "Safety backup upload failed ({}) and no local copy could be kept ({}); continuing without a safety net",
                                    describe(&upload_err),
                                    describe(&keep_err)
                                ),
                            ),
                        );
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// Copies the dump out of staging, which is deleted when the restore ends.
fn keep_locally(dump_path: &Path, fallback_dir: &Path, file_name: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(fallback_dir)
        .with_context(|| format!("Failed to create {}", fallback_dir.display()))?;
    let kept = fallback_dir.join(file_name);
    std::fs::copy(dump_path, &kept)
        .with_context(|| format!("Failed to copy safety backup to {}", kept.display()))?;
    Ok(kept)
}

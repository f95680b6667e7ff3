//! Age-based removal of dated backup folders.

use chrono::Duration;
use log::{info, warn};
use std::sync::Arc;

use crate::errors::{OpsResult, describe};
use crate::storage::index::RemoteBackupIndex;
use crate::storage::{RemoteStore, join_remote};
use crate::utils::clock::Clock;

/// Outcome of one prune pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PruneReport {
    pub deleted: Vec<String>,
    pub kept: usize,
    /// Folders whose deletion failed, with the reason.
    pub failed: Vec<(String, String)>,
}

pub struct RetentionPruner {
    index: RemoteBackupIndex,
    store: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
}

impl RetentionPruner {
    pub fn new(store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index: RemoteBackupIndex::new(store.clone()),
            store,
            clock,
        }
    }

    /// Deletes every date folder under `root` strictly older than
    /// `today - retention_days`, `olds/` archives included. A failed delete
    /// is recorded and the pass moves on to the next folder.
    pub async fn prune(&self, root: &str, retention_days: u32) -> OpsResult<PruneReport> {
        // A horizon before the first representable day keeps everything.
        let cutoff = self
            .clock
            .today()
            .checked_sub_signed(Duration::days(i64::from(retention_days)));
        info!(
            "Checking {} for backups older than {} days (before {})",
            self.store.describe(root),
            retention_days,
            cutoff.map_or_else(|| "the start of the calendar".to_string(), |d| d.to_string())
        );

        let mut report = PruneReport::default();
        for folder in self.index.list_date_folders(root).await? {
            if cutoff.is_none_or(|cutoff| folder.date.date() >= cutoff) {
                report.kept += 1;
                continue;
            }

            let path = join_remote(root, &folder.raw);
            info!("Removing old backup: {}", path);
            match self.store.purge(&path).await {
                Ok(()) => report.deleted.push(path),
                Err(e) => {
                    warn!("Failed to remove old backup {}: {}", path, describe(&e));
                    report.failed.push((path, describe(&e)));
                }
            }
        }

        info!(
            "Cleanup of {} finished: {} deleted, {} kept, {} failed",
            root,
            report.deleted.len(),
            report.kept,
            report.failed.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::testing::{FakeRemote, FixedClock};
    use chrono::NaiveDate;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 20).unwrap()
    }

    fn folder_aged(days: i64) -> String {
        let date = today() - Duration::days(days);
        crate::utils::dates::BackupDate::from(date).remote_path()
    }

    fn pruner(remote: &Arc<FakeRemote>) -> RetentionPruner {
        RetentionPruner::new(remote.clone(), Arc::new(FixedClock::on(today(), 3, 0)))
    }

    #[tokio::test]
    async fn test_prunes_only_folders_older_than_horizon() -> anyhow::Result<()> {
        let remote = Arc::new(FakeRemote::new());
        for age in [10, 15, 16, 20] {
            remote.put(&format!("records/{}/app.sql", folder_aged(age)), "x");
        }
        remote.put(&format!("records/{}/olds/01_00/app.sql", folder_aged(20)), "old");

        let report = pruner(&remote).prune("records", 15).await?;

        let mut deleted = report.deleted.clone();
        deleted.sort();
        let mut expected = vec![
            format!("records/{}", folder_aged(16)),
            format!("records/{}", folder_aged(20)),
        ];
        expected.sort();
        assert_eq!(deleted, expected);
        assert_eq!(report.kept, 2);
        assert!(remote.exists(&format!("records/{}/app.sql", folder_aged(10))));
        assert!(remote.exists(&format!("records/{}/app.sql", folder_aged(15))));
        assert!(!remote.exists(&format!("records/{}/olds/01_00/app.sql", folder_aged(20))));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_stop_the_pass() -> anyhow::Result<()> {
        let remote = Arc::new(FakeRemote::new());
        for age in [10, 16, 20] {
            remote.put(&format!("records/{}/app.sql", folder_aged(age)), "x");
        }
        let failing = format!("records/{}", folder_aged(20));
        remote.fail_purge(&failing);

        let report = pruner(&remote).prune("records", 15).await?;

        assert_eq!(report.deleted, vec![format!("records/{}", folder_aged(16))]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, failing);
        assert!(!remote.exists(&format!("records/{}/app.sql", folder_aged(16))));
        assert!(remote.exists(&format!("records/{}/app.sql", folder_aged(20))));
        assert!(remote.exists(&format!("records/{}/app.sql", folder_aged(10))));
        Ok(())
    }

    #[tokio::test]
    async fn test_unlistable_root_reports_listing_unavailable() {
        let remote = Arc::new(FakeRemote::new());
        remote.fail_listing("manual_backups");
        let err = pruner(&remote).prune("manual_backups", 15).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ListingUnavailable);
        assert!(remote.calls().iter().all(|c| !c.starts_with("purge")));
    }

    #[tokio::test]
    async fn test_horizon_beyond_calendar_keeps_everything() -> anyhow::Result<()> {
        let remote = Arc::new(FakeRemote::new());
        remote.put("records/2025/10/1/app.sql", "x");
        remote.put(&format!("records/{}/app.sql", folder_aged(400)), "x");

        let report = pruner(&remote).prune("records", u32::MAX).await?;

        assert!(report.deleted.is_empty());
        assert_eq!(report.kept, 2);
        assert!(remote.exists("records/2025/10/1/app.sql"));
        assert!(remote.calls().iter().all(|c| !c.starts_with("purge")));
        Ok(())
    }
}

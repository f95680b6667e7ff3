//! Read-only view of the dated folder tree on the remote store.
//!
//! The remote tree is the only record of which backups exist, so every call
//! lists fresh and nothing is cached.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::errors::{OpsError, OpsResult, describe};
use crate::storage::{RemoteStore, join_remote};
use crate::utils::dates::BackupDate;

/// A `year/month/day` folder found under a root.
///
/// `raw` is the path as the remote spells it (possibly zero padded); it is
/// what must be used to address the folder again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupFolder {
    pub date: BackupDate,
    pub raw: String,
}

impl BackupFolder {
    /// Folder for a date, spelled the way new uploads write it.
    pub fn canonical(date: BackupDate) -> Self {
        BackupFolder {
            raw: date.remote_path(),
            date,
        }
    }
}

pub struct RemoteBackupIndex {
    store: Arc<dyn RemoteStore>,
}

impl RemoteBackupIndex {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Lists date folders under `root` with a single recursive listing.
    /// Paths that are not exactly three date segments (including `olds/..`
    /// archives) are skipped while iterating.
    pub async fn list_date_folders(
        &self,
        root: &str,
    ) -> OpsResult<impl Iterator<Item = BackupFolder>> {
        let entries = self
            .store
            .list_dirs_recursive(root)
            .await
            .map_err(|e| OpsError::ListingUnavailable {
                path: self.store.describe(root),
                reason: describe(&e),
            })?;

        Ok(entries.into_iter().filter_map(|entry| {
            let raw = entry.trim_matches('/').to_string();
            BackupDate::from_remote_path(&raw).map(|date| BackupFolder { date, raw })
        }))
    }

    /// Date folders under `root`, most recent first.
    pub async fn newest_first(&self, root: &str) -> OpsResult<Vec<BackupFolder>> {
        let mut folders: Vec<BackupFolder> = self.list_date_folders(root).await?.collect();
        folders.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.raw.cmp(&a.raw)));
        Ok(folders)
    }

    /// Finds the folder for `date`, whatever padding the remote used.
    pub async fn find(&self, root: &str, date: BackupDate) -> OpsResult<Option<BackupFolder>> {
        Ok(self
            .list_date_folders(root)
            .await?
            .find(|folder| folder.date == date))
    }

    /// File names directly inside one folder.
    pub async fn files_in(&self, root: &str, folder: &BackupFolder) -> OpsResult<BTreeSet<String>> {
        let path = join_remote(root, &folder.raw);
        let files = self
            .store
            .list_files(&path)
            .await
            .map_err(|e| OpsError::ListingUnavailable {
                path: self.store.describe(&path),
                reason: describe(&e),
            })?;
        Ok(files.into_iter().collect())
    }
}

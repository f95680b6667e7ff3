// pgvault/src/storage/mod.rs
pub mod index;
pub mod rclone;
pub mod retention;
pub mod s3;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::RemoteBackend;

/// Remote object store holding the backup tree.
///
/// Paths are relative to the configured remote root and use `/` separators.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Full remote location of `path`, for log lines.
    fn describe(&self, path: &str) -> String;

    /// Every directory below `path`, relative to it, without trailing slash.
    async fn list_dirs_recursive(&self, path: &str) -> Result<Vec<String>>;

    /// File names directly inside `path`.
    async fn list_files(&self, path: &str) -> Result<Vec<String>>;

    /// Copies a local file, or the contents of a local directory, into `remote_dir`.
    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<()>;

    /// Copies one remote file into `local_dir` and returns the local path.
    async fn download(&self, remote_file: &str, local_dir: &Path) -> Result<PathBuf>;

    /// Moves the contents of `from` into `to`, leaving `from/<exclude_subdir>` in place.
    async fn move_dir(&self, from: &str, to: &str, exclude_subdir: &str) -> Result<()>;

    /// Irreversibly deletes `path` and everything below it.
    async fn purge(&self, path: &str) -> Result<()>;
}

/// Joins remote path segments with single slashes.
pub fn join_remote(base: &str, rel: &str) -> String {
    let base = base.trim_matches('/');
    let rel = rel.trim_matches('/');
    match (base.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base, rel),
    }
}

/// Builds the production store for the configured backend.
pub async fn connect_remote_store(backend: &RemoteBackend) -> Result<Arc<dyn RemoteStore>> {
    match backend {
        RemoteBackend::Rclone { remote } => Ok(Arc::new(rclone::RcloneStore::new(remote)?)),
        RemoteBackend::S3(spaces) => Ok(Arc::new(s3::S3Store::connect(spaces).await)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_remote() {
        assert_eq!(join_remote("records", "2025/10/7"), "records/2025/10/7");
        assert_eq!(join_remote("records/", "/2025/10/7/"), "records/2025/10/7");
        assert_eq!(join_remote("", "app.sql"), "app.sql");
        assert_eq!(join_remote("records", ""), "records");
    }
}

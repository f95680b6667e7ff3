// pgvault/src/storage/rclone.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::storage::RemoteStore;
use crate::utils::{find_executable, run_tool};

/// [`RemoteStore`] backed by the `rclone` CLI and a configured remote
/// such as `grdive:`.
pub struct RcloneStore {
    rclone: PathBuf,
    remote: String,
}

/// One entry per line; directories come back with a trailing slash.
fn parse_listing(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| line.trim().trim_end_matches('/'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// rclone refuses to list a directory that was never written; for a backup
/// tree that only means nothing has been uploaded there yet.
fn is_missing_directory(err: &anyhow::Error) -> bool {
    format!("{:#}", err).contains("directory not found")
}

impl RcloneStore {
    pub fn new(remote: &str) -> Result<Self> {
        Ok(Self {
            rclone: find_executable("rclone")?,
            remote: remote.to_string(),
        })
    }

    fn target(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        if self.remote.ends_with(':') || self.remote.ends_with('/') || path.is_empty() {
            format!("{}{}", self.remote, path)
        } else {
            format!("{}/{}", self.remote, path)
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.rclone)
    }

    async fn lsf(&self, path: &str, kind_flags: &[&str]) -> Result<Vec<String>> {
        let target = self.target(path);
        let mut command = self.command();
        command.arg("lsf").args(kind_flags).arg(&target);
        match run_tool(command, &format!("rclone lsf {}", target)).await {
            Ok(output) => Ok(parse_listing(&output.stdout)),
            Err(e) if is_missing_directory(&e) => {
                debug!("{} does not exist yet, treating as empty", target);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RemoteStore for RcloneStore {
    fn describe(&self, path: &str) -> String {
        self.target(path)
    }

    async fn list_dirs_recursive(&self, path: &str) -> Result<Vec<String>> {
        self.lsf(path, &["--dirs-only", "--recursive"]).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.lsf(path, &["--files-only"]).await
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<()> {
        let target = format!("{}/", self.target(remote_dir));
        info!("Uploading {} to {}", local.display(), target);
        let mut command = self.command();
        command.arg("copy").arg(local).arg(&target);
        run_tool(command, &format!("rclone copy to {}", target)).await?;
        Ok(())
    }

    async fn download(&self, remote_file: &str, local_dir: &Path) -> Result<PathBuf> {
        let source = self.target(remote_file);
        let file_name = remote_file
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .with_context(|| format!("Remote path {} has no file name", remote_file))?;
        info!("Downloading {} to {}", source, local_dir.display());
        let mut command = self.command();
        command.arg("copy").arg(&source).arg(local_dir);
        run_tool(command, &format!("rclone copy from {}", source)).await?;
        Ok(local_dir.join(file_name))
    }

    async fn move_dir(&self, from: &str, to: &str, exclude_subdir: &str) -> Result<()> {
        let source = self.target(from);
        let destination = self.target(to);
        let mut command = self.command();
        command
            .arg("move")
            .arg(&source)
            .arg(&destination)
            .arg("--exclude")
            .arg(format!("{}/**", exclude_subdir.trim_matches('/')));
        run_tool(command, &format!("rclone move {} -> {}", source, destination)).await?;
        Ok(())
    }

    async fn purge(&self, path: &str) -> Result<()> {
        let target = self.target(path);
        let mut command = self.command();
        command.arg("purge").arg(&target);
        run_tool(command, &format!("rclone purge {}", target)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(remote: &str) -> RcloneStore {
        RcloneStore {
            rclone: PathBuf::from("rclone"),
            remote: remote.to_string(),
        }
    }

    #[test]
    fn test_parse_listing_strips_directory_slashes() {
        let stdout = b"2025/\n2025/10/\n2025/10/7/\n\n2025/10/7/olds/\n";
        assert_eq!(
            parse_listing(stdout),
            vec!["2025", "2025/10", "2025/10/7", "2025/10/7/olds"]
        );
    }

    #[test]
    fn test_target_joins_remote_and_path() {
        assert_eq!(store("grdive:").target("records/2025/10/7"), "grdive:records/2025/10/7");
        assert_eq!(store("grdive:backups").target("/records/"), "grdive:backups/records");
        assert_eq!(store("grdive:backups/").target("records"), "grdive:backups/records");
        assert_eq!(store("grdive:").target(""), "grdive:");
    }

    #[test]
    fn test_missing_directory_is_recognised() {
        let missing = anyhow::anyhow!(
            "rclone lsf failed with status: exit status: 3\nStderr: error listing: directory not found"
        );
        let denied = anyhow::anyhow!("rclone lsf failed with status: exit status: 1\nStderr: 403 Forbidden");
        assert!(is_missing_directory(&missing));
        assert!(!is_missing_directory(&denied));
    }
}

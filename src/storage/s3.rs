// pgvault/src/storage/s3.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use log::info;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

use crate::config::SpacesConfig;
use crate::storage::{RemoteStore, join_remote};

/// [`RemoteStore`] for an S3-compatible bucket (DigitalOcean Spaces, MinIO, AWS).
/// Directories are implied by `/` in object keys.
pub struct S3Store {
    client: s3::Client,
    bucket: String,
    prefix: Option<String>,
}

/// Every directory implied by a set of keys relative to a listing root.
fn collect_dirs<'a>(relative_keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    for key in relative_keys {
        let mut segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
        segments.pop();
        for depth in 1..=segments.len() {
            dirs.insert(segments[..depth].join("/"));
        }
    }
    dirs.into_iter().collect()
}

impl S3Store {
    pub async fn connect(spaces: &SpacesConfig) -> Self {
        let sdk_config = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .endpoint_url(&spaces.endpoint_url)
            .region(Region::new(spaces.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &spaces.access_key_id,
                &spaces.secret_access_key,
                None,
                None,
                "Static",
            ))
            .load()
            .await;

        Self {
            client: s3::Client::new(&sdk_config),
            bucket: spaces.bucket_name.clone(),
            prefix: spaces
                .folder_prefix
                .as_deref()
                .map(|p| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        }
    }

    fn key_for(&self, path: &str) -> String {
        match &self.prefix {
            Some(prefix) => join_remote(prefix, path),
            None => path.trim_matches('/').to_string(),
        }
    }

    /// Keys below `path`, relative to it, following continuation tokens.
    async fn list_relative_keys(&self, path: &str) -> Result<Vec<String>> {
        let base = self.key_for(path);
        let full_prefix = if base.is_empty() { base } else { format!("{}/", base) };

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request.send().await.with_context(|| {
                format!("Failed to list s3://{}/{}", self.bucket, full_prefix)
            })?;

            for object in response.contents.unwrap_or_default() {
                if let Some(key) = object.key {
                    if let Some(rel) = key.strip_prefix(&full_prefix) {
                        keys.push(rel.to_string());
                    }
                }
            }

            if response.is_truncated.unwrap_or(false) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }
        Ok(keys)
    }

    async fn put_file(&self, local: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local)
            .await
            .with_context(|| format!("Failed to create ByteStream from file: {}", local.display()))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| {
                format!(
                    "Failed to upload file {} to s3://{}/{}",
                    local.display(),
                    self.bucket,
                    key
                )
            })?;
        Ok(())
    }

    async fn delete_key(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", self.bucket, key))?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    fn describe(&self, path: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.key_for(path))
    }

    async fn list_dirs_recursive(&self, path: &str) -> Result<Vec<String>> {
        let keys = self.list_relative_keys(path).await?;
        Ok(collect_dirs(keys.iter().map(String::as_str)))
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .list_relative_keys(path)
            .await?
            .into_iter()
            .filter(|key| !key.is_empty() && !key.contains('/'))
            .collect())
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<()> {
        if local.is_file() {
            let name = local
                .file_name()
                .with_context(|| format!("{} has no file name", local.display()))?
                .to_string_lossy();
            let key = self.key_for(&join_remote(remote_dir, &name));
            self.put_file(local, &key).await?;
            info!("✅ Uploaded {} to s3://{}/{}", local.display(), self.bucket, key);
            return Ok(());
        }

        for entry in WalkDir::new(local) {
            let entry = entry.with_context(|| format!("Failed to walk {}", local.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(local)
                .with_context(|| format!("{} is outside {}", entry.path().display(), local.display()))?
                .to_string_lossy()
                .replace('\\', "/");
            let key = self.key_for(&join_remote(remote_dir, &rel));
            self.put_file(entry.path(), &key).await?;
            info!("✅ Uploaded {} to s3://{}/{}", entry.path().display(), self.bucket, key);
        }
        Ok(())
    }

    async fn download(&self, remote_file: &str, local_dir: &Path) -> Result<PathBuf> {
        let key = self.key_for(remote_file);
        let file_name = key
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .with_context(|| format!("Remote path {} has no file name", remote_file))?;
        let destination = local_dir.join(file_name);

        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .with_context(|| format!("Failed to get object s3://{}/{}", self.bucket, key))?;

        let mut output_file = File::create(&destination)
            .await
            .with_context(|| format!("Failed to create destination file: {}", destination.display()))?;
        let mut total_bytes = 0;
        while let Some(chunk) = object
            .body
            .try_next()
            .await
            .with_context(|| format!("Failed to read body of s3://{}/{}", self.bucket, key))?
        {
            output_file
                .write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write to destination file: {}", destination.display()))?;
            total_bytes += chunk.len();
        }
        output_file.flush().await?;

        info!(
            "✅ Downloaded {} bytes from s3://{}/{} to {}",
            total_bytes,
            self.bucket,
            key,
            destination.display()
        );
        Ok(destination)
    }

    async fn move_dir(&self, from: &str, to: &str, exclude_subdir: &str) -> Result<()> {
        let excluded = format!("{}/", exclude_subdir.trim_matches('/'));
        for rel in self.list_relative_keys(from).await? {
            if rel.starts_with(&excluded) {
                continue;
            }
            let source_key = self.key_for(&join_remote(from, &rel));
            let destination_key = self.key_for(&join_remote(to, &rel));
            self.client
                .copy_object()
                .bucket(&self.bucket)
                .copy_source(format!("{}/{}", self.bucket, source_key))
                .key(&destination_key)
                .send()
                .await
                .with_context(|| format!("Failed to copy {} to {}", source_key, destination_key))?;
            self.delete_key(&source_key).await?;
        }
        Ok(())
    }

    async fn purge(&self, path: &str) -> Result<()> {
        for rel in self.list_relative_keys(path).await? {
            self.delete_key(&self.key_for(&join_remote(path, &rel))).await?;
        }
        Ok(())
    }
}

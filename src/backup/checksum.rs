// pgvault/src/backup/checksum.rs
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

pub const CHECKSUM_FILE: &str = "SHA256SUMS";

const CHUNK_SIZE: usize = 64 * 1024;

pub fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Writes `SHA256SUMS` for every `.sql` file in `directory`, in the
/// `sha256sum` output format. Returns `None` when there is nothing to sum.
pub fn write_checksums(directory: &Path) -> Result<Option<PathBuf>> {
    let mut names: Vec<String> = fs::read_dir(directory)
        .with_context(|| format!("Failed to read {}", directory.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "sql"))
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    if names.is_empty() {
        return Ok(None);
    }
    names.sort();

    let mut body = String::new();
    for name in &names {
        let digest = file_sha256(&directory.join(name))?;
        body.push_str(&format!("{}  {}\n", digest, name));
    }

    let checksum_path = directory.join(CHECKSUM_FILE);
    fs::write(&checksum_path, body)
        .with_context(|| format!("Failed to write {}", checksum_path.display()))?;
    Ok(Some(checksum_path))
}

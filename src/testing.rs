//! Recording fakes for the capability traits. Real database or cloud tools
//! never run under `cargo test`.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;

use crate::config::{AppConfig, RawJsonConfig};
use crate::database::DatabaseAdmin;
use crate::storage::{RemoteStore, join_remote};
use crate::utils::clock::Clock;

#[derive(Default)]
struct RemoteState {
    objects: BTreeMap<String, Vec<u8>>,
    failing_listings: HashSet<String>,
    failing_purges: HashSet<String>,
    fail_uploads: bool,
    fail_downloads: bool,
    fail_moves: bool,
    calls: Vec<String>,
}

/// In-memory object map keyed by full remote path.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<RemoteState>,
}

fn under<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return Some(key);
    }
    key.strip_prefix(prefix)?.strip_prefix('/')
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(path.trim_matches('/').to_string(), content.as_bytes().to_vec());
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(path)
    }

    pub fn read(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }

    pub fn fail_listing(&self, path: &str) {
        self.state.lock().unwrap().failing_listings.insert(path.to_string());
    }

    pub fn fail_purge(&self, path: &str) {
        self.state.lock().unwrap().failing_purges.insert(path.to_string());
    }

    pub fn fail_uploads(&self) {
        self.state.lock().unwrap().fail_uploads = true;
    }

    pub fn fail_downloads(&self) {
        self.state.lock().unwrap().fail_downloads = true;
    }

    pub fn fail_moves(&self) {
        self.state.lock().unwrap().fail_moves = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    fn describe(&self, path: &str) -> String {
        format!("fake:{}", path)
    }

    async fn list_dirs_recursive(&self, path: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_dirs {}", path));
        if state.failing_listings.contains(path) {
            return Err(anyhow!("listing of {} refused", path));
        }
        let mut dirs = BTreeSet::new();
        for key in state.objects.keys() {
            let Some(rel) = under(key, path) else { continue };
            let segments: Vec<&str> = rel.split('/').collect();
            for depth in 1..segments.len() {
                dirs.insert(segments[..depth].join("/"));
            }
        }
        Ok(dirs.into_iter().collect())
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("list_files {}", path));
        if state.failing_listings.contains(path) {
            return Err(anyhow!("listing of {} refused", path));
        }
        Ok(state
            .objects
            .keys()
            .filter_map(|key| under(key, path))
            .filter(|rel| !rel.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn upload(&self, local: &Path, remote_dir: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("upload {}", remote_dir));
        if state.fail_uploads {
            return Err(anyhow!("upload to {} refused", remote_dir));
        }
        if local.is_file() {
            let name = local
                .file_name()
                .context("upload source has no file name")?
                .to_string_lossy();
            let bytes = std::fs::read(local)?;
            state.objects.insert(join_remote(remote_dir, &name), bytes);
            return Ok(());
        }
        for entry in WalkDir::new(local) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(local)?.to_string_lossy().replace('\\', "/");
            let bytes = std::fs::read(entry.path())?;
            state.objects.insert(join_remote(remote_dir, &rel), bytes);
        }
        Ok(())
    }

    /// A missing object is an error, as with `rclone copy` and `GetObject`.
    async fn download(&self, remote_file: &str, local_dir: &Path) -> Result<PathBuf> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("download {}", remote_file));
        if state.fail_downloads {
            return Err(anyhow!("download of {} refused", remote_file));
        }
        let bytes = state
            .objects
            .get(remote_file)
            .with_context(|| format!("{}: object not found", remote_file))?;
        let name = remote_file.rsplit('/').next().unwrap_or(remote_file);
        let local = local_dir.join(name);
        std::fs::write(&local, bytes)?;
        Ok(local)
    }

    async fn move_dir(&self, from: &str, to: &str, exclude_subdir: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("move {} -> {}", from, to));
        if state.fail_moves {
            return Err(anyhow!("move of {} refused", from));
        }
        let moving: Vec<(String, String)> = state
            .objects
            .keys()
            .filter_map(|key| {
                let rel = under(key, from)?;
                if rel.starts_with(&format!("{}/", exclude_subdir)) {
                    return None;
                }
                Some((key.clone(), join_remote(to, rel)))
            })
            .collect();
        for (old, new) in moving {
            if let Some(bytes) = state.objects.remove(&old) {
                state.objects.insert(new, bytes);
            }
        }
        Ok(())
    }

    async fn purge(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("purge {}", path));
        if state.failing_purges.contains(path) {
            return Err(anyhow!("purge of {} refused", path));
        }
        state.objects.retain(|key, _| under(key, path).is_none());
        Ok(())
    }
}

#[derive(Default)]
struct DatabaseState {
    databases: BTreeMap<String, Vec<String>>,
    failing_dumps: HashSet<String>,
    failing_loads: HashSet<String>,
    failing_creates: HashSet<String>,
    fail_listing: bool,
    fail_terminate: bool,
    ignore_drops: bool,
    fail_clone: bool,
    dump_paths: Vec<PathBuf>,
    calls: Vec<String>,
}

/// Catalog of databases and their tables. Dumps are `CREATE TABLE <t>;` lines.
#[derive(Default)]
pub struct FakeDatabase {
    state: Mutex<DatabaseState>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(self, name: &str, tables: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .databases
            .insert(name.to_string(), tables.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn fail_listing(&self) {
        self.state.lock().unwrap().fail_listing = true;
    }

    pub fn fail_dump_of(&self, name: &str) {
        self.state.lock().unwrap().failing_dumps.insert(name.to_string());
    }

    pub fn fail_load_of(&self, name: &str) {
        self.state.lock().unwrap().failing_loads.insert(name.to_string());
    }

    pub fn fail_create_of(&self, name: &str) {
        self.state.lock().unwrap().failing_creates.insert(name.to_string());
    }

    pub fn fail_terminate(&self) {
        self.state.lock().unwrap().fail_terminate = true;
    }

    /// Drops report success but leave the database in place.
    pub fn ignore_drops(&self) {
        self.state.lock().unwrap().ignore_drops = true;
    }

    pub fn fail_clone(&self) {
        self.state.lock().unwrap().fail_clone = true;
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().databases.contains_key(name)
    }

    pub fn tables_of(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .databases
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dump_paths(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().dump_paths.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl DatabaseAdmin for FakeDatabase {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("list_databases".to_string());
        if state.fail_listing {
            return Err(anyhow!("connection refused"));
        }
        Ok(state.databases.keys().cloned().collect())
    }

    async fn database_exists(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("exists {}", name));
        if state.fail_listing {
            return Err(anyhow!("connection refused"));
        }
        Ok(state.databases.contains_key(name))
    }

    async fn dump_to_file(&self, name: &str, destination: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("dump {}", name));
        if state.failing_dumps.contains(name) {
            return Err(anyhow!("pg_dump: error: connection to database \"{}\" failed", name));
        }
        let tables = state
            .databases
            .get(name)
            .with_context(|| format!("database \"{}\" does not exist", name))?;
        let body: String = tables.iter().map(|t| format!("CREATE TABLE {};\n", t)).collect();
        std::fs::write(destination, body)?;
        state.dump_paths.push(destination.to_path_buf());
        Ok(())
    }

    async fn load_file(&self, name: &str, sql_file: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("load {}", name));
        if state.failing_loads.contains(name) {
            return Err(anyhow!("psql: ERROR: syntax error at or near \"CREAT\""));
        }
        let sql = std::fs::read_to_string(sql_file)?;
        let tables = state
            .databases
            .get_mut(name)
            .with_context(|| format!("database \"{}\" does not exist", name))?;
        for line in sql.lines() {
            if let Some(table) = line.strip_prefix("CREATE TABLE ") {
                tables.push(table.trim_end_matches(';').to_string());
            }
        }
        Ok(())
    }

    async fn terminate_sessions(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("terminate {}", name));
        if state.fail_terminate {
            return Err(anyhow!("no sessions to terminate"));
        }
        Ok(())
    }

    async fn create_database(&self, name: &str, _encoding: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create {}", name));
        if state.failing_creates.contains(name) {
            return Err(anyhow!("permission denied to create database"));
        }
        if state.databases.contains_key(name) {
            return Err(anyhow!("database \"{}\" already exists", name));
        }
        state.databases.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn drop_database_if_exists(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("drop {}", name));
        if !state.ignore_drops {
            state.databases.remove(name);
        }
        Ok(())
    }

    async fn pipe_clone(&self, source: &str, target: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("clone {}->{}", source, target));
        if state.fail_clone {
            return Err(anyhow!("psql exited with status 3"));
        }
        let tables = state
            .databases
            .get(source)
            .cloned()
            .with_context(|| format!("database \"{}\" does not exist", source))?;
        state
            .databases
            .get_mut(target)
            .with_context(|| format!("database \"{}\" does not exist", target))?
            .extend(tables);
        Ok(())
    }

    async fn list_tables(&self, name: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("tables {}", name));
        state
            .databases
            .get(name)
            .cloned()
            .with_context(|| format!("database \"{}\" does not exist", name))
    }
}

pub struct FixedClock(NaiveDateTime);

impl FixedClock {
    pub fn on(date: NaiveDate, hour: u32, minute: u32) -> Self {
        FixedClock(date.and_hms_opt(hour, minute, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Default configuration with every local path under `scratch`.
pub fn test_config(scratch: &Path) -> AppConfig {
    let mut config = AppConfig::from_sources(RawJsonConfig::default(), |_| None).unwrap();
    config.temp_dump_root = Some(scratch.join("dumps"));
    config.safety_fallback_dir = scratch.join("safety_backups");
    config
}

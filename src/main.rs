//! PostgreSQL backup, restore and clone tool
//!
//! Provides CLI interface over the backup orchestration core

// pgvault/src/main.rs
mod backup;
mod clone;
mod config;
mod database;
mod errors;
mod report;
mod restore;
mod status;
mod storage;
#[cfg(test)]
mod testing;
mod utils;

use anyhow::{Context, Result};
use env_logger::Env;
use log::info;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use backup::BackupOrchestrator;
use clone::CloneOrchestrator;
use config::AppConfig;
use database::DatabaseAdmin;
use database::executor::Executor;
use database::provision::{self, Provisioned};
use database::toolchain::PgToolchain;
use report::OperationResult;
use restore::RestoreOrchestrator;
use status::{DockerInspector, StatusQuery};
use storage::index::RemoteBackupIndex;
use storage::{RemoteStore, connect_remote_store};
use utils::clock::{Clock, SystemClock};

const EXIT_INTERRUPTED: u8 = 130;

/// Main entry point. An interrupt drops the running operation, which
/// removes its staging directory and kills any child tool.
#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    tokio::select! {
        outcome = run_app() => match outcome {
            Ok(code) => code,
            Err(e) => {
                eprintln!("❌ Error: {:?}", e);
                ExitCode::FAILURE
            }
        },
        Ok(()) = tokio::signal::ctrl_c() => {
            eprintln!("⚠️ Interrupted. Local staging has been removed.");
            ExitCode::from(EXIT_INTERRUPTED)
        }
    }
}

/// Parsed command line: the command, its positional arguments and flags.
#[derive(Debug, Default, PartialEq)]
struct Invocation {
    command: String,
    positional: Vec<String>,
    json: bool,
    skip_safety: bool,
    confirm: bool,
}

impl Invocation {
    fn parse(args: &[String]) -> Self {
        let mut invocation = Invocation::default();
        for arg in args {
            match arg.as_str() {
                "--json" => invocation.json = true,
                "--skip-safety-backup" => invocation.skip_safety = true,
                "--confirm" => invocation.confirm = true,
                _ if invocation.command.is_empty() => invocation.command = arg.trim().to_string(),
                _ => invocation.positional.push(arg.clone()),
            }
        }
        invocation
    }

    fn arg(&self, index: usize, name: &str) -> Result<&str> {
        self.positional
            .get(index)
            .map(String::as_str)
            .with_context(|| format!("Missing argument <{}> for '{}'", name, self.command))
    }
}

/// Shared collaborators, built once from configuration.
struct App {
    config: AppConfig,
    clock: Arc<dyn Clock>,
}

impl App {
    fn admin(&self) -> Result<Arc<dyn DatabaseAdmin>> {
        Ok(Arc::new(PgToolchain::new(&self.config.postgres)?))
    }

    async fn store(&self) -> Result<Arc<dyn RemoteStore>> {
        connect_remote_store(&self.config.remote)
            .await
            .with_context(|| format!("Failed to set up remote store {}", self.config.remote_label()))
    }
}

async fn run_app() -> Result<ExitCode> {
    let config_path = PathBuf::from("config.json");
    let config = AppConfig::load(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;
    let app = App {
        config,
        clock: Arc::new(SystemClock),
    };

    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = if args.is_empty() {
        prompt_invocation()?
    } else {
        Invocation::parse(&args)
    };

    match invocation.command.as_str() {
        "1" | "backup" => {
            info!("🚀 Starting Backup Process...");
            let orchestrator =
                BackupOrchestrator::new(&app.config, app.admin()?, app.store().await?, app.clock.clone());
            let result = orchestrator.run_full_backup().await;
            print_result(&result, invocation.json)
        }
        "2" | "restore" => {
            let database = invocation.arg(0, "database")?;
            let date = invocation.positional.get(1).map(String::as_str);
            info!("🔄 Starting Restore Process for {}...", database);
            let orchestrator =
                RestoreOrchestrator::new(&app.config, app.admin()?, app.store().await?, app.clock.clone());
            let result = orchestrator
                .run_restore(database, date, invocation.skip_safety)
                .await;
            print_result(&result, invocation.json)
        }
        "3" | "clone" => {
            let source = invocation.arg(0, "source")?;
            let target = invocation.arg(1, "target")?;
            info!("⚙️ Cloning {} into {}...", source, target);
            let orchestrator = CloneOrchestrator::new(&app.config, app.admin()?, app.clock.clone());
            let result = orchestrator.clone_database(source, target).await;
            print_result(&result, invocation.json)
        }
        "4" | "manual-backup" => {
            let database = invocation.arg(0, "database")?;
            let orchestrator =
                BackupOrchestrator::new(&app.config, app.admin()?, app.store().await?, app.clock.clone());
            let result = orchestrator.run_manual_backup(database).await;
            print_result(&result, invocation.json)
        }
        "5" | "mkdb" => {
            let database = invocation.arg(0, "database")?;
            let executor = Executor::new(app.admin()?, &app.config.database_encoding);
            let (outcome, connection) =
                provision::create_database(&executor, &app.config.postgres, database).await?;
            match outcome {
                Provisioned::Created => println!("✅ Database '{}' created.", database),
                Provisioned::AlreadyExisted => println!("ℹ️ Database '{}' already exists.", database),
            }
            println!("{}", connection);
            Ok(ExitCode::SUCCESS)
        }
        "dropdb" => {
            let database = invocation.arg(0, "database")?;
            let executor = Executor::new(app.admin()?, &app.config.database_encoding);
            provision::drop_database(&executor, database, invocation.confirm).await?;
            println!("✅ Database '{}' deleted.", database);
            Ok(ExitCode::SUCCESS)
        }
        "6" | "list-databases" => {
            let executor = Executor::new(app.admin()?, &app.config.database_encoding);
            let databases = executor.list_databases().await?;
            if invocation.json {
                println!("{}", serde_json::to_string_pretty(&databases)?);
            } else {
                databases.iter().for_each(|name| println!("{}", name));
            }
            Ok(ExitCode::SUCCESS)
        }
        "7" | "list-backups" => {
            let index = RemoteBackupIndex::new(app.store().await?);
            for folder in index.newest_first(&app.config.records_root).await? {
                println!("{}  ({})", folder.date, folder.raw);
            }
            Ok(ExitCode::SUCCESS)
        }
        "8" | "status" => {
            let query = StatusQuery::new(
                &app.config,
                app.admin()?,
                app.store().await?,
                Arc::new(DockerInspector),
                app.clock.clone(),
            );
            let report = query.collect_status().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        _ => {
            println!(
                "❌ Invalid choice. Use backup, restore <db> [date], clone <source> <target>, manual-backup <db>, mkdb <db>, dropdb <db> --confirm, list-databases, list-backups or status."
            );
            anyhow::bail!("Invalid operation choice");
        }
    }
}

/// Prints the outcome and maps it to the process exit code. A partial
/// backup still exits with success.
fn print_result(result: &OperationResult, json: bool) -> Result<ExitCode> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialize operation result")?
        );
    } else {
        for error in &result.errors {
            eprintln!("  - {}", error);
        }
        for warning in &result.warnings {
            eprintln!("  ! {}", warning);
        }
    }

    if result.is_ok() {
        println!("✅ Operation completed with status {:?}.", result.status);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("❌ Operation failed.");
        Ok(ExitCode::FAILURE)
    }
}

/// Prompts user to select an operation and its arguments
fn prompt_invocation() -> Result<Invocation> {
    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    println!("3. Clone Database (or type 'clone')");
    println!("4. Manual Backup of one database (or type 'manual-backup')");
    println!("5. Create Database (or type 'mkdb')");
    println!("6. List Databases (or type 'list-databases')");
    println!("7. List Backups (or type 'list-backups')");
    println!("8. Status (or type 'status')");
    let command = prompt_line("Enter your choice: ")?;

    let mut invocation = Invocation {
        command,
        ..Invocation::default()
    };
    match invocation.command.as_str() {
        "2" | "restore" => {
            invocation.positional.push(prompt_line("Database name: ")?);
            let date = prompt_line("Backup date (YYYY-MM-DD, empty for latest): ")?;
            if !date.is_empty() {
                invocation.positional.push(date);
            }
            let skip = prompt_line("Skip safety backup? [y/N]: ")?;
            invocation.skip_safety = skip.eq_ignore_ascii_case("y");
        }
        "3" | "clone" => {
            invocation.positional.push(prompt_line("Source database: ")?);
            invocation.positional.push(prompt_line("Target database: ")?);
        }
        "4" | "manual-backup" | "5" | "mkdb" => {
            invocation.positional.push(prompt_line("Database name: ")?);
        }
        _ => {}
    }
    Ok(invocation)
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::{Write, stdin, stdout};

    print!("{}", prompt);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}

// pgvault/src/clone/logic.rs
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::database::DatabaseAdmin;
use crate::database::executor::Executor;
use crate::errors::{ErrorKind, OpsError};
use crate::report::{OperationKind, OperationResult, RunLog, Warning};
use crate::utils::clock::Clock;
use crate::utils::validate_database_name;

/// Copies one database into a new one by piping a dump straight into a load.
pub struct CloneOrchestrator {
    executor: Executor,
    clock: Arc<dyn Clock>,
}

impl CloneOrchestrator {
    pub fn new(config: &AppConfig, admin: Arc<dyn DatabaseAdmin>, clock: Arc<dyn Clock>) -> Self {
        Self {
            executor: Executor::new(admin, &config.database_encoding),
            clock,
        }
    }

    /// Both existence checks run before anything is created. A failed copy
    /// leaves the new target in place for inspection.
    pub async fn clone_database(&self, source: &str, target: &str) -> OperationResult {
        let mut result = OperationResult::begin(OperationKind::Clone, self.clock.now());
        let mut log = RunLog::new();

        match self.clone_into(source, target, &mut log).await {
            Ok(()) => result.databases.push(target.to_string()),
            Err(e) => {
                log.error(e.to_string());
                if matches!(e, OpsError::CloneFailed { .. }) {
                    result.warn(
                        &mut log,
                        Warning::new(
                            ErrorKind::CloneFailed,
                            format!(
                                "Target database '{}' was left in place for inspection; drop it before retrying",
                                target
                            ),
                        ),
                    );
                }
                result.fail(&e);
            }
        }
        result.finish(log, self.clock.now())
    }

    async fn clone_into(&self, source: &str, target: &str, log: &mut RunLog) -> Result<(), OpsError> {
        validate_database_name(source)?;
        validate_database_name(target)?;
        if source == target {
            return Err(OpsError::PreconditionViolated(
                "source and target database must differ".to_string(),
            ));
        }
        if !self.executor.database_exists(source).await? {
            return Err(OpsError::PreconditionViolated(format!(
                "source database '{}' does not exist",
                source
            )));
        }
        if self.executor.database_exists(target).await? {
            return Err(OpsError::PreconditionViolated(format!(
                "target database '{}' already exists",
                target
            )));
        }

        log.info("CREATE", format!("Creating database: {}", target));
        self.executor.create_database(target).await?;

        log.info("CLONE", format!("Copying data from {} to {}...", source, target));
        let started = Instant::now();
        self.executor.stream_clone(source, target).await?;
        log.info(
            "CLONE",
            format!("Clone completed in {:.2}s", started.elapsed().as_secs_f64()),
        );
        Ok(())
    }
}

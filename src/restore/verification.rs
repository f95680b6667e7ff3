// pgvault/src/restore/verification.rs
use crate::database::executor::Executor;
use crate::errors::{ErrorKind, describe};
use crate::report::{OperationResult, RunLog, Warning};

/// Lists the public tables of the restored database. Diagnostic only:
/// nothing here changes the status of the run.
pub async fn verify_tables(
    executor: &Executor,
    database: &str,
    result: &mut OperationResult,
    log: &mut RunLog,
) {
    log.info("VERIFY", format!("Listing tables in public schema of {}", database));
    match executor.list_tables(database).await {
        Ok(tables) if tables.is_empty() => result.warn(
            log,
            Warning::notice(format!(
                "No tables found in the public schema of '{}'; the backup may be empty",
                database
            )),
        ),
        Ok(tables) => log.info(
            "VERIFY",
            format!("Found {} tables: {}", tables.len(), tables.join(", ")),
        ),
        Err(e) => result.warn(
            log,
            Warning::new(
                ErrorKind::CatalogUnavailable,
                format!("Could not list tables of '{}': {}", database, describe(&e)),
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{OperationKind, OperationStatus};
    use crate::testing::FakeDatabase;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn begin() -> OperationResult {
        let at = NaiveDate::from_ymd_opt(2025, 10, 7).unwrap().and_hms_opt(3, 0, 0).unwrap();
        OperationResult::begin(OperationKind::Restore, at)
    }

    #[tokio::test]
    async fn test_tables_are_logged() {
        let db = Arc::new(FakeDatabase::new().with_database("app", &["orders", "users"]));
        let executor = Executor::new(db, "UTF8");
        let mut result = begin();
        let mut log = RunLog::new();

        verify_tables(&executor, "app", &mut result, &mut log).await;

        assert!(result.warnings.is_empty());
        assert_eq!(
            log.into_lines().last().map(String::as_str),
            Some("[VERIFY] Found 2 tables: orders, users")
        );
    }

    #[tokio::test]
    async fn test_verification_problems_are_only_warnings() {
        let db = Arc::new(FakeDatabase::new().with_database("empty", &[]));
        let executor = Executor::new(db, "UTF8");
        let mut result = begin();
        let mut log = RunLog::new();

        verify_tables(&executor, "empty", &mut result, &mut log).await;
        verify_tables(&executor, "missing", &mut result, &mut log).await;

        let kinds: Vec<_> = result.warnings.iter().map(|w| w.kind).collect();
        assert_eq!(kinds, vec![None, Some(ErrorKind::CatalogUnavailable)]);
        assert_eq!(result.status, OperationStatus::Success);
    }
}

use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the orchestration core.
///
/// Collaborator calls report `anyhow` chains; they are flattened into the
/// `reason` strings here so a result can carry them without the source types.
#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Remote listing unavailable for '{path}': {reason}")]
    ListingUnavailable { path: String, reason: String },

    #[error("Dump of database '{database}' failed: {reason}")]
    DumpFailed { database: String, reason: String },

    #[error("Creating database '{database}' failed: {reason}")]
    CreateFailed { database: String, reason: String },

    #[error("Loading SQL into database '{database}' failed: {reason}")]
    RestoreFailed { database: String, reason: String },

    #[error("Cloning database '{from}' into '{to}' failed: {reason}")]
    CloneFailed { from: String, to: String, reason: String },

    #[error("Precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("Backup not found: {0}")]
    BackupNotFound(String),

    #[error("Invalid date '{input}': {reason}")]
    InvalidDate { input: String, reason: String },

    #[error("Remote transfer failed: {0}")]
    TransferFailed(String),

    #[error("Database catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serializable tag for an [`OpsError`], carried inside operation results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ListingUnavailable,
    DumpFailed,
    CreateFailed,
    RestoreFailed,
    CloneFailed,
    PreconditionViolated,
    BackupNotFound,
    InvalidDate,
    TransferFailed,
    CatalogUnavailable,
    Config,
    Io,
}

impl OpsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OpsError::ListingUnavailable { .. } => ErrorKind::ListingUnavailable,
            OpsError::DumpFailed { .. } => ErrorKind::DumpFailed,
            OpsError::CreateFailed { .. } => ErrorKind::CreateFailed,
            OpsError::RestoreFailed { .. } => ErrorKind::RestoreFailed,
            OpsError::CloneFailed { .. } => ErrorKind::CloneFailed,
            OpsError::PreconditionViolated(_) => ErrorKind::PreconditionViolated,
            OpsError::BackupNotFound(_) => ErrorKind::BackupNotFound,
            OpsError::InvalidDate { .. } => ErrorKind::InvalidDate,
            OpsError::TransferFailed(_) => ErrorKind::TransferFailed,
            OpsError::CatalogUnavailable(_) => ErrorKind::CatalogUnavailable,
            OpsError::Config(_) => ErrorKind::Config,
            OpsError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Renders an `anyhow` error with its full context chain on one line.
pub fn describe(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

pub type OpsResult<T> = std::result::Result<T, OpsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_kind_matches_variant() {
        let err = OpsError::CloneFailed {
            from: "app".into(),
            to: "app_copy".into(),
            reason: "psql exited with 3".into(),
        };
        assert_eq!(err.kind(), ErrorKind::CloneFailed);
        assert!(err.to_string().contains("'app' into 'app_copy'"));
    }

    #[test]
    fn test_describe_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("exit status 1"));
        let err = inner.context("pg_dump for app").unwrap_err();
        assert_eq!(describe(&err), "pg_dump for app: exit status 1");
    }

    #[test]
    fn test_error_kind_serializes_snake_case() -> anyhow::Result<()> {
        let json = serde_json::to_string(&ErrorKind::PreconditionViolated)?;
        assert_eq!(json, "\"precondition_violated\"");
        Ok(())
    }
}

//! Outcome of a composite operation plus the ordered log shown to operators.

use chrono::NaiveDateTime;
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::errors::{ErrorKind, OpsError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Backup,
    Restore,
    Clone,
    ManualBackup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Success,
    Partial,
    Failed,
}

/// A best-effort step that went wrong without changing the status of the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    /// Kind of the underlying failure. `None` for diagnostic findings, such
    /// as a restored database without tables.
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl Warning {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Warning {
            kind: Some(kind),
            message: message.into(),
        }
    }

    pub fn from_error(context: &str, err: &OpsError) -> Self {
        Warning::new(err.kind(), format!("{}: {}", context, err))
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Warning {
            kind: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub run_id: Uuid,
    pub operation: OperationKind,
    pub status: OperationStatus,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    /// Databases the operation completed for.
    pub databases: Vec<String>,
    pub errors: Vec<String>,
    /// Best-effort steps that failed without affecting the status.
    pub warnings: Vec<Warning>,
    pub cloud_path: Option<String>,
    pub cloud_uploaded: Option<bool>,
    pub safety_backup: Option<String>,
    /// Furthest stage reached, for staged operations such as restore.
    pub stage: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub log: Vec<String>,
}

impl OperationResult {
    pub fn begin(operation: OperationKind, started_at: NaiveDateTime) -> Self {
        OperationResult {
            run_id: Uuid::new_v4(),
            operation,
            status: OperationStatus::Success,
            started_at,
            finished_at: None,
            databases: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            cloud_path: None,
            cloud_uploaded: None,
            safety_backup: None,
            stage: None,
            error_kind: None,
            log: Vec::new(),
        }
    }

    /// Records a fatal error: the run is failed and the error kind is kept.
    pub fn fail(&mut self, err: &OpsError) {
        self.status = OperationStatus::Failed;
        self.error_kind = Some(err.kind());
        self.errors.push(err.to_string());
    }

    /// Like [`fail`](Self::fail), naming the stage the run stopped in.
    pub fn fail_at(&mut self, stage: &str, err: &OpsError) {
        self.status = OperationStatus::Failed;
        self.stage = Some(stage.to_string());
        self.error_kind = Some(err.kind());
        self.errors.push(format!("{} failed: {}", stage, err));
    }

    /// Records a non-fatal problem and logs it as `[WARN]`.
    pub fn warn(&mut self, log: &mut RunLog, warning: Warning) {
        log.warn(&warning.message);
        self.warnings.push(warning);
    }

    pub fn finish(mut self, log: RunLog, finished_at: NaiveDateTime) -> Self {
        self.log = log.into_lines();
        self.finished_at = Some(finished_at);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status != OperationStatus::Failed
    }
}

/// Ordered, human readable run log. Every line is also sent to the `log` facade.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Vec<String>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&mut self, tag: &str, message: impl AsRef<str>) {
        let line = format!("[{}] {}", tag, message.as_ref());
        info!("{}", line);
        self.lines.push(line);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        let line = format!("[WARN] {}", message.as_ref());
        warn!("{}", line);
        self.lines.push(line);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        let line = format!("[ERROR] {}", message.as_ref());
        error!("{}", line);
        self.lines.push(line);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

use std::fmt;

use thiserror::Error;

/// Phase of a backup in which a failure was observed.
///
/// The phase name is embedded in the `error` column of a failed record so
/// operators can tell an upload problem from a dump problem at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPhase {
    ExecCreate,
    ExecAttach,
    Stream,
    Upload,
    Dump,
    Cancelled,
}

impl BackupPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupPhase::ExecCreate => "exec create",
            BackupPhase::ExecAttach => "exec attach",
            BackupPhase::Stream => "stream",
            BackupPhase::Upload => "upload",
            BackupPhase::Dump => "dump",
            BackupPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database {0} is not registered")]
    DatabaseNotFound(i64),

    #[error("Backup {backup_id} not found for database {database_id}")]
    BackupNotFound { backup_id: i64, database_id: i64 },

    #[error("Metadata store error: {0:#}")]
    Store(anyhow::Error),

    #[error("{step} failed: {source:#}")]
    Transport {
        step: &'static str,
        source: anyhow::Error,
    },

    #[error("{step} exited with code {exit_code}: {output}")]
    RemoteExec {
        step: &'static str,
        exit_code: i64,
        output: String,
    },

    #[error("Streaming failed during {step}: {source}")]
    Streaming {
        step: &'static str,
        source: std::io::Error,
    },

    #[error("Backup {backup_id} failed during {phase}: {message}")]
    BackupFailed {
        backup_id: i64,
        phase: BackupPhase,
        message: String,
    },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl OrchestratorError {
    pub fn transport(step: &'static str, source: anyhow::Error) -> Self {
        OrchestratorError::Transport { step, source }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

//! # Migration report
//!
//! Module dedicated to the migration report.

use std::fmt;

use crate::Error;

/// Exit code of a run that migrated everything.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code of a run with at least one failed message or folder.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code of a run aborted by a fatal error.
pub const EXIT_ABORTED: i32 = 2;

/// Exit code of a run cancelled by the user.
pub const EXIT_CANCELLED: i32 = 130;

/// The state of a folder migration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum FolderState {
    #[default]
    NotStarted,
    Scanning,
    Transferring,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for FolderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Scanning => write!(f, "scanning"),
            Self::Transferring => write!(f, "transferring"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// The report of one folder migration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FolderReport {
    pub source: String,
    pub dest: String,
    pub state: FolderState,

    /// Messages sent to the destination during this run.
    pub migrated: usize,

    /// Messages already migrated by a previous run.
    pub skipped: usize,

    /// Messages that could not be migrated.
    pub failed: usize,

    /// The error that stopped the folder migration, if any.
    pub error: Option<String>,
}

impl FolderReport {
    pub fn new(source: impl ToString, dest: impl ToString) -> Self {
        Self {
            source: source.to_string(),
            dest: dest.to_string(),
            ..Default::default()
        }
    }

    /// Return `true` if the folder completed without failure.
    pub fn is_success(&self) -> bool {
        self.state == FolderState::Completed && self.failed == 0
    }
}

impl fmt::Display for FolderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} → {}: {} ({} migrated, {} skipped, {} failed)",
            self.source, self.dest, self.state, self.migrated, self.skipped, self.failed
        )?;

        if let Some(err) = &self.error {
            write!(f, ": {err}")?;
        }

        Ok(())
    }
}

/// The migration report.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Reports of the folders, in migration order.
    pub folders: Vec<FolderReport>,

    /// The fatal error that aborted the run, if any.
    pub abort: Option<Error>,

    /// Whether the run has been cancelled.
    pub cancelled: bool,

    /// Whether the run was a dry run.
    pub dry_run: bool,
}

impl MigrationReport {
    pub fn migrated(&self) -> usize {
        self.folders.iter().map(|f| f.migrated).sum()
    }

    pub fn skipped(&self) -> usize {
        self.folders.iter().map(|f| f.skipped).sum()
    }

    pub fn failed(&self) -> usize {
        self.folders.iter().map(|f| f.failed).sum()
    }

    pub fn folder(&self, source: &str) -> Option<&FolderReport> {
        self.folders.iter().find(|f| f.source == source)
    }

    /// Return `true` if every folder completed without failure.
    pub fn is_success(&self) -> bool {
        self.abort.is_none() && !self.cancelled && self.folders.iter().all(FolderReport::is_success)
    }

    /// Process exit code matching the report.
    pub fn exit_code(&self) -> i32 {
        if self.abort.is_some() {
            EXIT_ABORTED
        } else if self.cancelled {
            EXIT_CANCELLED
        } else if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for folder in &self.folders {
            writeln!(f, "{folder}")?;
        }

        write!(
            f,
            "{} migrated, {} skipped, {} failed",
            self.migrated(),
            self.skipped(),
            self.failed()
        )?;

        if self.dry_run {
            write!(f, " (dry run)")?;
        }

        if self.cancelled {
            write!(f, ", cancelled")?;
        }

        if let Some(err) = &self.abort {
            write!(f, ", aborted: {err}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FolderReport, FolderState, MigrationReport};

    fn completed(failed: usize) -> FolderReport {
        FolderReport {
            state: FolderState::Completed,
            migrated: 2,
            failed,
            ..FolderReport::new("INBOX", "Migrated/INBOX")
        }
    }

    #[test]
    fn exit_codes() {
        let report = MigrationReport {
            folders: vec![completed(0)],
            ..Default::default()
        };
        assert_eq!(report.exit_code(), 0);

        let report = MigrationReport {
            folders: vec![completed(0), completed(1)],
            ..Default::default()
        };
        assert_eq!(report.exit_code(), 1);
        assert_eq!(report.migrated(), 4);
        assert_eq!(report.failed(), 1);

        let report = MigrationReport {
            folders: vec![completed(0)],
            cancelled: true,
            ..Default::default()
        };
        assert_eq!(report.exit_code(), 130);

        let report = MigrationReport::default();
        assert_eq!(report.exit_code(), 0);
    }
}

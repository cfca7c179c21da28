//! # Migration record
//!
//! Module dedicated to the persisted state of one message.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::fingerprint::Fingerprint;

use super::Error;

/// The migration status of a message.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum MigrationStatus {
    /// The message has been observed but not sent yet.
    #[default]
    Pending,
    /// The message is being sent. A record left in this state means
    /// the previous run was interrupted during the transfer.
    InProgress,
    /// The message reached the destination. Terminal state.
    Done,
    /// The last transfer attempt failed.
    Failed,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for MigrationStatus {
    type Err = Error;

    fn from_str(status: &str) -> Result<Self, Self::Err> {
        match status {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            status => Err(Error::ParseStatusError(status.to_owned())),
        }
    }
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The persisted migration state of one message, identified by its
/// source folder and its fingerprint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MigrationRecord {
    pub source_folder: String,
    pub fingerprint: Fingerprint,
    pub dest_folder: String,
    pub message_id: Option<String>,
    pub status: MigrationStatus,
    pub attempts: u32,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl MigrationRecord {
    pub fn is_done(&self) -> bool {
        self.status == MigrationStatus::Done
    }
}

/// Number of records per status, for one source folder.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.done + self.failed
    }

    pub(crate) fn add(&mut self, status: MigrationStatus, count: usize) {
        match status {
            MigrationStatus::Pending => self.pending += count,
            MigrationStatus::InProgress => self.in_progress += count,
            MigrationStatus::Done => self.done += count,
            MigrationStatus::Failed => self.failed += count,
        }
    }
}

//! # Migration event
//!
//! Module dedicated to the events emitted during a migration, so
//! that callers can display progress.

use std::{fmt, future::Future, pin::Pin, sync::Arc};

use tracing::{debug, trace};

use crate::{connection::Side, fingerprint::Fingerprint, folder::FolderMapping, Result};

use super::report::FolderReport;

/// The migration async event handler.
pub type MigrationEventHandler =
    dyn Fn(MigrationEvent) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync;

/// The migration event.
///
/// Represents all the events that can be triggered during a
/// migration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MigrationEvent {
    ListedFolders(usize),
    ResolvedFolders(Vec<FolderMapping>),
    StartedFolder(FolderMapping),
    ListedEnvelopes(String, usize),
    MigratedMessage(String, Fingerprint),
    SkippedMessage(String, Fingerprint),
    FailedMessage(String, Fingerprint, String),
    CompletedFolder(FolderReport),
    Reconnecting(Side, u32),
    Cancelled,
}

impl MigrationEvent {
    pub async fn emit(&self, handler: &Option<Arc<MigrationEventHandler>>) {
        if let Some(handler) = handler.as_ref() {
            if let Err(err) = handler(self.clone()).await {
                debug!("error while emitting migration event: {err}");
                trace!("{err:?}");
            } else {
                trace!("emitted migration event {self:?}");
            }
        }
    }
}

impl fmt::Display for MigrationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ListedFolders(n) => {
                write!(f, "Listed {n} source folders")
            }
            Self::ResolvedFolders(mappings) => {
                write!(f, "Resolved {} folders to migrate", mappings.len())
            }
            Self::StartedFolder(mapping) => {
                write!(f, "Migrating folder {mapping}")
            }
            Self::ListedEnvelopes(folder, n) => {
                write!(f, "Listed {n} messages from {folder}")
            }
            Self::MigratedMessage(folder, fingerprint) => {
                write!(f, "Migrated message {fingerprint} from {folder}")
            }
            Self::SkippedMessage(folder, fingerprint) => {
                write!(f, "Skipped already migrated message {fingerprint} from {folder}")
            }
            Self::FailedMessage(folder, fingerprint, err) => {
                write!(f, "Failed to migrate message {fingerprint} from {folder}: {err}")
            }
            Self::CompletedFolder(report) => {
                write!(f, "{report}")
            }
            Self::Reconnecting(side, attempt) => {
                write!(f, "Reconnecting to {side} server (attempt {attempt})")
            }
            Self::Cancelled => {
                write!(f, "Migration cancelled")
            }
        }
    }
}

//! # Migration config
//!
//! Module dedicated to the migration options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{folder::config::DEFAULT_ROOT, imap::DEFAULT_BATCH_SIZE};

/// What to do with source messages once migrated.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum SourceAction {
    /// Leave source messages untouched.
    #[default]
    Keep,

    /// Flag source messages as deleted then expunge them.
    Delete,

    /// Move source messages into `<archive root>/<folder>`, on the
    /// source server.
    Move(String),
}

/// The source action kind, as written in the configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceActionKind {
    #[default]
    Keep,
    Delete,
    Move,
}

/// The migration options.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MigrationOptions {
    /// Amount of messages fetched per IMAP command.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between two batches, in milliseconds.
    #[serde(default)]
    pub throttle: u64,

    #[serde(default)]
    pub source_action: SourceActionKind,

    /// Source folder receiving migrated messages when the source
    /// action is `move`.
    #[serde(default = "default_archive_root")]
    pub archive_root: String,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            throttle: 0,
            source_action: Default::default(),
            archive_root: default_archive_root(),
        }
    }
}

impl MigrationOptions {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle)
    }

    pub fn source_action(&self) -> SourceAction {
        match self.source_action {
            SourceActionKind::Keep => SourceAction::Keep,
            SourceActionKind::Delete => SourceAction::Delete,
            SourceActionKind::Move => SourceAction::Move(self.archive_root.clone()),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_archive_root() -> String {
    DEFAULT_ROOT.to_owned()
}

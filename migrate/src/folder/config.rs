//! # Folder config

use std::{
    collections::{BTreeMap, BTreeSet},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

/// The default folder receiving migrated folders.
pub const DEFAULT_ROOT: &str = "Migrated";

/// The default hierarchy delimiter.
pub const DEFAULT_DELIMITER: &str = "/";

/// The folder configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FolderConfig {
    /// The destination folder under which source folders are
    /// relocated.
    #[serde(default = "default_root")]
    pub root: String,

    /// The hierarchy delimiter used to build destination folder
    /// names.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// Source folders that are never migrated.
    #[serde(default)]
    pub exclude: BTreeSet<String>,

    /// File containing additional folders to exclude, one per line.
    #[serde(default)]
    pub exclude_file: Option<PathBuf>,

    /// Explicit destination names, by source folder.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,

    /// TOML or JSON file containing additional rename rules.
    #[serde(default)]
    pub rename_file: Option<PathBuf>,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            delimiter: default_delimiter(),
            exclude: Default::default(),
            exclude_file: None,
            rename: Default::default(),
            rename_file: None,
        }
    }
}

fn default_root() -> String {
    DEFAULT_ROOT.to_owned()
}

fn default_delimiter() -> String {
    DEFAULT_DELIMITER.to_owned()
}

//! # Config
//!
//! Module dedicated to the migration configuration, usually read
//! from a TOML file.

use std::{
    fs, io,
    path::{Path, PathBuf},
    result,
};

use serde::{Deserialize, Serialize};
use shellexpand_utils::shellexpand_path;
use thiserror::Error;
use tracing::debug;

use crate::{
    folder::config::FolderConfig, imap::config::ImapConfig, migration::MigrationOptions,
    retry::RetryConfig,
};

/// The default progress store file name.
pub const DEFAULT_STORE_FILE: &str = "imap-migrate.sqlite";

/// Errors related to the configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read config file at {1}")]
    ReadConfigFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse config file at {1}")]
    ParseConfigFileError(#[source] toml::de::Error, PathBuf),
}

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The progress store configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreConfig {
    /// The path to the SQLite database.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_FILE)
}

/// The migration configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MigrationConfig {
    /// The IMAP server messages are migrated from.
    pub source: ImapConfig,

    /// The IMAP server messages are migrated to.
    pub destination: ImapConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub folders: FolderConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub migration: MigrationOptions,
}

impl MigrationConfig {
    /// Read and parse the TOML configuration at the given path, then
    /// expand the paths it contains.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("reading config file at {path:?}");

        let content =
            fs::read_to_string(path).map_err(|err| Error::ReadConfigFileError(err, path.into()))?;

        Self::from_toml(&content)
            .map_err(|err| Error::ParseConfigFileError(err, path.into()))
    }

    /// Parse the given TOML configuration, then expand the paths it
    /// contains.
    pub fn from_toml(content: &str) -> result::Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(content)?;
        config.expand_paths();
        Ok(config)
    }

    fn expand_paths(&mut self) {
        self.store.path = shellexpand_path(&self.store.path);

        if let Some(path) = self.folders.exclude_file.as_mut() {
            *path = shellexpand_path(&*path);
        }

        if let Some(path) = self.folders.rename_file.as_mut() {
            *path = shellexpand_path(&*path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        imap::config::ImapEncryptionKind,
        migration::SourceAction,
        retry::RetryPolicy,
    };

    use super::MigrationConfig;

    #[test]
    fn parse_full_config() {
        let config = MigrationConfig::from_toml(
            r#"
            [source]
            host = "imap.old.localhost"
            port = 993
            login = "alice"
            password.raw = "secret"
            encryption = "tls"

            [destination]
            host = "imap.new.localhost"
            port = 143
            login = "alice@new.localhost"
            passwd.raw = "secret"
            encryption = "start-tls"
            timeout = 10

            [folders]
            exclude = ["Spam", "Trash"]
            rename = { "INBOX" = "Migrated/Inbox" }

            [retry]
            max-attempts = 3
            initial-delay = 1

            [migration]
            batch-size = 20
            source-action = "delete"
            "#,
        )
        .unwrap();

        assert_eq!(config.source.encryption, Some(ImapEncryptionKind::Tls));
        assert_eq!(
            config.destination.encryption,
            Some(ImapEncryptionKind::StartTls)
        );
        assert_eq!(config.destination.timeout(), Duration::from_secs(10));

        assert_eq!(config.folders.root, "Migrated");
        assert!(config.folders.exclude.contains("Spam"));
        assert_eq!(
            config.folders.rename.get("INBOX").map(String::as_str),
            Some("Migrated/Inbox")
        );

        let policy = RetryPolicy::from(&config.retry);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));

        assert_eq!(config.migration.batch_size, 20);
        assert_eq!(config.migration.source_action(), SourceAction::Delete);
        assert!(config.store.path.ends_with("imap-migrate.sqlite"));
    }

    #[test]
    fn missing_destination() {
        let config = MigrationConfig::from_toml(
            r#"
            [source]
            host = "localhost"
            port = 993
            login = "alice"
            password.raw = "secret"
            "#,
        );

        assert!(config.is_err());
    }
}

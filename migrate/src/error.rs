use std::result;

use thiserror::Error;

use crate::{config, connection, folder, imap, store};

/// The global `Result` alias of the library.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the library.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ConfigError(#[from] config::Error),
    #[error(transparent)]
    ConnectionError(#[from] connection::Error),
    #[error(transparent)]
    FolderError(#[from] folder::Error),
    #[error(transparent)]
    ImapError(#[from] imap::Error),
    #[error(transparent)]
    StoreError(#[from] store::Error),
}

/// The failure class of an error.
///
/// The class decides how far a failure propagates: a message, a
/// folder or the whole run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Credentials rejected by the server. Never retried.
    Auth,
    /// Network, DNS, TLS or timeout failure. Retried.
    Connect,
    /// The server refused the command (missing folder, quota…).
    Protocol,
    /// The progress store cannot be read or written.
    Store,
    /// Invalid configuration or input file.
    Config,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigError(_) | Self::FolderError(_) => ErrorKind::Config,
            Self::ConnectionError(err) => err.kind(),
            Self::ImapError(err) => err.kind(),
            Self::StoreError(_) => ErrorKind::Store,
        }
    }

    /// Return `true` if the error must abort the whole run.
    ///
    /// Connect errors only reach the engine once the retry policy is
    /// exhausted: they fail the current folder, the next folder
    /// starts over with a fresh session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Auth | ErrorKind::Store | ErrorKind::Config
        )
    }
}

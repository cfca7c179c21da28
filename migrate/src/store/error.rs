use std::{io, path::PathBuf, result};

use advisory_lock::FileLockError;
use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open progress store lock file at {1}")]
    OpenLockFileError(#[source] io::Error, PathBuf),
    #[error("cannot lock progress store at {1}: is another migration running?")]
    LockStoreError(#[source] FileLockError, PathBuf),
    #[error("cannot unlock progress store at {1}")]
    UnlockStoreError(#[source] FileLockError, PathBuf),
    #[error("cannot create progress store directory at {1}")]
    CreateStoreDirError(#[source] io::Error, PathBuf),

    #[error("cannot open progress store at {1}")]
    OpenStoreError(#[source] rusqlite::Error, PathBuf),
    #[error("cannot configure progress store at {1}")]
    ConfigureStoreError(#[source] rusqlite::Error, PathBuf),
    #[error("cannot create progress store table {1}")]
    CreateTableError(#[source] rusqlite::Error, String),
    #[error("cannot close progress store")]
    CloseStoreError(#[source] rusqlite::Error),

    #[error("cannot record message {2} of folder {1}")]
    RecordSeenError(#[source] rusqlite::Error, String, String),
    #[error("cannot get record of message {2} from folder {1}")]
    GetRecordError(#[source] rusqlite::Error, String, String),
    #[error("cannot mark message {2} of folder {1} as {3}")]
    MarkRecordError(#[source] rusqlite::Error, String, String, String),
    #[error("cannot mark message {1} of folder {0} as {2}: record not found")]
    RecordNotFoundError(String, String, String),
    #[error("cannot mark message {1} of folder {0} as {2}: message already migrated")]
    RecordAlreadyDoneError(String, String, String),
    #[error("cannot count records of folder {1}")]
    CountRecordsError(#[source] rusqlite::Error, String),
    #[error("cannot list failed records of folder {1}")]
    ListFailedRecordsError(#[source] rusqlite::Error, String),

    #[error("cannot parse migration status {0}")]
    ParseStatusError(String),
    #[error("cannot parse record timestamp {1}")]
    ParseTimestampError(#[source] chrono::ParseError, String),
}

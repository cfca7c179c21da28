use std::{io, path::PathBuf, result};

use thiserror::Error;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read folder exclusion file at {1}")]
    ReadExclusionFileError(#[source] io::Error, PathBuf),
    #[error("cannot read folder rename file at {1}")]
    ReadRenameFileError(#[source] io::Error, PathBuf),
    #[error("cannot read folder rename file at {0}: expected a .toml or .json file")]
    UnsupportedRenameFileError(PathBuf),
    #[error("cannot parse TOML folder rename file at {1}")]
    ParseTomlRenameFileError(#[source] toml::de::Error, PathBuf),
    #[error("cannot parse JSON folder rename file at {1}")]
    ParseJsonRenameFileError(#[source] serde_json::Error, PathBuf),
    #[error("cannot rename folder {0}: destination name is empty")]
    EmptyRenameError(String),
}

//! # Migrate
//!
//! Rust library to move emails from one IMAP server to another,
//! folder by folder, in a way that survives network failures and
//! process crashes.
//!
//! The entry point is the [`Migrator`] builder. It takes two
//! [`ImapSessionBuilder`]s (the source and the destination) and a
//! [`ProgressStore`], which persists the state of every message so
//! that an interrupted run can be restarted without sending the same
//! message twice.
//!
//! ```rust,no_run
//! use migrate::{
//!     imap::{config::ImapConfig, ImapClientBuilder},
//!     store::ProgressStore,
//!     Migrator,
//! };
//!
//! # async fn run(src: ImapConfig, dst: ImapConfig) -> migrate::Result<()> {
//! let store = ProgressStore::open("./progress.sqlite")?;
//! let report = Migrator::new(ImapClientBuilder::new(src), ImapClientBuilder::new(dst), store)
//!     .with_dry_run(false)
//!     .run()
//!     .await;
//! std::process::exit(report.exit_code());
//! # }
//! ```

pub mod config;
pub mod connection;
mod error;
pub mod fingerprint;
pub mod folder;
pub mod imap;
pub mod migration;
pub mod retry;
pub mod store;

#[doc(inline)]
pub use self::{
    error::{Error, ErrorKind, Result},
    fingerprint::Fingerprint,
    imap::{ImapSession, ImapSessionBuilder},
    migration::{report::MigrationReport, Migrator},
    store::ProgressStore,
};

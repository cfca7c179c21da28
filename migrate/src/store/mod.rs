//! # Progress store
//!
//! Module dedicated to the durable migration state. The main
//! structure of this module is [`ProgressStore`]: a SQLite database
//! mapping every `(source folder, fingerprint)` pair to a
//! [`MigrationStatus`].
//!
//! Every write is a single autocommit statement, so the database is
//! always consistent, even after an abrupt termination. The store
//! also holds an exclusive advisory lock next to the database file,
//! which prevents two migrations from running against the same
//! store.

mod error;
pub mod record;

use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use advisory_lock::{AdvisoryFileLock, FileLockMode};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, trace, warn};

use crate::fingerprint::Fingerprint;

#[doc(inline)]
pub use self::{
    error::{Error, Result},
    record::{MigrationRecord, MigrationStatus, StatusCounts},
};

const TABLE: &str = "migrations";

const SELECT_RECORD: &str = "SELECT source_folder, fingerprint, dest_folder, message_id, status, attempts, updated_at, error FROM migrations";

/// Record row as read from the database, before parsing.
type RawRecord = (
    String,
    String,
    String,
    Option<String>,
    String,
    u32,
    String,
    Option<String>,
);

/// The progress store.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    conn: Connection,
    lock: StoreLock,
}

impl ProgressStore {
    /// Open the progress store at the given path, creating it if
    /// needed.
    ///
    /// Fails with [`Error::LockStoreError`] if another process (or
    /// another store in the same process) already owns it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        debug!("opening progress store at {path:?}");

        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|err| Error::CreateStoreDirError(err, dir.to_owned()))?;
        }

        let lock = StoreLock::acquire(lock_path(&path))?;

        let conn = Connection::open(&path).map_err(|err| Error::OpenStoreError(err, path.clone()))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|err| Error::ConfigureStoreError(err, path.clone()))?;
        trace!("progress store journal mode: {journal_mode}");

        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|err| Error::ConfigureStoreError(err, path.clone()))?;

        let query = format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                source_folder TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                dest_folder TEXT NOT NULL,
                message_id TEXT,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                error TEXT,
                PRIMARY KEY (source_folder, fingerprint)
            )"
        );
        trace!("create table query: {query:#?}");

        conn.execute(&query, [])
            .map_err(|err| Error::CreateTableError(err, TABLE.to_owned()))?;

        Ok(Self { path, conn, lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a pending record for the given message if none exists
    /// yet, then return the stored record.
    ///
    /// Calling this function several times with the same key is
    /// harmless: an existing record is returned unchanged.
    pub fn record_seen(
        &self,
        source: &str,
        dest: &str,
        fingerprint: &Fingerprint,
        message_id: Option<&str>,
    ) -> Result<MigrationRecord> {
        debug!("recording message {fingerprint} of folder {source}");

        let query = format!(
            "INSERT OR IGNORE INTO {TABLE}
                (source_folder, fingerprint, dest_folder, message_id, status, attempts, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)"
        );
        trace!("insert query: {query:#?}");

        let inserted = self
            .conn
            .execute(
                &query,
                params![
                    source,
                    fingerprint.as_ref(),
                    dest,
                    message_id,
                    MigrationStatus::Pending.as_str(),
                    now(),
                ],
            )
            .map_err(|err| Error::RecordSeenError(err, source.to_owned(), fingerprint.to_string()))?;

        if inserted == 0 {
            trace!("message {fingerprint} of folder {source} already recorded");
        }

        self.get(source, fingerprint)?.ok_or_else(|| {
            Error::RecordNotFoundError(
                source.to_owned(),
                fingerprint.to_string(),
                MigrationStatus::Pending.to_string(),
            )
        })
    }

    pub fn get(&self, source: &str, fingerprint: &Fingerprint) -> Result<Option<MigrationRecord>> {
        let query = format!("{SELECT_RECORD} WHERE source_folder = ?1 AND fingerprint = ?2");
        trace!("select query: {query:#?}");

        let map_err =
            |err| Error::GetRecordError(err, source.to_owned(), fingerprint.to_string());

        let raw = self
            .conn
            .query_row(&query, params![source, fingerprint.as_ref()], read_raw_record)
            .optional()
            .map_err(map_err)?;

        raw.map(parse_record).transpose()
    }

    pub fn is_done(&self, source: &str, fingerprint: &Fingerprint) -> Result<bool> {
        let record = self.get(source, fingerprint)?;
        Ok(record.map(|r| r.is_done()).unwrap_or_default())
    }

    /// Mark the given message as being transferred, incrementing its
    /// attempt counter.
    pub fn mark_in_progress(&self, source: &str, fingerprint: &Fingerprint) -> Result<()> {
        self.mark(source, fingerprint, MigrationStatus::InProgress, None)
    }

    /// Mark the given message as migrated. Marking an already
    /// migrated message again is a no-op.
    pub fn mark_done(&self, source: &str, fingerprint: &Fingerprint) -> Result<()> {
        self.mark(source, fingerprint, MigrationStatus::Done, None)
    }

    pub fn mark_failed(
        &self,
        source: &str,
        fingerprint: &Fingerprint,
        detail: impl AsRef<str>,
    ) -> Result<()> {
        let detail = detail.as_ref();
        self.mark(source, fingerprint, MigrationStatus::Failed, Some(detail))
    }

    fn mark(
        &self,
        source: &str,
        fingerprint: &Fingerprint,
        status: MigrationStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        debug!("marking message {fingerprint} of folder {source} as {status}");

        let increment = u32::from(status == MigrationStatus::InProgress);

        let query = format!(
            "UPDATE {TABLE}
             SET status = ?3, updated_at = ?4, error = ?5, attempts = attempts + ?6
             WHERE source_folder = ?1 AND fingerprint = ?2 AND status != ?7"
        );
        trace!("update query: {query:#?}");

        let updated = self
            .conn
            .execute(
                &query,
                params![
                    source,
                    fingerprint.as_ref(),
                    status.as_str(),
                    now(),
                    detail,
                    increment,
                    MigrationStatus::Done.as_str(),
                ],
            )
            .map_err(|err| {
                Error::MarkRecordError(
                    err,
                    source.to_owned(),
                    fingerprint.to_string(),
                    status.to_string(),
                )
            })?;

        if updated > 0 {
            return Ok(());
        }

        match self.get(source, fingerprint)? {
            None => Err(Error::RecordNotFoundError(
                source.to_owned(),
                fingerprint.to_string(),
                status.to_string(),
            )),
            Some(_) if status == MigrationStatus::Done => Ok(()),
            Some(_) => Err(Error::RecordAlreadyDoneError(
                source.to_owned(),
                fingerprint.to_string(),
                status.to_string(),
            )),
        }
    }

    pub fn count_by_status(&self, source: &str) -> Result<StatusCounts> {
        let query = format!(
            "SELECT status, COUNT(*) FROM {TABLE} WHERE source_folder = ?1 GROUP BY status"
        );
        trace!("count query: {query:#?}");

        let map_err = |err| Error::CountRecordsError(err, source.to_owned());

        let mut stmt = self.conn.prepare(&query).map_err(map_err)?;
        let rows: Vec<(String, i64)> = stmt
            .query_map([source], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(map_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(map_err)?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            counts.add(status.parse()?, count as usize);
        }

        Ok(counts)
    }

    /// List the failed records of the given folder.
    pub fn failed(&self, source: &str) -> Result<Vec<MigrationRecord>> {
        let query = format!(
            "{SELECT_RECORD} WHERE source_folder = ?1 AND status = ?2 ORDER BY updated_at"
        );
        trace!("select query: {query:#?}");

        let map_err = |err| Error::ListFailedRecordsError(err, source.to_owned());

        let mut stmt = self.conn.prepare(&query).map_err(map_err)?;
        let records: Vec<RawRecord> = stmt
            .query_map(
                params![source, MigrationStatus::Failed.as_str()],
                read_raw_record,
            )
            .map_err(map_err)?
            .collect::<rusqlite::Result<_>>()
            .map_err(map_err)?;

        records.into_iter().map(parse_record).collect()
    }

    /// Close the database then release the lock.
    pub fn close(self) -> Result<()> {
        debug!("closing progress store at {:?}", self.path);

        let Self { conn, lock, .. } = self;
        conn.close().map_err(|(_, err)| Error::CloseStoreError(err))?;
        lock.release()
    }
}

/// Exclusive advisory lock held for the whole life of a store.
#[derive(Debug)]
struct StoreLock {
    path: PathBuf,
    file: File,
    released: bool,
}

impl StoreLock {
    fn acquire(path: PathBuf) -> Result<Self> {
        debug!("locking progress store file {path:?}");

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|err| Error::OpenLockFileError(err, path.clone()))?;
        AdvisoryFileLock::try_lock(&file, FileLockMode::Exclusive)
            .map_err(|err| Error::LockStoreError(err, path.clone()))?;

        Ok(Self {
            path,
            file,
            released: false,
        })
    }

    fn release(mut self) -> Result<()> {
        debug!("unlocking progress store file {:?}", self.path);
        self.released = true;
        AdvisoryFileLock::unlock(&self.file)
            .map_err(|err| Error::UnlockStoreError(err, self.path.clone()))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        if let Err(err) = AdvisoryFileLock::unlock(&self.file) {
            warn!("cannot unlock progress store file {:?}: {err}", self.path);
        }
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn read_raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn parse_record(raw: RawRecord) -> Result<MigrationRecord> {
    let (source_folder, fingerprint, dest_folder, message_id, status, attempts, updated_at, error) =
        raw;

    let updated_at = DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|err| Error::ParseTimestampError(err, updated_at.clone()))?
        .with_timezone(&Utc);

    Ok(MigrationRecord {
        source_folder,
        fingerprint: fingerprint.into(),
        dest_folder,
        message_id,
        status: status.parse()?,
        attempts,
        updated_at,
        error,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::fingerprint::Fingerprint;

    use super::{Error, MigrationStatus, ProgressStore};

    #[test_log::test]
    fn record_seen_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path().join("progress.sqlite")).unwrap();
        let fp = Fingerprint::from_message_id("a@localhost");

        let first = store
            .record_seen("INBOX", "Migrated/INBOX", &fp, Some("a@localhost"))
            .unwrap();
        assert_eq!(first.status, MigrationStatus::Pending);
        assert_eq!(first.attempts, 0);

        store.mark_in_progress("INBOX", &fp).unwrap();

        let second = store
            .record_seen("INBOX", "Migrated/Other", &fp, None)
            .unwrap();
        assert_eq!(second.status, MigrationStatus::InProgress);
        assert_eq!(second.dest_folder, "Migrated/INBOX");
        assert_eq!(second.message_id.as_deref(), Some("a@localhost"));
        assert_eq!(second.attempts, 1);

        assert_eq!(store.count_by_status("INBOX").unwrap().total(), 1);
    }

    #[test_log::test]
    fn lifecycle() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::open(dir.path().join("progress.sqlite")).unwrap();
        let fp = Fingerprint::from_message_id("b@localhost");

        assert!(!store.is_done("INBOX", &fp).unwrap());
        assert!(store.get("INBOX", &fp).unwrap().is_none());

        store.record_seen("INBOX", "Migrated/INBOX", &fp, None).unwrap();
        store.mark_in_progress("INBOX", &fp).unwrap();
        store.mark_failed("INBOX", &fp, "quota exceeded").unwrap();

        let record = store.get("INBOX", &fp).unwrap().unwrap();
        assert_eq!(record.status, MigrationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("quota exceeded"));

        let failed = store.failed("INBOX").unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].fingerprint, fp);

        store.mark_in_progress("INBOX", &fp).unwrap();
        store.mark_done("INBOX", &fp).unwrap();

        let record = store.get("INBOX", &fp).unwrap().unwrap();
        assert_eq!(record.status, MigrationStatus::Done);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.error, None);
        assert!(store.is_done("INBOX", &fp).unwrap());

        // done is terminal
        store.mark_done("INBOX", &fp).unwrap();
        match store.mark_failed("INBOX", &fp, "late failure").unwrap_err() {
            Error::RecordAlreadyDoneError(folder, _, _) => assert_eq!(folder, "INBOX"),
            err => panic!("unexpected error: {err:?}"),
        }

        // records are scoped by source folder
        assert!(!store.is_done("Archive", &fp).unwrap());
        match store.mark_done("Archive", &fp).unwrap_err() {
            Error::RecordNotFoundError(folder, _, _) => assert_eq!(folder, "Archive"),
            err => panic!("unexpected error: {err:?}"),
        }
    }

    #[test_log::test]
    fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.sqlite");
        let fp = Fingerprint::from_message_id("c@localhost");

        let store = ProgressStore::open(&path).unwrap();
        store.record_seen("INBOX", "Migrated/INBOX", &fp, None).unwrap();
        store.mark_in_progress("INBOX", &fp).unwrap();
        store.mark_done("INBOX", &fp).unwrap();
        drop(store);

        let store = ProgressStore::open(&path).unwrap();
        assert!(store.is_done("INBOX", &fp).unwrap());
        store.close().unwrap();
    }

    #[test_log::test]
    fn exclusive_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("progress.sqlite");

        let store = ProgressStore::open(&path).unwrap();

        match ProgressStore::open(&path).unwrap_err() {
            Error::LockStoreError(_, lock_path) => {
                assert_eq!(lock_path, dir.path().join("progress.sqlite.lock"))
            }
            err => panic!("unexpected error: {err:?}"),
        }

        store.close().unwrap();
        ProgressStore::open(&path).unwrap();
    }
}

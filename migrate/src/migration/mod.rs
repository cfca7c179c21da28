//! # Migration
//!
//! Module dedicated to the migration engine. The main structure of
//! this module is [`Migrator`], a builder that moves every resolved
//! source folder to the destination, message by message, recording
//! the progress of each message in the [`ProgressStore`].
//!
//! A message goes `pending → in-progress → done`, or `failed` when
//! the destination rejects it. A failed message never stops its
//! folder, and source messages are only deleted or moved once their
//! record is done.

pub mod config;
pub mod event;
pub mod report;

use std::{
    error::Error as StdError,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::{
    connection::{Connection, Side},
    fingerprint::{Fingerprint, FingerprintScope},
    folder::{FolderMapping, FolderResolver},
    imap::{Envelope, ImapSessionBuilder, DEFAULT_BATCH_SIZE},
    retry::RetryPolicy,
    store::{MigrationStatus, ProgressStore},
    Error, ErrorKind, Result,
};

#[doc(inline)]
pub use self::{
    config::{MigrationOptions, SourceAction},
    event::{MigrationEvent, MigrationEventHandler},
    report::{FolderReport, FolderState, MigrationReport},
};

/// Shared cancellation flag.
///
/// The flag is checked before the fetch of every message: a
/// cancelled migration stops between two messages, never in the
/// middle of a transfer.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The outcome of one message migration.
#[derive(Clone, Debug, Eq, PartialEq)]
enum MessageOutcome {
    Migrated,
    Skipped,
    Failed(String),
}

/// The migration builder.
pub struct Migrator<S: ImapSessionBuilder, D: ImapSessionBuilder> {
    source_builder: S,
    dest_builder: D,
    store: ProgressStore,
    resolver: Option<FolderResolver>,
    retry_policy: Option<RetryPolicy>,
    source_action: Option<SourceAction>,
    dry_run: Option<bool>,
    batch_size: Option<usize>,
    throttle: Option<Duration>,
    handler: Option<Arc<MigrationEventHandler>>,
    cancel: CancelHandle,
}

impl<S: ImapSessionBuilder, D: ImapSessionBuilder> Migrator<S, D> {
    pub fn new(source_builder: S, dest_builder: D, store: ProgressStore) -> Self {
        Self {
            source_builder,
            dest_builder,
            store,
            resolver: None,
            retry_policy: None,
            source_action: None,
            dry_run: None,
            batch_size: None,
            throttle: None,
            handler: None,
            cancel: CancelHandle::new(),
        }
    }

    pub fn set_some_resolver(&mut self, resolver: Option<FolderResolver>) {
        self.resolver = resolver;
    }

    pub fn with_resolver(mut self, resolver: FolderResolver) -> Self {
        self.set_some_resolver(Some(resolver));
        self
    }

    pub fn get_resolver(&self) -> FolderResolver {
        self.resolver.clone().unwrap_or_default()
    }

    pub fn set_some_retry_policy(&mut self, policy: Option<RetryPolicy>) {
        self.retry_policy = policy;
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.set_some_retry_policy(Some(policy));
        self
    }

    pub fn get_retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone().unwrap_or_default()
    }

    pub fn set_some_source_action(&mut self, action: Option<SourceAction>) {
        self.source_action = action;
    }

    pub fn with_source_action(mut self, action: SourceAction) -> Self {
        self.set_some_source_action(Some(action));
        self
    }

    pub fn get_source_action(&self) -> SourceAction {
        self.source_action.clone().unwrap_or_default()
    }

    pub fn set_some_dry_run(&mut self, dry_run: Option<bool>) {
        self.dry_run = dry_run;
    }

    pub fn with_some_dry_run(mut self, dry_run: Option<bool>) -> Self {
        self.set_some_dry_run(dry_run);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.set_some_dry_run(Some(dry_run));
        self
    }

    pub fn get_dry_run(&self) -> bool {
        self.dry_run.unwrap_or_default()
    }

    pub fn set_some_batch_size(&mut self, batch_size: Option<usize>) {
        self.batch_size = batch_size;
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.set_some_batch_size(Some(batch_size));
        self
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }

    pub fn set_some_throttle(&mut self, throttle: Option<Duration>) {
        self.throttle = throttle;
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.set_some_throttle(Some(throttle));
        self
    }

    pub fn get_throttle(&self) -> Duration {
        self.throttle.unwrap_or_default()
    }

    /// Apply the given options on top of the current ones.
    pub fn with_options(mut self, opts: &MigrationOptions) -> Self {
        self.set_some_batch_size(Some(opts.batch_size));
        self.set_some_throttle(Some(opts.throttle()));
        self.set_some_source_action(Some(opts.source_action()));
        self
    }

    pub fn set_some_handler<F: Future<Output = Result<()>> + Send + 'static>(
        &mut self,
        handler: Option<impl Fn(MigrationEvent) -> F + Send + Sync + 'static>,
    ) {
        self.handler = match handler {
            Some(handler) => Some(Arc::new(move |evt| Box::pin(handler(evt)))),
            None => None,
        };
    }

    pub fn with_handler<F: Future<Output = Result<()>> + Send + 'static>(
        mut self,
        handler: impl Fn(MigrationEvent) -> F + Send + Sync + 'static,
    ) -> Self {
        self.set_some_handler(Some(handler));
        self
    }

    /// Share the given cancellation flag with the migration.
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run the migration.
    ///
    /// The run never fails as a whole: a fatal error stops the
    /// migration and ends up in [`MigrationReport::abort`], next to
    /// the progress made so far.
    pub async fn run(self) -> MigrationReport {
        let dry_run = self.get_dry_run();
        let policy = self.get_retry_policy();

        let source_action = self.get_source_action();
        let mut resolver = self.get_resolver();

        // archived messages must never come back as a source folder
        if let SourceAction::Move(root) = &source_action {
            resolver.add_protected_root(root);
        }

        let mut run = MigrationRun {
            resolver,
            source_action,
            batch_size: self.get_batch_size(),
            throttle: self.get_throttle(),
            dry_run,
            source: Connection::new(Side::Source, self.source_builder, policy.clone())
                .with_some_handler(self.handler.clone()),
            dest: Connection::new(Side::Destination, self.dest_builder, policy)
                .with_some_handler(self.handler.clone()),
            store: self.store,
            handler: self.handler,
            cancel: self.cancel,
        };

        let mut report = MigrationReport {
            dry_run,
            ..Default::default()
        };

        if dry_run {
            info!("starting migration (dry run)");
        } else {
            info!("starting migration");
        }

        if let Err(err) = run.migrate(&mut report).await {
            warn!("migration aborted: {err}");
            debug!("{err:?}");
            report.abort = Some(err);
        }

        run.source.logout().await;
        run.dest.logout().await;

        if let Err(err) = run.store.close() {
            warn!("cannot close progress store: {err}");
            debug!("{err:?}");
            if report.abort.is_none() {
                report.abort = Some(err.into());
            }
        }

        info!(
            "migration ended: {} migrated, {} skipped, {} failed",
            report.migrated(),
            report.skipped(),
            report.failed()
        );

        report
    }
}

/// The state of a running migration.
struct MigrationRun<S: ImapSessionBuilder, D: ImapSessionBuilder> {
    resolver: FolderResolver,
    source_action: SourceAction,
    batch_size: usize,
    throttle: Duration,
    dry_run: bool,
    source: Connection<S>,
    dest: Connection<D>,
    store: ProgressStore,
    handler: Option<Arc<MigrationEventHandler>>,
    cancel: CancelHandle,
}

impl<S: ImapSessionBuilder, D: ImapSessionBuilder> MigrationRun<S, D> {
    async fn migrate(&mut self, report: &mut MigrationReport) -> Result<()> {
        let folders = self.source.list_folders().await?;
        MigrationEvent::ListedFolders(folders.len())
            .emit(&self.handler)
            .await;

        let mappings = self
            .resolver
            .resolve(folders.iter().map(|folder| folder.name.as_str()));
        info!("resolved {} folders to migrate", mappings.len());
        MigrationEvent::ResolvedFolders(mappings.clone())
            .emit(&self.handler)
            .await;

        let mut mappings = mappings.into_iter();

        while let Some(mapping) = mappings.next() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                report.folders.push(FolderReport::new(&mapping.source, &mapping.dest));
                break;
            }

            let mut folder_report = FolderReport::new(&mapping.source, &mapping.dest);
            let res = self.migrate_folder(&mapping, &mut folder_report).await;

            let abort = match res {
                Ok(()) => None,
                Err(err) if err.is_fatal() => {
                    folder_report.state = FolderState::Failed;
                    folder_report.error = Some(err.to_string());
                    Some(err)
                }
                Err(err) => {
                    warn!("cannot migrate folder {}: {err}", mapping.source);
                    debug!("{err:?}");
                    folder_report.state = FolderState::Failed;
                    folder_report.error = Some(err.to_string());
                    None
                }
            };

            info!("{folder_report}");
            MigrationEvent::CompletedFolder(folder_report.clone())
                .emit(&self.handler)
                .await;

            let cancelled = folder_report.state == FolderState::Cancelled;
            report.folders.push(folder_report);

            if let Some(err) = abort {
                self.skip_remaining(report, mappings);
                return Err(err);
            }

            if cancelled {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            info!("migration cancelled");
            MigrationEvent::Cancelled.emit(&self.handler).await;
            self.skip_remaining(report, mappings);
        }

        Ok(())
    }

    fn skip_remaining(
        &self,
        report: &mut MigrationReport,
        mappings: impl Iterator<Item = FolderMapping>,
    ) {
        for mapping in mappings {
            report
                .folders
                .push(FolderReport::new(mapping.source, mapping.dest));
        }
    }

    async fn migrate_folder(
        &mut self,
        mapping: &FolderMapping,
        report: &mut FolderReport,
    ) -> Result<()> {
        info!("migrating folder {mapping}");
        MigrationEvent::StartedFolder(mapping.clone())
            .emit(&self.handler)
            .await;

        report.state = FolderState::Scanning;

        if !self.dry_run {
            self.dest.ensure_folder(&mapping.dest).await?;
        }

        let envelopes = self
            .source
            .list_envelopes(&mapping.source, self.batch_size)
            .await?;
        debug!("found {} messages in folder {}", envelopes.len(), mapping.source);
        MigrationEvent::ListedEnvelopes(mapping.source.clone(), envelopes.len())
            .emit(&self.handler)
            .await;

        report.state = FolderState::Transferring;

        let mut scope = FingerprintScope::new();
        let mut done_uids = Vec::new();

        for (i, batch) in envelopes.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.throttle.is_zero() {
                trace!("throttling for {:?}", self.throttle);
                sleep(self.throttle).await;
            }

            for envelope in batch {
                if self.cancel.is_cancelled() {
                    debug!("cancellation requested, stopping folder {}", mapping.source);
                    report.state = FolderState::Cancelled;
                    return Ok(());
                }

                let fingerprint = scope.next(envelope.fingerprint.clone());
                let outcome = self.migrate_message(mapping, envelope, &fingerprint).await?;
                let folder = mapping.source.clone();

                match outcome {
                    MessageOutcome::Migrated => {
                        report.migrated += 1;
                        done_uids.push(envelope.uid);
                        MigrationEvent::MigratedMessage(folder, fingerprint)
                            .emit(&self.handler)
                            .await;
                    }
                    MessageOutcome::Skipped => {
                        report.skipped += 1;
                        done_uids.push(envelope.uid);
                        MigrationEvent::SkippedMessage(folder, fingerprint)
                            .emit(&self.handler)
                            .await;
                    }
                    MessageOutcome::Failed(err) => {
                        report.failed += 1;
                        MigrationEvent::FailedMessage(folder, fingerprint, err)
                            .emit(&self.handler)
                            .await;
                    }
                }
            }
        }

        if !self.dry_run {
            self.apply_source_action(mapping, &done_uids).await?;
        }

        report.state = FolderState::Completed;
        Ok(())
    }

    async fn migrate_message(
        &mut self,
        mapping: &FolderMapping,
        envelope: &Envelope,
        fingerprint: &Fingerprint,
    ) -> Result<MessageOutcome> {
        let source = mapping.source.as_str();

        if self.dry_run {
            return if self.store.is_done(source, fingerprint)? {
                Ok(MessageOutcome::Skipped)
            } else {
                Ok(MessageOutcome::Migrated)
            };
        }

        let record = self.store.record_seen(
            source,
            &mapping.dest,
            fingerprint,
            envelope.message_id.as_deref(),
        )?;

        if record.is_done() {
            trace!("message {fingerprint} of folder {source} already migrated");
            return Ok(MessageOutcome::Skipped);
        }

        // a record left in progress by an interrupted run may have
        // reached the destination already
        if record.status == MigrationStatus::InProgress {
            if let Some(id) = record.message_id.as_deref() {
                match self.dest.contains_message_id(&mapping.dest, id).await {
                    Ok(true) => {
                        info!("message {fingerprint} of folder {source} found on destination");
                        self.store.mark_done(source, fingerprint)?;
                        return Ok(MessageOutcome::Migrated);
                    }
                    Ok(false) => (),
                    Err(err) if err.kind() == ErrorKind::Protocol => {
                        return self.fail(source, fingerprint, &err)
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.store.mark_in_progress(source, fingerprint)?;

        // only refusals are message-level: any other error leaves the
        // record in progress and bubbles up to the folder
        match self.transfer(mapping, envelope).await {
            Ok(()) => {
                self.store.mark_done(source, fingerprint)?;
                debug!("migrated message {fingerprint} of folder {source}");
                Ok(MessageOutcome::Migrated)
            }
            Err(err) if err.kind() == ErrorKind::Protocol => self.fail(source, fingerprint, &err),
            Err(err) => Err(err),
        }
    }

    async fn transfer(&mut self, mapping: &FolderMapping, envelope: &Envelope) -> Result<()> {
        let msg = self
            .source
            .fetch_message(&mapping.source, envelope.uid)
            .await?;
        self.dest
            .append_message(&mapping.dest, msg, envelope.message_id.as_deref())
            .await
    }

    fn fail(&self, source: &str, fingerprint: &Fingerprint, err: &Error) -> Result<MessageOutcome> {
        let detail = format_error_chain(err);
        warn!("cannot migrate message {fingerprint} of folder {source}: {detail}");
        debug!("{err:?}");
        self.store.mark_failed(source, fingerprint, &detail)?;
        Ok(MessageOutcome::Failed(detail))
    }

    async fn apply_source_action(&mut self, mapping: &FolderMapping, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }

        match &self.source_action {
            SourceAction::Keep => Ok(()),
            SourceAction::Delete => {
                info!("deleting {} migrated messages from {}", uids.len(), mapping.source);
                self.source.delete_messages(&mapping.source, uids).await
            }
            SourceAction::Move(root) => {
                let archive = format!("{root}{}{}", self.resolver.delimiter(), mapping.source);
                info!("moving {} migrated messages to {archive}", uids.len());
                self.source.ensure_folder(&archive).await?;
                self.source
                    .move_messages(&mapping.source, uids, &archive)
                    .await
            }
        }
    }
}

/// Render the given error followed by its sources.
fn format_error_chain(err: &Error) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();

    while let Some(err) = source {
        detail.push_str(": ");
        detail.push_str(&err.to_string());
        source = err.source();
    }

    detail
}

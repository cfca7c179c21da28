//! # Connection
//!
//! Module dedicated to the connection management of one IMAP
//! endpoint. A [`Connection`] owns at most one session at a time,
//! builds it lazily, and rebuilds it after transient failures
//! following the [`RetryPolicy`].
//!
//! A reconnection invalidates the previous session: the operation
//! that failed is replayed from its beginning on the new session.

use std::{fmt, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    folder::Folder,
    imap::{self, Envelope, ImapSession, ImapSessionBuilder, RawMessage},
    migration::event::{MigrationEvent, MigrationEventHandler},
    retry::{RetryPolicy, RetryState},
    ErrorKind, Result,
};

/// Errors related to connection management.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot reach {0} imap server after {1} attempts")]
    RetryExhaustedError(Side, u32, #[source] imap::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RetryExhaustedError(..) => ErrorKind::Connect,
        }
    }
}

/// The side of the migration an endpoint stands for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    Source,
    Destination,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Destination => write!(f, "destination"),
        }
    }
}

/// The connection manager of one IMAP endpoint.
pub struct Connection<B: ImapSessionBuilder> {
    side: Side,
    builder: B,
    policy: RetryPolicy,
    handler: Option<Arc<MigrationEventHandler>>,
    session: Option<B::Session>,
}

impl<B: ImapSessionBuilder> Connection<B> {
    pub fn new(side: Side, builder: B, policy: RetryPolicy) -> Self {
        Self {
            side,
            builder,
            policy,
            handler: None,
            session: None,
        }
    }

    pub fn with_some_handler(mut self, handler: Option<Arc<MigrationEventHandler>>) -> Self {
        self.handler = handler;
        self
    }

    /// Build a session if none is alive.
    pub async fn connect(&mut self) -> imap::Result<()> {
        if self.session.is_none() {
            debug!("connecting to {} imap server", self.side);
            self.session = Some(self.builder.build().await?);
        }

        Ok(())
    }

    /// Execute the given action on the session, reconnecting and
    /// replaying the action on transient failures.
    ///
    /// Authentication and protocol errors are returned immediately.
    /// Transient errors are retried until the policy is exhausted.
    pub async fn exec<T, F>(&mut self, mut action: F) -> Result<T>
    where
        T: Send,
        F: for<'a> FnMut(&'a mut B::Session) -> BoxFuture<'a, imap::Result<T>> + Send,
    {
        let policy = self.policy.clone();
        let mut retry = policy.start();

        loop {
            let err = match self.try_exec(&mut action).await {
                Ok(output) => return Ok(output),
                Err(err) if err.is_transient() => err,
                Err(err) => return Err(err.into()),
            };

            self.session = None;

            match retry.next() {
                RetryState::Retry(delay) => {
                    warn!(
                        "{} imap server failure (attempt {}/{}), reconnecting in {delay:?}: {err}",
                        self.side, retry.attempts, policy.max_attempts
                    );
                    debug!("{err:?}");

                    MigrationEvent::Reconnecting(self.side, retry.attempts)
                        .emit(&self.handler)
                        .await;

                    sleep(delay).await;
                }
                RetryState::Exhausted => {
                    let err = Error::RetryExhaustedError(self.side, retry.attempts, err);
                    return Err(err.into());
                }
            }
        }
    }

    async fn try_exec<T, F>(&mut self, action: &mut F) -> imap::Result<T>
    where
        F: for<'a> FnMut(&'a mut B::Session) -> BoxFuture<'a, imap::Result<T>>,
    {
        self.connect().await?;

        match self.session.as_mut() {
            Some(session) => action(session).await,
            None => Err(imap::Error::SessionClosedError),
        }
    }

    pub async fn list_folders(&mut self) -> Result<Vec<Folder>> {
        self.exec(|session| session.list_folders()).await
    }

    /// Create the given folder unless it already exists. Return
    /// `true` if the folder has been created.
    pub async fn ensure_folder(&mut self, folder: &str) -> Result<bool> {
        if contains_folder(&self.list_folders().await?, folder) {
            debug!("{} folder {folder} already exists", self.side);
            return Ok(false);
        }

        let name = folder.to_owned();
        let res = self
            .exec(move |session| {
                let name = name.clone();
                async move { session.create_folder(&name).await }.boxed()
            })
            .await;

        match res {
            Ok(()) => {
                info!("created {} folder {folder}", self.side);
                Ok(true)
            }
            // the folder may have been created concurrently, or by a
            // create whose response got lost
            Err(err) if err.kind() == ErrorKind::Protocol => {
                if contains_folder(&self.list_folders().await?, folder) {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    pub async fn list_envelopes(&mut self, folder: &str, batch_size: usize) -> Result<Vec<Envelope>> {
        let name = folder.to_owned();
        self.exec(move |session| {
            let name = name.clone();
            async move { session.list_envelopes(&name, batch_size).await }.boxed()
        })
        .await
    }

    pub async fn fetch_message(&mut self, folder: &str, uid: u32) -> Result<RawMessage> {
        let name = folder.to_owned();
        self.exec(move |session| {
            let name = name.clone();
            async move { session.fetch_message(&name, uid).await }.boxed()
        })
        .await
    }

    /// Append the given message to the given folder.
    ///
    /// An append interrupted by a transient failure may have been
    /// stored before its response got lost. When the message has a
    /// Message-ID, a replayed append first checks whether the folder
    /// already holds it.
    pub async fn append_message(
        &mut self,
        folder: &str,
        msg: RawMessage,
        message_id: Option<&str>,
    ) -> Result<()> {
        let name = folder.to_owned();
        let id = message_id.map(ToOwned::to_owned);
        let msg = Arc::new(msg);
        let mut replay = false;

        self.exec(move |session| {
            let name = name.clone();
            let id = id.clone();
            let msg = msg.clone();
            let check = replay;
            replay = true;

            async move {
                if let Some(id) = id.as_deref().filter(|_| check) {
                    if session.contains_message_id(&name, id).await? {
                        debug!("message {id} already appended to folder {name}");
                        return Ok(());
                    }
                }

                session.append_message(&name, &msg).await
            }
            .boxed()
        })
        .await
    }

    pub async fn contains_message_id(&mut self, folder: &str, message_id: &str) -> Result<bool> {
        let name = folder.to_owned();
        let id = message_id.to_owned();
        self.exec(move |session| {
            let name = name.clone();
            let id = id.clone();
            async move { session.contains_message_id(&name, &id).await }.boxed()
        })
        .await
    }

    pub async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<()> {
        let name = folder.to_owned();
        let uids = uids.to_vec();
        self.exec(move |session| {
            let name = name.clone();
            let uids = uids.clone();
            async move { session.delete_messages(&name, &uids).await }.boxed()
        })
        .await
    }

    pub async fn move_messages(&mut self, folder: &str, uids: &[u32], to_folder: &str) -> Result<()> {
        let name = folder.to_owned();
        let to_name = to_folder.to_owned();
        let uids = uids.to_vec();
        self.exec(move |session| {
            let name = name.clone();
            let to_name = to_name.clone();
            let uids = uids.clone();
            async move { session.move_messages(&name, &uids, &to_name).await }.boxed()
        })
        .await
    }

    /// Log out the current session, if any. Failures are only logged.
    pub async fn logout(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("logging out from {} imap server", self.side);
            if let Err(err) = session.logout().await {
                warn!("cannot logout from {} imap server: {err}", self.side);
                debug!("{err:?}");
            }
        }
    }
}

fn contains_folder(folders: &[Folder], name: &str) -> bool {
    folders.iter().any(|folder| folder.name == name)
}

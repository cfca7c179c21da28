#![allow(dead_code)]

use std::{
    collections::HashSet,
    io,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use migrate::{
    fingerprint::{parse_message_id, Fingerprint},
    folder::Folder,
    imap::{Envelope, Error, ImapSession, ImapSessionBuilder, RawMessage, Result},
    migration::CancelHandle,
    retry::RetryPolicy,
};

/// Build a small RFC822 message with the given Message-ID.
pub fn message(id: &str) -> Vec<u8> {
    format!(
        "Message-ID: <{id}>\r\nFrom: alice@localhost\r\nTo: bob@localhost\r\nSubject: {id}\r\n\r\nHello from {id}!\r\n"
    )
    .into_bytes()
}

/// A retry policy fast enough for tests.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1)).with_max_delay(Duration::from_millis(5))
}

fn header(body: &[u8]) -> &[u8] {
    body.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| &body[..pos + 4])
        .unwrap_or(body)
}

#[derive(Clone, Debug)]
struct MockMessage {
    uid: u32,
    body: Vec<u8>,
    flags: Vec<String>,
}

impl MockMessage {
    fn message_id(&self) -> Option<String> {
        parse_message_id(header(&self.body))
    }
}

#[derive(Clone, Debug)]
struct MockFolder {
    name: String,
    messages: Vec<MockMessage>,
}

#[derive(Default)]
struct MockState {
    folders: Vec<MockFolder>,
    next_uid: u32,

    builds: u32,
    appends: usize,

    /// Amount of upcoming connections to refuse.
    connect_failures: u32,
    reject_login: bool,
    down: bool,

    over_quota: HashSet<String>,
    unselectable: HashSet<String>,
    uncreatable: HashSet<String>,
    lose_append_response: Option<usize>,
    down_after_appends: Option<usize>,
    cancel_after_appends: Option<(usize, CancelHandle)>,
}

impl MockState {
    fn folder(&self, name: &str) -> Option<&MockFolder> {
        self.folders.iter().find(|f| f.name == name)
    }

    fn folder_mut(&mut self, name: &str) -> Option<&mut MockFolder> {
        self.folders.iter_mut().find(|f| f.name == name)
    }

    fn push(&mut self, folder: &str, body: Vec<u8>, flags: Vec<String>) -> bool {
        self.next_uid += 1;
        let uid = self.next_uid;

        match self.folder_mut(folder) {
            Some(folder) => {
                folder.messages.push(MockMessage { uid, body, flags });
                true
            }
            None => false,
        }
    }
}

/// In-memory IMAP server.
///
/// Each clone shares the same mailbox, which lets tests inspect the
/// server after a migration.
#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_folders(folders: &[&str]) -> Self {
        let server = Self::new();
        for folder in folders {
            server.add_folder(folder);
        }
        server
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_folder(&self, name: &str) {
        self.lock().folders.push(MockFolder {
            name: name.to_owned(),
            messages: Vec::new(),
        });
    }

    pub fn add_message(&self, folder: &str, body: Vec<u8>) {
        assert!(self.lock().push(folder, body, vec!["\\Seen".into()]));
    }

    pub fn folders(&self) -> Vec<String> {
        self.lock().folders.iter().map(|f| f.name.clone()).collect()
    }

    /// Message-IDs of the given folder, in UID order.
    pub fn message_ids(&self, folder: &str) -> Vec<String> {
        self.lock()
            .folder(folder)
            .map(|f| f.messages.iter().filter_map(MockMessage::message_id).collect())
            .unwrap_or_default()
    }

    pub fn flags(&self, folder: &str, message_id: &str) -> Vec<String> {
        self.lock()
            .folder(folder)
            .and_then(|f| {
                f.messages
                    .iter()
                    .find(|m| m.message_id().as_deref() == Some(message_id))
                    .map(|m| m.flags.clone())
            })
            .unwrap_or_default()
    }

    pub fn builds(&self) -> u32 {
        self.lock().builds
    }

    pub fn appends(&self) -> usize {
        self.lock().appends
    }

    /// Refuse the given amount of upcoming connections.
    pub fn refuse_connections(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    pub fn reject_login(&self) {
        self.lock().reject_login = true;
    }

    /// Reject the append of the given message with a quota error.
    pub fn over_quota(&self, message_id: &str) {
        self.lock().over_quota.insert(message_id.to_owned());
    }

    /// Answer `NO` to the selection of the given folder.
    pub fn unselectable(&self, folder: &str) {
        self.lock().unselectable.insert(folder.to_owned());
    }

    /// Answer `NO` to the creation of the given folder.
    pub fn uncreatable(&self, folder: &str) {
        self.lock().uncreatable.insert(folder.to_owned());
    }

    /// Store the nth append, then drop the connection before
    /// answering it.
    pub fn lose_append_response(&self, n: usize) {
        self.lock().lose_append_response = Some(n);
    }

    /// Go down after the given amount of successful appends.
    pub fn go_down_after_appends(&self, n: usize) {
        self.lock().down_after_appends = Some(n);
    }

    pub fn restore(&self) {
        let mut state = self.lock();
        state.down = false;
        state.down_after_appends = None;
        state.connect_failures = 0;
    }

    /// Trigger the given cancellation handle after the given amount
    /// of successful appends.
    pub fn cancel_after_appends(&self, n: usize, cancel: CancelHandle) {
        self.lock().cancel_after_appends = Some((n, cancel));
    }
}

#[async_trait]
impl ImapSessionBuilder for MockServer {
    type Session = MockSession;

    async fn build(&self) -> Result<Self::Session> {
        let mut state = self.lock();
        state.builds += 1;

        if state.reject_login {
            let err = imap::Error::No("[AUTHENTICATIONFAILED] Invalid credentials".into());
            return Err(Error::LoginError(err, "alice".into()));
        }

        if state.down || state.connect_failures > 0 {
            state.connect_failures = state.connect_failures.saturating_sub(1);
            let err = io::Error::from(io::ErrorKind::ConnectionRefused);
            return Err(Error::ConnectTcpError(err, "localhost".into(), 143));
        }

        Ok(MockSession {
            state: self.state.clone(),
        })
    }
}

pub struct MockSession {
    state: Arc<Mutex<MockState>>,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }
}

#[async_trait]
impl ImapSession for MockSession {
    async fn list_folders(&mut self) -> Result<Vec<Folder>> {
        let state = self.lock();

        if state.down {
            return Err(Error::ListFoldersError(imap::Error::ConnectionLost));
        }

        Ok(state
            .folders
            .iter()
            .map(|f| Folder {
                name: f.name.clone(),
                delimiter: Some("/".into()),
            })
            .collect())
    }

    async fn create_folder(&mut self, folder: &str) -> Result<()> {
        let mut state = self.lock();

        if state.down {
            let err = imap::Error::ConnectionLost;
            return Err(Error::CreateFolderError(err, folder.into()));
        }

        if state.uncreatable.contains(folder) {
            let err = imap::Error::No("[CANNOT] Invalid mailbox name".into());
            return Err(Error::CreateFolderError(err, folder.into()));
        }

        if state.folder(folder).is_some() {
            let err = imap::Error::No("[ALREADYEXISTS] Mailbox already exists".into());
            return Err(Error::CreateFolderError(err, folder.into()));
        }

        state.folders.push(MockFolder {
            name: folder.to_owned(),
            messages: Vec::new(),
        });

        Ok(())
    }

    async fn list_envelopes(&mut self, folder: &str, _batch_size: usize) -> Result<Vec<Envelope>> {
        let state = self.lock();

        if state.down {
            let err = imap::Error::ConnectionLost;
            return Err(Error::SearchMessagesError(err, folder.into()));
        }

        if state.unselectable.contains(folder) {
            let err = imap::Error::No("[NONEXISTENT] Unknown mailbox".into());
            return Err(Error::SelectFolderError(err, folder.into()));
        }

        let Some(mailbox) = state.folder(folder) else {
            let err = imap::Error::No("[NONEXISTENT] Unknown mailbox".into());
            return Err(Error::SelectFolderError(err, folder.into()));
        };

        Ok(mailbox
            .messages
            .iter()
            .map(|msg| {
                let header = header(&msg.body);
                let size = msg.body.len() as u32;
                Envelope {
                    uid: msg.uid,
                    size,
                    message_id: parse_message_id(header),
                    fingerprint: Fingerprint::compute(header, size),
                }
            })
            .collect())
    }

    async fn fetch_message(&mut self, folder: &str, uid: u32) -> Result<RawMessage> {
        let state = self.lock();

        if state.down {
            let err = imap::Error::ConnectionLost;
            return Err(Error::FetchMessageError(err, folder.into(), uid));
        }

        state
            .folder(folder)
            .and_then(|f| f.messages.iter().find(|m| m.uid == uid))
            .map(|msg| RawMessage {
                body: msg.body.clone(),
                flags: msg.flags.clone(),
                internal_date: None,
            })
            .ok_or_else(|| Error::MessageNotFoundError(folder.into(), uid))
    }

    async fn append_message(&mut self, folder: &str, msg: &RawMessage) -> Result<()> {
        let mut state = self.lock();

        if state.down {
            let err = imap::Error::ConnectionLost;
            return Err(Error::AppendMessageError(err, folder.into()));
        }

        if let Some(id) = parse_message_id(header(&msg.body)) {
            if state.over_quota.contains(&id) {
                let err = imap::Error::No("[OVERQUOTA] Quota exceeded".into());
                return Err(Error::AppendMessageError(err, folder.into()));
            }
        }

        if !state.push(folder, msg.body.clone(), msg.flags.clone()) {
            let err = imap::Error::No("[TRYCREATE] Unknown mailbox".into());
            return Err(Error::AppendMessageError(err, folder.into()));
        }

        state.appends += 1;
        let appends = state.appends;

        if state.down_after_appends == Some(appends) {
            state.down = true;
        }

        if let Some((n, cancel)) = state.cancel_after_appends.as_ref() {
            if *n == appends {
                cancel.cancel();
            }
        }

        if state.lose_append_response == Some(appends) {
            state.lose_append_response = None;
            let err = imap::Error::ConnectionLost;
            return Err(Error::AppendMessageError(err, folder.into()));
        }

        Ok(())
    }

    async fn contains_message_id(&mut self, folder: &str, message_id: &str) -> Result<bool> {
        let state = self.lock();

        if state.down {
            let err = imap::Error::ConnectionLost;
            return Err(Error::SearchMessageIdError(err, folder.into(), message_id.into()));
        }

        Ok(state
            .folder(folder)
            .map(|f| {
                f.messages
                    .iter()
                    .any(|m| m.message_id().as_deref() == Some(message_id))
            })
            .unwrap_or_default())
    }

    async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<()> {
        let mut state = self.lock();

        if state.down {
            let err = imap::Error::ConnectionLost;
            return Err(Error::DeleteMessagesError(err, folder.into(), String::new()));
        }

        if let Some(folder) = state.folder_mut(folder) {
            folder.messages.retain(|m| !uids.contains(&m.uid));
        }

        Ok(())
    }

    async fn move_messages(&mut self, folder: &str, uids: &[u32], to_folder: &str) -> Result<()> {
        let mut state = self.lock();

        let map_err =
            |err| Error::MoveMessagesError(err, folder.into(), String::new(), to_folder.into());

        if state.down {
            return Err(map_err(imap::Error::ConnectionLost));
        }

        if state.folder(to_folder).is_none() {
            return Err(map_err(imap::Error::No("[TRYCREATE] Unknown mailbox".into())));
        }

        let moved: Vec<MockMessage> = match state.folder_mut(folder) {
            Some(folder) => {
                let (moved, kept): (Vec<_>, Vec<_>) = folder
                    .messages
                    .drain(..)
                    .partition(|m| uids.contains(&m.uid));
                folder.messages = kept;
                moved
            }
            None => Vec::new(),
        };

        for msg in moved {
            state.push(to_folder, msg.body, msg.flags);
        }

        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        Ok(())
    }
}

//! # IMAP
//!
//! Module dedicated to the IMAP capabilities the migration relies
//! on. The engine only talks to the [`ImapSession`] trait, which is
//! implemented for real servers by [`ImapClient`] and can be
//! implemented by in-memory doubles for testing purposes.

mod client;
pub mod config;
mod error;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::{fingerprint::Fingerprint, folder::Folder};

#[doc(inline)]
pub use self::{
    client::{ImapClient, ImapClientBuilder, ImapSessionStream},
    error::{Error, Result},
};

/// The default amount of envelopes fetched per IMAP command.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// A message as seen during the enumeration of a folder.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Envelope {
    /// The UID of the message, only valid for the current session.
    pub uid: u32,

    /// The RFC822 size of the message.
    pub size: u32,

    /// The Message-ID of the message, without angle brackets.
    pub message_id: Option<String>,

    /// The fingerprint computed from the header block and the size.
    pub fingerprint: Fingerprint,
}

/// A full message, as fetched from the source and appended to the
/// destination.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawMessage {
    /// The raw RFC822 message.
    pub body: Vec<u8>,

    /// The flags of the message, `\Recent` excluded.
    pub flags: Vec<String>,

    /// The internal date of the message.
    pub internal_date: Option<DateTime<FixedOffset>>,
}

/// The IMAP session builder.
///
/// A builder must be able to build as many sessions as needed: the
/// connection manager builds a new one after every transient
/// failure.
#[async_trait]
pub trait ImapSessionBuilder: Send + Sync {
    type Session: ImapSession + 'static;

    /// Connect and authenticate a new session.
    async fn build(&self) -> Result<Self::Session>;
}

/// The IMAP session.
///
/// Functions taking a folder select it first when it is not the
/// currently selected one.
#[async_trait]
pub trait ImapSession: Send {
    /// List selectable folders, in server order.
    async fn list_folders(&mut self) -> Result<Vec<Folder>>;

    async fn create_folder(&mut self, folder: &str) -> Result<()>;

    /// List the envelopes of the given folder, fetching headers by
    /// chunks of `batch_size` messages.
    async fn list_envelopes(&mut self, folder: &str, batch_size: usize) -> Result<Vec<Envelope>>;

    async fn fetch_message(&mut self, folder: &str, uid: u32) -> Result<RawMessage>;

    async fn append_message(&mut self, folder: &str, msg: &RawMessage) -> Result<()>;

    /// Return `true` if the given folder contains a message with the
    /// given Message-ID.
    async fn contains_message_id(&mut self, folder: &str, message_id: &str) -> Result<bool>;

    /// Flag the given messages as deleted then expunge the folder.
    async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<()>;

    async fn move_messages(&mut self, folder: &str, uids: &[u32], to_folder: &str) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

/// Build a compact IMAP sequence set out of the given UIDs.
pub fn to_sequence_set(uids: &[u32]) -> String {
    let mut uids = uids.to_vec();
    uids.sort_unstable();
    uids.dedup();

    let mut ranges: Vec<(u32, u32)> = Vec::new();
    for uid in uids {
        match ranges.last_mut() {
            Some((_, end)) if *end + 1 == uid => *end = uid,
            _ => ranges.push((uid, uid)),
        }
    }

    ranges
        .into_iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{start}:{end}")
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::to_sequence_set;

    #[test]
    fn sequence_set() {
        assert_eq!(to_sequence_set(&[]), "");
        assert_eq!(to_sequence_set(&[3]), "3");
        assert_eq!(to_sequence_set(&[5, 1, 2, 3, 7, 8, 2]), "1:3,5,7:8");
    }
}

use std::{io, net::TcpStream, result};

use thiserror::Error;

use crate::ErrorKind;

/// The global `Result` alias of the module.
pub type Result<T> = result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    // Session
    #[error("cannot get imap password")]
    GetPasswdError(#[source] secret::Error),
    #[error("cannot get imap password: password is empty")]
    GetPasswdEmptyError,
    #[error("cannot resolve imap server address {1}:{2}")]
    ResolveAddrError(#[source] io::Error, String, u16),
    #[error("cannot connect to imap server {1}:{2}")]
    ConnectTcpError(#[source] io::Error, String, u16),
    #[error("cannot configure imap socket timeout")]
    SetSocketTimeoutError(#[source] io::Error),
    #[error("cannot create tls connector")]
    CreateTlsConnectorError(#[source] native_tls::Error),
    #[error("cannot perform tls handshake with imap server {1}")]
    TlsHandshakeError(#[source] native_tls::HandshakeError<TcpStream>, String),
    #[error("cannot start tls with imap server {0}: {1}")]
    StartTlsError(String, String),
    #[error("cannot start tls with imap server {1}")]
    StartTlsIoError(#[source] io::Error, String),
    #[error("cannot read imap server greeting")]
    ReadGreetingError(#[source] imap::Error),
    #[error("cannot login to imap server as {1}")]
    LoginError(#[source] imap::Error, String),
    #[error("cannot logout from imap server")]
    LogoutError(#[source] imap::Error),
    #[error("cannot run blocking imap task")]
    JoinTaskError(#[source] tokio::task::JoinError),
    #[error("cannot use imap session: session is closed")]
    SessionClosedError,

    // Folders
    #[error("cannot list imap folders")]
    ListFoldersError(#[source] imap::Error),
    #[error("cannot create imap folder {1}")]
    CreateFolderError(#[source] imap::Error, String),
    #[error("cannot select imap folder {1}")]
    SelectFolderError(#[source] imap::Error, String),
    #[error("cannot expunge imap folder {1}")]
    ExpungeFolderError(#[source] imap::Error, String),

    // Messages
    #[error("cannot search imap messages of folder {1}")]
    SearchMessagesError(#[source] imap::Error, String),
    #[error("cannot fetch imap envelopes {2} of folder {1}")]
    FetchEnvelopesError(#[source] imap::Error, String, String),
    #[error("cannot fetch imap message {2} of folder {1}")]
    FetchMessageError(#[source] imap::Error, String, u32),
    #[error("cannot find imap message {1} in folder {0}")]
    MessageNotFoundError(String, u32),
    #[error("cannot get body of imap message {1} from folder {0}")]
    GetMessageBodyError(String, u32),
    #[error("cannot append imap message to folder {1}")]
    AppendMessageError(#[source] imap::Error, String),
    #[error("cannot search message id {2} in imap folder {1}")]
    SearchMessageIdError(#[source] imap::Error, String, String),
    #[error("cannot add deleted flag to imap messages {2} of folder {1}")]
    DeleteMessagesError(#[source] imap::Error, String, String),
    #[error("cannot move imap messages {2} from folder {1} to folder {3}")]
    MoveMessagesError(#[source] imap::Error, String, String, String),
}

impl Error {
    /// Classify the error, so the caller knows whether to retry,
    /// skip the message, or abort.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::GetPasswdError(_) | Self::GetPasswdEmptyError => ErrorKind::Auth,
            Self::LoginError(err, _) => match err {
                imap::Error::No(_) | imap::Error::Bad(_) => ErrorKind::Auth,
                err => classify(err),
            },

            Self::ResolveAddrError(..)
            | Self::ConnectTcpError(..)
            | Self::SetSocketTimeoutError(_)
            | Self::TlsHandshakeError(..)
            | Self::StartTlsError(..)
            | Self::StartTlsIoError(..)
            | Self::JoinTaskError(_)
            | Self::CreateTlsConnectorError(_)
            | Self::SessionClosedError => ErrorKind::Connect,

            Self::ReadGreetingError(err)
            | Self::LogoutError(err)
            | Self::ListFoldersError(err)
            | Self::CreateFolderError(err, _)
            | Self::SelectFolderError(err, _)
            | Self::ExpungeFolderError(err, _)
            | Self::SearchMessagesError(err, _)
            | Self::FetchEnvelopesError(err, _, _)
            | Self::FetchMessageError(err, _, _)
            | Self::AppendMessageError(err, _)
            | Self::SearchMessageIdError(err, _, _)
            | Self::DeleteMessagesError(err, _, _)
            | Self::MoveMessagesError(err, _, _, _) => classify(err),

            Self::MessageNotFoundError(..) | Self::GetMessageBodyError(..) => ErrorKind::Protocol,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Connect
    }
}

/// Classify a raw IMAP error.
///
/// Network-level failures are transient. Tagged `NO` responses are
/// permanent, except the ones carrying a response code telling the
/// client to come back later.
fn classify(err: &imap::Error) -> ErrorKind {
    match err {
        imap::Error::Io(_)
        | imap::Error::ConnectionLost
        | imap::Error::Tls(_)
        | imap::Error::TlsHandshake(_) => ErrorKind::Connect,
        imap::Error::No(msg) | imap::Error::Bad(msg) if is_temporary_response(msg) => {
            ErrorKind::Connect
        }
        _ => ErrorKind::Protocol,
    }
}

fn is_temporary_response(msg: &str) -> bool {
    let msg = msg.to_ascii_uppercase();
    ["[UNAVAILABLE]", "[INUSE]", "[LIMIT]"]
        .iter()
        .any(|code| msg.contains(code))
}

#[cfg(test)]
mod tests {
    use std::io;

    use crate::ErrorKind;

    use super::Error;

    #[test]
    fn classification() {
        let err = Error::AppendMessageError(
            imap::Error::No("[OVERQUOTA] Quota exceeded".into()),
            "Migrated/INBOX".into(),
        );
        assert_eq!(err.kind(), ErrorKind::Protocol);

        let err = Error::SelectFolderError(
            imap::Error::No("[UNAVAILABLE] Try again later".into()),
            "INBOX".into(),
        );
        assert_eq!(err.kind(), ErrorKind::Connect);

        let err = Error::FetchMessageError(imap::Error::ConnectionLost, "INBOX".into(), 1);
        assert!(err.is_transient());

        let err = Error::ListFoldersError(imap::Error::Io(io::ErrorKind::TimedOut.into()));
        assert!(err.is_transient());

        let err = Error::LoginError(
            imap::Error::No("[AUTHENTICATIONFAILED] Invalid credentials".into()),
            "alice".into(),
        );
        assert_eq!(err.kind(), ErrorKind::Auth);

        let err = Error::LoginError(imap::Error::ConnectionLost, "alice".into());
        assert_eq!(err.kind(), ErrorKind::Connect);
    }
}

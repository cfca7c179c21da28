//! # IMAP client
//!
//! Implementation of the IMAP capabilities on top of the blocking
//! [`imap`] crate. Every IMAP command runs on the tokio blocking
//! thread pool and is bounded by the socket timeouts of the
//! endpoint configuration.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    sync::Arc,
};

use async_trait::async_trait;
use imap::{
    types::{Flag, NameAttribute},
    Client, Session,
};
use native_tls::{TlsConnector, TlsStream as NativeTlsStream};
use tokio::task::spawn_blocking;
use tracing::{debug, info, trace, warn, Level};
use utf7_imap::{decode_utf7_imap as decode_utf7, encode_utf7_imap as encode_utf7};

use crate::{
    fingerprint::{parse_message_id, Fingerprint},
    folder::Folder,
};

use super::{
    config::{ImapConfig, ImapEncryptionKind},
    to_sequence_set, Envelope, Error, ImapSession, ImapSessionBuilder, RawMessage, Result,
};

const ENVELOPE_QUERY: &str = "(UID RFC822.SIZE BODY.PEEK[HEADER])";
const MESSAGE_QUERY: &str = "(UID FLAGS INTERNALDATE BODY.PEEK[])";

/// Tag used for the STARTTLS command, sent before the [`imap`]
/// client takes over the stream.
const STARTTLS_TAG: &str = "a0";

/// Alias for the TLS/SSL stream, which is basically a
/// [std::net::TcpStream] wrapped by a [native_tls::TlsStream].
pub type TlsStream = NativeTlsStream<TcpStream>;

/// Wrapper around TLS/SSL and TCP streams.
///
/// Since [imap::Session] needs a generic stream type, this wrapper is
/// needed to use the same session type for every encryption kind.
#[derive(Debug)]
pub enum ImapSessionStream {
    Tls(TlsStream),
    Tcp(TcpStream),
}

impl Read for ImapSessionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for ImapSessionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}

/// The IMAP client builder.
#[derive(Clone, Debug)]
pub struct ImapClientBuilder {
    config: Arc<ImapConfig>,
}

impl ImapClientBuilder {
    pub fn new(config: impl Into<Arc<ImapConfig>>) -> Self {
        Self {
            config: config.into(),
        }
    }
}

#[async_trait]
impl ImapSessionBuilder for ImapClientBuilder {
    type Session = ImapClient;

    async fn build(&self) -> Result<Self::Session> {
        info!(
            "building new imap session for {}@{}:{}",
            self.config.login, self.config.host, self.config.port
        );

        let passwd = self.config.build_password().await?;
        let config = self.config.clone();

        let session = spawn_blocking(move || build_session(&config, &passwd))
            .await
            .map_err(Error::JoinTaskError)??;

        Ok(ImapClient {
            session: Some(session),
            selected: None,
        })
    }
}

/// The IMAP client, owning one authenticated session.
pub struct ImapClient {
    session: Option<Session<ImapSessionStream>>,
    selected: Option<String>,
}

impl ImapClient {
    /// Run the given blocking action on the session, from the tokio
    /// blocking thread pool.
    async fn exec<T, F>(&mut self, action: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session<ImapSessionStream>) -> Result<T> + Send + 'static,
    {
        let mut session = self.session.take().ok_or(Error::SessionClosedError)?;

        let (session, res) = spawn_blocking(move || {
            let res = action(&mut session);
            (session, res)
        })
        .await
        .map_err(Error::JoinTaskError)?;

        self.session = Some(session);
        res
    }

    async fn select(&mut self, folder: &str) -> Result<()> {
        if self.selected.as_deref() == Some(folder) {
            return Ok(());
        }

        debug!("selecting imap folder {folder}");
        self.selected = None;

        let name = folder.to_owned();
        self.exec(move |session| {
            session
                .select(encode_utf7(name.clone()))
                .map_err(|err| Error::SelectFolderError(err, name))
        })
        .await?;

        self.selected = Some(folder.to_owned());
        Ok(())
    }
}

#[async_trait]
impl ImapSession for ImapClient {
    async fn list_folders(&mut self) -> Result<Vec<Folder>> {
        info!("listing imap folders");

        let folders = self
            .exec(|session| {
                let names = session
                    .list(Some(""), Some("*"))
                    .map_err(Error::ListFoldersError)?;

                let folders = names
                    .iter()
                    .filter(|name| {
                        !name
                            .attributes()
                            .iter()
                            .any(|attr| matches!(attr, NameAttribute::NoSelect))
                    })
                    .map(|name| Folder {
                        name: decode_utf7(name.name().into()),
                        delimiter: name.delimiter().map(ToOwned::to_owned),
                    })
                    .collect::<Vec<_>>();

                Ok(folders)
            })
            .await?;
        trace!("imap folders: {folders:?}");

        Ok(folders)
    }

    async fn create_folder(&mut self, folder: &str) -> Result<()> {
        info!("creating imap folder {folder}");

        let folder_encoded = encode_utf7(folder.to_owned());
        trace!("utf7 encoded folder: {folder_encoded}");

        let name = folder.to_owned();
        self.exec(move |session| {
            session
                .create(folder_encoded)
                .map_err(|err| Error::CreateFolderError(err, name))
        })
        .await
    }

    async fn list_envelopes(&mut self, folder: &str, batch_size: usize) -> Result<Vec<Envelope>> {
        info!("listing imap envelopes of folder {folder}");
        self.select(folder).await?;

        let name = folder.to_owned();
        let batch_size = batch_size.max(1);

        self.exec(move |session| {
            let mut uids: Vec<u32> = session
                .uid_search("ALL")
                .map_err(|err| Error::SearchMessagesError(err, name.clone()))?
                .into_iter()
                .collect();
            uids.sort_unstable();
            debug!("found {} messages in folder {name}", uids.len());

            let mut envelopes = Vec::with_capacity(uids.len());

            for chunk in uids.chunks(batch_size) {
                let uids = to_sequence_set(chunk);
                trace!("fetching envelopes {uids} of folder {name}");

                let fetches = session
                    .uid_fetch(&uids, ENVELOPE_QUERY)
                    .map_err(|err| Error::FetchEnvelopesError(err, name.clone(), uids.clone()))?;

                for fetch in fetches.iter() {
                    let Some(uid) = fetch.uid else {
                        warn!("skipping envelope without uid from folder {name}");
                        continue;
                    };

                    let header = fetch.header().unwrap_or_default();
                    let size = fetch.size.unwrap_or_default();

                    envelopes.push(Envelope {
                        uid,
                        size,
                        message_id: parse_message_id(header),
                        fingerprint: Fingerprint::compute(header, size),
                    });
                }
            }

            envelopes.sort_by_key(|envelope| envelope.uid);
            Ok(envelopes)
        })
        .await
    }

    async fn fetch_message(&mut self, folder: &str, uid: u32) -> Result<RawMessage> {
        debug!("fetching imap message {uid} of folder {folder}");
        self.select(folder).await?;

        let name = folder.to_owned();
        self.exec(move |session| {
            let fetches = session
                .uid_fetch(uid.to_string(), MESSAGE_QUERY)
                .map_err(|err| Error::FetchMessageError(err, name.clone(), uid))?;

            let fetch = fetches
                .iter()
                .find(|fetch| fetch.uid == Some(uid))
                .ok_or_else(|| Error::MessageNotFoundError(name.clone(), uid))?;

            let body = fetch
                .body()
                .ok_or_else(|| Error::GetMessageBodyError(name.clone(), uid))?
                .to_vec();

            let flags = fetch
                .flags()
                .iter()
                .filter(|flag| !matches!(flag, Flag::Recent))
                .map(ToString::to_string)
                .collect();

            Ok(RawMessage {
                body,
                flags,
                internal_date: fetch.internal_date(),
            })
        })
        .await
    }

    async fn append_message(&mut self, folder: &str, msg: &RawMessage) -> Result<()> {
        debug!("appending imap message to folder {folder}");

        let folder_encoded = encode_utf7(folder.to_owned());
        let name = folder.to_owned();
        let msg = msg.clone();

        self.exec(move |session| {
            let flags: Vec<Flag> = msg.flags.into_iter().map(Flag::from).collect();

            session
                .append_with_flags_and_date(folder_encoded, &msg.body, &flags, msg.internal_date)
                .map_err(|err| Error::AppendMessageError(err, name))
        })
        .await
    }

    async fn contains_message_id(&mut self, folder: &str, message_id: &str) -> Result<bool> {
        debug!("searching message id {message_id} in folder {folder}");
        self.select(folder).await?;

        let name = folder.to_owned();
        let id = message_id.to_owned();
        let query = format!("HEADER Message-ID {}", quote(message_id));

        self.exec(move |session| {
            let uids = session
                .uid_search(query)
                .map_err(|err| Error::SearchMessageIdError(err, name, id))?;
            Ok(!uids.is_empty())
        })
        .await
    }

    async fn delete_messages(&mut self, folder: &str, uids: &[u32]) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }

        info!("deleting {} imap messages from folder {folder}", uids.len());
        self.select(folder).await?;

        let name = folder.to_owned();
        let uids = to_sequence_set(uids);

        self.exec(move |session| {
            session
                .uid_store(&uids, "+FLAGS (\\Deleted)")
                .map_err(|err| Error::DeleteMessagesError(err, name.clone(), uids))?;
            session
                .expunge()
                .map_err(|err| Error::ExpungeFolderError(err, name))?;
            Ok(())
        })
        .await
    }

    async fn move_messages(&mut self, folder: &str, uids: &[u32], to_folder: &str) -> Result<()> {
        if uids.is_empty() {
            return Ok(());
        }

        info!(
            "moving {} imap messages from folder {folder} to {to_folder}",
            uids.len()
        );
        self.select(folder).await?;

        let name = folder.to_owned();
        let to_name = to_folder.to_owned();
        let to_folder_encoded = encode_utf7(to_folder.to_owned());
        let uids = to_sequence_set(uids);

        self.exec(move |session| {
            let map_err =
                |err| Error::MoveMessagesError(err, name.clone(), uids.clone(), to_name.clone());

            let has_move = session
                .capabilities()
                .map(|caps| caps.has_str("MOVE"))
                .unwrap_or_default();

            if has_move {
                session.uid_mv(&uids, &to_folder_encoded).map_err(map_err)?;
            } else {
                debug!("server does not support MOVE, falling back to COPY");
                session.uid_copy(&uids, &to_folder_encoded).map_err(map_err)?;
                session
                    .uid_store(&uids, "+FLAGS (\\Deleted)")
                    .map_err(map_err)?;
                session
                    .expunge()
                    .map_err(|err| Error::ExpungeFolderError(err, name.clone()))?;
            }

            Ok(())
        })
        .await
    }

    async fn logout(&mut self) -> Result<()> {
        debug!("logging out from imap session");
        self.selected = None;

        let res = self
            .exec(|session| session.logout().map_err(Error::LogoutError))
            .await;
        self.session = None;

        res
    }
}

/// Connect, secure and authenticate a new blocking IMAP session.
fn build_session(config: &ImapConfig, passwd: &str) -> Result<Session<ImapSessionStream>> {
    let host = config.host.as_str();
    let port = config.port;
    let timeout = config.timeout();

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|err| Error::ResolveAddrError(err, host.to_owned(), port))?;

    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
    let mut tcp = None;

    for addr in addrs {
        debug!("connecting to {addr}");
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(err) => last_err = err,
        }
    }

    let tcp = tcp.ok_or_else(|| Error::ConnectTcpError(last_err, host.to_owned(), port))?;
    tcp.set_read_timeout(Some(timeout))
        .map_err(Error::SetSocketTimeoutError)?;
    tcp.set_write_timeout(Some(timeout))
        .map_err(Error::SetSocketTimeoutError)?;

    let encryption = config.encryption.clone().unwrap_or_default();
    debug!("using {encryption} encryption");

    let client = match encryption {
        ImapEncryptionKind::Tls => {
            let mut client = Client::new(ImapSessionStream::Tls(tls_handshake(host, tcp)?));
            client.read_greeting().map_err(Error::ReadGreetingError)?;
            client
        }
        ImapEncryptionKind::StartTls => {
            let tcp = start_tls(host, tcp)?;
            Client::new(ImapSessionStream::Tls(tls_handshake(host, tcp)?))
        }
        ImapEncryptionKind::None => {
            let mut client = Client::new(ImapSessionStream::Tcp(tcp));
            client.read_greeting().map_err(Error::ReadGreetingError)?;
            client
        }
    };

    let mut session = client
        .login(&config.login, passwd)
        .map_err(|res| Error::LoginError(res.0, config.login.clone()))?;
    session.debug = tracing::enabled!(Level::TRACE);

    Ok(session)
}

fn tls_handshake(host: &str, tcp: TcpStream) -> Result<TlsStream> {
    let connector = TlsConnector::new().map_err(Error::CreateTlsConnectorError)?;
    connector
        .connect(host, tcp)
        .map_err(|err| Error::TlsHandshakeError(err, host.to_owned()))
}

/// Read the server greeting then upgrade the plain connection using
/// the STARTTLS command.
fn start_tls(host: &str, tcp: TcpStream) -> Result<TcpStream> {
    let io_err = |err| Error::StartTlsIoError(err, host.to_owned());

    {
        let mut reader = BufReader::new(&tcp);
        let mut line = String::new();

        reader.read_line(&mut line).map_err(io_err)?;
        trace!("imap greeting: {}", line.trim_end());

        (&tcp)
            .write_all(format!("{STARTTLS_TAG} STARTTLS\r\n").as_bytes())
            .map_err(io_err)?;

        loop {
            line.clear();

            if reader.read_line(&mut line).map_err(io_err)? == 0 {
                let err = io::Error::from(io::ErrorKind::UnexpectedEof);
                return Err(io_err(err));
            }

            trace!("imap starttls response: {}", line.trim_end());

            if let Some(status) = line.strip_prefix(STARTTLS_TAG) {
                if !status.trim_start().to_ascii_uppercase().starts_with("OK") {
                    let reason = line.trim_end().to_owned();
                    return Err(Error::StartTlsError(host.to_owned(), reason));
                }
                break;
            }
        }
    }

    Ok(tcp)
}

/// Quote the given string as an IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
